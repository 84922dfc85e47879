//! Supported languages and their sandbox profiles
//!
//! The set of languages is closed: a submission's language tag is parsed into
//! [`Language`] once, at the boundary, and everything downstream dispatches on
//! the enum. Per-language sandbox details (image, limit adjustments) come from
//! a TOML file so they can change without a rebuild.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

use crate::error::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    JavaScript,
}

/// How the sandbox turns a source file into a running program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// A compile step runs first; its failure is a compilation error.
    Compiled,
    /// The source is handed straight to an interpreter.
    Interpreted,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::C,
        Language::Cpp,
        Language::Java,
        Language::Python,
        Language::JavaScript,
    ];

    pub fn strategy(&self) -> ExecutionStrategy {
        match self {
            Language::C | Language::Cpp | Language::Java => ExecutionStrategy::Compiled,
            Language::Python | Language::JavaScript => ExecutionStrategy::Interpreted,
        }
    }

    /// Canonical source file name. The sandbox image picks its compiler or
    /// interpreter from the extension, and Java needs the class name to match.
    pub fn source_file(&self) -> &'static str {
        match self {
            Language::C => "main.c",
            Language::Cpp => "main.cpp",
            Language::Java => "Main.java",
            Language::Python => "main.py",
            Language::JavaScript => "main.js",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" | "c11" | "c17" => Ok(Language::C),
            "cpp" | "c++" | "cpp17" | "cpp20" | "g++" => Ok(Language::Cpp),
            "java" | "java17" => Ok(Language::Java),
            "python" | "python3" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            _ => Err(SandboxError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Sandbox settings for one language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageProfile {
    /// Container image holding the toolchain and the judge scripts
    pub image: String,
    /// Time limit multiplier and bonus: (multiplier, bonus_seconds)
    /// actual_time = base_time * multiplier + bonus
    pub time_limit: (f64, f64),
    /// Extra memory granted on top of the problem limit
    pub memory_bonus_mb: u32,
}

impl LanguageProfile {
    /// Effective time limit in seconds for this language
    pub fn calculate_time_limit(&self, base_secs: f64) -> f64 {
        let (multiplier, bonus) = self.time_limit;
        base_secs * multiplier + bonus
    }

    /// Effective memory limit in MB for this language
    pub fn calculate_memory_limit(&self, base_mb: u32) -> u32 {
        base_mb.saturating_add(self.memory_bonus_mb)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageProfile {
    image: String,
    #[serde(default)]
    time_limit: Vec<f64>,
    #[serde(default)]
    memory_bonus_mb: u32,
}

/// Profiles for every supported language
#[derive(Debug, Clone)]
pub struct LanguageProfiles {
    profiles: HashMap<Language, LanguageProfile>,
}

const DEFAULT_PROFILES: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));

impl LanguageProfiles {
    /// Profiles compiled into the binary
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_toml(DEFAULT_PROFILES)
    }

    /// Load from a TOML file, or fall back to the built-in profiles
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read language config {:?}", path))?;
                Self::from_toml(&content)
            }
            None => Self::builtin(),
        }
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let raw: HashMap<String, RawLanguageProfile> =
            toml::from_str(content).context("Invalid language configuration")?;

        let mut profiles = HashMap::new();
        for (name, raw) in raw {
            let language = Language::from_str(&name)?;
            let time_limit = match raw.time_limit.as_slice() {
                [] => (1.0, 0.0),
                [multiplier, bonus] => (*multiplier, *bonus),
                other => anyhow::bail!("Invalid time limit for {}: {:?}", name, other),
            };
            profiles.insert(
                language,
                LanguageProfile {
                    image: raw.image,
                    time_limit,
                    memory_bonus_mb: raw.memory_bonus_mb,
                },
            );
        }

        if let Some(missing) = Language::ALL.iter().find(|l| !profiles.contains_key(*l)) {
            anyhow::bail!("Language configuration has no profile for {}", missing);
        }

        Ok(Self { profiles })
    }

    pub fn get(&self, language: Language) -> Option<&LanguageProfile> {
        self.profiles.get(&language)
    }
}
