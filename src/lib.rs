//! Contest judge worker
//!
//! Takes queued submissions, runs them against their problem's test cases in
//! a container sandbox and records verdict and score.

pub mod checker;
pub mod config;
pub mod error;
pub mod judger;
pub mod languages;
pub mod models;
pub mod processor;
pub mod runner;
pub mod sandbox;
pub mod store;
pub mod verdict;
pub mod worker;
