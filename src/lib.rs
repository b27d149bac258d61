//! SWARM: sentiment-driven agent spawner with position supervision.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analysis;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod execution;
pub mod llm;
pub mod sentiment;
pub mod strategy;
pub mod types;
