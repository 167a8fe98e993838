//! PropLine: line-drift confidence scoring and streak progression engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod analysis;
pub mod ledger;
pub mod confidence;
pub mod streak;
pub mod engine;
pub mod storage;
pub mod dashboard;
