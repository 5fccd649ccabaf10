//! errtriage - error log collection and AI-assisted triage.
//!
//! Collected error logs are stored in one JSON partition per day. A daily
//! run sends the previous day's unanalyzed logs to an analysis service,
//! merges the classifications back, and hands failures to a bounded retry
//! loop.

pub mod cli;
pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod sync;
