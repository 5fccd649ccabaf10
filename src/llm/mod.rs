//! Analysis service integration.

mod client;

pub use client::{
    parse_analysis, AnalysisFailure, LlmClient, LlmConfig, LlmError, LlmProvider, LogAnalyzer,
};
