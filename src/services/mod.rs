//! Service layer for errtriage business logic.
//!
//! This module contains domain logic separated from UI concerns.
//! Services can be used by the CLI, the scheduler, or other interfaces.

pub mod collector;
pub mod export;
pub mod query;

pub use collector::{CollectError, CollectReport, LogCollector};
pub use export::{export_logs, ExportFormat};
pub use query::{LogFilter, LogQueryService};
