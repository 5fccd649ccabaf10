//! Command-line interface.

mod commands;
mod helpers;

pub use commands::run;

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}
