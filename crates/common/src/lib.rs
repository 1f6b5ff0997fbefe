//! FrameRec Common Utilities
//!
//! Shared infrastructure for all FrameRec crates:
//! - Error types and result aliases
//! - Frame rates and session clocks
//! - Tracing/logging initialization
//! - Configuration loading

pub mod config;
pub mod error;
pub mod logging;
pub mod timebase;

pub use config::*;
pub use error::*;
pub use timebase::*;
