//! glsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the glsync workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `CommonError` for configuration and file I/O failures
//! - **Logging**: `tracing` subscriber setup driven by `LogConfig`
//!
//! # Example
//!
//! ```no_run
//! use glsync_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
