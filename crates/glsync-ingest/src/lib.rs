//! glsync Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental extraction of GitLab resources into a stream of SCHEMA,
//! RECORD and STATE messages.
//!
//! # Overview
//!
//! - **Client**: authenticated GitLab REST calls with retry/backoff and
//!   `X-Next-Page` pagination
//! - **Streams**: full-table and incremental variants driven by static
//!   resource definitions
//! - **State**: per-stream bookmarks that never move backwards
//! - **Orchestrator**: parent/child sequencing, schema emission and
//!   `currentlySyncing` checkpoints
//!
//! # Example
//!
//! ```no_run
//! use glsync_ingest::{
//!     catalog::discover, client::GitLabClient, config::TapConfig, context::SyncContext,
//!     orchestrator::Orchestrator, sink::JsonLinesSink, state::State,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = TapConfig::load("config.json")?;
//! let client = GitLabClient::new(config.client_config())?;
//! let ctx = SyncContext::new(client, config, discover(), State::default(), JsonLinesSink::stdout())?;
//! let summary = Orchestrator::new(ctx).run().await?;
//! println!("{} records", summary.total_records());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod sink;
pub mod state;
pub mod streams;
pub mod transform;

pub use error::{ClientError, ErrorKind, Result, SyncError};
pub use orchestrator::{Orchestrator, SyncSummary};
