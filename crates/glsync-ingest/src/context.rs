//! Per-run context threaded through the orchestrator and every stream

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::client::GitLabClient;
use crate::config::TapConfig;
use crate::error::Result;
use crate::sink::RecordSink;
use crate::state::State;
use crate::transform::Transformer;

pub struct SyncContext<S> {
    pub client: GitLabClient,
    pub config: TapConfig,
    pub catalog: Catalog,
    pub state: State,
    pub sink: S,
    pub transformer: Transformer,
    start_date: DateTime<Utc>,
    compose_projects: bool,
    discovered_projects: BTreeSet<String>,
}

impl<S: RecordSink> SyncContext<S> {
    pub fn new(client: GitLabClient, config: TapConfig, catalog: Catalog, state: State, sink: S) -> Result<Self> {
        let start_date = config.start_instant()?;
        Ok(Self {
            client,
            config,
            catalog,
            state,
            sink,
            transformer: Transformer::default(),
            start_date,
            compose_projects: false,
            discovered_projects: BTreeSet::new(),
        })
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// Stored watermark for `stream`, or the start date when there is none
    pub fn bookmark_or_start(&self, stream: &str, key: &str) -> DateTime<Utc> {
        match self.state.bookmark(stream, key) {
            None => self.start_date,
            Some(raw) => self.state.bookmark_instant(stream, key).unwrap_or_else(|| {
                warn!(stream, key, bookmark = %raw, "Unparsable bookmark, using start_date");
                self.start_date
            }),
        }
    }

    pub fn emit_record(&mut self, stream: &str, record: &Value) -> Result<()> {
        self.sink.emit_record(stream, record, Utc::now())?;
        Ok(())
    }

    /// Write the current state to the sink
    pub fn checkpoint(&mut self) -> Result<()> {
        self.sink.emit_state(&self.state)?;
        Ok(())
    }

    /// Collect project ids owned by groups synced in this run
    pub fn set_compose_projects(&mut self, compose: bool) {
        self.compose_projects = compose;
    }

    pub fn compose_projects(&self) -> bool {
        self.compose_projects
    }

    pub fn add_discovered_projects(&mut self, ids: impl IntoIterator<Item = String>) {
        self.discovered_projects.extend(ids);
    }

    /// Ids the projects stream should sync, or `None` to list the collection.
    /// Configured ids come first, followed by any discovered under groups.
    pub fn project_selectors(&self) -> Option<Vec<String>> {
        if self.config.projects.is_empty() && !self.compose_projects {
            return None;
        }
        let mut ids = self.config.projects.clone();
        for id in &self.discovered_projects {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        debug!(count = ids.len(), "Resolved project selectors");
        Some(ids)
    }

    pub fn group_selectors(&self) -> Option<Vec<String>> {
        (!self.config.groups.is_empty()).then(|| self.config.groups.clone())
    }

    pub fn into_parts(self) -> (State, S) {
        (self.state, self.sink)
    }
}
