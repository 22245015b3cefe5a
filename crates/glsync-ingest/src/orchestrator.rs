// Sync orchestrator
//
// Runs the selected top-level streams in registry order. Children run beneath
// their parents; a child selected without its parent is skipped. Each
// top-level stream is wrapped in a checkpoint so an interrupted run leaves
// `currentlySyncing` pointing at the stream to resume.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::context::SyncContext;
use crate::error::Result;
use crate::sink::RecordSink;
use crate::streams::{resource, ResourceSpec, Stream, RESOURCES};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub records: u64,
}

/// Records emitted per top-level stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub streams: Vec<StreamSummary>,
}

impl SyncSummary {
    pub fn records_for(&self, stream_id: &str) -> Option<u64> {
        self.streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .map(|s| s.records)
    }

    pub fn total_records(&self) -> u64 {
        self.streams.iter().map(|s| s.records).sum()
    }
}

pub struct Orchestrator<S> {
    ctx: SyncContext<S>,
}

impl<S: RecordSink> Orchestrator<S> {
    pub fn new(ctx: SyncContext<S>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &SyncContext<S> {
        &self.ctx
    }

    pub fn into_context(self) -> SyncContext<S> {
        self.ctx
    }

    /// Top-level streams to run, in order
    pub fn plan(&self) -> Vec<&'static ResourceSpec> {
        let catalog = &self.ctx.catalog;

        for id in catalog.selected_stream_ids() {
            match resource(id) {
                None => warn!(stream = id, "Selected stream is not supported, skipping"),
                Some(spec) => {
                    if let Some(parent) = spec.parent {
                        if !catalog.is_selected(parent) {
                            warn!(stream = id, parent, "Skipping child stream since its parent is not selected");
                        }
                    }
                }
            }
        }

        let top_level: Vec<&'static str> = RESOURCES
            .iter()
            .filter(|spec| !spec.is_child() && catalog.is_selected(spec.stream_id))
            .map(|spec| spec.stream_id)
            .collect();

        let resume = self.ctx.state.currently_syncing();
        if let Some(last) = resume {
            if top_level.contains(&last) {
                info!(stream = last, "Resuming interrupted stream");
            }
        }

        run_order(top_level, resume).into_iter().filter_map(resource).collect()
    }

    pub async fn run(&mut self) -> Result<SyncSummary> {
        let start_time = Instant::now();

        let selected: Vec<String> = self
            .ctx
            .catalog
            .selected_stream_ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        info!(streams = ?selected, "Selected streams");
        info!(stream = ?self.ctx.state.currently_syncing(), "Last/currently syncing stream");

        let order = self.plan();
        let compose = order.iter().any(|s| s.stream_id == "groups")
            && order.iter().any(|s| s.stream_id == "projects");
        self.ctx.set_compose_projects(compose);

        let mut summary = SyncSummary::default();
        for spec in order {
            let records = self.sync_top_level(spec).await?;
            summary.streams.push(StreamSummary {
                stream_id: spec.stream_id.to_string(),
                records,
            });
        }

        info!(
            streams = summary.streams.len(),
            records = summary.total_records(),
            duration_secs = start_time.elapsed().as_secs_f64(),
            "Sync complete"
        );
        Ok(summary)
    }

    async fn sync_top_level(&mut self, spec: &'static ResourceSpec) -> Result<u64> {
        let ctx = &mut self.ctx;
        let mut stream = Stream::new(spec, ctx);
        emit_schemas(&stream, ctx)?;

        info!(stream = spec.stream_id, "START Syncing");
        ctx.state.set_currently_syncing(Some(spec.stream_id));
        ctx.checkpoint()?;

        let records = stream.sync(ctx, None).await?;

        ctx.state.set_currently_syncing(None);
        ctx.checkpoint()?;
        info!(stream = spec.stream_id, records, "FINISHED Syncing");
        Ok(records)
    }
}

/// Order top-level streams for a run. The interrupted stream moves to the
/// front, except that `groups` always precedes `projects` since it feeds
/// project discovery.
fn run_order<'a>(mut order: Vec<&'a str>, resume: Option<&str>) -> Vec<&'a str> {
    if let Some(pos) = resume.and_then(|last| order.iter().position(|id| *id == last)) {
        let resumed = order.remove(pos);
        order.insert(0, resumed);
    }

    let groups = order.iter().position(|id| *id == "groups");
    let projects = order.iter().position(|id| *id == "projects");
    if let (Some(g), Some(p)) = (groups, projects) {
        if p < g {
            let id = order.remove(g);
            order.insert(p, id);
        }
    }

    order
}

/// SCHEMA messages for a stream and its attached children, selected ones only
fn emit_schemas<S: RecordSink>(stream: &Stream, ctx: &mut SyncContext<S>) -> Result<()> {
    if stream.is_selected() {
        ctx.sink
            .emit_schema(stream.stream_id(), stream.schema(), &stream.spec().key_properties())?;
    }
    for child in stream.children() {
        emit_schemas(child, ctx)?;
    }
    Ok(())
}
