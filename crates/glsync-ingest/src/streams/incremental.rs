use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::StreamCore;
use crate::client::PageCursor;
use crate::context::SyncContext;
use crate::error::Result;
use crate::sink::RecordSink;
use crate::state::{format_instant, parse_instant};

/// Emits records whose replication key is at or after the stored bookmark,
/// then raises the bookmark to the latest value seen.
#[derive(Debug)]
pub struct IncrementalStream {
    pub(crate) core: StreamCore,
    replication_key: &'static str,
    /// Lower bound read on first invocation; reused for every parent this run
    lower_bound: Option<DateTime<Utc>>,
}

impl IncrementalStream {
    pub(crate) fn new(core: StreamCore, replication_key: &'static str) -> Self {
        Self {
            core,
            replication_key,
            lower_bound: None,
        }
    }

    pub fn replication_key(&self) -> &'static str {
        self.replication_key
    }

    pub(crate) async fn sync<S: RecordSink>(
        &mut self,
        ctx: &mut SyncContext<S>,
        parent: Option<&Value>,
    ) -> Result<u64> {
        let stream_id = self.core.spec.stream_id;
        let key = self.replication_key;
        let bookmark = *self
            .lower_bound
            .get_or_insert_with(|| ctx.bookmark_or_start(stream_id, key));

        let mut max_seen = bookmark;
        let mut emitted = 0u64;
        let mut skipped = 0u64;

        for endpoint in self.core.build_endpoints(parent)? {
            let mut params = endpoint.params;
            if let Some(since) = self.core.spec.since_param {
                params.push((since.to_string(), format_instant(bookmark)));
            }

            let mut cursor = PageCursor::new(endpoint.path, params);
            while let Some(page) = cursor.next_page(&ctx.client).await? {
                for raw in page.records {
                    if !self.core.first_sighting(&raw) {
                        continue;
                    }
                    self.core.on_fetched(ctx, &raw).await?;
                    let record = self.core.modify_record(raw, parent, ctx.start_date());

                    let Some(value) = record.get(key).and_then(parse_instant) else {
                        warn!(
                            stream = stream_id,
                            key,
                            value = ?record.get(key),
                            "Skipping record with unparsable replication key"
                        );
                        skipped += 1;
                        continue;
                    };
                    if value < bookmark {
                        continue;
                    }

                    let record = self.core.transform(&record, ctx)?;
                    if self.core.selected {
                        ctx.emit_record(stream_id, &record)?;
                        emitted += 1;
                    }
                    if value > max_seen {
                        max_seen = value;
                    }

                    for child in &mut self.core.children {
                        child.sync(ctx, Some(&record)).await?;
                    }
                }
            }
        }

        let stored = ctx.state.advance_bookmark(stream_id, key, max_seen);
        info!(
            stream = stream_id,
            records = emitted,
            skipped,
            bookmark = %stored,
            "Incremental sync finished"
        );
        Ok(emitted)
    }
}
