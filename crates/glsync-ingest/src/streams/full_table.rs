use serde_json::Value;
use tracing::info;

use super::StreamCore;
use crate::client::PageCursor;
use crate::context::SyncContext;
use crate::error::Result;
use crate::sink::RecordSink;

/// Re-reads the whole collection every run; never bookmarked
#[derive(Debug)]
pub struct FullTableStream {
    pub(crate) core: StreamCore,
}

impl FullTableStream {
    pub(crate) fn new(core: StreamCore) -> Self {
        Self { core }
    }

    pub(crate) async fn sync<S: RecordSink>(
        &mut self,
        ctx: &mut SyncContext<S>,
        parent: Option<&Value>,
    ) -> Result<u64> {
        let stream_id = self.core.spec.stream_id;
        let mut emitted = 0u64;

        for endpoint in self.core.build_endpoints(parent)? {
            let mut cursor = PageCursor::new(endpoint.path, endpoint.params);
            while let Some(page) = cursor.next_page(&ctx.client).await? {
                for raw in page.records {
                    if !self.core.first_sighting(&raw) {
                        continue;
                    }
                    self.core.on_fetched(ctx, &raw).await?;
                    let record = self.core.modify_record(raw, parent, ctx.start_date());
                    let record = self.core.transform(&record, ctx)?;

                    if self.core.selected {
                        ctx.emit_record(stream_id, &record)?;
                        emitted += 1;
                    }

                    for child in &mut self.core.children {
                        child.sync(ctx, Some(&record)).await?;
                    }
                }
            }
        }

        info!(stream = stream_id, records = emitted, "Full-table sync finished");
        Ok(emitted)
    }
}
