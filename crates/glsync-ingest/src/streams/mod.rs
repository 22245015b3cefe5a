//! Stream variants and the record shaping they share
//!
//! A [`Stream`] is built once per run from a [`ResourceSpec`] plus the
//! catalog entry for that stream. Selected descendants are attached as
//! children and synced once per parent record, depth-first.

mod full_table;
mod incremental;
pub mod resources;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use futures::future::{FutureExt, LocalBoxFuture};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::StreamMetadata;
use crate::context::SyncContext;
use crate::error::{Result, SyncError};
use crate::schema::load_schema;
use crate::sink::RecordSink;
use crate::state::format_instant;

pub use full_table::FullTableStream;
pub use incremental::IncrementalStream;
pub use resources::{resource, ReplicationMode, ResourceSpec, Selector, RESOURCES};

/// A resolved API call: path relative to the API root plus query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl Endpoint {
    fn new(path: String) -> Self {
        Self {
            path,
            params: Vec::new(),
        }
    }
}

/// Render an `id` value as a path segment. String ids such as
/// `group/project` are percent-encoded.
pub fn id_segment(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(urlencoding::encode(s).into_owned()),
        _ => None,
    }
}

fn id_string(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// State shared by both stream variants
#[derive(Debug)]
pub(crate) struct StreamCore {
    spec: &'static ResourceSpec,
    schema: Value,
    metadata: StreamMetadata,
    selected: bool,
    selectors: Option<Vec<String>>,
    children: Vec<Stream>,
    /// Ids already synced this run; top-level streams only
    seen: BTreeSet<String>,
}

impl StreamCore {
    fn new<S: RecordSink>(spec: &'static ResourceSpec, ctx: &SyncContext<S>) -> Self {
        let entry = ctx.catalog.get(spec.stream_id);
        let schema = entry
            .map(|e| e.schema.clone())
            .or_else(|| load_schema(spec.stream_id))
            .unwrap_or_else(|| json!({}));
        let metadata = entry.map(|e| e.metadata()).unwrap_or_default();

        let selectors = match spec.selector {
            Some(Selector::Groups) => ctx.group_selectors(),
            Some(Selector::Projects) => ctx.project_selectors(),
            None => None,
        };

        let children = spec
            .children()
            .filter(|child| ctx.catalog.is_selected(child.stream_id))
            .map(|child| Stream::new(child, ctx))
            .collect();

        Self {
            spec,
            schema,
            selected: metadata.is_selected(),
            metadata,
            selectors,
            children,
            seen: BTreeSet::new(),
        }
    }

    fn build_endpoints(&self, parent: Option<&Value>) -> Result<Vec<Endpoint>> {
        let spec = self.spec;
        if spec.is_child() {
            let parent = parent.ok_or_else(|| SyncError::DetachedChild(spec.stream_id.to_string()))?;
            let id = parent
                .get("id")
                .and_then(id_segment)
                .ok_or_else(|| SyncError::MissingParentId(spec.stream_id.to_string()))?;
            return Ok(vec![Endpoint::new(spec.path.replace("{id}", &id))]);
        }

        if let (Some(ids), Some(item_path)) = (&self.selectors, spec.item_path) {
            return Ok(ids
                .iter()
                .map(|id| Endpoint::new(item_path.replace("{id}", &urlencoding::encode(id))))
                .collect());
        }

        let params = spec
            .collection_params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Ok(vec![Endpoint {
            path: spec.path.to_string(),
            params,
        }])
    }

    fn modify_record(&self, record: Value, parent: Option<&Value>, start_date: DateTime<Utc>) -> Value {
        let Value::Object(mut fields) = record else {
            return record;
        };
        let spec = self.spec;

        if let (Some(link), Some(parent_id)) = (spec.parent_link, parent.and_then(|p| p.get("id"))) {
            let present = fields.get(link.field).is_some_and(|v| !v.is_null());
            if link.overwrite || !present {
                fields.insert(link.field.to_string(), parent_id.clone());
            }
        }

        if let Some(lift) = spec.lift {
            let lifted = fields
                .get(lift.object)
                .and_then(|o| o.get(lift.field))
                .filter(|v| !v.is_null())
                .cloned()
                .unwrap_or_else(|| Value::String(format_instant(start_date)));
            fields.insert(lift.target.to_string(), lifted);
        }

        for name in spec.flatten {
            if let Some(nested) = fields.remove(*name) {
                let id = match nested {
                    Value::Object(obj) => obj.get("id").cloned().unwrap_or(Value::Null),
                    other => other,
                };
                fields.insert(format!("{name}_id"), id);
            }
        }

        Value::Object(fields)
    }

    fn transform<S: RecordSink>(&self, record: &Value, ctx: &SyncContext<S>) -> Result<Value> {
        ctx.transformer
            .transform(record, &self.schema, &self.metadata)
            .map_err(|source| SyncError::Transform {
                stream: self.spec.stream_id.to_string(),
                source,
            })
    }

    /// False when a top-level record with this `id` was already synced in this
    /// run, which happens when two selectors name the same resource.
    fn first_sighting(&mut self, raw: &Value) -> bool {
        if self.spec.is_child() {
            return true;
        }
        let Some(id) = raw.get("id").and_then(id_string) else {
            return true;
        };
        if self.seen.insert(id.clone()) {
            return true;
        }
        debug!(stream = self.spec.stream_id, id = %id, "Skipping record already synced this run");
        false
    }

    /// Hook run on every fetched record before any filtering
    async fn on_fetched<S: RecordSink>(&self, ctx: &mut SyncContext<S>, raw: &Value) -> Result<()> {
        let Some(template) = self.spec.discovers_projects else {
            return Ok(());
        };
        if !ctx.compose_projects() {
            return Ok(());
        }
        let Some(id) = raw.get("id").and_then(id_segment) else {
            return Ok(());
        };

        let path = template.replace("{id}", &id);
        let params = [("simple".to_string(), "true".to_string())];
        let projects = ctx.client.paginate(&path, &params).await?;
        let configured = &ctx.config.projects;
        let ids: Vec<String> = projects
            .iter()
            .filter(|p| {
                let path = p.get("path_with_namespace").and_then(Value::as_str);
                !path.is_some_and(|path| configured.iter().any(|c| c == path))
            })
            .filter_map(|p| p.get("id").and_then(id_string))
            .collect();
        info!(stream = self.spec.stream_id, owner = %id, projects = ids.len(), "Discovered projects");
        ctx.add_discovered_projects(ids);
        Ok(())
    }
}

/// One resource type, in one of the two replication modes
#[derive(Debug)]
pub enum Stream {
    FullTable(FullTableStream),
    Incremental(IncrementalStream),
}

impl Stream {
    pub fn new<S: RecordSink>(spec: &'static ResourceSpec, ctx: &SyncContext<S>) -> Self {
        let core = StreamCore::new(spec, ctx);
        match (spec.mode, spec.replication_key) {
            (ReplicationMode::Incremental, Some(key)) => {
                Stream::Incremental(IncrementalStream::new(core, key))
            }
            _ => Stream::FullTable(FullTableStream::new(core)),
        }
    }

    fn core(&self) -> &StreamCore {
        match self {
            Stream::FullTable(s) => &s.core,
            Stream::Incremental(s) => &s.core,
        }
    }

    pub fn stream_id(&self) -> &'static str {
        self.core().spec.stream_id
    }

    pub fn spec(&self) -> &'static ResourceSpec {
        self.core().spec
    }

    pub fn is_selected(&self) -> bool {
        self.core().selected
    }

    pub fn schema(&self) -> &Value {
        &self.core().schema
    }

    pub fn children(&self) -> &[Stream] {
        &self.core().children
    }

    pub fn build_endpoints(&self, parent: Option<&Value>) -> Result<Vec<Endpoint>> {
        self.core().build_endpoints(parent)
    }

    /// Apply parent linkage, lifted fields and foreign-key flattening
    pub fn modify_record(&self, record: Value, parent: Option<&Value>, start_date: DateTime<Utc>) -> Value {
        self.core().modify_record(record, parent, start_date)
    }

    /// Sync this stream (and its children) beneath `parent`, returning the
    /// number of records emitted for this stream
    pub fn sync<'a, S: RecordSink>(
        &'a mut self,
        ctx: &'a mut SyncContext<S>,
        parent: Option<&'a Value>,
    ) -> LocalBoxFuture<'a, Result<u64>> {
        match self {
            Stream::FullTable(s) => s.sync(ctx, parent).boxed_local(),
            Stream::Incremental(s) => s.sync(ctx, parent).boxed_local(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::catalog::discover;
    use crate::client::{ClientConfig, GitLabClient};
    use crate::config::TapConfig;
    use crate::sink::MemorySink;
    use crate::state::{parse_instant_str, State};

    fn context(configure: impl FnOnce(&mut TapConfig)) -> SyncContext<MemorySink> {
        let mut config = TapConfig {
            private_token: "t".into(),
            start_date: "2024-01-01T00:00:00Z".into(),
            ..TapConfig::default()
        };
        configure(&mut config);
        let client = GitLabClient::new(ClientConfig::new("http://gitlab.test/api/v4", "t")).unwrap();
        SyncContext::new(client, config, discover(), State::default(), MemorySink::new()).unwrap()
    }

    fn start() -> DateTime<Utc> {
        parse_instant_str("2024-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn test_branch_shaping() {
        let ctx = context(|_| {});
        let branches = Stream::new(resource("branches").unwrap(), &ctx);
        let parent = json!({"id": 42});

        let raw = json!({"name": "main", "commit": {"id": "abc123", "committed_date": "2024-03-01T10:00:00Z"}});
        let out = branches.modify_record(raw, Some(&parent), start());
        assert_eq!(
            out,
            json!({"name": "main", "project_id": 42, "commit_id": "abc123", "last_committed_date": "2024-03-01T10:00:00Z"})
        );

        let bare = branches.modify_record(json!({"name": "orphan", "commit": null}), Some(&parent), start());
        assert_eq!(bare["last_committed_date"], "2024-01-01T00:00:00Z");
        assert_eq!(bare["commit_id"], Value::Null);
    }

    #[test]
    fn test_project_milestone_keeps_existing_project_id() {
        let ctx = context(|_| {});
        let milestones = Stream::new(resource("project_milestones").unwrap(), &ctx);
        let out = milestones.modify_record(json!({"id": 1, "project_id": 7}), Some(&json!({"id": 42})), start());
        assert_eq!(out["project_id"], 7);

        let users = Stream::new(resource("users").unwrap(), &ctx);
        let out = users.modify_record(json!({"id": 1, "project_id": 7}), Some(&json!({"id": 42})), start());
        assert_eq!(out["project_id"], 42);
    }

    #[test]
    fn test_issue_flattening() {
        let ctx = context(|_| {});
        let issues = Stream::new(resource("issues").unwrap(), &ctx);
        let raw = json!({"id": 5, "author": {"id": 9, "name": "a"}, "assignee": null, "milestone": {"id": 3}});
        let out = issues.modify_record(raw, Some(&json!({"id": 1})), start());
        assert_eq!(out["author_id"], 9);
        assert_eq!(out["assignee_id"], Value::Null);
        assert_eq!(out["milestone_id"], 3);
        assert!(out.get("author").is_none());
    }

    #[test]
    fn test_child_endpoint_uses_parent_id() {
        let ctx = context(|_| {});
        let commits = Stream::new(resource("commits").unwrap(), &ctx);
        let endpoints = commits.build_endpoints(Some(&json!({"id": "group/app"}))).unwrap();
        assert_eq!(endpoints[0].path, "projects/group%2Fapp/repository/commits");

        let err = commits.build_endpoints(None).unwrap_err();
        assert!(matches!(err, SyncError::DetachedChild(_)));
        let err = commits.build_endpoints(Some(&json!({"name": "x"}))).unwrap_err();
        assert!(matches!(err, SyncError::MissingParentId(_)));
    }

    #[test]
    fn test_top_level_endpoints() {
        let ctx = context(|_| {});
        let projects = Stream::new(resource("projects").unwrap(), &ctx);
        let endpoints = projects.build_endpoints(None).unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].path, "projects");
        assert_eq!(endpoints[0].params, vec![("membership".to_string(), "true".to_string())]);

        let ctx = context(|c| c.projects = vec!["42".into(), "team/site".into()]);
        let projects = Stream::new(resource("projects").unwrap(), &ctx);
        let paths: Vec<_> = projects
            .build_endpoints(None)
            .unwrap()
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["projects/42", "projects/team%2Fsite"]);
    }

    #[test]
    fn test_children_follow_selection() {
        let mut ctx = context(|_| {});
        ctx.catalog.select_only(&["projects", "commits"]);
        let projects = Stream::new(resource("projects").unwrap(), &ctx);
        let children: Vec<_> = projects.children().iter().map(Stream::stream_id).collect();
        assert_eq!(children, vec!["commits"]);

        ctx.catalog.select_only(&["groups"]);
        let groups = Stream::new(resource("groups").unwrap(), &ctx);
        assert!(groups.is_selected());
        assert!(groups.children().is_empty());
    }
}
