//! Catalog model, stream selection and discovery
//!
//! A catalog lists each stream's schema and a metadata list keyed by
//! breadcrumb. The empty breadcrumb holds stream-level settings (`selected`,
//! replication method); `["properties", <field>]` holds per-field inclusion.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::schema::{load_schema, property_names};
use crate::streams::resources::{ReplicationMode, RESOURCES};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    pub schema: Value,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> glsync_common::Result<Self> {
        glsync_common::error::read_json_file(path)
    }

    pub fn get(&self, stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == stream_id)
    }

    pub fn is_selected(&self, stream_id: &str) -> bool {
        self.get(stream_id).is_some_and(CatalogEntry::is_selected)
    }

    /// Ids of selected streams, in catalog order
    pub fn selected_stream_ids(&self) -> Vec<&str> {
        self.streams
            .iter()
            .filter(|s| s.is_selected())
            .map(|s| s.tap_stream_id.as_str())
            .collect()
    }

    /// Mark exactly the given streams as selected
    pub fn select_only(&mut self, stream_ids: &[&str]) {
        for entry in &mut self.streams {
            let selected = stream_ids.contains(&entry.tap_stream_id.as_str());
            entry.set_selected(selected);
        }
    }
}

impl CatalogEntry {
    pub fn metadata(&self) -> StreamMetadata {
        StreamMetadata::from_entries(&self.metadata)
    }

    pub fn is_selected(&self) -> bool {
        self.metadata().is_selected()
    }

    pub fn set_selected(&mut self, selected: bool) {
        match self.metadata.iter_mut().find(|m| m.breadcrumb.is_empty()) {
            Some(entry) => {
                entry.metadata.insert("selected".into(), Value::Bool(selected));
            }
            None => self.metadata.push(MetadataEntry {
                breadcrumb: Vec::new(),
                metadata: Map::from_iter([("selected".to_string(), Value::Bool(selected))]),
            }),
        }
    }
}

/// Breadcrumb-indexed view of a stream's metadata list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamMetadata {
    stream: Map<String, Value>,
    fields: BTreeMap<String, Map<String, Value>>,
}

impl StreamMetadata {
    pub fn from_entries(entries: &[MetadataEntry]) -> Self {
        let mut view = Self::default();
        for entry in entries {
            match entry.breadcrumb.as_slice() {
                [] => view.stream.extend(entry.metadata.clone()),
                [props, field] if props == "properties" => {
                    view.fields
                        .entry(field.clone())
                        .or_default()
                        .extend(entry.metadata.clone());
                }
                _ => {}
            }
        }
        view
    }

    pub fn is_selected(&self) -> bool {
        self.stream.get("selected").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether a top-level field survives field selection. Automatic fields
    /// always do; unsupported ones never do; others unless deselected.
    pub fn field_included(&self, field: &str) -> bool {
        let Some(meta) = self.fields.get(field) else {
            return true;
        };
        match meta.get("inclusion").and_then(Value::as_str) {
            Some("automatic") => true,
            Some("unsupported") => false,
            _ => meta.get("selected").and_then(Value::as_bool).unwrap_or(true),
        }
    }
}

/// Build the catalog of every built-in stream with standard metadata.
/// Every stream starts selected.
pub fn discover() -> Catalog {
    let streams = RESOURCES
        .iter()
        .filter_map(|spec| {
            let schema = load_schema(spec.stream_id)?;

            let mut top = Map::new();
            top.insert("selected".into(), json!(true));
            top.insert("table-key-properties".into(), json!(spec.key_properties));
            top.insert("forced-replication-method".into(), json!(spec.mode));
            if let Some(rk) = spec.replication_key {
                top.insert("valid-replication-keys".into(), json!([rk]));
            }
            if let Some(parent) = spec.parent {
                top.insert("parent-tap-stream-id".into(), json!(parent));
            }

            let mut metadata = vec![MetadataEntry {
                breadcrumb: Vec::new(),
                metadata: top,
            }];

            for field in property_names(&schema) {
                let automatic = spec.key_properties.contains(&field.as_str())
                    || (spec.mode == ReplicationMode::Incremental
                        && spec.replication_key == Some(field.as_str()));
                let inclusion = if automatic { "automatic" } else { "available" };
                metadata.push(MetadataEntry {
                    breadcrumb: vec!["properties".into(), field],
                    metadata: Map::from_iter([("inclusion".to_string(), json!(inclusion))]),
                });
            }

            Some(CatalogEntry {
                tap_stream_id: spec.stream_id.to_string(),
                stream: Some(spec.stream_id.to_string()),
                schema,
                key_properties: spec.key_properties(),
                metadata,
            })
        })
        .collect();

    Catalog { streams }
}
