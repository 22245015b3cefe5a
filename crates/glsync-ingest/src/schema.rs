//! Built-in JSON schemas, one per stream

use serde_json::Value;

const SCHEMAS: &[(&str, &str)] = &[
    ("groups", include_str!("schemas/groups.json")),
    ("group_milestones", include_str!("schemas/group_milestones.json")),
    ("projects", include_str!("schemas/projects.json")),
    ("branches", include_str!("schemas/branches.json")),
    ("commits", include_str!("schemas/commits.json")),
    ("issues", include_str!("schemas/issues.json")),
    ("project_milestones", include_str!("schemas/project_milestones.json")),
    ("users", include_str!("schemas/users.json")),
];

/// Parsed schema for `stream_id`, or `None` for unknown streams
pub fn load_schema(stream_id: &str) -> Option<Value> {
    let (_, raw) = SCHEMAS.iter().find(|(id, _)| *id == stream_id)?;
    serde_json::from_str(raw).ok()
}

/// Top-level property names of a schema
pub fn property_names(schema: &Value) -> Vec<String> {
    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default()
}
