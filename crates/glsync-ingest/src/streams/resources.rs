//! Static resource definitions
//!
//! Each [`ResourceSpec`] describes one GitLab collection: where it lives, how
//! it relates to its parent, and how raw records are reshaped before the
//! schema transform. Path templates use `{id}` for the owning object's id.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMode {
    FullTable,
    Incremental,
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReplicationMode::FullTable => "FULL_TABLE",
            ReplicationMode::Incremental => "INCREMENTAL",
        })
    }
}

/// Which configured id list narrows a top-level stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Groups,
    Projects,
}

/// Copies the parent's `id` into each child record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    pub field: &'static str,
    /// When false, a value already present in the record wins
    pub overwrite: bool,
}

/// Promotes `object.field` to a top-level `target` column, falling back to
/// the configured start date when the nested value is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiftedField {
    pub target: &'static str,
    pub object: &'static str,
    pub field: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSpec {
    pub stream_id: &'static str,
    pub mode: ReplicationMode,
    pub key_properties: &'static [&'static str],
    pub replication_key: Option<&'static str>,
    pub parent: Option<&'static str>,
    /// Collection path; `{id}` is the parent id for child streams
    pub path: &'static str,
    /// Single-resource path used when ids are configured
    pub item_path: Option<&'static str>,
    pub collection_params: &'static [(&'static str, &'static str)],
    pub selector: Option<Selector>,
    pub parent_link: Option<ParentLink>,
    /// Nested objects reduced to `<name>_id`
    pub flatten: &'static [&'static str],
    pub lift: Option<LiftedField>,
    /// Server-side lower bound query parameter
    pub since_param: Option<&'static str>,
    /// Collection of project ids owned by each record (`{id}` is the record id)
    pub discovers_projects: Option<&'static str>,
}

impl ResourceSpec {
    const fn base(stream_id: &'static str, path: &'static str) -> Self {
        Self {
            stream_id,
            mode: ReplicationMode::Incremental,
            key_properties: &["id"],
            replication_key: None,
            parent: None,
            path,
            item_path: None,
            collection_params: &[],
            selector: None,
            parent_link: None,
            flatten: &[],
            lift: None,
            since_param: None,
            discovers_projects: None,
        }
    }

    pub fn is_child(&self) -> bool {
        self.parent.is_some()
    }

    /// Streams that run beneath this one, in registry order
    pub fn children(&self) -> impl Iterator<Item = &'static ResourceSpec> + '_ {
        RESOURCES
            .iter()
            .filter(move |r| r.parent == Some(self.stream_id))
    }

    pub fn key_properties(&self) -> Vec<String> {
        self.key_properties.iter().map(|k| k.to_string()).collect()
    }
}

const PROJECT_LINK: Option<ParentLink> = Some(ParentLink {
    field: "project_id",
    overwrite: true,
});

/// Every stream this tap can sync. Parents precede their children and
/// `groups` precedes `projects`.
pub const RESOURCES: &[ResourceSpec] = &[
    ResourceSpec {
        replication_key: Some("created_at"),
        item_path: Some("groups/{id}"),
        selector: Some(Selector::Groups),
        discovers_projects: Some("groups/{id}/projects"),
        ..ResourceSpec::base("groups", "groups")
    },
    ResourceSpec {
        key_properties: &["id", "group_id"],
        replication_key: Some("updated_at"),
        parent: Some("groups"),
        parent_link: Some(ParentLink {
            field: "group_id",
            overwrite: true,
        }),
        ..ResourceSpec::base("group_milestones", "groups/{id}/milestones")
    },
    ResourceSpec {
        replication_key: Some("updated_at"),
        item_path: Some("projects/{id}"),
        collection_params: &[("membership", "true")],
        selector: Some(Selector::Projects),
        flatten: &["owner", "namespace"],
        ..ResourceSpec::base("projects", "projects")
    },
    ResourceSpec {
        key_properties: &["project_id", "name"],
        replication_key: Some("last_committed_date"),
        parent: Some("projects"),
        parent_link: PROJECT_LINK,
        flatten: &["commit"],
        lift: Some(LiftedField {
            target: "last_committed_date",
            object: "commit",
            field: "committed_date",
        }),
        ..ResourceSpec::base("branches", "projects/{id}/repository/branches")
    },
    ResourceSpec {
        key_properties: &["id", "project_id"],
        replication_key: Some("committed_date"),
        parent: Some("projects"),
        parent_link: PROJECT_LINK,
        since_param: Some("since"),
        ..ResourceSpec::base("commits", "projects/{id}/repository/commits")
    },
    ResourceSpec {
        key_properties: &["id", "project_id"],
        replication_key: Some("updated_at"),
        parent: Some("projects"),
        parent_link: PROJECT_LINK,
        flatten: &["author", "assignee", "milestone"],
        since_param: Some("updated_after"),
        ..ResourceSpec::base("issues", "projects/{id}/issues")
    },
    ResourceSpec {
        key_properties: &["id", "project_id"],
        replication_key: Some("updated_at"),
        parent: Some("projects"),
        parent_link: Some(ParentLink {
            field: "project_id",
            overwrite: false,
        }),
        ..ResourceSpec::base("project_milestones", "projects/{id}/milestones")
    },
    ResourceSpec {
        mode: ReplicationMode::FullTable,
        key_properties: &["id", "project_id"],
        parent: Some("projects"),
        parent_link: PROJECT_LINK,
        ..ResourceSpec::base("users", "projects/{id}/users")
    },
];

pub fn resource(stream_id: &str) -> Option<&'static ResourceSpec> {
    RESOURCES.iter().find(|r| r.stream_id == stream_id)
}
