//! Core types shared across the issue channel: the canonical issue record,
//! the active viewing context, and the refetch mode passed to projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical issue record as broadcast on the wire.
///
/// `id` and `project_id` are immutable once assigned — an issue never moves
/// between projects through this event path. Everything the sync layer does
/// not interpret rides in `extra` so updates round-trip untouched fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub project_id: Uuid,

    /// Single-valued cycle membership, nullable.
    #[serde(default)]
    pub cycle_id: Option<Uuid>,

    /// Multi-valued module memberships, possibly empty.
    #[serde(default)]
    pub module_ids: Vec<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Remaining wire fields (name, state, priority, assignees, ...) carried
    /// opaquely — this layer reconciles membership, it does not interpret
    /// issue content.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Issue {
    /// Whether this record belongs to the given cycle scope.
    pub fn in_cycle(&self, cycle_id: Uuid) -> bool {
        self.cycle_id == Some(cycle_id)
    }

    /// Whether this record belongs to the given module scope.
    pub fn in_module(&self, module_id: Uuid) -> bool {
        self.module_ids.contains(&module_id)
    }
}

/// Per-viewport state describing which derived projections are live.
///
/// Mutated by navigation/view-selection code (via a `tokio::sync::watch`
/// sender); the reconciler only ever reads a snapshot of it per event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveContext {
    pub module_id: Option<Uuid>,
    pub cycle_id: Option<Uuid>,
    pub project_view_id: Option<Uuid>,
    pub global_view_id: Option<Uuid>,
}

impl ActiveContext {
    pub fn cycle_active(&self) -> bool {
        self.cycle_id.is_some()
    }

    pub fn module_active(&self) -> bool {
        self.module_id.is_some()
    }

    pub fn global_view_active(&self) -> bool {
        self.global_view_id.is_some()
    }
}

/// Pagination mode forwarded to a projection's refetch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// First load of a projection's list.
    Init,
    /// Refresh after a mutation, keeping existing pagination cursors.
    Mutation,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Init => "init-loader",
            FetchMode::Mutation => "mutation",
        }
    }
}
