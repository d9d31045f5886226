//! Projection contracts — the uniform mutation surface the reconciler drives.
//!
//! A projection is a derived, filtered list of issue ids (project,
//! project-view, cycle, module, or global workspace view) maintained by
//! external caching code. The reconciler never inspects a projection's list;
//! it only issues the minimal mutation sequence and, for lazy adoption, an
//! authoritative refetch. Implementations live with the cache layer — this
//! crate ships only the in-memory canonical store (`crate::store`).
//!
//! Every mutation is fallible. A failure here is a consistency bug, not a
//! transient condition: the reconciler propagates it and the channel task
//! surfaces it through its join handle.

use anyhow::Result;
use uuid::Uuid;

use crate::types::{FetchMode, Issue};

/// Mutation contract for one cached list projection.
///
/// Object-safe and `Send` so a `ProjectionSet` can move into the channel
/// task. All calls are made synchronously on the single event-handling task;
/// implementations need no internal locking for reconciler-driven mutation.
pub trait ListProjection: Send {
    /// Insert a full record, optionally at the top of the list.
    fn add_issue(&mut self, issue: &Issue, at_top: bool) -> Result<()>;

    /// Push updated content for an issue already in the list. `previous` is
    /// the pre-mutation record, needed for display-order regrouping.
    fn update_issue_list(&mut self, updated: &Issue, previous: &Issue) -> Result<()>;

    /// Append an id whose record is already in the canonical store.
    fn add_issue_to_list(&mut self, issue_id: Uuid) -> Result<()>;

    /// Drop an id from the list without touching the canonical store.
    fn remove_issue_from_list(&mut self, issue_id: Uuid) -> Result<()>;

    /// Authoritative refetch of this projection's list for the given scope,
    /// keeping existing pagination cursors.
    fn fetch_issues_with_existing_pagination(
        &mut self,
        scope_id: Uuid,
        mode: FetchMode,
    ) -> Result<()>;
}

/// The single source-of-truth mapping from issue id to full record.
///
/// Outlives every list projection during deletion: projections are pruned
/// first so they can still dereference the id, the store entry goes last.
pub trait CanonicalStore: Send {
    fn get_issue_by_id(&self, issue_id: Uuid) -> Option<Issue>;

    fn add_issues(&mut self, issues: &[Issue]) -> Result<()>;

    fn update_issue(&mut self, issue_id: Uuid, updated: &Issue) -> Result<()>;

    fn remove_issue(&mut self, issue_id: Uuid) -> Result<()>;
}

/// The five list projections the reconciler maintains, injected explicitly
/// at construction — no ambient store singleton.
pub struct ProjectionSet {
    /// All issues of the connected project.
    pub project: Box<dyn ListProjection>,
    /// The currently configured project view.
    pub project_view: Box<dyn ListProjection>,
    /// Issues of the active cycle, when one is open.
    pub cycle: Box<dyn ListProjection>,
    /// Issues of the active module, when one is open.
    pub module: Box<dyn ListProjection>,
    /// The active global workspace view, when one is open.
    pub global_view: Box<dyn ListProjection>,
}
