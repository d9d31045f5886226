//! Reconciler — applies decoded change events to the canonical store and the
//! affected list projections.
//!
//! ## Event → mutation mapping
//!
//! | Event     | Canonical store      | Projections touched                          |
//! |-----------|----------------------|----------------------------------------------|
//! | `created` | insert               | project + project-view always; cycle/module/ |
//! |           |                      | global-view when active and matching         |
//! | `updated` | replace (or adopt)   | membership delta on cycle/module; content    |
//! |           |                      | update on project/project-view/global-view   |
//! | `deleted` | remove, always last  | prune all lists, inactive scopes skipped     |
//!
//! Per-event work is synchronous and atomic with respect to other events:
//! the channel task delivers one message at a time, so no locking is needed
//! on this path. Decode failures never reach this module; any error returned
//! here is a consistency bug and terminates the channel task.

use anyhow::{Context, Result};
use tracing::debug;
use uuid::Uuid;

use crate::event::ChangeEvent;
use crate::projection::{CanonicalStore, ListProjection, ProjectionSet};
use crate::types::{ActiveContext, FetchMode, Issue};

/// The consistency-maintenance core. Owns the canonical store and the
/// projection set; both are injected at construction.
pub struct Reconciler<S: CanonicalStore> {
    store: S,
    projections: ProjectionSet,
}

impl<S: CanonicalStore> Reconciler<S> {
    pub fn new(store: S, projections: ProjectionSet) -> Self {
        Self { store, projections }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Apply one event against the current active context.
    pub fn apply(&mut self, event: &ChangeEvent, ctx: &ActiveContext) -> Result<()> {
        match event {
            ChangeEvent::Created(issue) => self.on_created(issue, ctx),
            ChangeEvent::Updated(issue) => self.on_updated(issue, ctx),
            ChangeEvent::Deleted { id } => self.on_deleted(*id, ctx),
        }
    }

    /// Creation only ever adds membership; there is no removal branch.
    fn on_created(&mut self, issue: &Issue, ctx: &ActiveContext) -> Result<()> {
        self.store
            .add_issues(std::slice::from_ref(issue))
            .context("Inserting created issue into canonical store")?;

        // New issues always belong to their project.
        self.projections.project.add_issue(issue, true)?;
        self.projections.project_view.add_issue(issue, true)?;

        if let Some(module_id) = ctx.module_id {
            if issue.in_module(module_id) {
                self.projections.module.add_issue_to_list(issue.id)?;
            }
        }
        if let Some(cycle_id) = ctx.cycle_id {
            if issue.in_cycle(cycle_id) {
                self.projections.cycle.add_issue_to_list(issue.id)?;
            }
        }
        if ctx.global_view_active() {
            self.projections.global_view.add_issue_to_list(issue.id)?;
        }
        Ok(())
    }

    fn on_updated(&mut self, updated: &Issue, ctx: &ActiveContext) -> Result<()> {
        let Some(previous) = self.store.get_issue_by_id(updated.id) else {
            return self.adopt_unknown(updated, ctx);
        };

        self.store
            .update_issue(updated.id, updated)
            .context("Updating canonical store")?;

        // Cycle membership: equality against the active cycle.
        if let Some(cycle_id) = ctx.cycle_id {
            Self::reconcile_scoped_list(
                &mut *self.projections.cycle,
                updated,
                &previous,
                previous.in_cycle(cycle_id),
                updated.in_cycle(cycle_id),
            )?;
        }

        // Module membership: set containment against the active module.
        if let Some(module_id) = ctx.module_id {
            Self::reconcile_scoped_list(
                &mut *self.projections.module,
                updated,
                &previous,
                previous.in_module(module_id),
                updated.in_module(module_id),
            )?;
        }

        // Membership never changes for these: an issue cannot change its
        // owning project through this event path.
        self.projections.project.update_issue_list(updated, &previous)?;
        self.projections
            .project_view
            .update_issue_list(updated, &previous)?;
        if ctx.global_view_active() {
            self.projections
                .global_view
                .update_issue_list(updated, &previous)?;
        }
        Ok(())
    }

    /// Membership delta for one scoped list. Removal replaces the content
    /// update: an issue leaving a list must not also receive a stale content
    /// update for a list it no longer belongs to.
    fn reconcile_scoped_list(
        projection: &mut dyn ListProjection,
        updated: &Issue,
        previous: &Issue,
        was_member: bool,
        is_member: bool,
    ) -> Result<()> {
        match (was_member, is_member) {
            (false, true) => {
                projection.add_issue_to_list(updated.id)?;
                projection.update_issue_list(updated, previous)?;
            }
            (true, true) => projection.update_issue_list(updated, previous)?,
            (true, false) => projection.remove_issue_from_list(updated.id)?,
            (false, false) => {}
        }
        Ok(())
    }

    /// Lazy adoption: an update for an id this client has never seen.
    ///
    /// Insert the payload as a new record, then trigger an authoritative
    /// refetch of every projection whose active-context filter could
    /// plausibly include it. The refetch repairs any partial state without
    /// guessing full list membership from a single payload.
    fn adopt_unknown(&mut self, issue: &Issue, ctx: &ActiveContext) -> Result<()> {
        debug!(
            issue_id = %issue.id,
            project_id = %issue.project_id,
            "Update for unknown issue, adopting via refetch"
        );

        self.store
            .add_issues(std::slice::from_ref(issue))
            .context("Adopting unknown issue into canonical store")?;

        self.projections
            .project
            .fetch_issues_with_existing_pagination(issue.project_id, FetchMode::Mutation)?;

        if let Some(view_id) = ctx.project_view_id {
            self.projections
                .project_view
                .fetch_issues_with_existing_pagination(view_id, FetchMode::Mutation)?;
        }
        if let Some(cycle_id) = ctx.cycle_id {
            if issue.in_cycle(cycle_id) {
                self.projections
                    .cycle
                    .fetch_issues_with_existing_pagination(cycle_id, FetchMode::Mutation)?;
            }
        }
        if let Some(module_id) = ctx.module_id {
            if issue.in_module(module_id) {
                self.projections
                    .module
                    .fetch_issues_with_existing_pagination(module_id, FetchMode::Mutation)?;
            }
        }
        if let Some(view_id) = ctx.global_view_id {
            self.projections
                .global_view
                .fetch_issues_with_existing_pagination(view_id, FetchMode::Mutation)?;
        }
        Ok(())
    }

    /// Prune every displayed list, canonical store last — projections must
    /// be able to dereference the id while removing it from their own list.
    fn on_deleted(&mut self, issue_id: Uuid, ctx: &ActiveContext) -> Result<()> {
        self.projections.project.remove_issue_from_list(issue_id)?;
        self.projections
            .project_view
            .remove_issue_from_list(issue_id)?;

        // Inactive scoped lists are not displayed and need not be touched.
        if ctx.cycle_active() {
            self.projections.cycle.remove_issue_from_list(issue_id)?;
        }
        if ctx.module_active() {
            self.projections.module.remove_issue_from_list(issue_id)?;
        }
        if ctx.global_view_active() {
            self.projections
                .global_view
                .remove_issue_from_list(issue_id)?;
        }

        self.store
            .remove_issue(issue_id)
            .context("Removing deleted issue from canonical store")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use uuid::Uuid;

    use super::*;
    use crate::projection::ListProjection;
    use crate::store::InMemoryIssueStore;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AddIssue { id: Uuid, at_top: bool },
        UpdateList { id: Uuid, previous_cycle: Option<Uuid> },
        AddToList(Uuid),
        RemoveFromList(Uuid),
        Fetch { scope_id: Uuid, mode: FetchMode },
    }

    /// Records every mutation and tracks list membership.
    #[derive(Default)]
    struct Recording {
        calls: Vec<Call>,
        list: Vec<Uuid>,
    }

    #[derive(Clone, Default)]
    struct Handle(Arc<Mutex<Recording>>);

    impl Handle {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().calls.clone()
        }

        fn in_list(&self, id: Uuid) -> bool {
            self.0.lock().unwrap().list.contains(&id)
        }

        fn is_untouched(&self) -> bool {
            self.0.lock().unwrap().calls.is_empty()
        }
    }

    struct RecordingProjection(Handle);

    impl ListProjection for RecordingProjection {
        fn add_issue(&mut self, issue: &Issue, at_top: bool) -> Result<()> {
            let mut inner = self.0 .0.lock().unwrap();
            inner.calls.push(Call::AddIssue {
                id: issue.id,
                at_top,
            });
            inner.list.push(issue.id);
            Ok(())
        }

        fn update_issue_list(&mut self, updated: &Issue, previous: &Issue) -> Result<()> {
            self.0 .0.lock().unwrap().calls.push(Call::UpdateList {
                id: updated.id,
                previous_cycle: previous.cycle_id,
            });
            Ok(())
        }

        fn add_issue_to_list(&mut self, issue_id: Uuid) -> Result<()> {
            let mut inner = self.0 .0.lock().unwrap();
            inner.calls.push(Call::AddToList(issue_id));
            inner.list.push(issue_id);
            Ok(())
        }

        fn remove_issue_from_list(&mut self, issue_id: Uuid) -> Result<()> {
            let mut inner = self.0 .0.lock().unwrap();
            inner.calls.push(Call::RemoveFromList(issue_id));
            inner.list.retain(|id| *id != issue_id);
            Ok(())
        }

        fn fetch_issues_with_existing_pagination(
            &mut self,
            scope_id: Uuid,
            mode: FetchMode,
        ) -> Result<()> {
            self.0
                 .0
                .lock()
                .unwrap()
                .calls
                .push(Call::Fetch { scope_id, mode });
            Ok(())
        }
    }

    struct Fixture {
        reconciler: Reconciler<InMemoryIssueStore>,
        project: Handle,
        project_view: Handle,
        cycle: Handle,
        module: Handle,
        global_view: Handle,
    }

    fn fixture() -> Fixture {
        let project = Handle::default();
        let project_view = Handle::default();
        let cycle = Handle::default();
        let module = Handle::default();
        let global_view = Handle::default();
        let projections = ProjectionSet {
            project: Box::new(RecordingProjection(project.clone())),
            project_view: Box::new(RecordingProjection(project_view.clone())),
            cycle: Box::new(RecordingProjection(cycle.clone())),
            module: Box::new(RecordingProjection(module.clone())),
            global_view: Box::new(RecordingProjection(global_view.clone())),
        };
        Fixture {
            reconciler: Reconciler::new(InMemoryIssueStore::new(), projections),
            project,
            project_view,
            cycle,
            module,
            global_view,
        }
    }

    fn issue(id: Uuid, cycle_id: Option<Uuid>, module_ids: Vec<Uuid>) -> Issue {
        Issue {
            id,
            project_id: Uuid::new_v4(),
            cycle_id,
            module_ids,
            created_at: None,
            updated_at: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_created_goes_to_project_lists_at_top() {
        let mut fx = fixture();
        let record = issue(Uuid::new_v4(), None, Vec::new());

        fx.reconciler
            .apply(&ChangeEvent::Created(record.clone()), &ActiveContext::default())
            .unwrap();

        assert!(fx.reconciler.store().contains(record.id));
        for handle in [&fx.project, &fx.project_view] {
            assert_eq!(
                handle.calls(),
                vec![Call::AddIssue {
                    id: record.id,
                    at_top: true,
                }]
            );
        }
        assert!(fx.cycle.is_untouched());
        assert!(fx.module.is_untouched());
        assert!(fx.global_view.is_untouched());
    }

    #[test]
    fn test_created_appends_to_matching_active_scopes() {
        let mut fx = fixture();
        let cycle_id = Uuid::new_v4();
        let module_id = Uuid::new_v4();
        let ctx = ActiveContext {
            cycle_id: Some(cycle_id),
            module_id: Some(module_id),
            global_view_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), Some(cycle_id), vec![module_id]);

        fx.reconciler
            .apply(&ChangeEvent::Created(record.clone()), &ctx)
            .unwrap();

        assert_eq!(fx.cycle.calls(), vec![Call::AddToList(record.id)]);
        assert_eq!(fx.module.calls(), vec![Call::AddToList(record.id)]);
        assert_eq!(fx.global_view.calls(), vec![Call::AddToList(record.id)]);
    }

    #[test]
    fn test_created_with_empty_module_set_skips_module_projection() {
        let mut fx = fixture();
        let ctx = ActiveContext {
            module_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), None, Vec::new());

        fx.reconciler
            .apply(&ChangeEvent::Created(record), &ctx)
            .unwrap();

        assert!(fx.module.is_untouched());
    }

    #[test]
    fn test_created_then_deleted_leaves_no_trace() {
        let mut fx = fixture();
        let cycle_id = Uuid::new_v4();
        let ctx = ActiveContext {
            cycle_id: Some(cycle_id),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), Some(cycle_id), Vec::new());
        let id = record.id;

        fx.reconciler
            .apply(&ChangeEvent::Created(record), &ctx)
            .unwrap();
        fx.reconciler
            .apply(&ChangeEvent::Deleted { id }, &ctx)
            .unwrap();

        assert!(!fx.reconciler.store().contains(id));
        assert!(!fx.project.in_list(id));
        assert!(!fx.project_view.in_list(id));
        assert!(!fx.cycle.in_list(id));
    }

    #[test]
    fn test_updated_cycle_membership_transitions_both_directions() {
        let mut fx = fixture();
        let active_cycle = Uuid::new_v4();
        let ctx = ActiveContext {
            cycle_id: Some(active_cycle),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), None, Vec::new());
        let id = record.id;

        fx.reconciler
            .apply(&ChangeEvent::Created(record.clone()), &ctx)
            .unwrap();
        assert!(!fx.cycle.in_list(id));

        // null → active cycle: the cycle projection gains the issue.
        let mut joined = record.clone();
        joined.cycle_id = Some(active_cycle);
        fx.reconciler
            .apply(&ChangeEvent::Updated(joined.clone()), &ctx)
            .unwrap();
        assert!(fx.cycle.in_list(id));
        assert_eq!(
            fx.cycle.calls(),
            vec![
                Call::AddToList(id),
                Call::UpdateList {
                    id,
                    previous_cycle: None,
                },
            ]
        );

        // active cycle → other cycle: the cycle projection loses it, and
        // only removal is issued — no stale content update follows.
        let mut left = joined.clone();
        left.cycle_id = Some(Uuid::new_v4());
        fx.reconciler
            .apply(&ChangeEvent::Updated(left), &ctx)
            .unwrap();
        assert!(!fx.cycle.in_list(id));
        assert_eq!(fx.cycle.calls().last(), Some(&Call::RemoveFromList(id)));

        // The project projection received a content update for every
        // transition regardless.
        let project_updates = fx
            .project
            .calls()
            .iter()
            .filter(|call| matches!(call, Call::UpdateList { .. }))
            .count();
        assert_eq!(project_updates, 2);
    }

    #[test]
    fn test_updated_module_membership_uses_set_containment() {
        let mut fx = fixture();
        let active_module = Uuid::new_v4();
        let ctx = ActiveContext {
            module_id: Some(active_module),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), None, vec![active_module]);
        let id = record.id;

        fx.reconciler
            .apply(&ChangeEvent::Created(record.clone()), &ctx)
            .unwrap();
        assert!(fx.module.in_list(id));

        // Dropped from the active module but still in another one.
        let mut moved = record.clone();
        moved.module_ids = vec![Uuid::new_v4()];
        fx.reconciler
            .apply(&ChangeEvent::Updated(moved), &ctx)
            .unwrap();
        assert!(!fx.module.in_list(id));
        assert_eq!(fx.module.calls().last(), Some(&Call::RemoveFromList(id)));
    }

    #[test]
    fn test_updated_inside_active_cycle_pushes_content_update() {
        let mut fx = fixture();
        let active_cycle = Uuid::new_v4();
        let ctx = ActiveContext {
            cycle_id: Some(active_cycle),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), Some(active_cycle), Vec::new());
        let id = record.id;

        fx.reconciler
            .apply(&ChangeEvent::Created(record.clone()), &ctx)
            .unwrap();

        let mut renamed = record.clone();
        renamed
            .extra
            .insert("name".into(), serde_json::json!("Renamed"));
        fx.reconciler
            .apply(&ChangeEvent::Updated(renamed), &ctx)
            .unwrap();

        assert!(fx.cycle.in_list(id));
        assert_eq!(
            fx.cycle.calls().last(),
            Some(&Call::UpdateList {
                id,
                previous_cycle: Some(active_cycle),
            })
        );
    }

    #[test]
    fn test_updated_unknown_id_adopts_and_refetches_only() {
        let mut fx = fixture();
        let cycle_id = Uuid::new_v4();
        let view_id = Uuid::new_v4();
        let ctx = ActiveContext {
            cycle_id: Some(cycle_id),
            project_view_id: Some(view_id),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), Some(cycle_id), Vec::new());

        fx.reconciler
            .apply(&ChangeEvent::Updated(record.clone()), &ctx)
            .unwrap();

        // Adopted into the canonical store.
        assert!(fx.reconciler.store().contains(record.id));

        // Refetch calls only — never a partial content application.
        assert_eq!(
            fx.project.calls(),
            vec![Call::Fetch {
                scope_id: record.project_id,
                mode: FetchMode::Mutation,
            }]
        );
        assert_eq!(
            fx.project_view.calls(),
            vec![Call::Fetch {
                scope_id: view_id,
                mode: FetchMode::Mutation,
            }]
        );
        assert_eq!(
            fx.cycle.calls(),
            vec![Call::Fetch {
                scope_id: cycle_id,
                mode: FetchMode::Mutation,
            }]
        );
        // No active module/global view: untouched.
        assert!(fx.module.is_untouched());
        assert!(fx.global_view.is_untouched());
    }

    #[test]
    fn test_updated_unknown_id_skips_nonmatching_cycle_refetch() {
        let mut fx = fixture();
        let ctx = ActiveContext {
            cycle_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let record = issue(Uuid::new_v4(), Some(Uuid::new_v4()), Vec::new());

        fx.reconciler
            .apply(&ChangeEvent::Updated(record), &ctx)
            .unwrap();

        assert!(fx.cycle.is_untouched());
    }

    #[test]
    fn test_deleted_with_no_scoped_context_prunes_only_project_lists() {
        let mut fx = fixture();
        let record = issue(Uuid::new_v4(), None, Vec::new());
        let id = record.id;

        fx.reconciler
            .apply(&ChangeEvent::Created(record), &ActiveContext::default())
            .unwrap();
        fx.reconciler
            .apply(&ChangeEvent::Deleted { id }, &ActiveContext::default())
            .unwrap();

        assert_eq!(fx.project.calls().last(), Some(&Call::RemoveFromList(id)));
        assert_eq!(
            fx.project_view.calls().last(),
            Some(&Call::RemoveFromList(id))
        );
        assert!(fx.cycle.is_untouched());
        assert!(fx.module.is_untouched());
        assert!(fx.global_view.is_untouched());
        assert!(!fx.reconciler.store().contains(id));
    }

    #[test]
    fn test_deleted_removes_from_store_after_projections() {
        // The store must outlive all dependent list removals; verify by
        // having a projection look the issue up during its own removal.
        struct StoreCheckingProjection {
            store: crate::store::SharedIssueStore,
            saw_record_during_removal: Arc<Mutex<bool>>,
        }

        impl ListProjection for StoreCheckingProjection {
            fn add_issue(&mut self, _issue: &Issue, _at_top: bool) -> Result<()> {
                Ok(())
            }
            fn update_issue_list(&mut self, _updated: &Issue, _previous: &Issue) -> Result<()> {
                Ok(())
            }
            fn add_issue_to_list(&mut self, _issue_id: Uuid) -> Result<()> {
                Ok(())
            }
            fn remove_issue_from_list(&mut self, issue_id: Uuid) -> Result<()> {
                *self.saw_record_during_removal.lock().unwrap() =
                    self.store.get(issue_id).is_some();
                Ok(())
            }
            fn fetch_issues_with_existing_pagination(
                &mut self,
                _scope_id: Uuid,
                _mode: FetchMode,
            ) -> Result<()> {
                Ok(())
            }
        }

        let store = crate::store::SharedIssueStore::new();
        let saw = Arc::new(Mutex::new(false));
        let noop = || {
            Box::new(StoreCheckingProjection {
                store: store.clone(),
                saw_record_during_removal: Arc::new(Mutex::new(false)),
            }) as Box<dyn ListProjection>
        };
        let projections = ProjectionSet {
            project: Box::new(StoreCheckingProjection {
                store: store.clone(),
                saw_record_during_removal: saw.clone(),
            }),
            project_view: noop(),
            cycle: noop(),
            module: noop(),
            global_view: noop(),
        };
        let mut reconciler = Reconciler::new(store.clone(), projections);

        let record = issue(Uuid::new_v4(), None, Vec::new());
        let id = record.id;
        reconciler
            .apply(&ChangeEvent::Created(record), &ActiveContext::default())
            .unwrap();
        reconciler
            .apply(&ChangeEvent::Deleted { id }, &ActiveContext::default())
            .unwrap();

        assert!(*saw.lock().unwrap(), "store was pruned before projections");
        assert!(!store.contains(id));
    }

    #[test]
    fn test_projection_failure_propagates() {
        struct FailingProjection;

        impl ListProjection for FailingProjection {
            fn add_issue(&mut self, _issue: &Issue, _at_top: bool) -> Result<()> {
                anyhow::bail!("malformed list state")
            }
            fn update_issue_list(&mut self, _updated: &Issue, _previous: &Issue) -> Result<()> {
                anyhow::bail!("malformed list state")
            }
            fn add_issue_to_list(&mut self, _issue_id: Uuid) -> Result<()> {
                anyhow::bail!("malformed list state")
            }
            fn remove_issue_from_list(&mut self, _issue_id: Uuid) -> Result<()> {
                anyhow::bail!("malformed list state")
            }
            fn fetch_issues_with_existing_pagination(
                &mut self,
                _scope_id: Uuid,
                _mode: FetchMode,
            ) -> Result<()> {
                anyhow::bail!("malformed list state")
            }
        }

        let mut reconciler = Reconciler::new(
            InMemoryIssueStore::new(),
            ProjectionSet {
                project: Box::new(FailingProjection),
                project_view: Box::new(RecordingProjection(Handle::default())),
                cycle: Box::new(RecordingProjection(Handle::default())),
                module: Box::new(RecordingProjection(Handle::default())),
                global_view: Box::new(RecordingProjection(Handle::default())),
            },
        );

        let record = issue(Uuid::new_v4(), None, Vec::new());
        let err = reconciler
            .apply(&ChangeEvent::Created(record), &ActiveContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("malformed list state"));
    }
}
