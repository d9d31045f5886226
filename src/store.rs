//! In-memory canonical issue store.
//!
//! `InMemoryIssueStore` is the plain single-owner implementation;
//! `SharedIssueStore` wraps it for the common case where the channel task
//! owns the reconciler but the surrounding code still wants to read the
//! store (the reconciler remains the only writer).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use uuid::Uuid;

use crate::projection::CanonicalStore;
use crate::types::Issue;

/// HashMap-backed canonical store.
#[derive(Debug, Default)]
pub struct InMemoryIssueStore {
    issues: HashMap<Uuid, Issue>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn contains(&self, issue_id: Uuid) -> bool {
        self.issues.contains_key(&issue_id)
    }
}

impl CanonicalStore for InMemoryIssueStore {
    fn get_issue_by_id(&self, issue_id: Uuid) -> Option<Issue> {
        self.issues.get(&issue_id).cloned()
    }

    fn add_issues(&mut self, issues: &[Issue]) -> Result<()> {
        for issue in issues {
            self.issues.insert(issue.id, issue.clone());
        }
        Ok(())
    }

    fn update_issue(&mut self, issue_id: Uuid, updated: &Issue) -> Result<()> {
        self.issues.insert(issue_id, updated.clone());
        Ok(())
    }

    fn remove_issue(&mut self, issue_id: Uuid) -> Result<()> {
        self.issues.remove(&issue_id);
        Ok(())
    }
}

/// Clonable handle to an `InMemoryIssueStore` living inside the channel task.
#[derive(Debug, Clone, Default)]
pub struct SharedIssueStore {
    inner: Arc<Mutex<InMemoryIssueStore>>,
}

impl SharedIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, issue_id: Uuid) -> Option<Issue> {
        self.get_issue_by_id(issue_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|store| store.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, issue_id: Uuid) -> bool {
        self.inner
            .lock()
            .map(|store| store.contains(issue_id))
            .unwrap_or(false)
    }
}

impl CanonicalStore for SharedIssueStore {
    fn get_issue_by_id(&self, issue_id: Uuid) -> Option<Issue> {
        self.inner
            .lock()
            .ok()
            .and_then(|store| store.get_issue_by_id(issue_id))
    }

    fn add_issues(&mut self, issues: &[Issue]) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("issue store mutex poisoned"))?
            .add_issues(issues)
    }

    fn update_issue(&mut self, issue_id: Uuid, updated: &Issue) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("issue store mutex poisoned"))?
            .update_issue(issue_id, updated)
    }

    fn remove_issue(&mut self, issue_id: Uuid) -> Result<()> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("issue store mutex poisoned"))?
            .remove_issue(issue_id)
    }
}
