//! Tail a project's issue channel from the terminal.
//!
//! Connects with logging-only projections and an in-memory store, printing
//! every reconciled event. Useful for verifying server-side broadcast
//! wiring without a frontend.
//!
//! ```text
//! API_WS_ORIGIN=ws://localhost:8000 channel_tail <project-uuid>
//! ```

use anyhow::{Context, Result};
use tracing::info;
use uuid::Uuid;

use issue_channel::{
    ActiveContext, ChannelConfig, FetchMode, Issue, IssueChannel, ListProjection, ProjectionSet,
    Reconciler, SharedIssueStore,
};

/// Projection that only logs the mutations it receives.
struct LoggingProjection {
    scope: &'static str,
}

impl LoggingProjection {
    fn boxed(scope: &'static str) -> Box<dyn ListProjection> {
        Box::new(Self { scope })
    }
}

impl ListProjection for LoggingProjection {
    fn add_issue(&mut self, issue: &Issue, at_top: bool) -> Result<()> {
        info!(scope = self.scope, issue_id = %issue.id, at_top, "add_issue");
        Ok(())
    }

    fn update_issue_list(&mut self, updated: &Issue, _previous: &Issue) -> Result<()> {
        info!(scope = self.scope, issue_id = %updated.id, "update_issue_list");
        Ok(())
    }

    fn add_issue_to_list(&mut self, issue_id: Uuid) -> Result<()> {
        info!(scope = self.scope, %issue_id, "add_issue_to_list");
        Ok(())
    }

    fn remove_issue_from_list(&mut self, issue_id: Uuid) -> Result<()> {
        info!(scope = self.scope, %issue_id, "remove_issue_from_list");
        Ok(())
    }

    fn fetch_issues_with_existing_pagination(
        &mut self,
        scope_id: Uuid,
        mode: FetchMode,
    ) -> Result<()> {
        info!(scope = self.scope, %scope_id, mode = mode.as_str(), "refetch");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,issue_channel=debug".into()),
        )
        .init();

    let project_id: Uuid = std::env::args()
        .nth(1)
        .context("Usage: channel_tail <project-uuid>")?
        .parse()
        .context("Parsing project id")?;

    let config = ChannelConfig::from_env()?;
    let store = SharedIssueStore::new();
    let projections = ProjectionSet {
        project: LoggingProjection::boxed("project"),
        project_view: LoggingProjection::boxed("project-view"),
        cycle: LoggingProjection::boxed("cycle"),
        module: LoggingProjection::boxed("module"),
        global_view: LoggingProjection::boxed("global-view"),
    };
    let reconciler = Reconciler::new(store.clone(), projections);
    let (_context_tx, context_rx) = tokio::sync::watch::channel(ActiveContext::default());

    let channel = IssueChannel::open(config, project_id, reconciler, context_rx);
    info!(%project_id, "Tailing issue channel, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    channel.close().await?;
    info!(issues_seen = store.len(), "Done");
    Ok(())
}
