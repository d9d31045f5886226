//! Real-time issue synchronization client.
//!
//! Opens one persistent WebSocket per active project, decodes inbound
//! change events (`issue.created` / `issue.updated` / `issue.deleted`),
//! and reconciles them into the canonical issue store plus the derived
//! list projections (project, project-view, cycle, module, global view)
//! so each projection's membership and content stay correct.
//!
//! Rendering, routing, and the server producing these events are out of
//! scope — projections are external collaborators behind the traits in
//! [`projection`].
//!
//! ```no_run
//! use issue_channel::{
//!     ActiveContext, ChannelConfig, IssueChannel, Reconciler, SharedIssueStore,
//! };
//!
//! # fn projections() -> issue_channel::ProjectionSet { unimplemented!() }
//! # async fn open(project_id: uuid::Uuid) -> anyhow::Result<()> {
//! let config = ChannelConfig::from_env()?;
//! let store = SharedIssueStore::new();
//! let reconciler = Reconciler::new(store.clone(), projections());
//! let (_context_tx, context_rx) = tokio::sync::watch::channel(ActiveContext::default());
//!
//! let channel = IssueChannel::open(config, project_id, reconciler, context_rx);
//! // ... navigation away:
//! channel.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod projection;
pub mod reconciler;
pub mod store;
pub mod types;

pub use channel::IssueChannel;
pub use config::ChannelConfig;
pub use error::DecodeError;
pub use event::{decode, ChangeEvent};
pub use projection::{CanonicalStore, ListProjection, ProjectionSet};
pub use reconciler::Reconciler;
pub use store::{InMemoryIssueStore, SharedIssueStore};
pub use types::{ActiveContext, FetchMode, Issue};
