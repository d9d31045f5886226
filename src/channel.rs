//! Connection manager — one auto-reconnecting WebSocket per active project.
//!
//! `IssueChannel::open` spawns the channel task; `close` signals shutdown
//! and waits for in-flight event handling to finish. On unexpected
//! disconnect the task reconnects with exponential backoff, resetting the
//! backoff after each successful connect. All event handling runs on this
//! single task, one frame at a time, so reconciliation is atomic with
//! respect to other events.
//!
//! Exactly one channel per project: the owning scope closes the previous
//! channel before opening a new one.

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::event::decode;
use crate::projection::CanonicalStore;
use crate::reconciler::Reconciler;
use crate::types::ActiveContext;

/// Initial backoff duration (doubles on each retry).
const INITIAL_BACKOFF_MS: u64 = 250;
/// Backoff cap. Reconnection itself is unbounded — the channel keeps
/// trying for as long as the project stays open.
const MAX_BACKOFF_MS: u64 = 30_000;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Handle to a running per-project channel task.
pub struct IssueChannel {
    project_id: Uuid,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl IssueChannel {
    /// Open the channel for a project and start reconciling its events.
    ///
    /// The reconciler moves into the channel task; share state with the
    /// outside through `SharedIssueStore` or projection-internal handles.
    pub fn open<S>(
        config: ChannelConfig,
        project_id: Uuid,
        reconciler: Reconciler<S>,
        context_rx: watch::Receiver<ActiveContext>,
    ) -> Self
    where
        S: CanonicalStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_channel(
            config,
            project_id,
            reconciler,
            context_rx,
            shutdown_rx,
        ));
        Self {
            project_id,
            shutdown_tx,
            task,
        }
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    /// Whether the channel task has stopped (shutdown or consistency error).
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Tear the channel down, letting an in-flight event finish first.
    ///
    /// Returns the task's result: `Err` carries a consistency failure that
    /// already terminated the task.
    pub async fn close(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => Err(join_err).context("Issue channel task panicked"),
        }
    }
}

/// Why a connected session ended.
enum SessionEnd {
    /// Shutdown was requested; stop for good.
    Shutdown,
    /// The transport dropped; reconnect.
    Disconnected,
}

async fn run_channel<S>(
    config: ChannelConfig,
    project_id: Uuid,
    mut reconciler: Reconciler<S>,
    context_rx: watch::Receiver<ActiveContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()>
where
    S: CanonicalStore + 'static,
{
    let url = config.issue_channel_url(project_id)?;
    let mut reconnect_attempts: u32 = 0;

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!(project_id = %project_id, url = %url, "Issue channel connected");
                reconnect_attempts = 0;

                let end = read_frames(
                    socket,
                    project_id,
                    &mut reconciler,
                    &context_rx,
                    &mut shutdown_rx,
                )
                .await?;

                match end {
                    SessionEnd::Shutdown => {
                        info!(project_id = %project_id, "Issue channel closed");
                        return Ok(());
                    }
                    SessionEnd::Disconnected => {
                        warn!(project_id = %project_id, "Issue channel disconnected");
                    }
                }
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Issue channel connect failed");
            }
        }

        if *shutdown_rx.borrow() {
            return Ok(());
        }

        reconnect_attempts = reconnect_attempts.saturating_add(1);
        let backoff = backoff_ms(reconnect_attempts);
        debug!(
            project_id = %project_id,
            reconnect_attempts,
            backoff_ms = backoff,
            "Reconnecting issue channel"
        );
        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(backoff)) => {}
            changed = shutdown_rx.changed() => {
                // A dropped sender means the owning handle is gone.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

/// Read frames until shutdown or disconnect, reconciling each decoded event.
///
/// Decode failures are absorbed per frame; a reconciliation failure is a
/// consistency bug and propagates, terminating the channel task.
async fn read_frames<S>(
    mut socket: Socket,
    project_id: Uuid,
    reconciler: &mut Reconciler<S>,
    context_rx: &watch::Receiver<ActiveContext>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<SessionEnd>
where
    S: CanonicalStore,
{
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                // A dropped sender means the owning handle is gone; treat
                // both cases as shutdown.
                if changed.is_err() || *shutdown_rx.borrow() {
                    return Ok(SessionEnd::Shutdown);
                }
            }
            frame = socket.next() => {
                match frame {
                    None => return Ok(SessionEnd::Disconnected),
                    Some(Err(e)) => {
                        warn!(project_id = %project_id, error = %e, "Issue channel transport error");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Some(Ok(Message::Text(raw))) => {
                        handle_frame(&raw, project_id, reconciler, context_rx)?;
                    }
                    Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Disconnected),
                    // Ping/pong/binary frames carry no events.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn handle_frame<S>(
    raw: &str,
    project_id: Uuid,
    reconciler: &mut Reconciler<S>,
    context_rx: &watch::Receiver<ActiveContext>,
) -> Result<()>
where
    S: CanonicalStore,
{
    match decode(raw) {
        Ok(event) => {
            let ctx = context_rx.borrow().clone();
            debug!(
                project_id = %project_id,
                kind = event.kind(),
                issue_id = %event.issue_id(),
                "Reconciling issue event"
            );
            reconciler
                .apply(&event, &ctx)
                .context("Reconciling issue event")
        }
        Err(e) if e.is_unknown_kind() => {
            debug!(project_id = %project_id, error = %e, "Ignoring unrecognized event kind");
            Ok(())
        }
        Err(e) => {
            warn!(project_id = %project_id, error = %e, "Dropping undecodable issue frame");
            Ok(())
        }
    }
}

/// Exponential backoff with a cap: 250ms, 500ms, 1s, ... 30s.
fn backoff_ms(attempt: u32) -> u64 {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1).min(16));
    (INITIAL_BACKOFF_MS.saturating_mul(factor)).min(MAX_BACKOFF_MS)
}
