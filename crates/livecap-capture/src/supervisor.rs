//! Per-stream supervision of a connection manager and a persistence sink.
//!
//! A supervisor reads the stream's status, starts the sink and then the connection, and
//! monitors both. It ends when the stream ends, when the connection gives up, when the
//! external status leaves `capturing`, or on request. Unexpected child exits are restarted
//! after a delay, within a bounded budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use livecap_core::{CaptureError, EventKind, EventSink, StreamId, StreamStatus, StreamStore, UniqueId};
use livecap_settings::{LivecapSettings, SupervisorSettings};

use crate::broadcast::EventBroadcaster;
use crate::connection::{ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionOutcome};
use crate::registry::CaptureRegistry;
use crate::sink::{start_sink, SinkHandle, SinkOutcome};
use crate::transport::Connector;

/// Restart and re-validation policy.
#[derive(Clone, Debug)]
pub struct SupervisorPolicy {
    pub restart_delay: Duration,
    pub status_check_interval: Duration,
    pub max_restarts: u32,
    pub stop_timeout: Duration,
    /// Back-off handed to the job queue when status can't be read before starting.
    pub startup_retry: Duration,
}

impl SupervisorPolicy {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            restart_delay: Duration::from_secs(settings.restart_delay_secs),
            status_check_interval: Duration::from_secs(settings.status_check_interval_secs),
            max_restarts: settings.max_restarts,
            stop_timeout: Duration::from_secs(settings.stop_timeout_secs),
            startup_retry: Duration::from_secs(settings.startup_retry_secs),
        }
    }
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self::from_settings(&SupervisorSettings::default())
    }
}

/// Collaborators shared by every supervisor in a registry.
pub struct CaptureContext {
    pub store: Arc<dyn StreamStore>,
    pub sink: Arc<dyn EventSink>,
    pub connector: Arc<dyn Connector>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub connection: ConnectionConfig,
    pub policy: SupervisorPolicy,
}

impl CaptureContext {
    pub fn from_settings(
        settings: &LivecapSettings,
        store: Arc<dyn StreamStore>,
        sink: Arc<dyn EventSink>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            store,
            sink,
            connector,
            broadcaster: EventBroadcaster::new(settings.broadcast.subscriber_queue),
            connection: ConnectionConfig::from_settings(&settings.provider),
            policy: SupervisorPolicy::from_settings(&settings.supervisor),
        }
    }
}

/// Why a supervisor terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Status was not `capturing` at startup; nothing was started.
    NotCapturing(StreamStatus),
    /// Status could not be read; nothing new was started.
    StatusUnavailable,
    /// A child failed to start; the stream was marked failed.
    StartFailed,
    /// The provider reported the end of the broadcast.
    Ended,
    /// Status left `capturing` while monitoring.
    StatusChanged(StreamStatus),
    /// Connection gave up or the restart budget ran out; the stream was marked failed.
    Failed,
    /// Stopped on request.
    Stopped,
}

impl SupervisorOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCapturing(_) => "not_capturing",
            Self::StatusUnavailable => "status_unavailable",
            Self::StartFailed => "start_failed",
            Self::Ended => "ended",
            Self::StatusChanged(_) => "status_changed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorPhase {
    Starting,
    Monitoring,
    Restarting,
    Terminated(SupervisorOutcome),
}

/// Cloneable handle to a registered supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    id: u64,
    stream_id: StreamId,
    unique_id: UniqueId,
    cancel: CancellationToken,
    phase: watch::Receiver<SupervisorPhase>,
}

impl SupervisorHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    pub fn phase(&self) -> SupervisorPhase {
        *self.phase.borrow()
    }

    /// Ask the supervisor to stop both children and terminate.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for termination.
    ///
    /// A supervisor task that dies without reporting (a panic) counts as [`SupervisorOutcome::Failed`].
    pub async fn terminated(&self) -> SupervisorOutcome {
        let mut phase = self.phase.clone();
        loop {
            if let SupervisorPhase::Terminated(outcome) = *phase.borrow_and_update() {
                return outcome;
            }
            if phase.changed().await.is_err() {
                return match *phase.borrow() {
                    SupervisorPhase::Terminated(outcome) => outcome,
                    _ => SupervisorOutcome::Failed,
                };
            }
        }
    }
}

enum ChildExit {
    Connection(Option<ConnectionOutcome>),
    Sink(Option<SinkOutcome>),
}

impl ChildExit {
    fn child(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Sink(_) => "sink",
        }
    }

    /// How the child ended, for logs. `None` outcomes mean the task panicked.
    fn describe(&self) -> String {
        match self {
            Self::Connection(Some(outcome)) => format!("{outcome:?}"),
            Self::Sink(Some(SinkOutcome::Failed(reason))) => format!("failed: {reason}"),
            Self::Sink(Some(SinkOutcome::Stopped)) => "stopped".to_owned(),
            Self::Connection(None) | Self::Sink(None) => "panicked".to_owned(),
        }
    }
}

struct Children {
    connection: ConnectionHandle,
    sink: SinkHandle,
}

impl Children {
    /// Connection first so the sink can drain whatever is already queued.
    async fn stop(&mut self, timeout: Duration) {
        let _ = self.connection.stop(timeout).await;
        let _ = self.sink.stop(timeout).await;
    }
}

pub(crate) struct CaptureSupervisor {
    id: u64,
    stream_id: StreamId,
    unique_id: UniqueId,
    ctx: Arc<CaptureContext>,
    registry: Arc<CaptureRegistry>,
    cancel: CancellationToken,
    phase: watch::Sender<SupervisorPhase>,
}

impl CaptureSupervisor {
    /// Create the supervisor and the handle callers keep.
    pub(crate) fn new(
        id: u64,
        stream_id: StreamId,
        unique_id: UniqueId,
        registry: Arc<CaptureRegistry>,
    ) -> (Self, SupervisorHandle) {
        let cancel = CancellationToken::new();
        let (phase_tx, phase_rx) = watch::channel(SupervisorPhase::Starting);
        let handle = SupervisorHandle {
            id,
            stream_id: stream_id.clone(),
            unique_id: unique_id.clone(),
            cancel: cancel.clone(),
            phase: phase_rx,
        };
        let supervisor = Self {
            id,
            stream_id,
            unique_id,
            ctx: Arc::clone(registry.context()),
            registry,
            cancel,
            phase: phase_tx,
        };
        (supervisor, handle)
    }

    /// Run until termination, then deregister and publish the outcome.
    pub(crate) async fn run_to_end(self) {
        let outcome = self.run().await;
        self.registry.release_supervisor(&self.stream_id, self.id);
        tracing::info!(
            stream_id = %self.stream_id,
            unique_id = %self.unique_id,
            outcome = outcome.as_str(),
            "capture supervisor terminated"
        );
        let _ = self.phase.send_replace(SupervisorPhase::Terminated(outcome));
    }

    async fn run(&self) -> SupervisorOutcome {
        let policy = &self.ctx.policy;

        match self.ctx.store.get_stream_status(&self.stream_id).await {
            Ok(status) if status.is_capturing() => {}
            Ok(status) => {
                tracing::info!(stream_id = %self.stream_id, %status, "stream not capturing, nothing to supervise");
                return SupervisorOutcome::NotCapturing(status);
            }
            Err(e) => {
                tracing::warn!(stream_id = %self.stream_id, error = %e, "stream status unavailable, not starting");
                return SupervisorOutcome::StatusUnavailable;
            }
        }

        // Subscribed before the children start so their first lifecycle events are seen.
        let mut events = self.ctx.broadcaster.subscribe(&self.stream_id);
        let mut children = match self.start_children().await {
            Ok(children) => children,
            Err(e) => {
                tracing::error!(stream_id = %self.stream_id, error = %e, "capture failed to start");
                self.mark_failed().await;
                return SupervisorOutcome::StartFailed;
            }
        };
        self.set_phase(SupervisorPhase::Monitoring);
        tracing::info!(stream_id = %self.stream_id, unique_id = %self.unique_id, "capture started");

        let period = policy.status_check_interval;
        let mut status_check = tokio::time::interval_at(Instant::now() + period, period);
        status_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut restarts = 0u32;

        loop {
            let exit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    children.stop(policy.stop_timeout).await;
                    return SupervisorOutcome::Stopped;
                }
                outcome = children.connection.wait() => ChildExit::Connection(outcome),
                outcome = children.sink.wait() => ChildExit::Sink(outcome),
                envelope = events.recv() => {
                    let Some(envelope) = envelope else {
                        children.stop(policy.stop_timeout).await;
                        return SupervisorOutcome::Stopped;
                    };
                    // Only broadcast content postpones the next status check.
                    if !envelope.event.kind().is_lifecycle() {
                        status_check.reset();
                    }
                    match envelope.event.kind() {
                        EventKind::StreamEnded => {
                            tracing::info!(stream_id = %self.stream_id, "broadcast ended");
                            children.stop(policy.stop_timeout).await;
                            return SupervisorOutcome::Ended;
                        }
                        EventKind::ConnectionFailed => {
                            children.stop(policy.stop_timeout).await;
                            self.mark_failed().await;
                            return SupervisorOutcome::Failed;
                        }
                        _ => continue,
                    }
                }
                _ = status_check.tick() => {
                    match self.ctx.store.get_stream_status(&self.stream_id).await {
                        Ok(status) if !status.is_capturing() => {
                            tracing::info!(stream_id = %self.stream_id, %status, "stream no longer capturing");
                            children.stop(policy.stop_timeout).await;
                            return SupervisorOutcome::StatusChanged(status);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(stream_id = %self.stream_id, error = %e, "periodic status check failed");
                        }
                    }
                    continue;
                }
            };

            if let ChildExit::Connection(Some(ConnectionOutcome::Failed { attempts })) = exit {
                tracing::error!(stream_id = %self.stream_id, attempts, "provider connection failed");
                children.stop(policy.stop_timeout).await;
                self.mark_failed().await;
                return SupervisorOutcome::Failed;
            }
            tracing::warn!(
                stream_id = %self.stream_id,
                child = exit.child(),
                outcome = %exit.describe(),
                restarts,
                "child exited unexpectedly"
            );
            children.stop(policy.stop_timeout).await;
            self.set_phase(SupervisorPhase::Restarting);

            while let Some(envelope) = events.try_recv() {
                if envelope.event.kind() == EventKind::StreamEnded {
                    return SupervisorOutcome::Ended;
                }
            }

            if let Err(outcome) = self.check_restartable().await {
                return outcome;
            }

            if restarts >= policy.max_restarts {
                tracing::error!(stream_id = %self.stream_id, restarts, "restart budget exhausted");
                self.mark_failed().await;
                return SupervisorOutcome::Failed;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SupervisorOutcome::Stopped,
                _ = tokio::time::sleep(policy.restart_delay) => {}
            }
            // Status may have moved during the delay.
            if let Err(outcome) = self.check_restartable().await {
                return outcome;
            }
            restarts += 1;

            children = match self.start_children().await {
                Ok(children) => children,
                Err(e) => {
                    tracing::error!(stream_id = %self.stream_id, error = %e, "capture failed to restart");
                    self.mark_failed().await;
                    return SupervisorOutcome::StartFailed;
                }
            };
            tracing::info!(stream_id = %self.stream_id, restarts, "capture restarted");
            self.set_phase(SupervisorPhase::Monitoring);
            status_check.reset();
        }
    }

    /// Sink first, then the connection.
    async fn start_children(&self) -> Result<Children, CaptureError> {
        let timeout = self.ctx.policy.stop_timeout;
        let mut sink = start_sink(
            self.stream_id.clone(),
            Arc::clone(&self.ctx.sink),
            &self.ctx.broadcaster,
            self.cancel.child_token(),
        )
        .await?;

        let lease = match self.registry.claim_connection(&self.stream_id) {
            Ok(lease) => lease,
            Err(e) => {
                let _ = sink.stop(timeout).await;
                return Err(e);
            }
        };
        let started = ConnectionManager::new(
            self.stream_id.clone(),
            self.unique_id.clone(),
            self.ctx.connection.clone(),
            Arc::clone(&self.ctx.connector),
            Arc::clone(&self.ctx.broadcaster),
        )
        .with_lease(lease)
        .start(self.cancel.child_token());

        match started {
            Ok(connection) => Ok(Children { connection, sink }),
            Err(e) => {
                let _ = sink.stop(timeout).await;
                Err(e)
            }
        }
    }

    /// A restart goes ahead only while the stream is still `capturing`.
    async fn check_restartable(&self) -> Result<(), SupervisorOutcome> {
        match self.ctx.store.get_stream_status(&self.stream_id).await {
            Ok(status) if status.is_capturing() => Ok(()),
            Ok(status) => {
                tracing::info!(stream_id = %self.stream_id, %status, "stream no longer capturing, not restarting");
                Err(SupervisorOutcome::StatusChanged(status))
            }
            Err(e) => {
                tracing::warn!(stream_id = %self.stream_id, error = %e, "status unavailable, not restarting");
                Err(SupervisorOutcome::StatusUnavailable)
            }
        }
    }

    async fn mark_failed(&self) {
        if let Err(e) = self.ctx.store.mark_stream_failed(&self.stream_id).await {
            tracing::error!(stream_id = %self.stream_id, error = %e, "failed to mark stream failed");
        }
    }

    fn set_phase(&self, phase: SupervisorPhase) {
        let _ = self.phase.send_replace(phase);
    }
}
