//! Registry of running captures, keyed by stream.
//!
//! Guarantees at most one supervisor and at most one live connection per stream. Both maps
//! use atomic insert-if-absent; entries remove themselves when their owner ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use livecap_core::{CaptureError, StreamId, UniqueId};

use crate::supervisor::{CaptureContext, CaptureSupervisor, SupervisorHandle};

/// Result of [`CaptureRegistry::start`].
pub enum Registration {
    /// A new supervisor was spawned.
    Started(SupervisorHandle),
    /// A supervisor was already running for the stream.
    Attached(SupervisorHandle),
}

impl Registration {
    pub fn handle(&self) -> &SupervisorHandle {
        match self {
            Self::Started(handle) | Self::Attached(handle) => handle,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, Self::Started(_))
    }
}

pub struct CaptureRegistry {
    ctx: Arc<CaptureContext>,
    supervisors: DashMap<StreamId, SupervisorHandle>,
    connections: DashMap<StreamId, u64>,
    next_id: AtomicU64,
}

impl CaptureRegistry {
    pub fn new(ctx: CaptureContext) -> Arc<Self> {
        Arc::new(Self {
            ctx: Arc::new(ctx),
            supervisors: DashMap::new(),
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn context(&self) -> &Arc<CaptureContext> {
        &self.ctx
    }

    /// Start supervising `stream_id`, or attach to the supervisor already doing so.
    pub fn start(self: &Arc<Self>, stream_id: StreamId, unique_id: UniqueId) -> Registration {
        let (supervisor, handle) = match self.supervisors.entry(stream_id.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(stream_id = %stream_id, "capture already running, attaching");
                return Registration::Attached(existing.get().clone());
            }
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (supervisor, handle) =
                    CaptureSupervisor::new(id, stream_id, unique_id, Arc::clone(self));
                let _ = slot.insert(handle.clone());
                (supervisor, handle)
            }
        };
        tokio::spawn(supervisor.run_to_end());
        Registration::Started(handle)
    }

    pub fn get(&self, stream_id: &StreamId) -> Option<SupervisorHandle> {
        self.supervisors.get(stream_id).map(|entry| entry.value().clone())
    }

    pub fn is_running(&self, stream_id: &StreamId) -> bool {
        self.supervisors.contains_key(stream_id)
    }

    pub fn has_connection(&self, stream_id: &StreamId) -> bool {
        self.connections.contains_key(stream_id)
    }

    pub fn active_streams(&self) -> Vec<StreamId> {
        self.supervisors.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn supervisor_count(&self) -> usize {
        self.supervisors.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Request a stop. Returns whether a supervisor was running.
    pub fn stop(&self, stream_id: &StreamId) -> bool {
        match self.get(stream_id) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every supervisor and wait for all of them to terminate.
    pub async fn stop_all(&self) -> usize {
        let handles: Vec<SupervisorHandle> = self
            .supervisors
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            handle.stop();
        }
        for handle in &handles {
            let outcome = handle.terminated().await;
            tracing::debug!(stream_id = %handle.stream_id(), outcome = outcome.as_str(), "capture stopped");
        }
        handles.len()
    }

    /// Reserve the single connection slot for `stream_id`.
    pub fn claim_connection(self: &Arc<Self>, stream_id: &StreamId) -> Result<ConnectionLease, CaptureError> {
        match self.connections.entry(stream_id.clone()) {
            Entry::Occupied(_) => Err(CaptureError::AlreadyRunning(format!(
                "connection for {stream_id}"
            ))),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let _ = slot.insert(id);
                Ok(ConnectionLease {
                    registry: Arc::downgrade(self),
                    stream_id: stream_id.clone(),
                    id,
                })
            }
        }
    }

    pub(crate) fn release_supervisor(&self, stream_id: &StreamId, id: u64) {
        let _ = self
            .supervisors
            .remove_if(stream_id, |_, handle| handle.id() == id);
    }
}

/// Exclusive right to hold a provider connection for one stream. Released on drop.
pub struct ConnectionLease {
    registry: Weak<CaptureRegistry>,
    stream_id: StreamId,
    id: u64,
}

impl ConnectionLease {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry
                .connections
                .remove_if(&self.stream_id, |_, id| *id == self.id);
        }
    }
}
