//! # livecap-capture
//!
//! Live connections to the provider, event fan-out, and per-stream supervision.
//!
//! - **Transport**: `Connector` seam over WebSocket frames (`tokio-tungstenite` in production)
//! - **Connection manager**: one socket per stream with heartbeats and bounded reconnection
//! - **Broadcaster**: per-stream topics with bounded subscriber queues
//! - **Sink worker**: drains a stream's topic into the persistence sink
//! - **Supervisor**: starts, monitors and restarts a connection plus its sink
//! - **Registry / worker**: at most one supervisor per stream, driven by capture jobs
//!
//! ## Crate Position
//!
//! Depends on: livecap-core, livecap-protocol, livecap-settings.
//! Depended on by: the `livecap` binary.

#![deny(unsafe_code)]

pub mod broadcast;
pub mod connection;
pub mod local;
pub mod mock;
pub mod registry;
pub mod sink;
pub mod supervisor;
pub mod task;
pub mod transport;
pub mod worker;

pub use broadcast::{EventBroadcaster, Subscription};
pub use connection::{
    build_url, ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionOutcome,
    ConnectionPhase, ConnectionState,
};
pub use local::{LoggingSink, MemoryStore};
pub use registry::{CaptureRegistry, ConnectionLease, Registration};
pub use sink::{start_sink, SinkHandle, SinkOutcome};
pub use supervisor::{
    CaptureContext, SupervisorHandle, SupervisorOutcome, SupervisorPhase, SupervisorPolicy,
};
pub use transport::{Connector, Frame, Transport, WsConnector};
pub use worker::{CaptureJob, CaptureWorker, JobOutcome};
