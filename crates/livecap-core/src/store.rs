//! Contracts for the external persistence collaborators.
//!
//! The capture core never owns stream records. It reads a stream's status to decide whether
//! capture should continue and asks for the `failed` transition; captured events are handed
//! to an [`EventSink`] that is responsible for durable storage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::events::Envelope;
use crate::ids::StreamId;

/// Externally recorded status of a stream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Pending,
    Capturing,
    Ended,
    Failed,
    NotFound,
}

impl StreamStatus {
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Capturing => "capturing",
            Self::Ended => "ended",
            Self::Failed => "failed",
            Self::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read status / request failure. The only two calls the capture core makes into persistence.
#[async_trait]
pub trait StreamStore: Send + Sync {
    async fn get_stream_status(&self, stream_id: &StreamId) -> Result<StreamStatus, CaptureError>;
    async fn mark_stream_failed(&self, stream_id: &StreamId) -> Result<(), CaptureError>;
}

/// Durable destination for captured events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Prepare to receive events for a stream. Failing here aborts capture startup.
    async fn open(&self, stream_id: &StreamId) -> Result<(), CaptureError>;

    async fn write(&self, envelope: &Envelope) -> Result<(), CaptureError>;

    /// Flush anything buffered. Called on orderly shutdown only.
    async fn close(&self, _stream_id: &StreamId) -> Result<(), CaptureError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_capturing_is_capturing() {
        assert!(StreamStatus::Capturing.is_capturing());
        for status in [
            StreamStatus::Pending,
            StreamStatus::Ended,
            StreamStatus::Failed,
            StreamStatus::NotFound,
        ] {
            assert!(!status.is_capturing(), "{status}");
        }
    }

    #[test]
    fn status_serde_is_snake_case() {
        let json = serde_json::to_string(&StreamStatus::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
        let parsed: StreamStatus = serde_json::from_str("\"capturing\"").unwrap();
        assert_eq!(parsed, StreamStatus::Capturing);
    }
}
