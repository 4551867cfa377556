//! In-process collaborators for running a capture without external services.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use livecap_core::{CaptureError, Envelope, EventSink, StreamId, StreamStatus, StreamStore};

/// Stream statuses held in memory. Unknown streams read as `not_found`.
#[derive(Default)]
pub struct MemoryStore {
    statuses: DashMap<StreamId, StreamStatus>,
    unavailable: AtomicBool,
    failed_marks: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_status(&self, stream_id: &StreamId, status: StreamStatus) {
        let _ = self.statuses.insert(stream_id.clone(), status);
    }

    pub fn status(&self, stream_id: &StreamId) -> StreamStatus {
        self.statuses
            .get(stream_id)
            .map_or(StreamStatus::NotFound, |status| *status)
    }

    /// Make every call fail with a store error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// How many times a stream was marked failed.
    pub fn failed_marks(&self) -> usize {
        self.failed_marks.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), CaptureError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CaptureError::Store("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamStore for MemoryStore {
    async fn get_stream_status(&self, stream_id: &StreamId) -> Result<StreamStatus, CaptureError> {
        self.check_available()?;
        Ok(self.status(stream_id))
    }

    async fn mark_stream_failed(&self, stream_id: &StreamId) -> Result<(), CaptureError> {
        self.check_available()?;
        self.set_status(stream_id, StreamStatus::Failed);
        let _ = self.failed_marks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that renders each event as a log line.
#[derive(Default)]
pub struct LoggingSink {
    written: AtomicU64,
}

impl LoggingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventSink for LoggingSink {
    async fn open(&self, stream_id: &StreamId) -> Result<(), CaptureError> {
        tracing::info!(stream_id = %stream_id, "logging sink opened");
        Ok(())
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), CaptureError> {
        let _ = self.written.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            stream_id = %envelope.stream_id,
            kind = %envelope.event.kind(),
            at = %envelope.event.timestamp,
            "{}",
            envelope.event.summary()
        );
        Ok(())
    }

    async fn close(&self, stream_id: &StreamId) -> Result<(), CaptureError> {
        tracing::info!(stream_id = %stream_id, written = self.written(), "logging sink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livecap_core::{Event, EventPayload};

    #[tokio::test]
    async fn unknown_stream_is_not_found() {
        let store = MemoryStore::new();
        let status = store
            .get_stream_status(&StreamId::from_raw("missing"))
            .await
            .unwrap();
        assert_eq!(status, StreamStatus::NotFound);
    }

    #[tokio::test]
    async fn mark_failed_updates_status() {
        let store = MemoryStore::new();
        let stream = StreamId::from_raw("s1");
        store.set_status(&stream, StreamStatus::Capturing);

        store.mark_stream_failed(&stream).await.unwrap();
        assert_eq!(store.status(&stream), StreamStatus::Failed);
        assert_eq!(store.failed_marks(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .get_stream_status(&StreamId::from_raw("s1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(store.mark_stream_failed(&StreamId::from_raw("s1")).await.is_err());
        assert_eq!(store.failed_marks(), 0);
    }

    #[tokio::test]
    async fn logging_sink_counts_writes() {
        let sink = LoggingSink::new();
        let envelope = Envelope {
            stream_id: StreamId::from_raw("s1"),
            event: Event::lifecycle(EventPayload::Connected),
        };
        sink.write(&envelope).await.unwrap();
        sink.write(&envelope).await.unwrap();
        assert_eq!(sink.written(), 2);
    }
}
