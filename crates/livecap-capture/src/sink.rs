//! Persistence sink worker: drains a stream's topic into an [`EventSink`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use livecap_core::{CaptureError, EventSink, StreamId};

use crate::broadcast::{EventBroadcaster, Subscription};
use crate::task::ChildHandle;

/// How a sink worker ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkOutcome {
    /// Stopped on request after draining queued events.
    Stopped,
    /// A write failed; the error message is kept for logging.
    Failed(String),
}

/// Handle to a running sink worker.
pub struct SinkHandle {
    child: ChildHandle<SinkOutcome>,
}

impl SinkHandle {
    pub async fn wait(&mut self) -> Option<SinkOutcome> {
        self.child.wait().await
    }

    pub async fn stop(&mut self, timeout: Duration) -> Option<SinkOutcome> {
        self.child.stop(timeout).await
    }

    pub fn is_finished(&self) -> bool {
        self.child.is_finished()
    }
}

/// Subscribe to `stream_id`, open the sink, and spawn the write loop.
///
/// The subscription is taken before `open` so nothing published after this call is missed.
pub async fn start_sink(
    stream_id: StreamId,
    sink: Arc<dyn EventSink>,
    broadcaster: &Arc<EventBroadcaster>,
    cancel: CancellationToken,
) -> Result<SinkHandle, CaptureError> {
    let subscription = broadcaster.subscribe(&stream_id);
    sink.open(&stream_id).await?;
    tracing::debug!(stream_id = %stream_id, "persistence sink opened");

    let worker = SinkWorker {
        stream_id,
        sink,
        subscription,
        cancel: cancel.clone(),
    };
    Ok(SinkHandle {
        child: ChildHandle::spawn(cancel, worker.run()),
    })
}

struct SinkWorker {
    stream_id: StreamId,
    sink: Arc<dyn EventSink>,
    subscription: Subscription,
    cancel: CancellationToken,
}

impl SinkWorker {
    async fn run(mut self) -> SinkOutcome {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.drain_and_close().await,
                envelope = self.subscription.recv() => match envelope {
                    Some(envelope) => {
                        if let Err(e) = self.sink.write(&envelope).await {
                            tracing::error!(stream_id = %self.stream_id, error = %e, "sink write failed");
                            return SinkOutcome::Failed(e.to_string());
                        }
                    }
                    None => return self.drain_and_close().await,
                },
            }
        }
    }

    async fn drain_and_close(&mut self) -> SinkOutcome {
        while let Some(envelope) = self.subscription.try_recv() {
            if let Err(e) = self.sink.write(&envelope).await {
                tracing::warn!(stream_id = %self.stream_id, error = %e, "sink write failed while draining");
                return SinkOutcome::Failed(e.to_string());
            }
        }
        if let Err(e) = self.sink.close(&self.stream_id).await {
            tracing::warn!(stream_id = %self.stream_id, error = %e, "sink close failed");
        }
        SinkOutcome::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use livecap_core::{Event, EventPayload};

    fn join() -> Event {
        Event::lifecycle(EventPayload::Join)
    }

    #[tokio::test]
    async fn writes_published_events_and_drains_on_stop() {
        let broadcaster = EventBroadcaster::new(16);
        let recorder = RecordingSink::new();
        let stream = StreamId::from_raw("s1");
        let mut handle = start_sink(
            stream.clone(),
            recorder.clone() as Arc<dyn EventSink>,
            &broadcaster,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        for _ in 0..3 {
            let _ = broadcaster.publish(&stream, join());
        }
        assert_eq!(
            handle.stop(Duration::from_secs(1)).await,
            Some(SinkOutcome::Stopped)
        );
        assert_eq!(recorder.written().len(), 3);
        assert_eq!(recorder.open_count(), 1);
        assert_eq!(recorder.close_count(), 1);
        assert_eq!(broadcaster.subscriber_count(&stream), 0);
    }

    #[tokio::test]
    async fn open_failure_aborts_start() {
        let broadcaster = EventBroadcaster::new(16);
        let recorder = RecordingSink::new();
        recorder.fail_open(true);

        let result = start_sink(
            StreamId::from_raw("s1"),
            recorder.clone() as Arc<dyn EventSink>,
            &broadcaster,
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CaptureError::Sink(_))));
        assert_eq!(broadcaster.topic_count(), 0);
    }

    #[tokio::test]
    async fn write_failure_ends_worker() {
        let broadcaster = EventBroadcaster::new(16);
        let recorder = RecordingSink::new();
        recorder.fail_next_writes(1);
        let stream = StreamId::from_raw("s1");
        let mut handle = start_sink(
            stream.clone(),
            recorder.clone() as Arc<dyn EventSink>,
            &broadcaster,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let _ = broadcaster.publish(&stream, join());
        assert!(matches!(handle.wait().await, Some(SinkOutcome::Failed(_))));
        assert_eq!(recorder.close_count(), 0);
    }
}
