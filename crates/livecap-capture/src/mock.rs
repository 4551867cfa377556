//! Scripted collaborators for driving connections and supervisors without a network.
//!
//! [`MockConnector`] hands out one [`MockSession`] per `connect` call, in order. Once the
//! script is exhausted every further connect is refused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use livecap_core::{CaptureError, Envelope, EventKind, EventSink, StreamId};

use crate::transport::{Connector, Frame, FrameStream, Transport};

/// What a single connect attempt does.
pub enum MockSession {
    /// The connect call fails with a transport error.
    Refuse(String),
    /// Deliver the frames, then keep the socket open until stopped.
    Open(Vec<Frame>),
    /// Deliver the frames, then end the stream as if the peer hung up.
    Closing(Vec<Frame>),
    /// Deliver whatever is pushed through the paired sender.
    Live(mpsc::UnboundedReceiver<Frame>),
}

impl MockSession {
    pub fn refuse(reason: impl Into<String>) -> Self {
        Self::Refuse(reason.into())
    }

    pub fn open(frames: Vec<Frame>) -> Self {
        Self::Open(frames)
    }

    pub fn closing(frames: Vec<Frame>) -> Self {
        Self::Closing(frames)
    }

    /// A session fed at runtime. Dropping the sender ends the stream.
    pub fn live() -> (Self, UnboundedSender<Frame>) {
        let (tx, rx) = mpsc::unbounded();
        (Self::Live(rx), tx)
    }
}

pub struct MockConnector {
    script: Mutex<VecDeque<MockSession>>,
    sent: Arc<Mutex<Vec<Frame>>>,
    last_url: Mutex<Option<String>>,
    connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(sessions: Vec<MockSession>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(sessions.into()),
            sent: Arc::new(Mutex::new(Vec::new())),
            last_url: Mutex::new(None),
            connects: AtomicUsize::new(0),
        })
    }

    /// Append a session to the end of the script.
    pub fn push(&self, session: MockSession) {
        self.script.lock().push_back(session);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every frame written by the client, across all sessions.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.sent.lock().clone()
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Transport, CaptureError> {
        let _ = self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock() = Some(url.to_owned());

        let session = self.script.lock().pop_front();
        let stream: FrameStream = match session {
            None => return Err(CaptureError::Transport("no scripted session".into())),
            Some(MockSession::Refuse(reason)) => return Err(CaptureError::Transport(reason)),
            Some(MockSession::Open(frames)) => {
                Box::pin(stream::iter(frames.into_iter().map(Ok)).chain(stream::pending()))
            }
            Some(MockSession::Closing(frames)) => Box::pin(stream::iter(frames.into_iter().map(Ok))),
            Some(MockSession::Live(rx)) => Box::pin(rx.map(Ok)),
        };

        let sent = Arc::clone(&self.sent);
        let sink = futures::sink::unfold(sent, |sent, frame: Frame| async move {
            sent.lock().push(frame);
            Ok::<_, CaptureError>(sent)
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream,
        })
    }
}

/// [`EventSink`] that keeps every envelope and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    written: Mutex<Vec<Envelope>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    failing_writes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn written(&self) -> Vec<Envelope> {
        self.written.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.written.lock().iter().map(|e| e.event.kind()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Reject the next `n` writes. `usize::MAX` fails them indefinitely.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn open(&self, _stream_id: &StreamId) -> Result<(), CaptureError> {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(CaptureError::Sink("open refused".into()));
        }
        Ok(())
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), CaptureError> {
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n > 0).then(|| n.saturating_sub(1))
            })
            .is_ok();
        if failing {
            return Err(CaptureError::Sink("write rejected".into()));
        }
        self.written.lock().push(envelope.clone());
        Ok(())
    }

    async fn close(&self, _stream_id: &StreamId) -> Result<(), CaptureError> {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
