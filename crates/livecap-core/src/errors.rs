/// Typed error hierarchy for capture operations.
/// Classifies errors as fatal (don't retry), retryable, or operational.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CaptureError {
    // Fatal, never retried
    #[error("configuration error: {0}")]
    Configuration(String),

    // Retryable
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("sink error: {0}")]
    Sink(String),

    // Operational
    #[error("already running: {0}")]
    AlreadyRunning(String),
    #[error("cancelled")]
    Cancelled,
}

impl CaptureError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Closed(_) | Self::Store(_) | Self::Sink(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport(_) => "transport",
            Self::Closed(_) => "closed",
            Self::Store(_) => "store",
            Self::Sink(_) => "sink",
            Self::AlreadyRunning(_) => "already_running",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_is_fatal() {
        let err = CaptureError::Configuration("missing api key".into());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_classification() {
        assert!(CaptureError::Transport("reset".into()).is_retryable());
        assert!(CaptureError::Closed("1006".into()).is_retryable());
        assert!(CaptureError::Store("timeout".into()).is_retryable());
        assert!(CaptureError::Sink("disk full".into()).is_retryable());
    }

    #[test]
    fn operational_errors_are_neither() {
        for err in [
            CaptureError::Cancelled,
            CaptureError::AlreadyRunning("stream_1".into()),
        ] {
            assert!(!err.is_retryable(), "{err}");
            assert!(!err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(CaptureError::Cancelled.error_kind(), "cancelled");
        assert_eq!(
            CaptureError::Configuration(String::new()).error_kind(),
            "configuration"
        );
        assert_eq!(CaptureError::Transport(String::new()).error_kind(), "transport");
    }

    #[test]
    fn display_includes_detail() {
        let err = CaptureError::Configuration("api key is empty".into());
        assert_eq!(err.to_string(), "configuration error: api key is empty");
    }
}
