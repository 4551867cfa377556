//! Cancellable handle over a spawned child task.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

enum TaskState<T> {
    Running(JoinHandle<T>),
    Finished(Option<T>),
}

/// Owns a spawned task and the token that asks it to stop.
pub struct ChildHandle<T> {
    cancel: CancellationToken,
    state: TaskState<T>,
}

impl<T: Clone + Send + 'static> ChildHandle<T> {
    pub fn spawn<F>(cancel: CancellationToken, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self {
            cancel,
            state: TaskState::Running(tokio::spawn(future)),
        }
    }

    /// Wait for the task to finish. `None` if it panicked or was aborted.
    ///
    /// Cancel-safe; may be called again after completion.
    pub async fn wait(&mut self) -> Option<T> {
        match &mut self.state {
            TaskState::Running(handle) => {
                let result = match handle.await {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(error = %e, "child task did not complete");
                        None
                    }
                };
                self.state = TaskState::Finished(result.clone());
                result
            }
            TaskState::Finished(result) => result.clone(),
        }
    }

    /// Request a stop and wait up to `timeout`, aborting the task if it overruns.
    pub async fn stop(&mut self, timeout: Duration) -> Option<T> {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(?timeout, "child task ignored stop request, aborting");
                if let TaskState::Running(handle) = &self.state {
                    handle.abort();
                }
                self.wait().await
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Running(handle) => handle.is_finished(),
            TaskState::Finished(_) => true,
        }
    }
}
