//! Fire-and-forget work scheduled after a response has been produced.

use crate::error::{BoxError, BridgeError};
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle to a spawned background task.
///
/// Dropping the handle does not cancel the task. Failures are logged unless an error sink
/// is attached with [`BackgroundTask::on_error`] or the task is joined.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    handle: JoinHandle<Result<(), BoxError>>,
}

/// Spawns `future` on the current tokio runtime.
pub fn spawn<F, E>(name: impl Into<String>, future: F) -> BackgroundTask
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
{
    let name = name.into();
    let task_name = name.clone();
    let handle = tokio::spawn(async move {
        let result = future.await.map_err(Into::into);
        if let Err(e) = &result {
            warn!(task = %task_name, cause = %e, "background task failed");
        }
        result
    });
    BackgroundTask { name, handle }
}

impl BackgroundTask {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn join(self) -> Result<(), BridgeError> {
        match self.handle.await {
            Ok(result) => result.map_err(|e| BridgeError::background(&self.name, e)),
            Err(e) => Err(BridgeError::background(&self.name, e)),
        }
    }

    /// Hands the eventual failure to `sink` instead of requiring a join.
    pub fn on_error<S>(self, sink: S) -> tokio::task::JoinHandle<()>
    where
        S: FnOnce(BridgeError) + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = self.join().await {
                sink(e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_join_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let task = spawn("count", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(())
        });

        assert_eq!(task.name(), "count");
        task.join().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_reaches_sink() {
        let (tx, rx) = oneshot::channel();
        let task = spawn("mailer", async { Err::<(), _>("smtp down") });
        let _sink = task.on_error(move |e| {
            let _ = tx.send(e.to_string());
        });

        let message = rx.await.unwrap();
        assert_eq!(message, "background task `mailer` failed: smtp down");
    }

    #[tokio::test]
    async fn test_abort_reports_cancellation() {
        let task = spawn("forever", async {
            std::future::pending::<()>().await;
            Ok::<_, BoxError>(())
        });
        task.abort();
        assert!(matches!(task.join().await, Err(BridgeError::Background { .. })));
    }
}
