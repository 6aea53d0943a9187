// Long-running store work (bulk deletes, backfill, reset) runs on its own
// thread and hands its result back over a one-shot channel, so an event loop
// can either await it or poll it between frames.

use tokio::sync::oneshot::{self, error::TryRecvError};

use crate::error::{AppError, AppResult};

pub struct BackgroundTask<T> {
    name: &'static str,
    rx: oneshot::Receiver<AppResult<T>>,
}

/// Run `work` on a fresh worker thread. There is no cancellation: the work
/// runs to completion even if the task handle is dropped.
pub fn spawn_blocking_task<T, F>(name: &'static str, work: F) -> BackgroundTask<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name(format!("rollcall-{name}"))
        .spawn(move || {
            tracing::debug!(task = name, "Background task started");
            let result = work();
            if let Err(ref e) = result {
                tracing::error!(task = name, "Background task failed: {}", e);
            }
            // The receiver may already be gone; the outcome is logged above.
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        // The sender was dropped with the closure, so the receiver reports
        // TaskAborted.
        tracing::error!(task = name, "Could not start background thread: {}", e);
    }
    BackgroundTask { name, rx }
}

impl<T> BackgroundTask<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the result from async code.
    pub async fn wait(self) -> AppResult<T> {
        self.rx.await.map_err(|_| AppError::TaskAborted)?
    }

    /// Block the current thread until the result arrives. Must not be called
    /// from inside an async runtime.
    pub fn wait_blocking(self) -> AppResult<T> {
        self.rx.blocking_recv().map_err(|_| AppError::TaskAborted)?
    }

    /// Non-blocking poll: `None` while the work is still running.
    pub fn try_result(&mut self) -> Option<AppResult<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(AppError::TaskAborted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn result_reaches_awaiting_caller() {
        let task = spawn_blocking_task("sum", || Ok((1..=10).sum::<i32>()));
        assert_eq!(task.name(), "sum");
        assert_eq!(task.wait().await.unwrap(), 55);
    }

    #[tokio::test]
    async fn errors_are_delivered_not_swallowed() {
        let task: BackgroundTask<()> =
            spawn_blocking_task("fail", || Err(AppError::NotFound("student 9".into())));
        assert!(matches!(task.wait().await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn panicking_work_reports_aborted() {
        let task: BackgroundTask<()> = spawn_blocking_task("boom", || panic!("worker died"));
        assert!(matches!(task.wait().await, Err(AppError::TaskAborted)));
    }

    #[test]
    fn polling_sees_pending_then_done() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut task = spawn_blocking_task("gated", move || {
            release_rx.recv().ok();
            Ok("done")
        });
        assert!(task.try_result().is_none());

        release_tx.send(()).unwrap();
        let mut result = None;
        for _ in 0..200 {
            if let Some(r) = task.try_result() {
                result = Some(r);
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(result.unwrap().unwrap(), "done");
    }

    #[test]
    fn wait_blocking_outside_runtime() {
        let task = spawn_blocking_task("blocking", || Ok(7u8));
        assert_eq!(task.wait_blocking().unwrap(), 7);
    }
}
