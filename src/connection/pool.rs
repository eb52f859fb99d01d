//! SL-042: Shared worker pool for background remote work.
//!
//! Work runs on the tokio blocking pool (unbounded queue). Callers block on
//! the result with a deadline; they never need to be async themselves.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a bounded wait ended without a result.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("interrupted while waiting")]
    Interrupted,

    #[error("task failed: {0}")]
    Failed(String),
}

struct PoolInner {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Do not wait for abandoned blocking work.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Own a small runtime dedicated to remoting chores.
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sshlaunch-remoting")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime: Some(runtime),
                handle,
            }),
        })
    }

    /// Borrow an existing multi-thread runtime. It must have the time
    /// driver enabled.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                runtime: None,
                handle,
            }),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// Queue `work`. It receives a token that is cancelled if the waiter
    /// gives up.
    pub fn submit<T, F>(&self, work: F) -> TaskHandle<T>
    where
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = self.inner.handle.spawn_blocking(move || work(&token));
        TaskHandle {
            join: Some(join),
            cancel,
            handle: self.inner.handle.clone(),
        }
    }
}

/// Handle to one submitted unit of work.
pub struct TaskHandle<T> {
    /// `None` once the result has been handed out.
    join: Option<JoinHandle<T>>,
    cancel: CancellationToken,
    handle: Handle,
}

impl<T> TaskHandle<T> {
    /// Block until the result arrives, `timeout` elapses, or `interrupt`
    /// fires. The interrupt token is only read, never reset.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(
        &mut self,
        timeout: Duration,
        interrupt: Option<&CancellationToken>,
    ) -> Result<T, WaitError> {
        let Some(join) = self.join.as_mut() else {
            return Err(WaitError::Failed("result already taken".to_string()));
        };
        let interrupted = async move {
            match interrupt {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let outcome = self.handle.block_on(async move {
            tokio::select! {
                biased;
                _ = interrupted => Err(WaitError::Interrupted),
                joined = tokio::time::timeout(timeout, join) => match joined {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(WaitError::Failed(e.to_string())),
                    Err(_) => Err(WaitError::TimedOut(timeout)),
                },
            }
        });
        if matches!(outcome, Ok(_) | Err(WaitError::Failed(_))) {
            self.join = None;
        }
        outcome
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the task to stop. Work already inside a blocking call keeps
    /// running until that call returns.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if let Some(join) = &self.join {
            join.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    #[test]
    fn test_sl042_submit_and_wait() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| 40 + 2);
        assert_eq!(handle.wait(Duration::from_secs(5), None).unwrap(), 42);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_sl042_result_taken_once() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| 7);
        assert_eq!(handle.wait(Duration::from_secs(5), None).unwrap(), 7);
        let err = handle.wait(Duration::from_secs(5), None).unwrap_err();
        assert!(matches!(err, WaitError::Failed(_)));
    }

    #[test]
    fn test_sl042_wait_times_out() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| std::thread::sleep(Duration::from_millis(500)));
        let start = Instant::now();
        let err = handle.wait(Duration::from_millis(100), None).unwrap_err();
        assert!(matches!(err, WaitError::TimedOut(_)));
        assert!(start.elapsed() < Duration::from_millis(450));
        assert!(!handle.is_finished());
        // A timed-out wait can be resumed.
        handle.wait(Duration::from_secs(5), None).unwrap();
    }

    #[test]
    fn test_sl042_interrupt_preserved() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| std::thread::sleep(Duration::from_millis(500)));
        let interrupt = CancellationToken::new();
        interrupt.cancel();
        let err = handle
            .wait(Duration::from_secs(5), Some(&interrupt))
            .unwrap_err();
        assert!(matches!(err, WaitError::Interrupted));
        assert!(interrupt.is_cancelled());
    }

    #[test]
    fn test_sl042_interrupt_wakes_blocked_waiter() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| std::thread::sleep(Duration::from_secs(3)));
        let interrupt = CancellationToken::new();
        let trigger = interrupt.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.cancel();
        });
        let start = Instant::now();
        let err = handle
            .wait(Duration::from_secs(10), Some(&interrupt))
            .unwrap_err();
        assert!(matches!(err, WaitError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn test_sl042_panicking_task_reports_failure() {
        let pool = WorkerPool::new().unwrap();
        let mut handle = pool.submit(|_| -> u8 { panic!("boom") });
        let err = handle.wait(Duration::from_secs(5), None).unwrap_err();
        assert!(matches!(err, WaitError::Failed(_)));
    }

    #[test]
    fn test_sl042_cancel_is_visible_to_task() {
        let pool = WorkerPool::new().unwrap();
        let saw_cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_cancel);
        let (started_tx, started_rx) = mpsc::channel();
        let handle = pool.submit(move |token| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(200));
            flag.store(token.is_cancelled(), Ordering::SeqCst);
        });
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
        std::thread::sleep(Duration::from_millis(500));
        assert!(saw_cancel.load(Ordering::SeqCst));
    }

    #[test]
    fn test_sl042_from_handle() {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let pool = WorkerPool::from_handle(runtime.handle().clone());
        let mut handle = pool.submit(|_| "done");
        assert_eq!(handle.wait(Duration::from_secs(5), None).unwrap(), "done");
    }
}
