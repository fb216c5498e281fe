//! Serialized turn queue
//!
//! Every submitted task gets one exclusive turn. Tasks run one at a time in
//! submission order on a single worker, and a failing task only fails its own
//! handle.

use crate::{RagMemoryError, Result};
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

struct Turn {
    id: u64,
    task: Task,
    done: oneshot::Sender<Result<()>>,
}

/// Resolves once the submitted task has finished, yielding the task's own result
#[derive(Debug)]
pub struct TurnHandle {
    id: u64,
    rx: oneshot::Receiver<Result<()>>,
}

impl TurnHandle {
    /// Submission sequence number of this turn
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for TurnHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RagMemoryError::QueueClosed)))
    }
}

/// FIFO mutual-exclusion work queue.
///
/// Must be created inside a Tokio runtime: construction spawns the worker.
#[derive(Debug)]
pub struct TurnQueue {
    tx: mpsc::UnboundedSender<Turn>,
    /// Tasks queued or running
    pending: Arc<watch::Sender<usize>>,
    running: Arc<AtomicBool>,
    closed: AtomicBool,
    next_id: AtomicU64,
    capacity: Option<usize>,
}

impl TurnQueue {
    /// Unbounded queue
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Queue that rejects submissions once `capacity` tasks are pending
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RagMemoryError::InvalidConfig(
                "turn queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self::build(Some(capacity)))
    }

    fn build(capacity: Option<usize>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let running = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_worker(rx, pending.clone(), running.clone()));

        Self {
            tx,
            pending,
            running,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Queue `task` behind all previously submitted work.
    ///
    /// Never waits for the turn itself; await the returned handle for that.
    pub fn submit<F, Fut>(&self, task: F) -> Result<TurnHandle>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RagMemoryError::QueueClosed);
        }

        self.reserve_slot()?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (done, rx) = oneshot::channel();
        let turn = Turn {
            id,
            task: Box::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(task()) }),
            done,
        };

        if self.tx.send(turn).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(RagMemoryError::QueueClosed);
        }

        debug!("Queued turn {} ({} pending)", id, self.pending());
        Ok(TurnHandle { id, rx })
    }

    fn reserve_slot(&self) -> Result<()> {
        let capacity = self.capacity;
        let reserved = self.pending.send_if_modified(|n| match capacity {
            Some(capacity) if *n >= capacity => false,
            _ => {
                *n += 1;
                true
            }
        });
        match (reserved, capacity) {
            (false, Some(capacity)) => Err(RagMemoryError::QueueFull { capacity }),
            _ => Ok(()),
        }
    }

    /// Tasks queued or running
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Suspend until no task is queued or running
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Whether a task body is executing right now
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting new work. Already queued tasks still run.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for TurnQueue {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Turn>,
    pending: Arc<watch::Sender<usize>>,
    running: Arc<AtomicBool>,
) {
    while let Some(turn) = rx.recv().await {
        running.store(true, Ordering::SeqCst);

        // Run on its own task so a panic is contained to this turn.
        let outcome = match tokio::spawn((turn.task)()).await {
            Ok(result) => result,
            Err(e) => Err(RagMemoryError::TaskPanicked(e.to_string())),
        };

        running.store(false, Ordering::SeqCst);
        pending.send_modify(|n| *n = n.saturating_sub(1));

        if let Err(e) = &outcome {
            warn!("Turn {} failed: {}", turn.id, e);
        }
        // The submitter may have dropped its handle.
        let _ = turn.done.send(outcome);
    }
    debug!("Turn queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TurnQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..10u64 {
            let order = order.clone();
            handles.push(
                queue
                    .submit(move || async move {
                        // Later tasks finish faster if run concurrently
                        tokio::time::sleep(Duration::from_millis(10 - i)).await;
                        order.lock().unwrap().push(i);
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_tasks_never_overlap() {
        let queue = TurnQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(
                queue
                    .submit(move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_stall() {
        let queue = TurnQueue::new();
        let failing = queue
            .submit(|| async { Err(RagMemoryError::Completion("backend down".to_string())) })
            .unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let next = queue
            .submit(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(matches!(failing.await, Err(RagMemoryError::Completion(_))));
        next.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let queue = TurnQueue::new();
        let boom = queue
            .submit(|| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();
        let after = queue.submit(|| async { Ok(()) }).unwrap();

        assert!(matches!(boom.await, Err(RagMemoryError::TaskPanicked(_))));
        assert!(after.await.is_ok());
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_bounded_capacity() {
        let queue = TurnQueue::with_capacity(2).unwrap();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = queue
            .submit(move || async move {
                let _ = release_rx.await;
                Ok(())
            })
            .unwrap();
        let second = queue.submit(|| async { Ok(()) }).unwrap();

        assert!(matches!(
            queue.submit(|| async { Ok(()) }),
            Err(RagMemoryError::QueueFull { capacity: 2 })
        ));

        release_tx.send(()).unwrap();
        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(queue.pending(), 0);
        assert!(queue.submit(|| async { Ok(()) }).is_ok());
    }

    #[tokio::test]
    async fn test_zero_capacity_rejected() {
        assert!(TurnQueue::with_capacity(0).is_err());
    }

    #[tokio::test]
    async fn test_close_rejects_but_drains() {
        let queue = TurnQueue::new();
        let queued = queue
            .submit(|| async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            })
            .unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(matches!(
            queue.submit(|| async { Ok(()) }),
            Err(RagMemoryError::QueueClosed)
        ));
        assert!(queued.await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let queue = TurnQueue::new();
        queue.wait_idle().await;

        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let _handle = queue
            .submit(move || async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert_eq!(queue.pending(), 1);
        queue.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
        assert!(!queue.is_running());
    }

    #[tokio::test]
    async fn test_handle_ids_increase() {
        let queue = TurnQueue::new();
        let a = queue.submit(|| async { Ok(()) }).unwrap();
        let b = queue.submit(|| async { Ok(()) }).unwrap();
        assert!(b.id() > a.id());
        a.await.unwrap();
        b.await.unwrap();
    }
}
