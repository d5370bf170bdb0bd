use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use url::Url;

/// A unit of crawl work. Owned exclusively by the queue until dequeued.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    pub url: Url,
    pub depth: usize,
}

#[derive(Debug)]
pub enum EnqueueError {
    /// The queue was saturated; the task is handed back so the caller can
    /// report the drop instead of losing it silently.
    Full(CrawlTask),
    Closed(CrawlTask),
}

/// Bounded task queue shared by all workers, doubling as the completion
/// detector. The in-flight counter is incremented before every successful
/// enqueue (seed included) and decremented only once a worker has fully
/// processed a task, child enqueues included. When it reaches zero the
/// sender is dropped, which disconnects every pending `next()` and lets
/// the pool drain out.
pub struct Frontier {
    tx: Mutex<Option<flume::Sender<CrawlTask>>>,
    rx: flume::Receiver<CrawlTask>,
    in_flight: AtomicUsize,
}

impl Frontier {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Non-blocking enqueue. The increment happens before the send and is
    /// rolled back on failure, so the counter never reaches zero while a
    /// task is queued or processing.
    pub fn enqueue(&self, task: CrawlTask) -> Result<(), EnqueueError> {
        let guard = self.tx.lock().expect("frontier sender lock poisoned");
        let tx = match guard.as_ref() {
            Some(tx) => tx,
            None => return Err(EnqueueError::Closed(task)),
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(task)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(EnqueueError::Full(task))
            }
            Err(flume::TrySendError::Disconnected(task)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(EnqueueError::Closed(task))
            }
        }
    }

    /// Await the next task; `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<CrawlTask> {
        self.rx.recv_async().await.ok()
    }

    /// Mark a dequeued task fully processed. Closes the queue on
    /// quiescence: no task queued, none in flight.
    pub fn task_done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.close();
        }
    }

    /// Drop the sender so workers blocked in `next()` unblock. Idempotent.
    pub fn close(&self) {
        self.tx.lock().expect("frontier sender lock poisoned").take();
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
