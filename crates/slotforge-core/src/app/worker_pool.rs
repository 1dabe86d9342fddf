//! WorkerPool - disk / encode 処理を main thread から外すための実行器
//!
//! - 各 work item は tokio runtime 上で一度だけ実行される
//! - 完了は oneshot で一度だけ通知される（main thread は poll するだけ）
//! - in-flight 数は watch channel で追跡し、shutdown 時に bounded wait する

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

/// Result of polling a submitted work item.
#[derive(Debug)]
pub enum WorkPoll<T> {
    Pending,
    Ready(T),
    /// The item was abandoned (panic or runtime shutdown) without a result.
    Lost,
}

/// Main-thread side of one submitted work item.
#[derive(Debug)]
pub struct WorkHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> WorkHandle<T> {
    /// Never blocks.
    pub fn poll(&mut self) -> WorkPoll<T> {
        match self.rx.try_recv() {
            Ok(value) => WorkPoll::Ready(value),
            Err(TryRecvError::Empty) => WorkPoll::Pending,
            Err(TryRecvError::Closed) => WorkPoll::Lost,
        }
    }
}

/// Counts an item as in flight until dropped, including on panic.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct WorkerPool {
    runtime: Runtime,
    in_flight_tx: Arc<watch::Sender<usize>>,
    in_flight_rx: watch::Receiver<usize>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("slotforge-worker")
            .enable_all()
            .build()?;
        let (tx, rx) = watch::channel(0usize);
        Ok(Self {
            runtime,
            in_flight_tx: Arc::new(tx),
            in_flight_rx: rx,
        })
    }

    /// Run `work` off the main thread.
    ///
    /// `work` must only touch data moved into it, never live world state.
    pub fn submit<F, T>(&self, label: &'static str, work: F) -> WorkHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let guard = InFlight::enter(&self.in_flight_tx);
        debug!(work = label, "submitting work item");
        self.runtime.spawn(async move {
            let _guard = guard;
            let output = work.await;
            // 受け手が先に消えていたら（キャンセル済み）結果は捨てる
            let _ = tx.send(output);
        });
        WorkHandle { rx }
    }

    /// Drive a future to completion on the pool from the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight_rx.borrow()
    }

    /// Wait up to `timeout` for outstanding items, then stop the runtime.
    ///
    /// Returns how many items were abandoned.
    pub fn shutdown(self, timeout: Duration) -> usize {
        let started = Instant::now();
        let mut rx = self.in_flight_rx.clone();
        let drained = self.runtime.block_on(async {
            tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0))
                .await
                .is_ok()
        });
        let abandoned = if drained { 0 } else { *self.in_flight_rx.borrow() };
        if abandoned > 0 {
            warn!(abandoned, ?timeout, "worker pool shut down with work still in flight");
        }
        self.runtime
            .shutdown_timeout(timeout.saturating_sub(started.elapsed()));
        abandoned
    }
}
