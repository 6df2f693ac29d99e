// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded hand-off between the host's producer callback and a dedicated
//! dispatch thread, over a broadcast ring with a single receiver. The
//! producer never blocks: a full ring overwrites its oldest block and the
//! dispatch thread counts the skipped blocks when it catches up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use num_complex::Complex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::ChannelizerResult;
use crate::host::SampleBlock;

struct OwnedBlock {
    samples: Vec<Complex<f32>>,
    sample_rate: f64,
}

type QueuedBlock = Arc<OwnedBlock>;

struct QueueShared {
    /// Recycled sample buffers.
    pool: Mutex<Vec<Vec<Complex<f32>>>>,
    max_pool: usize,
    dropped: AtomicU64,
    shutdown: AtomicBool,
}

impl QueueShared {
    fn take_buffer(&self) -> Vec<Complex<f32>> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    fn recycle(&self, block: QueuedBlock) {
        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        // The ring may still hold its copy; the buffer is then left to it.
        if let Ok(block) = Arc::try_unwrap(block) {
            let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            if pool.len() < self.max_pool {
                pool.push(block.samples);
            }
        }
    }

    fn record_lag(&self, skipped: u64) {
        let total = self.dropped.fetch_add(skipped, Ordering::Relaxed) + skipped;
        tracing::debug!(
            "wideband dispatch backlog full, dropped {} block(s) ({} total)",
            skipped,
            total
        );
    }
}

pub struct DispatchQueue {
    tx: Mutex<Option<broadcast::Sender<QueuedBlock>>>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawn the dispatch thread. `deliver` runs on that thread for every
    /// block, in push order. The ring holds `max_backlog` blocks, rounded
    /// up to a power of two.
    pub fn start<F>(max_backlog: usize, deliver: F) -> ChannelizerResult<Self>
    where
        F: Fn(&SampleBlock<'_>) + Send + 'static,
    {
        let max_backlog = max_backlog.max(1);
        let (tx, rx) = broadcast::channel::<QueuedBlock>(max_backlog);
        let shared = Arc::new(QueueShared {
            pool: Mutex::new(Vec::new()),
            max_pool: max_backlog,
            dropped: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let worker_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("wideband-dispatch".to_string())
            .spawn(move || dispatch_loop(rx, &worker_shared, deliver))?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Copy `samples` into the ring. Never blocks on the consumer.
    pub fn push(&self, samples: &[Complex<f32>], sample_rate: f64) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = tx.as_ref() else {
            return;
        };

        let mut buf = self.shared.take_buffer();
        buf.clear();
        buf.extend_from_slice(samples);
        // Fails only once the dispatch thread has gone.
        let _ = tx.send(Arc::new(OwnedBlock {
            samples: buf,
            sample_rate,
        }));
    }

    /// Blocks queued but not yet taken by the dispatch thread.
    pub fn backlog(&self) -> usize {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|tx| tx.len())
            .unwrap_or(0)
    }

    /// Blocks overwritten before the dispatch thread reached them.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Stop the dispatch thread and discard anything still queued.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        // Closing the ring wakes an idle dispatch thread.
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // Shut down from inside a delivery; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("wideband dispatch thread panicked");
            }
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop<F>(mut rx: broadcast::Receiver<QueuedBlock>, shared: &QueueShared, deliver: F)
where
    F: Fn(&SampleBlock<'_>),
{
    loop {
        match rx.blocking_recv() {
            Ok(block) => {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                deliver(&SampleBlock::new(&block.samples, block.sample_rate));
                shared.recycle(block);
            }
            Err(RecvError::Lagged(skipped)) => shared.record_lag(skipped),
            Err(RecvError::Closed) => return,
        }
    }
}
