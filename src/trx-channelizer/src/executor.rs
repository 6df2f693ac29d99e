// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Single worker thread that runs submitted closures one at a time, in
//! submission order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::oneshot;

use crate::error::{ChannelizerError, ChannelizerResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct SerialExecutor {
    name: String,
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    pub fn new(name: &str) -> ChannelizerResult<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })?;
        Ok(Self {
            name: name.to_string(),
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, job: Job) -> ChannelizerResult<()> {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| ChannelizerError::ExecutorClosed),
            None => Err(ChannelizerError::ExecutorClosed),
        }
    }

    /// Queue `f` without waiting for it. A panic is logged and swallowed.
    pub fn spawn<F>(&self, f: F) -> ChannelizerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.clone();
        self.submit(Box::new(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
                tracing::warn!("{}: task {}", name, ChannelizerError::from_panic(payload));
            }
        }))
    }

    /// Run `f` on the worker thread and wait for its result.
    pub async fn run<F, T>(&self, f: F) -> ChannelizerResult<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).map_err(ChannelizerError::from_panic);
            let _ = done_tx.send(result);
        }))?;
        done_rx
            .await
            .map_err(|_| ChannelizerError::ExecutorClosed)?
    }

    /// Finish queued work, then stop the worker. Idempotent.
    pub fn shutdown(&self) {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("{}: worker thread panicked", self.name);
            }
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_on_the_named_worker_in_order() {
        let exec = SerialExecutor::new("test-serial").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let log = log.clone();
            exec.spawn(move || log.lock().unwrap().push(i)).unwrap();
        }
        let name = exec
            .run(|| std::thread::current().name().map(str::to_string))
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-serial"));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn panics_come_back_as_errors() {
        let exec = SerialExecutor::new("test-panic").unwrap();
        let err = exec
            .run(|| -> u32 { panic!("probe blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelizerError::TaskPanicked(ref m) if m == "probe blew up"));
        // The worker survives.
        assert_eq!(exec.run(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn closed_executor_rejects_work() {
        let exec = SerialExecutor::new("test-closed").unwrap();
        exec.shutdown();
        exec.shutdown();
        assert!(matches!(
            exec.run(|| ()).await,
            Err(ChannelizerError::ExecutorClosed)
        ));
        assert!(matches!(
            exec.spawn(|| ()),
            Err(ChannelizerError::ExecutorClosed)
        ));
    }
}
