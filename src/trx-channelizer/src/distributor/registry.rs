// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::DistributorOptions;
use crate::error::ChannelizerResult;
use crate::host::{WidebandHost, WidebandStream};

use super::WidebandDistributor;

#[derive(Default)]
struct RegistryInner {
    distributor: Option<Arc<WidebandDistributor>>,
    leases: usize,
}

/// Owner of the one wideband distributor attached to a host.
///
/// The first [`acquire`](Self::acquire) creates the distributor and installs
/// it as the host's stream hook; dropping the last [`WidebandLease`] detaches
/// and shuts it down.
pub struct WidebandRegistry {
    host: Arc<dyn WidebandHost>,
    options: DistributorOptions,
    inner: Mutex<RegistryInner>,
}

impl WidebandRegistry {
    pub fn new(host: Arc<dyn WidebandHost>, options: DistributorOptions) -> Arc<Self> {
        Arc::new(Self {
            host,
            options,
            inner: Mutex::new(RegistryInner::default()),
        })
    }

    pub fn host(&self) -> &Arc<dyn WidebandHost> {
        &self.host
    }

    pub fn acquire(self: &Arc<Self>) -> ChannelizerResult<WidebandLease> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let distributor = match &inner.distributor {
            Some(existing) => existing.clone(),
            None => {
                let created = WidebandDistributor::new(self.host.clone(), self.options.clone())?;
                let stream: Arc<dyn WidebandStream> = created.clone();
                self.host.attach_stream(stream);
                tracing::info!("wideband stream attached to host");
                inner.distributor = Some(created.clone());
                created
            }
        };
        inner.leases += 1;
        Ok(WidebandLease {
            registry: self.clone(),
            distributor,
        })
    }

    pub fn active_leases(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .leases
    }

    /// The live distributor, if any lease is held.
    pub fn current(&self) -> Option<Arc<WidebandDistributor>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .distributor
            .clone()
    }

    fn release(&self) {
        let released = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.leases = inner.leases.saturating_sub(1);
            if inner.leases > 0 {
                return;
            }
            let released = inner.distributor.take();
            // Detach before unlocking: a concurrent acquire must not have
            // its fresh hook removed by this release.
            if released.is_some() {
                self.host.detach_stream();
            }
            released
        };
        if let Some(distributor) = released {
            distributor.shutdown();
            tracing::info!("wideband stream detached from host");
        }
    }
}

/// Shared handle on the registry's distributor. Dereferences to it.
pub struct WidebandLease {
    registry: Arc<WidebandRegistry>,
    distributor: Arc<WidebandDistributor>,
}

impl WidebandLease {
    pub fn distributor(&self) -> &Arc<WidebandDistributor> {
        &self.distributor
    }
}

impl Deref for WidebandLease {
    type Target = WidebandDistributor;

    fn deref(&self) -> &Self::Target {
        &self.distributor
    }
}

impl Drop for WidebandLease {
    fn drop(&mut self) {
        self.registry.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StreamVariant;
    use num_complex::Complex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Default)]
    struct HookHost {
        attached: AtomicUsize,
        detached: AtomicUsize,
        stream: Mutex<Option<Arc<dyn WidebandStream>>>,
    }

    impl WidebandHost for HookHost {
        fn tuned_frequency_hz(&self) -> i64 {
            430_000_000
        }
        fn attach_stream(&self, stream: Arc<dyn WidebandStream>) {
            self.attached.fetch_add(1, Ordering::SeqCst);
            *self.stream.lock().unwrap() = Some(stream);
        }
        fn detach_stream(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
            *self.stream.lock().unwrap() = None;
        }
    }

    /// Host whose `detach_stream` parks until the test lets it go.
    struct SlowDetachHost {
        stream: Mutex<Option<Arc<dyn WidebandStream>>>,
        entered: Mutex<mpsc::Sender<()>>,
        resume: Mutex<mpsc::Receiver<()>>,
    }

    impl WidebandHost for SlowDetachHost {
        fn tuned_frequency_hz(&self) -> i64 {
            430_000_000
        }
        fn attach_stream(&self, stream: Arc<dyn WidebandStream>) {
            *self.stream.lock().unwrap() = Some(stream);
        }
        fn detach_stream(&self) {
            let _ = self.entered.lock().unwrap().send(());
            let _ = self.resume.lock().unwrap().recv_timeout(Duration::from_secs(2));
            *self.stream.lock().unwrap() = None;
        }
    }

    #[test]
    fn acquire_during_last_release_keeps_its_hook() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel();
        let host = Arc::new(SlowDetachHost {
            stream: Mutex::new(None),
            entered: Mutex::new(entered_tx),
            resume: Mutex::new(resume_rx),
        });
        let registry = WidebandRegistry::new(host.clone(), DistributorOptions::default());

        let first = registry.acquire().unwrap();
        let releasing = std::thread::spawn(move || drop(first));
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let acquiring = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.acquire().unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));
        resume_tx.send(()).unwrap();
        releasing.join().unwrap();
        let second = acquiring.join().unwrap();

        assert_eq!(registry.active_leases(), 1);
        let hook = host.stream.lock().unwrap().clone().expect("hook detached");
        assert_eq!(
            Arc::as_ptr(&hook) as *const (),
            Arc::as_ptr(second.distributor()) as *const ()
        );
        let current = registry.current().unwrap();
        assert!(Arc::ptr_eq(&current, second.distributor()));
    }

    #[test]
    fn one_hook_for_many_leases() {
        let host = Arc::new(HookHost::default());
        let registry = WidebandRegistry::new(host.clone(), DistributorOptions::default());

        let a = registry.acquire().unwrap();
        let b = registry.acquire().unwrap();
        assert!(Arc::ptr_eq(a.distributor(), b.distributor()));
        assert_eq!(registry.active_leases(), 2);
        assert_eq!(host.attached.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(host.detached.load(Ordering::SeqCst), 0);
        assert!(registry.current().is_some());

        drop(b);
        assert_eq!(registry.active_leases(), 0);
        assert_eq!(host.detached.load(Ordering::SeqCst), 1);
        assert!(registry.current().is_none());
        assert!(host.stream.lock().unwrap().is_none());
    }

    #[test]
    fn reacquire_builds_a_fresh_distributor() {
        let host = Arc::new(HookHost::default());
        let registry = WidebandRegistry::new(host.clone(), DistributorOptions::default());

        let first = registry.acquire().unwrap();
        let samples = vec![Complex::new(0.0_f32, 0.0); 16];
        let hook = host.stream.lock().unwrap().clone().unwrap();
        hook.push(StreamVariant::Raw, &samples, 1_000_000.0);
        assert_eq!(first.last_sample_rate(), Some(1_000_000.0));
        let first_ptr = Arc::as_ptr(first.distributor());
        drop(first);

        let second = registry.acquire().unwrap();
        assert_ne!(Arc::as_ptr(second.distributor()), first_ptr);
        assert_eq!(second.last_sample_rate(), None);
        assert_eq!(host.attached.load(Ordering::SeqCst), 2);
    }
}
