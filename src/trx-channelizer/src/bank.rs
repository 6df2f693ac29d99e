// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! The set of user channels running against one wideband stream.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::distributor::{WidebandLease, WidebandRegistry};
use crate::error::ChannelizerResult;
use crate::freq::format_hz;
use crate::host::{DecoderFactory, WidebandHost, WidebandSink};
use crate::pipeline::ChannelPipeline;

const CONTROL_CHANNEL_PREFIX: &str = "MCCH";

/// Result of folding scan results into the bank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Carriers that got a new channel.
    pub added: Vec<i64>,
    /// Existing channels renamed as control channels.
    pub marked: usize,
}

fn control_channel_name(frequency_hz: i64) -> String {
    format!("{}-{}", CONTROL_CHANNEL_PREFIX, format_hz(frequency_hz))
}

fn is_control_channel_name(name: &str) -> bool {
    name.get(..CONTROL_CHANNEL_PREFIX.len())
        .map(|p| p.eq_ignore_ascii_case(CONTROL_CHANNEL_PREFIX))
        .unwrap_or(false)
}

pub struct ChannelBank {
    lease: WidebandLease,
    host: Arc<dyn WidebandHost>,
    factory: Arc<dyn DecoderFactory>,
    channels: Mutex<Vec<Arc<ChannelPipeline>>>,
}

impl ChannelBank {
    pub fn new(
        registry: &Arc<WidebandRegistry>,
        factory: Arc<dyn DecoderFactory>,
    ) -> ChannelizerResult<Self> {
        Ok(Self {
            lease: registry.acquire()?,
            host: registry.host().clone(),
            factory,
            channels: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ChannelPipeline>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a channel. A config whose id is already present replaces
    /// that channel's configuration instead.
    pub fn add(&self, config: ChannelConfig) -> ChannelizerResult<Arc<ChannelPipeline>> {
        if let Some(existing) = self.get(config.id) {
            self.update(config);
            return Ok(existing);
        }

        let enabled = config.enabled;
        let label = format!("{} ({})", config.name, format_hz(config.frequency_hz));
        let pipeline = ChannelPipeline::new(config, self.host.clone(), self.factory.as_ref())?;
        self.lock().push(pipeline.clone());
        let sink: Arc<dyn WidebandSink> = pipeline.clone();
        self.lease.add_sink(sink);
        pipeline.set_demodulator_enabled(enabled);
        tracing::info!("channel {} added", label);
        Ok(pipeline)
    }

    /// Stop and dispose a channel. Returns false for an unknown id.
    pub fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut channels = self.lock();
            channels
                .iter()
                .position(|p| p.id() == id)
                .map(|idx| channels.remove(idx))
        };
        let Some(pipeline) = removed else {
            return false;
        };
        let sink: Arc<dyn WidebandSink> = pipeline.clone();
        self.lease.remove_sink(&sink);
        pipeline.dispose();
        tracing::info!("channel {} removed", pipeline.name());
        true
    }

    /// Replace a channel's configuration wholesale.
    pub fn update(&self, config: ChannelConfig) -> bool {
        let Some(pipeline) = self.get(config.id) else {
            return false;
        };
        let enabled = config.enabled;
        let toggled = pipeline.config().enabled != enabled;
        pipeline.update_config(config);
        if toggled {
            pipeline.set_demodulator_enabled(enabled);
        }
        true
    }

    /// Reconcile against a complete channel list: unknown ids are added,
    /// known ones updated, missing ones removed.
    pub fn apply(&self, configs: Vec<ChannelConfig>) -> ChannelizerResult<()> {
        let wanted: HashSet<Uuid> = configs.iter().map(|c| c.id).collect();
        let stale: Vec<Uuid> = self
            .lock()
            .iter()
            .map(|p| p.id())
            .filter(|id| !wanted.contains(id))
            .collect();
        for id in stale {
            self.remove(id);
        }
        for config in configs {
            self.add(config)?;
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<ChannelPipeline>> {
        self.lock().iter().find(|p| p.id() == id).cloned()
    }

    pub fn pipelines(&self) -> Vec<Arc<ChannelPipeline>> {
        self.lock().clone()
    }

    pub fn configs(&self) -> Vec<ChannelConfig> {
        self.lock().iter().map(|p| (*p.config()).clone()).collect()
    }

    pub fn frequencies(&self) -> Vec<i64> {
        self.lock().iter().map(|p| p.config().frequency_hz).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Fold discovered control-channel carriers into the bank: channels
    /// already on a found carrier are renamed `MCCH-<freq>` (unless already
    /// named so) and every other carrier gets a new enabled channel.
    pub fn merge_discovered(&self, found: &BTreeSet<i64>) -> ChannelizerResult<MergeReport> {
        let mut report = MergeReport::default();
        let mut existing = HashSet::new();

        for pipeline in self.pipelines() {
            let config = pipeline.config();
            existing.insert(config.frequency_hz);
            if !found.contains(&config.frequency_hz)
                || is_control_channel_name(config.name.trim())
            {
                continue;
            }
            let mut renamed = (*config).clone();
            renamed.name = control_channel_name(config.frequency_hz);
            tracing::info!("channel {} marked as {}", config.name, renamed.name);
            pipeline.update_config(renamed);
            report.marked += 1;
        }

        for &frequency_hz in found.iter().filter(|f| !existing.contains(*f)) {
            self.add(ChannelConfig::new(control_channel_name(frequency_hz), frequency_hz))?;
            report.added.push(frequency_hz);
        }
        Ok(report)
    }

    /// Unregister and dispose every channel.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock().drain(..).collect();
        for pipeline in drained {
            let sink: Arc<dyn WidebandSink> = pipeline.clone();
            self.lease.remove_sink(&sink);
            pipeline.dispose();
        }
    }
}

impl Drop for ChannelBank {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DistributorOptions;
    use crate::host::{StreamVariant, WidebandStream};
    use crate::pipeline::tests::{tone_block, RecordingFactory, TestHost};
    use std::sync::atomic::Ordering;

    fn bank() -> (ChannelBank, Arc<WidebandRegistry>, Arc<RecordingFactory>) {
        let host = TestHost::new(390_000_000);
        let registry = WidebandRegistry::new(host, DistributorOptions::default());
        let factory = Arc::new(RecordingFactory::default());
        let bank = ChannelBank::new(&registry, factory.clone()).unwrap();
        (bank, registry, factory)
    }

    #[test]
    fn channels_receive_wideband_until_removed() {
        let (bank, registry, factory) = bank();
        let a = bank.add(ChannelConfig::new("A", 390_100_000)).unwrap();
        bank.add(ChannelConfig::new("B", 389_900_000)).unwrap();
        assert_eq!(bank.len(), 2);

        let dist = registry.current().unwrap();
        assert_eq!(dist.sink_count(), 2);
        let block = tone_block(100_000.0, 0.5, 1_000_000.0, 16_384, 0);
        dist.push(StreamVariant::Raw, &block, 1_000_000.0);
        for sink in factory.sinks.lock().unwrap().iter() {
            assert!(!sink.samples.lock().unwrap().is_empty());
            assert!(sink.demod_enabled.load(Ordering::SeqCst));
        }

        assert!(bank.remove(a.id()));
        assert!(!bank.remove(a.id()));
        assert!(a.is_disposed());
        assert_eq!(dist.sink_count(), 1);
        assert_eq!(bank.frequencies(), vec![389_900_000]);
    }

    #[test]
    fn adding_a_known_id_updates_in_place() {
        let (bank, _registry, factory) = bank();
        let config = ChannelConfig::new("A", 390_100_000);
        let first = bank.add(config.clone()).unwrap();

        let mut retuned = config.clone();
        retuned.frequency_hz = 390_200_000;
        retuned.enabled = false;
        let second = bank.add(retuned).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(bank.len(), 1);
        assert_eq!(first.config().frequency_hz, 390_200_000);
        let sink = factory.sinks.lock().unwrap()[0].clone();
        assert!(!sink.demod_enabled.load(Ordering::SeqCst));
    }

    #[test]
    fn apply_reconciles_the_whole_list() {
        let (bank, _registry, _factory) = bank();
        let keep = ChannelConfig::new("keep", 390_100_000);
        let drop_me = ChannelConfig::new("drop", 390_200_000);
        bank.apply(vec![keep.clone(), drop_me]).unwrap();
        assert_eq!(bank.len(), 2);

        let mut keep_renamed = keep.clone();
        keep_renamed.name = "kept".to_string();
        let fresh = ChannelConfig::new("fresh", 390_300_000);
        bank.apply(vec![keep_renamed, fresh.clone()]).unwrap();

        let names: Vec<String> = bank.configs().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["kept".to_string(), "fresh".to_string()]);
        assert!(bank.get(fresh.id).is_some());
    }

    #[test]
    fn merge_marks_existing_and_adds_missing() {
        let (bank, _registry, _factory) = bank();
        bank.add(ChannelConfig::new("TETRA", 390_012_500)).unwrap();
        bank.add(ChannelConfig::new("mcch home", 390_025_000)).unwrap();
        bank.add(ChannelConfig::new("other", 390_100_000)).unwrap();

        let found = BTreeSet::from([390_012_500, 390_025_000, 390_962_500]);
        let report = bank.merge_discovered(&found).unwrap();
        assert_eq!(report.marked, 1);
        assert_eq!(report.added, vec![390_962_500]);

        let names: Vec<String> = bank.configs().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "MCCH-390.0125 MHz".to_string(),
                "mcch home".to_string(),
                "other".to_string(),
                "MCCH-390.9625 MHz".to_string(),
            ]
        );
        assert!(bank.configs().iter().all(|c| c.enabled));
    }

    #[test]
    fn dropping_the_bank_releases_the_stream() {
        let (bank, registry, factory) = bank();
        bank.add(ChannelConfig::new("A", 390_100_000)).unwrap();
        let hook: Arc<dyn WidebandStream> = registry.current().unwrap();
        drop(bank);
        assert_eq!(registry.active_leases(), 0);
        assert!(factory.sinks.lock().unwrap()[0].closed.load(Ordering::SeqCst));
        // A stale hook is harmless.
        hook.push(StreamVariant::Raw, &tone_block(0.0, 1.0, 1_000_000.0, 64, 0), 1_000_000.0);
    }
}
