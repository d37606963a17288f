//! Memoized load-clean-derive results keyed by source path and delay policy.
//!
//! A cache lives only as long as its owner. The binary runs one command per
//! process and builds a fresh cache for it, so reuse happens within a single
//! library session, never across invocations.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha256};

use crate::{
    derive::{DelayPolicy, DerivedDataset},
    io_utils,
    pipeline::{self, LoadOptions, Loaded},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    policy: (u8, u64),
}

/// One memoized source under one policy.
#[derive(Debug)]
pub struct CachedRun {
    pub loaded: Loaded,
    pub derived: DerivedDataset,
    fingerprint: [u8; 32],
}

/// Session-scoped cache. Every entry is built with the same [`LoadOptions`];
/// an entry whose source bytes changed is rebuilt on the next lookup.
#[derive(Debug, Default)]
pub struct PipelineCache {
    options: LoadOptions,
    entries: HashMap<CacheKey, Arc<CachedRun>>,
    hits: usize,
    misses: usize,
}

impl PipelineCache {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn fingerprint(bytes: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.finalize().into()
    }

    /// Standard input (`-`) can only be read once, so it bypasses the cache.
    pub fn get_or_load(&mut self, path: &Path, policy: DelayPolicy) -> Result<Arc<CachedRun>> {
        if io_utils::is_dash(path) {
            self.misses += 1;
            let loaded = pipeline::load(path, &self.options)?;
            let derived = pipeline::derive(&loaded, policy, &self.options.config)?;
            return Ok(Arc::new(CachedRun {
                loaded,
                derived,
                fingerprint: [0; 32],
            }));
        }
        let canonical =
            fs::canonicalize(path).with_context(|| format!("Resolving input path {path:?}"))?;
        let bytes = fs::read(&canonical).with_context(|| format!("Reading {canonical:?}"))?;
        let fingerprint = Self::fingerprint(&bytes);
        let key = CacheKey {
            path: canonical,
            policy: policy.cache_key(),
        };

        if let Some(entry) = self.entries.get(&key) {
            if entry.fingerprint == fingerprint {
                self.hits += 1;
                debug!("Cache hit for {:?} under {}", key.path, policy);
                return Ok(Arc::clone(entry));
            }
            debug!("Source {:?} changed since it was cached; reloading", key.path);
        }

        self.misses += 1;
        let loaded = pipeline::load_bytes(path, &bytes, &self.options)?;
        let derived = pipeline::derive(&loaded, policy, &self.options.config)?;
        let entry = Arc::new(CachedRun {
            loaded,
            derived,
            fingerprint,
        });
        self.entries.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HEADER: &str = "Delivery_Time,Traffic,Weather,Vehicle,Agent_Age,Agent_Rating,Area,Category\n";

    fn write_source(path: &Path, times: &[u32]) {
        let mut text = HEADER.to_string();
        for t in times {
            text.push_str(&format!("{t},Low,Sunny,Bike,30,4.5,Urban,Food\n"));
        }
        fs::write(path, text).expect("write source");
    }

    #[test]
    fn same_key_reuses_entry() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("deliveries.csv");
        write_source(&path, &[10, 20, 30]);
        let mut cache = PipelineCache::default();
        let first = cache.get_or_load(&path, DelayPolicy::Median).expect("load");
        let second = cache.get_or_load(&path, DelayPolicy::Median).expect("load");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn each_policy_gets_its_own_entry() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("deliveries.csv");
        write_source(&path, &[10, 20, 30]);
        let mut cache = PipelineCache::default();
        let median = cache.get_or_load(&path, DelayPolicy::Median).expect("load");
        let sla = cache.get_or_load(&path, DelayPolicy::FixedSla(5.0)).expect("load");
        assert_eq!(cache.len(), 2);
        assert_eq!(median.derived.delay_count(), 1);
        assert_eq!(sla.derived.delay_count(), 3);
    }

    #[test]
    fn modified_source_is_recomputed() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("deliveries.csv");
        write_source(&path, &[10, 20, 30]);
        let mut cache = PipelineCache::default();
        let before = cache.get_or_load(&path, DelayPolicy::Median).expect("load");
        write_source(&path, &[10, 20, 30, 40]);
        let after = cache.get_or_load(&path, DelayPolicy::Median).expect("load");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.derived.len(), 4);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.misses(), 2);
    }
}
