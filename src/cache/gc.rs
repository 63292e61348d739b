//! Out-of-band eviction
//!
//! Nothing here runs during a fetch. `depcache cache gc` applies an
//! `EvictionPolicy` to a store and sweeps staging and quarantine leftovers.

use crate::cache::entry::{format_bytes, CacheEntry};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::omnicache::Omnicache;
use crate::cache::store::CacheStore;
use crate::error::{DepcacheError, DepcacheResult};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;
use tracing::{debug, info};

/// Chooses which entries to evict
pub trait EvictionPolicy: Send + Sync {
    /// Fingerprints to evict out of `entries`
    fn select(&self, entries: &[CacheEntry]) -> BTreeSet<Fingerprint>;

    /// Human-readable summary
    fn describe(&self) -> String;
}

/// Evict entries unused for more than `days`
#[derive(Debug, Clone, Copy)]
pub struct MaxAge {
    pub days: u32,
}

impl EvictionPolicy for MaxAge {
    fn select(&self, entries: &[CacheEntry]) -> BTreeSet<Fingerprint> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(self.days));
        entries
            .iter()
            .filter(|e| e.last_activity() < cutoff)
            .map(|e| e.fingerprint().clone())
            .collect()
    }

    fn describe(&self) -> String {
        format!("unused for {} days", self.days)
    }
}

/// Evict least-recently-used entries until the store fits in `bytes`
#[derive(Debug, Clone, Copy)]
pub struct MaxTotalSize {
    pub bytes: u64,
}

impl EvictionPolicy for MaxTotalSize {
    fn select(&self, entries: &[CacheEntry]) -> BTreeSet<Fingerprint> {
        let mut total: u64 = entries.iter().map(|e| e.metadata.size_bytes).sum();
        let mut by_age: Vec<&CacheEntry> = entries.iter().collect();
        by_age.sort_by_key(|e| e.last_activity());

        let mut selected = BTreeSet::new();
        for entry in by_age {
            if total <= self.bytes {
                break;
            }
            total = total.saturating_sub(entry.metadata.size_bytes);
            selected.insert(entry.fingerprint().clone());
        }
        selected
    }

    fn describe(&self) -> String {
        format!("over {}", format_bytes(self.bytes))
    }
}

/// Union of several policies
#[derive(Default)]
pub struct AnyOf(pub Vec<Box<dyn EvictionPolicy>>);

impl EvictionPolicy for AnyOf {
    fn select(&self, entries: &[CacheEntry]) -> BTreeSet<Fingerprint> {
        self.0.iter().flat_map(|p| p.select(entries)).collect()
    }

    fn describe(&self) -> String {
        if self.0.is_empty() {
            return "nothing".to_string();
        }
        self.0
            .iter()
            .map(|p| p.describe())
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// Knobs for one collection run
#[derive(Debug, Clone, Copy)]
pub struct GcOptions {
    /// Staging directories and Omnicache holds older than this are leftovers
    /// of aborted runs; unreferenced git objects get the same grace
    pub stale_staging: Duration,
    pub dry_run: bool,
}

/// What a collection run did (or would do)
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub evicted: Vec<Fingerprint>,
    pub freed_bytes: u64,
    pub stale_staging: usize,
    pub quarantined: usize,
    pub pins_pruned: usize,
    pub holds_released: usize,
}

/// Entries a policy selects, oldest first
pub fn plan(store: &CacheStore, policy: &dyn EvictionPolicy) -> DepcacheResult<Vec<CacheEntry>> {
    let entries = store.list()?;
    let selected = policy.select(&entries);
    let mut doomed: Vec<CacheEntry> = entries
        .into_iter()
        .filter(|e| selected.contains(e.fingerprint()))
        .collect();
    doomed.sort_by_key(|e| e.last_activity());
    Ok(doomed)
}

/// Collect an extdep store
pub fn collect(
    store: &CacheStore,
    policy: &dyn EvictionPolicy,
    options: GcOptions,
) -> DepcacheResult<GcReport> {
    let mut report = GcReport::default();

    for entry in plan(store, policy)? {
        if options.dry_run || store.remove(entry.fingerprint())? {
            report.freed_bytes += entry.metadata.size_bytes;
            report.evicted.push(entry.fingerprint().clone());
        }
    }

    sweep(store, options, &mut report)?;
    info!(
        evicted = report.evicted.len(),
        freed = %format_bytes(report.freed_bytes),
        "Collected {}",
        store.root().display()
    );
    Ok(report)
}

/// Collect the Omnicache: evict entries, drop their pins, then repack
pub async fn collect_omnicache(
    omnicache: &Omnicache,
    policy: &dyn EvictionPolicy,
    options: GcOptions,
) -> DepcacheResult<GcReport> {
    let store = omnicache.store();
    let mut report = GcReport::default();

    for entry in plan(store, policy)? {
        if options.dry_run || omnicache.evict(entry.fingerprint()).await? {
            report.freed_bytes += entry.metadata.size_bytes;
            report.evicted.push(entry.fingerprint().clone());
        }
    }

    sweep(store, options, &mut report)?;

    if !options.dry_run {
        report.pins_pruned = omnicache.prune_pins().await?;
        report.holds_released = omnicache.release_stale_holds(options.stale_staging).await?;
        omnicache.compact(options.stale_staging).await?;
    }
    info!(
        evicted = report.evicted.len(),
        "Collected {}",
        omnicache.root().display()
    );
    Ok(report)
}

/// Remove quarantined entries and stale staging directories
fn sweep(store: &CacheStore, options: GcOptions, report: &mut GcReport) -> DepcacheResult<()> {
    let stale = store.stale_staging(options.stale_staging)?;
    let quarantined = store.quarantined()?;
    report.stale_staging = stale.len();
    report.quarantined = quarantined.len();

    if options.dry_run {
        return Ok(());
    }

    for dir in stale.iter().chain(quarantined.iter()) {
        debug!(path = %dir.display(), "Removing");
        let removed = if dir.is_dir() {
            fs::remove_dir_all(dir)
        } else {
            fs::remove_file(dir)
        };
        match removed {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DepcacheError::io(format!("removing {}", dir.display()), e)),
        }
    }
    Ok(())
}
