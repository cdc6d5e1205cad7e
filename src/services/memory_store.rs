//! Three-tier memory store.
//!
//! Working and Short-Term are bounded LRU tiers held in memory; Long-Term is
//! unbounded and mirrored to the [`StorageBackend`]. Each tier has its own
//! reader-writer lock. When more than one tier lock is needed they are taken
//! in Working, Short-Term, Long-Term order.

use crate::config::MemoryConfig;
use crate::current_timestamp;
use crate::models::{EventMeta, EvictionReason, MemoryId, MemoryItem, SymbiontEvent, Tier};
use crate::observability::EventBus;
use crate::storage::StorageBackend;
use crate::{Error, Result};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::instrument;

/// Ownership and placement of [`MemoryItem`]s.
///
/// Every item lives in exactly one tier. Moves between tiers keep the id and
/// content.
pub trait MemoryStore: Send + Sync {
    /// Admits an item into its requested tier and returns the tier it landed in.
    ///
    /// Working and Short-Term admission never reject: full tiers evict their
    /// least-recently-used item instead. Long-Term admission below the
    /// long-term threshold lands in Short-Term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for empty content or an id already
    /// stored, and [`Error::Capacity`] when Long-Term persistence fails (the
    /// item is then kept in Short-Term).
    fn store(&self, item: MemoryItem) -> Result<Tier>;

    /// Returns a copy of an item.
    fn get(&self, id: &MemoryId) -> Option<MemoryItem>;

    /// Mutates an item in place and returns the updated copy.
    ///
    /// The mutator cannot change the id or the tier.
    ///
    /// # Errors
    ///
    /// Returns an error if a Long-Term update cannot be persisted.
    fn update(
        &self,
        id: &MemoryId,
        mutator: &mut dyn FnMut(&mut MemoryItem),
    ) -> Result<Option<MemoryItem>>;

    /// Removes an item from whichever tier holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if a Long-Term item cannot be deleted from storage.
    fn remove(&self, id: &MemoryId) -> Result<Option<MemoryItem>>;

    /// Calls `visitor` for every item of a tier under the tier's read lock.
    fn visit(&self, tier: Tier, visitor: &mut dyn FnMut(&MemoryItem));

    /// Returns the number of items in a tier.
    fn count(&self, tier: Tier) -> usize;

    /// Returns the ids of a tier.
    fn ids(&self, tier: Tier) -> Vec<MemoryId>;

    /// Returns the tier owning an item.
    fn locate(&self, id: &MemoryId) -> Option<Tier>;

    /// Promotes important Short-Term items and expires stale ones.
    fn sweep_short_term(&self, now: u64) -> SweepReport;

    /// Moves a Long-Term item back to Short-Term.
    ///
    /// Returns false if the item is not in Long-Term.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be deleted from storage.
    fn demote(&self, id: &MemoryId, now: u64) -> Result<bool>;

    /// Folds `absorbed` into `survivor`; both must be Long-Term.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConsolidationConflict`] if either item is gone.
    fn merge(&self, survivor: &MemoryId, absorbed: &MemoryId, now: u64) -> Result<MemoryItem>;
}

/// Outcome of a Short-Term sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Items moved to Long-Term.
    pub promoted: usize,
    /// Items dropped after the retention window.
    pub expired: usize,
    /// Promotions that failed at the storage boundary and stay in Short-Term.
    pub deferred: usize,
}

type LruTier = LruCache<MemoryId, MemoryItem>;
type LongTier = HashMap<MemoryId, MemoryItem>;

/// Default [`MemoryStore`].
pub struct TieredMemoryStore {
    config: MemoryConfig,
    working: RwLock<LruTier>,
    short_term: RwLock<LruTier>,
    long_term: RwLock<LongTier>,
    storage: Arc<dyn StorageBackend>,
    events: Option<EventBus>,
}

impl TieredMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: MemoryConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            working: RwLock::new(LruCache::new(capacity(config.working_capacity))),
            short_term: RwLock::new(LruCache::new(capacity(config.short_term_capacity))),
            long_term: RwLock::new(HashMap::new()),
            config,
            storage,
            events: None,
        }
    }

    /// Publishes evictions on `events`.
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Reloads the Long-Term tier from storage.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be read.
    pub fn restore(&self) -> Result<usize> {
        let items = self.storage.load_memories()?;
        let mut long = write(&self.long_term);
        for mut item in items {
            item.tier = Tier::LongTerm;
            long.insert(item.id.clone(), item);
        }
        tracing::debug!(restored = long.len(), "Restored long-term tier");
        Ok(long.len())
    }

    /// Returns the item count of every tier.
    #[must_use]
    pub fn occupancy(&self) -> [(Tier, usize); 3] {
        Tier::ALL.map(|tier| (tier, self.count(tier)))
    }

    /// Returns the tier configuration.
    #[must_use]
    pub const fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn promotable(&self, item: &MemoryItem) -> bool {
        item.importance >= self.config.promotion_threshold
            && item.is_long_term_eligible(self.config.long_term_threshold)
    }

    fn admit_working(
        &self,
        tiers: &mut TierGuards<'_>,
        mut item: MemoryItem,
        now: u64,
    ) -> Tier {
        item.relocate(Tier::Working, now);
        if let Some((_, mut evicted)) = tiers.working.push(item.id.clone(), item) {
            tracing::debug!(memory_id = %evicted.id, "Working tier full, moving LRU item to short-term");
            evicted.relocate(Tier::ShortTerm, now);
            self.push_short_term(&mut tiers.short, &mut tiers.long, evicted, now);
        }
        Tier::Working
    }

    fn admit_short_term(&self, tiers: &mut TierGuards<'_>, mut item: MemoryItem, now: u64) -> Tier {
        item.relocate(Tier::ShortTerm, now);
        self.push_short_term(&mut tiers.short, &mut tiers.long, item, now);
        Tier::ShortTerm
    }

    fn push_short_term(&self, short: &mut LruTier, long: &mut LongTier, item: MemoryItem, now: u64) {
        if let Some((_, overflow)) = short.push(item.id.clone(), item) {
            self.retire(long, overflow, now);
        }
    }

    /// Handles an item pushed out of a full Short-Term tier.
    fn retire(&self, long: &mut LongTier, item: MemoryItem, now: u64) {
        if self.promotable(&item) {
            match self.admit_long_term(long, &item, now) {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(memory_id = %item.id, error = %e, "Dropping overflow item that could not be promoted");
                },
            }
        }
        metrics::counter!("memory_evictions_total", "reason" => "overflow").increment(1);
        self.publish_eviction(&item.id, EvictionReason::Overflow);
    }

    fn sweep_one(&self, short: &mut LruTier, id: &MemoryId, now: u64, report: &mut SweepReport) {
        let Some(item) = short.peek(id) else {
            return;
        };
        if self.promotable(item) {
            let mut long = write(&self.long_term);
            match self.admit_long_term(&mut long, item, now) {
                Ok(()) => {
                    short.pop(id);
                    report.promoted += 1;
                },
                Err(e) => {
                    tracing::warn!(memory_id = %id, error = %e, "Promotion deferred");
                    report.deferred += 1;
                },
            }
        } else if now.saturating_sub(item.tier_since) >= self.config.short_term_retention_secs {
            short.pop(id);
            report.expired += 1;
            metrics::counter!("memory_evictions_total", "reason" => "expired").increment(1);
            self.publish_eviction(id, EvictionReason::Expired);
        }
    }

    fn admit_long_term(
        &self,
        long: &mut LongTier,
        item: &MemoryItem,
        now: u64,
    ) -> Result<()> {
        let mut promoted = item.clone();
        promoted.relocate(Tier::LongTerm, now);
        self.storage
            .persist_memory(&promoted)
            .map_err(|e| Error::Capacity {
                id: promoted.id.to_string(),
                cause: e.to_string(),
            })?;
        long.insert(promoted.id.clone(), promoted);
        Ok(())
    }

    fn store_long_term(&self, tiers: &mut TierGuards<'_>, item: MemoryItem, now: u64) -> Result<Tier> {
        if !item.is_long_term_eligible(self.config.long_term_threshold) {
            return Ok(self.admit_short_term(tiers, item, now));
        }
        match self.admit_long_term(&mut tiers.long, &item, now) {
            Ok(()) => Ok(Tier::LongTerm),
            Err(e) => {
                tracing::warn!(memory_id = %item.id, error = %e, "Long-term admission failed, keeping item in short-term");
                self.admit_short_term(tiers, item, now);
                Err(e)
            },
        }
    }

    /// Write-locks every tier in the fixed order Working, Short-Term,
    /// Long-Term.
    fn lock_all(&self) -> TierGuards<'_> {
        TierGuards {
            working: write(&self.working),
            short: write(&self.short_term),
            long: write(&self.long_term),
        }
    }

    fn publish_eviction(&self, id: &MemoryId, reason: EvictionReason) {
        if let Some(events) = &self.events {
            events.publish(SymbiontEvent::MemoryEvicted {
                meta: EventMeta::new("memory"),
                memory_id: id.clone(),
                reason,
            });
        }
    }
}

impl MemoryStore for TieredMemoryStore {
    #[instrument(
        name = "symbiont.memory.store",
        skip(self, item),
        fields(memory_id = %item.id, requested = %item.tier, tier = tracing::field::Empty)
    )]
    fn store(&self, item: MemoryItem) -> Result<Tier> {
        let start = Instant::now();
        let requested = item.tier;
        let result = (|| {
            if item.content.trim().is_empty() {
                return Err(Error::InvalidInput("memory content is empty".to_string()));
            }
            // Duplicate check and admission run under the same tier locks.
            let mut tiers = self.lock_all();
            if tiers.owns(&item.id) {
                return Err(Error::InvalidInput(format!(
                    "memory '{}' is already stored",
                    item.id
                )));
            }
            let now = current_timestamp();
            match requested {
                Tier::Working => Ok(self.admit_working(&mut tiers, item, now)),
                Tier::ShortTerm => Ok(self.admit_short_term(&mut tiers, item, now)),
                Tier::LongTerm => self.store_long_term(&mut tiers, item, now),
            }
        })();

        if let Ok(tier) = &result {
            tracing::Span::current().record("tier", tier.as_str());
        }
        record_memory_metrics("store", requested, start, &result);
        result
    }

    fn get(&self, id: &MemoryId) -> Option<MemoryItem> {
        if let Some(item) = read(&self.working).peek(id) {
            return Some(item.clone());
        }
        if let Some(item) = read(&self.short_term).peek(id) {
            return Some(item.clone());
        }
        read(&self.long_term).get(id).cloned()
    }

    fn update(
        &self,
        id: &MemoryId,
        mutator: &mut dyn FnMut(&mut MemoryItem),
    ) -> Result<Option<MemoryItem>> {
        for (tier, lock) in [(Tier::Working, &self.working), (Tier::ShortTerm, &self.short_term)] {
            let mut guard = write(lock);
            if let Some(item) = guard.get_mut(id) {
                mutator(item);
                item.id = id.clone();
                item.tier = tier;
                item.importance = item.importance.clamp(0.0, 1.0);
                return Ok(Some(item.clone()));
            }
        }

        let mut long = write(&self.long_term);
        let Some(current) = long.get(id) else {
            return Ok(None);
        };
        let mut updated = current.clone();
        mutator(&mut updated);
        updated.id = id.clone();
        updated.tier = Tier::LongTerm;
        updated.importance = updated.importance.clamp(0.0, 1.0);
        self.storage.persist_memory(&updated)?;
        long.insert(id.clone(), updated.clone());
        Ok(Some(updated))
    }

    fn remove(&self, id: &MemoryId) -> Result<Option<MemoryItem>> {
        if let Some(item) = write(&self.working).pop(id) {
            return Ok(Some(item));
        }
        if let Some(item) = write(&self.short_term).pop(id) {
            return Ok(Some(item));
        }
        let mut long = write(&self.long_term);
        if !long.contains_key(id) {
            return Ok(None);
        }
        self.storage.delete_memory(id)?;
        Ok(long.remove(id))
    }

    fn visit(&self, tier: Tier, visitor: &mut dyn FnMut(&MemoryItem)) {
        match tier {
            Tier::Working => read(&self.working).iter().for_each(|(_, item)| visitor(item)),
            Tier::ShortTerm => read(&self.short_term)
                .iter()
                .for_each(|(_, item)| visitor(item)),
            Tier::LongTerm => read(&self.long_term).values().for_each(visitor),
        }
    }

    fn count(&self, tier: Tier) -> usize {
        match tier {
            Tier::Working => read(&self.working).len(),
            Tier::ShortTerm => read(&self.short_term).len(),
            Tier::LongTerm => read(&self.long_term).len(),
        }
    }

    fn ids(&self, tier: Tier) -> Vec<MemoryId> {
        let mut ids = Vec::with_capacity(self.count(tier));
        self.visit(tier, &mut |item| ids.push(item.id.clone()));
        ids
    }

    fn locate(&self, id: &MemoryId) -> Option<Tier> {
        if read(&self.working).contains(id) {
            Some(Tier::Working)
        } else if read(&self.short_term).contains(id) {
            Some(Tier::ShortTerm)
        } else if read(&self.long_term).contains_key(id) {
            Some(Tier::LongTerm)
        } else {
            None
        }
    }

    fn sweep_short_term(&self, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        for id in self.ids(Tier::ShortTerm) {
            let mut short = write(&self.short_term);
            self.sweep_one(&mut short, &id, now, &mut report);
        }
        report
    }

    fn demote(&self, id: &MemoryId, now: u64) -> Result<bool> {
        let mut short = write(&self.short_term);
        let mut long = write(&self.long_term);
        if !long.contains_key(id) {
            return Ok(false);
        }
        self.storage.delete_memory(id)?;
        let Some(mut item) = long.remove(id) else {
            return Ok(false);
        };

        tracing::debug!(memory_id = %id, importance = item.importance, "Demoting to short-term");
        item.relocate(Tier::ShortTerm, now);
        self.push_short_term(&mut short, &mut long, item, now);
        Ok(true)
    }

    fn merge(&self, survivor: &MemoryId, absorbed: &MemoryId, _now: u64) -> Result<MemoryItem> {
        if survivor == absorbed {
            return Err(Error::InvalidInput(format!("cannot merge '{survivor}' into itself")));
        }
        let mut long = write(&self.long_term);
        let (Some(kept), Some(folded)) = (long.get(survivor), long.get(absorbed)) else {
            let missing = if long.contains_key(survivor) {
                absorbed
            } else {
                survivor
            };
            return Err(Error::ConsolidationConflict {
                id: missing.to_string(),
            });
        };

        let mut merged = kept.clone();
        merged.importance = merged.importance.max(folded.importance);
        merged.confidence = merged.confidence.max(folded.confidence);
        merged.topics.extend(folded.topics.iter().cloned());
        merged.created_at = merged.created_at.min(folded.created_at);
        merged.touch(folded.last_access);
        merged.failures = merged.failures.min(folded.failures);

        self.storage.persist_memory(&merged)?;
        self.storage.delete_memory(absorbed)?;
        long.remove(absorbed);
        long.insert(survivor.clone(), merged.clone());
        drop(long);

        self.publish_eviction(absorbed, EvictionReason::Merged);
        Ok(merged)
    }
}

/// Write guards over all three tiers, taken by [`TieredMemoryStore::lock_all`].
struct TierGuards<'a> {
    working: RwLockWriteGuard<'a, LruTier>,
    short: RwLockWriteGuard<'a, LruTier>,
    long: RwLockWriteGuard<'a, LongTier>,
}

impl TierGuards<'_> {
    fn owns(&self, id: &MemoryId) -> bool {
        self.working.contains(id) || self.short.contains(id) || self.long.contains_key(id)
    }
}

fn capacity(size: usize) -> NonZeroUsize {
    NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        tracing::warn!("Memory tier lock was poisoned, recovering");
        metrics::counter!("memory_lock_poison_recovery_total").increment(1);
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        tracing::warn!("Memory tier lock was poisoned, recovering");
        metrics::counter!("memory_lock_poison_recovery_total").increment(1);
        poisoned.into_inner()
    })
}

fn record_memory_metrics<T>(operation: &'static str, tier: Tier, start: Instant, result: &Result<T>) {
    let status = if result.is_ok() { "success" } else { "error" };
    metrics::counter!(
        "memory_operations_total",
        "operation" => operation,
        "tier" => tier.as_str(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "memory_operation_duration_ms",
        "operation" => operation,
        "tier" => tier.as_str()
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn config(working: usize, short: usize) -> MemoryConfig {
        MemoryConfig {
            working_capacity: working,
            short_term_capacity: short,
            ..MemoryConfig::default()
        }
    }

    fn store_with(working: usize, short: usize) -> (TieredMemoryStore, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        let store = TieredMemoryStore::new(config(working, short), storage.clone());
        (store, storage)
    }

    fn item(id: &str) -> MemoryItem {
        MemoryItem::new(format!("content of {id}"), vec![1.0, 0.0], 1).with_id(id)
    }

    #[test]
    fn test_working_overflow_moves_lru_to_short_term() {
        let (store, _) = store_with(2, 10);
        store.store(item("a")).expect("a");
        store.store(item("b")).expect("b");
        store.store(item("c")).expect("c");

        assert_eq!(store.locate(&"a".into()), Some(Tier::ShortTerm));
        assert_eq!(store.locate(&"b".into()), Some(Tier::Working));
        assert_eq!(store.locate(&"c".into()), Some(Tier::Working));
        assert_eq!(store.count(Tier::Working), 2);
    }

    #[test]
    fn test_update_refreshes_lru_position() {
        let (store, _) = store_with(2, 10);
        store.store(item("a")).expect("a");
        store.store(item("b")).expect("b");
        store
            .update(&"a".into(), &mut |m| m.touch(99))
            .expect("update");
        store.store(item("c")).expect("c");
        assert_eq!(store.locate(&"a".into()), Some(Tier::Working));
        assert_eq!(store.locate(&"b".into()), Some(Tier::ShortTerm));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (store, _) = store_with(2, 10);
        store.store(item("a")).expect("a");
        store.store(item("b")).expect("b");
        store.store(item("c")).expect("c");
        let err = store.store(item("a")).expect_err("a lives in short-term");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_long_term_below_threshold_lands_in_short_term() {
        let (store, storage) = store_with(2, 10);
        let low = item("low").with_topic("rust").with_importance(0.2).with_tier(Tier::LongTerm);
        assert_eq!(store.store(low).expect("store"), Tier::ShortTerm);
        assert_eq!(storage.memory_count(), 0);

        let high = item("high").with_topic("rust").with_importance(0.9).with_tier(Tier::LongTerm);
        assert_eq!(store.store(high).expect("store"), Tier::LongTerm);
        assert_eq!(storage.memory_count(), 1);
    }

    #[test]
    fn test_failed_long_term_admission_keeps_item_in_short_term() {
        let (store, storage) = store_with(2, 10);
        storage.set_available(false);
        let fact = item("fact").with_topic("rust").with_importance(0.9).with_tier(Tier::LongTerm);
        let err = store.store(fact).expect_err("storage down");
        assert!(matches!(err, Error::Capacity { .. }));
        assert_eq!(store.locate(&"fact".into()), Some(Tier::ShortTerm));

        storage.set_available(true);
        let report = store.sweep_short_term(current_timestamp());
        assert_eq!(report.promoted, 1);
        assert_eq!(store.locate(&"fact".into()), Some(Tier::LongTerm));
    }

    #[test]
    fn test_sweep_promotes_and_expires() {
        let (store, _) = store_with(1, 10);
        store
            .store(item("keep").with_topic("rust").with_importance(0.8).with_tier(Tier::ShortTerm))
            .expect("keep");
        store.store(item("stale").with_tier(Tier::ShortTerm)).expect("stale");

        let later = current_timestamp() + 601;
        let report = store.sweep_short_term(later);
        assert_eq!(report.promoted, 1);
        assert_eq!(report.expired, 1);
        assert_eq!(store.locate(&"keep".into()), Some(Tier::LongTerm));
        assert_eq!(store.locate(&"stale".into()), None);
    }

    #[test]
    fn test_demote_and_remove_touch_storage() {
        let (store, storage) = store_with(2, 10);
        store
            .store(item("m").with_topic("rust").with_importance(0.9).with_tier(Tier::LongTerm))
            .expect("store");
        assert!(store.demote(&"m".into(), current_timestamp()).expect("demote"));
        assert_eq!(store.locate(&"m".into()), Some(Tier::ShortTerm));
        assert_eq!(storage.memory_count(), 0);
        assert!(!store.demote(&"m".into(), current_timestamp()).expect("not long-term"));

        let removed = store.remove(&"m".into()).expect("remove");
        assert_eq!(removed.map(|m| m.content), Some("content of m".to_string()));
        assert_eq!(store.locate(&"m".into()), None);
    }

    #[test]
    fn test_merge_keeps_survivor_and_drops_absorbed() {
        let (store, storage) = store_with(2, 10);
        for (id, importance) in [("x", 0.9), ("y", 0.6)] {
            store
                .store(item(id).with_topic(id).with_importance(importance).with_tier(Tier::LongTerm))
                .expect("store");
        }
        let merged = store.merge(&"x".into(), &"y".into(), 10).expect("merge");
        assert_eq!(merged.id.as_str(), "x");
        assert!(merged.topics.contains("y"));
        assert!(store.get(&"y".into()).is_none());
        assert_eq!(storage.memory_count(), 1);

        let err = store.merge(&"x".into(), &"y".into(), 10).expect_err("y is gone");
        assert!(matches!(err, Error::ConsolidationConflict { id } if id == "y"));
    }

    #[test]
    fn test_merge_keeps_latest_access_not_merge_time() {
        let (store, _) = store_with(2, 10);
        for (id, accessed) in [("x", 100), ("y", 200)] {
            let item = MemoryItem::new(format!("content of {id}"), vec![1.0, 0.0], accessed)
                .with_id(id)
                .with_importance(0.9)
                .with_tier(Tier::LongTerm);
            store.store(item).expect("store");
        }
        let merged = store.merge(&"x".into(), &"y".into(), 10_000).expect("merge");
        assert_eq!(merged.last_access, 200);
        assert_eq!(merged.created_at, 100);
    }

    #[test]
    fn test_restore_reloads_long_term() {
        let storage = Arc::new(InMemoryStorage::new());
        let first = TieredMemoryStore::new(MemoryConfig::default(), storage.clone());
        first
            .store(item("m").with_topic("rust").with_importance(0.9).with_tier(Tier::LongTerm))
            .expect("store");

        let second = TieredMemoryStore::new(MemoryConfig::default(), storage);
        assert_eq!(second.restore().expect("restore"), 1);
        assert_eq!(second.locate(&"m".into()), Some(Tier::LongTerm));
    }
}
