//! Concurrent registry of per-metric aggregation state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateValue, SnapshotValue};
use crate::config::{RegistryConfig, SampleRatePolicy};
use crate::datagram::Datagram;
use crate::protocol::MetricType;
use crate::stats::RegistryStats;
use crate::time::UnixTimestamp;

/// The key under which observations aggregate.
///
/// Records aggregate together iff their names and normalized tag sets are equal. The tag map
/// keeps keys sorted, so equality is independent of submission order. The metric type is not
/// part of the key: it is fixed per identity at first observation, see [`Registry::apply`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// The metric name.
    pub name: String,
    /// The normalized tag set.
    pub tags: BTreeMap<String, String>,
}

/// Aggregation state of one metric identity.
#[derive(Debug)]
struct Entry {
    /// The declared type, fixed when the identity is first observed.
    ty: MetricType,
    value: AggregateValue,
    last_updated: UnixTimestamp,
    sample_count: u64,
    /// The drain cycle in which this entry was last folded into.
    last_cycle: u64,
}

impl Entry {
    fn new(ty: MetricType, now: UnixTimestamp, cycle: u64) -> Self {
        Self {
            ty,
            value: AggregateValue::empty(ty),
            last_updated: now,
            sample_count: 0,
            last_cycle: cycle,
        }
    }
}

/// A drained metric snapshot handed to the export receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The metric name.
    pub name: String,
    /// The normalized tag set of the identity.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// The end time of the drain cycle that produced this snapshot.
    pub timestamp: UnixTimestamp,
    /// The type-specific drained fields.
    #[serde(flatten)]
    pub value: SnapshotValue,
}

impl Snapshot {
    /// Returns the metric type of this snapshot.
    pub fn ty(&self) -> MetricType {
        self.value.ty()
    }
}

/// A concurrent mapping from metric identity to aggregation state.
///
/// The registry is the single shared mutable resource between ingestion workers and the drain
/// cycle. Each identity's state lives in its own lock cell, so contention on one hot metric does
/// not stall unrelated metrics, and draining one metric never blocks folding into another. The
/// registry-wide lock is only taken exclusively for first-seen identity insertion, which is a
/// plain map insert.
///
/// [`apply`](Self::apply) is fire-and-forget: the caller sits on a hot network-receive path and
/// must not block on error handling. Drops are counted in [`RegistryStats`].
#[derive(Debug)]
pub struct Registry {
    entries: RwLock<HashMap<MetricKey, Arc<Mutex<Entry>>>>,
    config: RegistryConfig,
    stats: RegistryStats,
    /// Completed drain cycles, used for idle-based eviction.
    cycle: AtomicU64,
}

impl Registry {
    /// Creates a new registry with the given configuration.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            stats: RegistryStats::default(),
            cycle: AtomicU64::new(0),
        }
    }

    /// Returns the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Returns the internal drop counters.
    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Returns the number of tracked metric identities.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no metric identities are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Parses a raw network buffer and applies all valid datagrams.
    ///
    /// Each malformed line is dropped and counted individually; valid lines of the same buffer
    /// are applied regardless.
    pub fn apply_all(&self, buffer: &[u8]) {
        for result in Datagram::parse_all(buffer) {
            match result {
                Ok(datagram) => self.apply(datagram),
                Err(error) => {
                    tracing::debug!(%error, "dropping malformed datagram");
                    self.stats.incr_parse_error(error);
                }
            }
        }
    }

    /// Folds a parsed datagram into the aggregation state of its identity.
    ///
    /// The identity's state is created lazily on first observation; under concurrent first-seen
    /// races exactly one state is created and all records fold into it. The metric type is fixed
    /// at that point: records re-applying a different type to the same identity are dropped and
    /// counted.
    pub fn apply(&self, datagram: Datagram) {
        let ty = datagram.ty();

        if matches!(ty, MetricType::Gauge | MetricType::Set)
            && datagram.sample_rate != 1.0
            && matches!(self.config.sample_rate_policy, SampleRatePolicy::Reject)
        {
            tracing::debug!(metric = %datagram.name, "dropping datagram with sample rate");
            self.stats.incr_sample_rate_rejected();
            return;
        }

        let Datagram {
            name,
            value,
            sample_rate,
            tags,
        } = datagram;
        let key = MetricKey { name, tags };

        let cell = {
            let entries = self.entries.read();
            entries.get(&key).map(Arc::clone)
        };

        let now = UnixTimestamp::now();
        let cycle = self.cycle.load(Ordering::Relaxed);

        let cell = match cell {
            Some(cell) => cell,
            None => Arc::clone(
                self.entries
                    .write()
                    .entry(key)
                    .or_insert_with(|| Arc::new(Mutex::new(Entry::new(ty, now, cycle)))),
            ),
        };

        let mut entry = cell.lock();
        if entry.value.fold(value, sample_rate).is_err() {
            tracing::debug!(
                expected = %entry.ty,
                received = %ty,
                "dropping datagram with mismatched metric type"
            );
            self.stats.incr_type_mismatch();
            return;
        }

        entry.last_updated = now;
        entry.sample_count += 1;
        entry.last_cycle = cycle;
    }

    /// Drains all aggregation state into snapshots and runs the eviction sweep.
    ///
    /// Cycle-scoped state (counter deltas, timer and set contents) is reset, persistent state
    /// (gauge values) is retained. Entries idle for more than the configured number of cycles
    /// are evicted before the next acceptance window. Ingestion overlaps with the drain for all
    /// metrics that are not being snapshotted at that very moment.
    pub fn drain(&self, now: UnixTimestamp) -> Vec<Snapshot> {
        let entries: Vec<(MetricKey, Arc<Mutex<Entry>>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .map(|(key, cell)| (key.clone(), Arc::clone(cell)))
                .collect()
        };

        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed);
        let mut snapshots = Vec::with_capacity(entries.len());
        let mut expired = Vec::new();

        for (key, cell) in entries {
            let mut entry = cell.lock();

            if let Some(value) = entry.value.drain(&self.config.percentiles) {
                snapshots.push(Snapshot {
                    name: key.name.clone(),
                    tags: key.tags.clone(),
                    timestamp: now,
                    value,
                });
            }

            if let Some(max_idle) = self.config.max_idle_cycles {
                if cycle.saturating_sub(entry.last_cycle) > u64::from(max_idle) {
                    expired.push(key);
                }
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write();
            for key in expired {
                // A record may have raced in since the sweep inspected the entry; re-check
                // under the exclusive registry lock.
                let idle = entries
                    .get(&key)
                    .is_some_and(|cell| cell.lock().last_cycle < cycle);
                if idle {
                    tracing::debug!(metric = %key.name, "evicting idle metric");
                    entries.remove(&key);
                }
            }
        }

        snapshots
    }
}
