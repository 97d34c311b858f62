//! Configuration for the metric registry and its drain cycle.

use serde::{Deserialize, Serialize};

/// Policy for sample rates on metric types where they carry no meaning.
///
/// Sample rates scale counter and timer contributions. For gauges and sets a rate does not
/// change the aggregate, so it is either ignored or treated as a protocol violation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleRatePolicy {
    /// Accept the datagram and disregard the rate.
    ///
    /// This maximizes datagram acceptance and is the default.
    #[default]
    Ignore,

    /// Drop the datagram and count the drop.
    Reject,
}

/// Parameters used by the [`crate::Registry`].
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// The wall clock interval between drain cycles in seconds.
    ///
    /// Defaults to `10` seconds. Every drain snapshots all aggregation state and hands it to the
    /// export receiver.
    pub flush_interval: u64,

    /// The percentiles computed for drained timers.
    ///
    /// Defaults to p90, p95 and p99.
    pub percentiles: Vec<f64>,

    /// The number of drain cycles a metric may stay idle before it is evicted.
    ///
    /// Entries whose last update predates the current cycle by more than this many cycles are
    /// removed during the drain sweep, bounding memory under high tag cardinality.
    ///
    /// Defaults to `None`, i.e. never evict.
    pub max_idle_cycles: Option<u32>,

    /// How to handle sample rates on gauges and sets.
    ///
    /// Defaults to [`SampleRatePolicy::Ignore`].
    pub sample_rate_policy: SampleRatePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            flush_interval: 10,
            percentiles: vec![90.0, 95.0, 99.0],
            max_idle_cycles: None,
            sample_rate_policy: SampleRatePolicy::default(),
        }
    }
}
