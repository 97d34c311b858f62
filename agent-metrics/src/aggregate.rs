//! Per-type aggregation state and drain rules.

use std::collections::BTreeSet;
use std::fmt;
use std::mem;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::datagram::{DatagramValue, SignedValue};
use crate::protocol::{CounterType, GaugeType, MetricType, SetType, TimerType};

/// Running total of a counter within the current drain cycle.
///
/// Counter submissions are always deltas, so the total is the sum of all scaled contributions
/// since the last drain. Draining exports the delta and resets the total to zero; the entry
/// itself persists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    /// The running total since the last drain.
    pub sum: CounterType,
}

impl CounterState {
    /// Folds a counter increment, scaled by the inverse sample rate.
    pub fn insert(&mut self, value: SignedValue, sample_rate: f64) {
        self.sum += value.value / sample_rate;
    }
}

/// Current value of a gauge.
///
/// Gauge state persists across drain cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GaugeState {
    /// The last absolute value, after applying any deltas.
    pub current: GaugeType,
}

impl GaugeState {
    /// Folds a gauge submission.
    ///
    /// An explicit sign denotes a delta onto the current value; an unsigned value sets it
    /// absolutely. The value itself already carries the sign, so deltas simply add.
    pub fn insert(&mut self, value: SignedValue) {
        if value.sign.is_explicit() {
            self.current += value.value;
        } else {
            self.current = value.value;
        }
    }
}

/// Observed timer values within the current drain cycle.
///
/// Raw magnitudes are kept losslessly for min/max/percentile computation at drain time. The
/// sample-rate weight affects only the derived count and sum, not each value's magnitude.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerState {
    /// The raw observed values of this cycle.
    pub values: SmallVec<[TimerType; 3]>,
    /// The number of observations, each weighted by the inverse sample rate.
    pub weighted_count: f64,
    /// The sum of observations, each weighted by the inverse sample rate.
    pub weighted_sum: f64,
}

impl TimerState {
    /// Folds a timer observation, weighted by the inverse sample rate.
    pub fn insert(&mut self, value: TimerType, sample_rate: f64) {
        self.values.push(value);
        self.weighted_count += 1.0 / sample_rate;
        self.weighted_sum += value / sample_rate;
    }

    /// Returns the number of raw observations in the current cycle.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values were observed in the current cycle.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Distinct values observed by a set within the current drain cycle.
///
/// Values are stored as 32-bit hashes, see [`DatagramValue::Set`].
pub type SetState = BTreeSet<SetType>;

/// The mutable aggregation state of one metric identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AggregateValue {
    /// State of a [`MetricType::Counter`].
    #[serde(rename = "c")]
    Counter(CounterState),
    /// State of a [`MetricType::Gauge`].
    #[serde(rename = "g")]
    Gauge(GaugeState),
    /// State of a [`MetricType::Timer`].
    #[serde(rename = "ms")]
    Timer(TimerState),
    /// State of a [`MetricType::Set`].
    #[serde(rename = "s")]
    Set(SetState),
}

impl AggregateValue {
    /// Returns empty aggregation state for the given metric type.
    pub fn empty(ty: MetricType) -> Self {
        match ty {
            MetricType::Counter => Self::Counter(CounterState::default()),
            MetricType::Gauge => Self::Gauge(GaugeState::default()),
            MetricType::Timer => Self::Timer(TimerState::default()),
            MetricType::Set => Self::Set(SetState::default()),
        }
    }

    /// Returns the type of this state.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Timer(_) => MetricType::Timer,
            Self::Set(_) => MetricType::Set,
        }
    }

    /// Folds a single datagram value into this state.
    ///
    /// Returns `Err(value)` if the value's type does not match the state. Callers hold the
    /// entry lock for the duration of this call only and must not retain references.
    pub fn fold(&mut self, value: DatagramValue, sample_rate: f64) -> Result<(), DatagramValue> {
        match (self, value) {
            (Self::Counter(state), DatagramValue::Counter(value)) => {
                state.insert(value, sample_rate)
            }
            (Self::Gauge(state), DatagramValue::Gauge(value)) => state.insert(value),
            (Self::Timer(state), DatagramValue::Timer(value)) => state.insert(value, sample_rate),
            (Self::Set(state), DatagramValue::Set(value)) => {
                state.insert(value);
            }
            (_, value) => return Err(value),
        }

        Ok(())
    }

    /// Drains this state for export and resets cycle-scoped data.
    ///
    /// Counters export their delta and reset to zero, gauges re-export their persistent value,
    /// timers and sets export their cycle data and clear. Timers and sets with no observations
    /// in the cycle yield `None`.
    pub fn drain(&mut self, percentiles: &[f64]) -> Option<SnapshotValue> {
        Some(match self {
            Self::Counter(state) => SnapshotValue::Counter(mem::take(&mut state.sum)),
            Self::Gauge(state) => SnapshotValue::Gauge(state.current),
            Self::Timer(state) => {
                if state.is_empty() {
                    return None;
                }
                let snapshot = TimerSnapshot::compute(state, percentiles);
                *state = TimerState::default();
                SnapshotValue::Timer(snapshot)
            }
            Self::Set(state) => {
                if state.is_empty() {
                    return None;
                }
                let cardinality = state.len() as u64;
                state.clear();
                SnapshotValue::Set(cardinality)
            }
        })
    }

    /// Returns the number of raw data points in this state.
    pub fn len(&self) -> usize {
        match self {
            Self::Counter(_) => 1,
            Self::Gauge(_) => 1,
            Self::Timer(state) => state.len(),
            Self::Set(state) => state.len(),
        }
    }

    /// Returns `true` if this state contains no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A percentile of a drained timer distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Percentile {
    /// The requested percentile, e.g. `99.0`.
    pub percentile: f64,
    /// The observed value at that percentile.
    pub value: f64,
}

/// The drained form of a timer for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// The number of observations, weighted by the inverse sample rate.
    pub count: f64,
    /// The sum of observations, weighted by the inverse sample rate.
    pub sum: f64,
    /// The smallest raw observation of the cycle.
    pub min: TimerType,
    /// The largest raw observation of the cycle.
    pub max: TimerType,
    /// The configured percentiles over the raw observations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub percentiles: Vec<Percentile>,
}

impl TimerSnapshot {
    /// Computes the drained snapshot of a non-empty timer state.
    ///
    /// Percentiles use the nearest-rank method over the sorted cycle values, which is
    /// `O(n log n)` per metric per cycle. `n` is bounded by the traffic of a single cycle.
    fn compute(state: &TimerState, percentiles: &[f64]) -> Self {
        let mut sorted = state.values.to_vec();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));

        let percentiles = percentiles
            .iter()
            .map(|&percentile| {
                let rank = (percentile / 100.0 * sorted.len() as f64).ceil() as usize;
                let index = rank.clamp(1, sorted.len()) - 1;
                Percentile {
                    percentile,
                    value: sorted[index],
                }
            })
            .collect();

        TimerSnapshot {
            count: state.weighted_count,
            sum: state.weighted_sum,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            percentiles,
        }
    }
}

/// The drained value of a metric for one cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SnapshotValue {
    /// The counter delta accumulated since the previous drain.
    #[serde(rename = "c")]
    Counter(CounterType),
    /// The current gauge value.
    #[serde(rename = "g")]
    Gauge(GaugeType),
    /// The timer distribution of the cycle.
    #[serde(rename = "ms")]
    Timer(TimerSnapshot),
    /// The number of distinct values observed within the cycle.
    #[serde(rename = "s")]
    Set(u64),
}

impl SnapshotValue {
    /// Returns the type of this value.
    pub fn ty(&self) -> MetricType {
        match self {
            Self::Counter(_) => MetricType::Counter,
            Self::Gauge(_) => MetricType::Gauge,
            Self::Timer(_) => MetricType::Timer,
            Self::Set(_) => MetricType::Set,
        }
    }
}

impl fmt::Display for SnapshotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotValue::Counter(value) => value.fmt(f),
            SnapshotValue::Gauge(value) => value.fmt(f),
            SnapshotValue::Timer(snapshot) => {
                write!(
                    f,
                    "count={} sum={} min={} max={}",
                    snapshot.count, snapshot.sum, snapshot.min, snapshot.max
                )
            }
            SnapshotValue::Set(cardinality) => cardinality.fmt(f),
        }
    }
}
