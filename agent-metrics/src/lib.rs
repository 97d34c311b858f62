//! Statsd protocol parsing and metric aggregation for the agent.
//!
//! This crate is the core of the metrics-collection agent. It accepts raw network buffers in
//! the statsd submission protocol, parses them into validated [`Datagram`] records, and folds
//! them into per-metric aggregation state that is periodically drained for export.
//!
//! # Submission Protocol
//!
//! ```text
//! <name>:<value>|<type>[|@<sample_rate>][|#<tag_key>=<tag_value>,<tag>]
//! ```
//!
//! A buffer may contain multiple newline-separated datagrams. Malformed lines are dropped and
//! counted individually without affecting the remaining lines of the buffer.
//!
//! # Metric Types
//!
//!  - [Counters](MetricType::Counter) (`c`) sum deltas, scaled by the inverse sample rate, and
//!    export the accumulated delta per drain cycle.
//!  - [Gauges](MetricType::Gauge) (`g`) keep the last absolute value; an explicit `+`/`-` sign
//!    applies a delta instead. Gauge state persists across cycles.
//!  - [Timers](MetricType::Timer) (`ms`, alias `h`) collect the raw values of one cycle and
//!    drain to count, sum, min, max and configurable percentiles.
//!  - [Sets](MetricType::Set) (`s`) count distinct values per cycle.
//!
//! # Aggregation
//!
//! The [`Registry`] maps each metric identity (name plus normalized tag set) to its own
//! independently locked aggregation state, so ingestion workers and the drain cycle only
//! contend on the metrics they actually touch. The [`FlushService`] drains the registry at a
//! fixed interval and hands the resulting [`Snapshot`]s to a [`FlushSink`] receiver.
//!
//! ```
//! use agent_metrics::{Registry, RegistryConfig, UnixTimestamp};
//!
//! let registry = Registry::new(RegistryConfig::default());
//! registry.apply_all(b"page.views:1|c\nreq.latency:120|ms|@0.5\n");
//!
//! for snapshot in registry.drain(UnixTimestamp::now()) {
//!     println!("{} = {}", snapshot.name, snapshot.value);
//! }
//! ```

mod aggregate;
mod config;
mod datagram;
mod flush;
mod protocol;
mod registry;
mod stats;
mod time;

pub use self::aggregate::*;
pub use self::config::*;
pub use self::datagram::*;
pub use self::flush::*;
pub use self::protocol::*;
pub use self::registry::*;
pub use self::stats::*;
pub use self::time::*;
