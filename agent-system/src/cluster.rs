//! Stat cluster domains and the table mapping them to metrics.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A stat cluster, grouping metrics of one domain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    /// Global stats.
    Global,
    /// Per-socket stats.
    PerSocket,
}

impl Cluster {
    /// Returns all known clusters.
    pub fn all() -> &'static [Cluster] {
        &[Cluster::Global, Cluster::PerSocket]
    }

    /// Returns the numeric domain id of this cluster.
    pub fn id(self) -> u32 {
        match self {
            Cluster::Global => 0,
            Cluster::PerSocket => 1,
        }
    }

    /// Resolves a numeric domain id into a cluster.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Cluster::Global),
            1 => Some(Cluster::PerSocket),
            _ => None,
        }
    }

    /// Returns the name of this cluster.
    pub fn as_str(self) -> &'static str {
        match self {
            Cluster::Global => "global",
            Cluster::PerSocket => "per-socket",
        }
    }
}

/// An immutable mapping from clusters to the metrics they control.
///
/// The table is built once at startup and passed to the exporter, which consumes it read-only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterTable {
    clusters: BTreeMap<Cluster, BTreeSet<String>>,
}

impl ClusterTable {
    /// Builds a table from `(cluster, metric name)` pairs.
    pub fn from_iter<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (Cluster, S)>,
        S: Into<String>,
    {
        let mut clusters: BTreeMap<Cluster, BTreeSet<String>> = BTreeMap::new();
        for (cluster, metric) in pairs {
            clusters.entry(cluster).or_default().insert(metric.into());
        }
        Self { clusters }
    }

    /// Returns the metrics controlled by the given cluster.
    pub fn metrics(&self, cluster: Cluster) -> impl Iterator<Item = &str> {
        self.clusters
            .get(&cluster)
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
    }

    /// Returns the cluster controlling the given metric, if any.
    pub fn cluster_of(&self, metric: &str) -> Option<Cluster> {
        self.clusters
            .iter()
            .find(|(_, metrics)| metrics.contains(metric))
            .map(|(&cluster, _)| cluster)
    }
}
