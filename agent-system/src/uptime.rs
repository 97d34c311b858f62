//! On-demand refresh of the kernel uptime counters.

use std::path::PathBuf;

/// An error returned when the uptime source cannot be refreshed.
///
/// Refresh failures are non-fatal by contract: the caller decides whether to zero-fill, skip
/// the cycle, or propagate upward.
#[derive(Debug, thiserror::Error)]
pub enum UptimeError {
    /// The uptime source is missing or unreadable.
    #[error("failed to read uptime source")]
    Io(#[from] std::io::Error),
    /// The uptime source does not contain two seconds values.
    #[error("malformed uptime data")]
    Malformed,
}

/// A snapshot of the kernel uptime counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Uptime {
    /// Seconds since boot.
    pub uptime: f64,
    /// Seconds all cores spent idle since boot.
    pub idle: f64,
}

impl Uptime {
    fn parse(buffer: &str) -> Result<Self, UptimeError> {
        let mut fields = buffer.split_whitespace();

        let uptime: f64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(UptimeError::Malformed)?;
        let idle: f64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or(UptimeError::Malformed)?;

        if !uptime.is_finite() || uptime < 0.0 || !idle.is_finite() || idle < 0.0 {
            return Err(UptimeError::Malformed);
        }

        Ok(Self { uptime, idle })
    }
}

/// Reads `proc/uptime` below a configurable stats root.
///
/// The root defaults to `/` and is overridable for containerized setups and tests, where the
/// proc filesystem is mounted elsewhere.
#[derive(Clone, Debug)]
pub struct UptimeReader {
    statspath: PathBuf,
}

impl Default for UptimeReader {
    fn default() -> Self {
        Self::new("/")
    }
}

impl UptimeReader {
    /// Creates a reader rooted at the given stats path.
    pub fn new(statspath: impl Into<PathBuf>) -> Self {
        Self {
            statspath: statspath.into(),
        }
    }

    /// Reads the current uptime counters.
    pub fn refresh(&self) -> Result<Uptime, UptimeError> {
        let path = self.statspath.join("proc/uptime");
        let buffer = std::fs::read_to_string(path)?;
        Uptime::parse(&buffer)
    }
}
