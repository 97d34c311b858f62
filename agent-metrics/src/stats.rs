//! Internal drop accounting for the registry.
//!
//! The receive path is fire-and-forget: malformed input never surfaces an error to the caller.
//! Every dropped line or record increments exactly one of these counters instead.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::ParseError;

/// Counters tracking dropped input on the receive path.
///
/// All counters are updated with relaxed ordering; they are diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Lines dropped with [`ParseError::MalformedName`].
    pub malformed_name: AtomicU64,
    /// Lines dropped with [`ParseError::InvalidValue`].
    pub invalid_value: AtomicU64,
    /// Lines dropped with [`ParseError::UnknownType`].
    pub unknown_type: AtomicU64,
    /// Lines dropped with [`ParseError::InvalidSampleRate`].
    pub invalid_sample_rate: AtomicU64,
    /// Records dropped because their declared type differs from the type fixed at the
    /// identity's first observation.
    pub type_mismatch: AtomicU64,
    /// Records dropped by [`SampleRatePolicy::Reject`](crate::SampleRatePolicy::Reject).
    pub sample_rate_rejected: AtomicU64,
}

impl RegistryStats {
    pub(crate) fn incr_parse_error(&self, error: ParseError) {
        let counter = match error {
            ParseError::MalformedName => &self.malformed_name,
            ParseError::InvalidValue => &self.invalid_value,
            ParseError::UnknownType => &self.unknown_type,
            ParseError::InvalidSampleRate => &self.invalid_sample_rate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_type_mismatch(&self) {
        self.type_mismatch.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn incr_sample_rate_rejected(&self) {
        self.sample_rate_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of dropped lines and records.
    pub fn dropped(&self) -> u64 {
        self.malformed_name.load(Ordering::Relaxed)
            + self.invalid_value.load(Ordering::Relaxed)
            + self.unknown_type.load(Ordering::Relaxed)
            + self.invalid_sample_rate.load(Ordering::Relaxed)
            + self.type_mismatch.load(Ordering::Relaxed)
            + self.sample_rate_rejected.load(Ordering::Relaxed)
    }
}
