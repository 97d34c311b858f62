//! System stat collaborators consumed by the agent's exporter.
//!
//! These are the format-stable external interfaces around the aggregation core: a reader for
//! the kernel's uptime counters and the immutable cluster table mapping stat domains to the
//! metrics they control. Neither is consulted on the datagram receive path.

mod cluster;
mod uptime;

pub use self::cluster::*;
pub use self::uptime::*;
