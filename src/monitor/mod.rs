//! Node liveness monitoring.
//!
//! The [`LivenessMonitor`] wakes up every check interval and asks a
//! [`NodeProbe`] about each registered node. A node that cannot be probed is
//! marked down and receives no new jobs until a later probe succeeds. Probe
//! failures never stop the loop; only a fatal broker error does.

pub mod liveness;
pub mod probe;

pub use liveness::{CycleSummary, LivenessMonitor};
pub use probe::{parse_probe_output, NodeProbe, ProbeError, SshProbe};
