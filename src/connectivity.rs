//! Pre-flight connectivity gate.
//!
//! A probe attempted on a dead or very slow link would record a failure that
//! says nothing about the service, so checks are gated on link quality and
//! retried shortly instead of polluting history.

/// Minimum downstream bandwidth considered good enough to probe.
pub const MIN_DOWNLINK_KBPS: i64 = 1000;

/// Snapshot of the host's network path quality.
#[derive(Debug, Clone, Copy)]
pub struct LinkStatus {
    /// Whether a validated network path exists at all.
    pub validated: bool,
    /// Reported downstream bandwidth in kbps.
    pub downlink_kbps: i64,
}

impl LinkStatus {
    pub fn is_sufficient(&self) -> bool {
        self.validated && self.downlink_kbps >= MIN_DOWNLINK_KBPS
    }
}

/// Source of link-quality information.
pub trait ConnectivityMonitor: Send + Sync {
    fn link_status(&self) -> LinkStatus;
}

/// Monitor for hosts with a permanent network path (servers, containers).
pub struct AlwaysOnline;

impl ConnectivityMonitor for AlwaysOnline {
    fn link_status(&self) -> LinkStatus {
        LinkStatus {
            validated: true,
            downlink_kbps: i64::MAX,
        }
    }
}
