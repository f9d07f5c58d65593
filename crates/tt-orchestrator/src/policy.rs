//! Fixed timing and port policy
//!
//! Timeouts are policy constants; they are not user-configurable while an
//! attempt is in flight. [`TimingPolicy`] bundles them so tests can shrink
//! them.

use std::time::Duration;

/// How long the overlay may take to report connected
pub const OVERLAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between overlay connectivity checks
pub const OVERLAY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregate readiness deadline for all gating tunnels
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between readiness ticks and liveness attempts
pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for the remote installer
pub const INSTALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Upper bound for quick remote probes
pub const QUICK_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay before re-probing a freshly launched daemon
pub const REPROBE_DELAY: Duration = Duration::from_secs(1);

/// Control port + this = local port of the control forward
pub const LOCAL_CONTROL_OFFSET: u16 = 8000;

/// Control port + this = remote port the file daemon binds
pub const REMOTE_DAEMON_OFFSET: u16 = 10000;

/// Control port + this = local port of the file-daemon forward
pub const LOCAL_DAEMON_OFFSET: u16 = 18000;

/// Timeouts and intervals used by one orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingPolicy {
    pub overlay_timeout: Duration,
    pub overlay_poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub probe_interval: Duration,
    pub install_timeout: Duration,
    pub quick_probe_timeout: Duration,
    pub reprobe_delay: Duration,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            overlay_timeout: OVERLAY_TIMEOUT,
            overlay_poll_interval: OVERLAY_POLL_INTERVAL,
            readiness_timeout: READINESS_TIMEOUT,
            probe_interval: PROBE_INTERVAL,
            install_timeout: INSTALL_TIMEOUT,
            quick_probe_timeout: QUICK_PROBE_TIMEOUT,
            reprobe_delay: REPROBE_DELAY,
        }
    }
}

/// Ports derived from a profile's control port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    /// Remote control service port
    pub control: u16,
    /// Local end of the control forward
    pub local_control: u16,
    /// Remote port the file daemon binds
    pub remote_daemon: u16,
    /// Local end of the file-daemon forward
    pub local_daemon: u16,
}

impl PortPlan {
    /// Derive every port from the control port; `None` on u16 overflow
    pub fn for_control_port(control: u16) -> Option<Self> {
        Some(Self {
            control,
            local_control: control.checked_add(LOCAL_CONTROL_OFFSET)?,
            remote_daemon: control.checked_add(REMOTE_DAEMON_OFFSET)?,
            local_daemon: control.checked_add(LOCAL_DAEMON_OFFSET)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_plan_offsets() {
        let plan = PortPlan::for_control_port(9091).unwrap();
        assert_eq!(plan.local_control, 17091);
        assert_eq!(plan.remote_daemon, 19091);
        assert_eq!(plan.local_daemon, 27091);
    }

    #[test]
    fn test_port_plan_overflow() {
        assert!(PortPlan::for_control_port(50000).is_none());
        assert!(PortPlan::for_control_port(u16::MAX - LOCAL_DAEMON_OFFSET).is_some());
    }

    #[test]
    fn test_liveness_budget_is_forty_attempts() {
        assert_eq!(READINESS_TIMEOUT.as_millis() / PROBE_INTERVAL.as_millis(), 40);
        assert!(QUICK_PROBE_TIMEOUT < INSTALL_TIMEOUT);
    }
}
