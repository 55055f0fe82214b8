use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Running,
    Starting,
    Deallocated,
    Stopped,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PowerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Running => "running",
            PowerState::Starting => "starting",
            PowerState::Deallocated => "deallocated",
            PowerState::Stopped => "stopped",
            PowerState::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            PowerState::Running => "Running",
            PowerState::Starting => "Starting",
            PowerState::Deallocated => "Deallocated",
            PowerState::Stopped => "Stopped",
            PowerState::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the VM's power condition as last reported by the provider.
///
/// Every poll produces a fresh value; snapshots are replaced, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmState {
    #[serde(default)]
    pub power_state: PowerState,
    #[serde(default)]
    pub display_status: String,
}

impl VmState {
    pub fn new(power_state: PowerState, display_status: impl Into<String>) -> Self {
        Self {
            power_state,
            display_status: display_status.into(),
        }
    }

    #[must_use]
    pub fn unknown() -> Self {
        Self::from(PowerState::Unknown)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.power_state == PowerState::Running
    }

    /// Deallocated and stopped machines both need an explicit start.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(
            self.power_state,
            PowerState::Deallocated | PowerState::Stopped
        )
    }

    #[must_use]
    pub fn is_starting(&self) -> bool {
        self.power_state == PowerState::Starting
    }

    /// Human-readable status, falling back to the power state label.
    #[must_use]
    pub fn display(&self) -> &str {
        if self.display_status.is_empty() {
            self.power_state.label()
        } else {
            &self.display_status
        }
    }
}

impl From<PowerState> for VmState {
    fn from(power_state: PowerState) -> Self {
        Self::new(power_state, power_state.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadinessPhase {
    #[default]
    Idle,
    RequestingStart,
    AwaitingVmRunning,
    AwaitingBackendReady,
    Ready,
    TimedOut,
    Failed,
}

impl ReadinessPhase {
    #[must_use]
    pub fn step(&self) -> (u32, u32) {
        match self {
            ReadinessPhase::Idle => (0, 4),
            ReadinessPhase::RequestingStart => (1, 4),
            ReadinessPhase::AwaitingVmRunning => (2, 4),
            ReadinessPhase::AwaitingBackendReady => (3, 4),
            ReadinessPhase::Ready | ReadinessPhase::TimedOut | ReadinessPhase::Failed => (4, 4),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ReadinessPhase::Idle => "idle",
            ReadinessPhase::RequestingStart => "requesting-start",
            ReadinessPhase::AwaitingVmRunning => "awaiting-vm-running",
            ReadinessPhase::AwaitingBackendReady => "awaiting-backend-ready",
            ReadinessPhase::Ready => "ready",
            ReadinessPhase::TimedOut => "timed-out",
            ReadinessPhase::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReadinessPhase::Ready | ReadinessPhase::TimedOut | ReadinessPhase::Failed
        )
    }

    /// A session in one of these phases still owns the start slot.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal() && *self != ReadinessPhase::Idle
    }

    /// Phases only move forward; the only way back is a reset to idle.
    #[must_use]
    pub fn can_advance_to(&self, next: ReadinessPhase) -> bool {
        if next == ReadinessPhase::Idle {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.step().0 > self.step().0
    }
}

impl std::fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// State of one user-triggered attempt to bring the VM and backend up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessSession {
    pub phase: ReadinessPhase,
    pub message: String,
    pub attempt_started_at: Option<SystemTime>,
    pub vm: Option<VmState>,
    pub vm_polls: u32,
    pub backend_polls: u32,
}

impl Default for ReadinessSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl ReadinessSession {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            phase: ReadinessPhase::Idle,
            message: String::new(),
            attempt_started_at: None,
            vm: None,
            vm_polls: 0,
            backend_polls: 0,
        }
    }

    /// Fresh session entering `requesting-start`.
    pub fn begin(message: impl Into<String>) -> Self {
        Self {
            phase: ReadinessPhase::RequestingStart,
            message: message.into(),
            attempt_started_at: Some(SystemTime::now()),
            ..Self::idle()
        }
    }

    /// Move to `phase`, returning `false` (and leaving the session untouched)
    /// when the transition would go backwards.
    pub fn advance(&mut self, phase: ReadinessPhase, message: impl Into<String>) -> bool {
        if !self.phase.can_advance_to(phase) {
            return false;
        }
        if phase == ReadinessPhase::Idle {
            *self = Self::idle();
            return true;
        }
        self.phase = phase;
        self.message = message.into();
        true
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.phase.is_in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_wire_format() {
        let json = r#"{"powerState":"deallocated","displayStatus":"VM deallocated","extra":1}"#;
        let state: VmState = serde_json::from_str(json).unwrap();
        assert_eq!(state.power_state, PowerState::Deallocated);
        assert_eq!(state.display_status, "VM deallocated");
        assert!(state.is_offline());

        let out = serde_json::to_string(&VmState::from(PowerState::Running)).unwrap();
        assert!(out.contains(r#""powerState":"running""#));
        assert!(out.contains(r#""displayStatus":"Running""#));
    }

    #[test]
    fn test_unrecognized_power_state_is_unknown() {
        let state: VmState = serde_json::from_str(r#"{"powerState":"hibernated"}"#).unwrap();
        assert_eq!(state.power_state, PowerState::Unknown);
        assert_eq!(state.display(), "Unknown");
    }

    #[test]
    fn test_phases_only_move_forward() {
        let mut session = ReadinessSession::begin("Sending start command...");
        assert!(session.is_in_flight());
        assert!(session.advance(ReadinessPhase::AwaitingVmRunning, "booting"));
        assert!(!session.advance(ReadinessPhase::RequestingStart, "again"));
        assert_eq!(session.phase, ReadinessPhase::AwaitingVmRunning);
        assert!(session.advance(ReadinessPhase::TimedOut, "timed out"));
        assert!(!session.advance(ReadinessPhase::Ready, "ready"));
        assert!(!session.is_in_flight());
        assert!(session.advance(ReadinessPhase::Idle, ""));
        assert_eq!(session, ReadinessSession::idle());
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(ReadinessPhase::AwaitingBackendReady.to_string(), "awaiting-backend-ready");
        let json = serde_json::to_string(&ReadinessPhase::TimedOut).unwrap();
        assert_eq!(json, r#""timed-out""#);
    }
}
