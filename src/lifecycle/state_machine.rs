//! Finite state machine for bundle lifecycles.
//!
//! Every bundle moves through the same phases:
//!
//! ```text
//! Unprovisioned -> Provisioning -> Ready -> TearingDown -> Released
//!                       |                      |
//!                       v                      v
//!            Failed{cleanup_attempted}   Failed{cleanup_attempted: true}
//! ```
//!
//! `Released` is terminal. Only a `Ready` bundle may start teardown, which
//! makes a second `cleanup()` call a no-op.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::CleanupError;

/// Phase of one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundlePhase {
    Unprovisioned,
    Provisioning,
    Ready,
    TearingDown,
    Released,
    Failed { cleanup_attempted: bool },
}

impl fmt::Display for BundlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundlePhase::Unprovisioned => write!(f, "Unprovisioned"),
            BundlePhase::Provisioning => write!(f, "Provisioning"),
            BundlePhase::Ready => write!(f, "Ready"),
            BundlePhase::TearingDown => write!(f, "TearingDown"),
            BundlePhase::Released => write!(f, "Released"),
            BundlePhase::Failed { cleanup_attempted } => {
                write!(f, "Failed(cleanup_attempted={cleanup_attempted})")
            }
        }
    }
}

/// Events that trigger phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleEvent {
    /// The factory started creating child resources
    ProvisioningStarted,
    /// Every child resource reported ready
    ResourcesReady,
    /// A provisioning step failed
    ProvisioningFailed { cleanup_attempted: bool },
    /// Cleanup was requested
    TeardownStarted,
    /// Every owned resource is gone
    TeardownCompleted,
    /// Cleanup finished but some resources could not be removed
    TeardownFailed,
}

impl fmt::Display for BundleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleEvent::ProvisioningStarted => write!(f, "ProvisioningStarted"),
            BundleEvent::ResourcesReady => write!(f, "ResourcesReady"),
            BundleEvent::ProvisioningFailed { .. } => write!(f, "ProvisioningFailed"),
            BundleEvent::TeardownStarted => write!(f, "TeardownStarted"),
            BundleEvent::TeardownCompleted => write!(f, "TeardownCompleted"),
            BundleEvent::TeardownFailed => write!(f, "TeardownFailed"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: BundlePhase,
    pub to: BundlePhase,
    pub event: BundleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: BundlePhase,
        to: BundlePhase,
        event: BundleEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: BundlePhase,
        to: BundlePhase,
        event: BundleEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: BundlePhase,
        event: BundleEvent,
    },
}

/// Transition table shared by every bundle kind
pub struct BundleStateMachine {
    transitions: Vec<Transition>,
}

impl Default for BundleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleStateMachine {
    pub fn new() -> Self {
        use BundleEvent as E;
        use BundlePhase as P;
        Self {
            transitions: vec![
                Transition::new(
                    P::Unprovisioned,
                    P::Provisioning,
                    E::ProvisioningStarted,
                    "Creating child resources",
                ),
                Transition::new(
                    P::Provisioning,
                    P::Ready,
                    E::ResourcesReady,
                    "All child resources are ready",
                ),
                Transition::new(
                    P::Provisioning,
                    P::Failed {
                        cleanup_attempted: true,
                    },
                    E::ProvisioningFailed {
                        cleanup_attempted: true,
                    },
                    "Provisioning failed, partial resources cleaned up",
                ),
                Transition::new(
                    P::Provisioning,
                    P::Failed {
                        cleanup_attempted: false,
                    },
                    E::ProvisioningFailed {
                        cleanup_attempted: false,
                    },
                    "Provisioning failed before anything was created",
                ),
                Transition::new(
                    P::Ready,
                    P::TearingDown,
                    E::TeardownStarted,
                    "Deleting owned resources",
                ),
                Transition::new(
                    P::TearingDown,
                    P::Released,
                    E::TeardownCompleted,
                    "All owned resources released",
                ),
                Transition::new(
                    P::TearingDown,
                    P::Failed {
                        cleanup_attempted: true,
                    },
                    E::TeardownFailed,
                    "Some owned resources could not be released",
                ),
                // Released is terminal
            ],
        }
    }

    pub fn transition(&self, current: BundlePhase, event: BundleEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    pub fn can_transition(&self, from: BundlePhase, event: BundleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    pub fn valid_events(&self, state: BundlePhase) -> Vec<BundleEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}

/// Rejected transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid bundle transition from {current} on {event}")]
pub struct InvalidTransition {
    pub current: BundlePhase,
    pub event: BundleEvent,
}

/// The phase of one bundle, shared between its owner and the scope.
pub struct Lifecycle {
    identity: String,
    phase: Mutex<BundlePhase>,
    machine: BundleStateMachine,
}

impl Lifecycle {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            phase: Mutex::new(BundlePhase::Unprovisioned),
            machine: BundleStateMachine::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BundlePhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn phase(&self) -> BundlePhase {
        *self.lock()
    }

    /// Apply `event`, returning the new phase.
    pub fn fire(&self, event: BundleEvent) -> Result<BundlePhase, InvalidTransition> {
        let mut phase = self.lock();
        match self.machine.transition(*phase, event) {
            TransitionResult::Success {
                from,
                to,
                description,
                ..
            } => {
                debug!(bundle = %self.identity, %from, %to, %event, description, "Bundle transition");
                *phase = to;
                Ok(to)
            }
            TransitionResult::InvalidTransition { current, event } => {
                Err(InvalidTransition { current, event })
            }
        }
    }

    /// Claim the right to run cleanup. Only the first caller on a `Ready`
    /// bundle gets `true`.
    pub fn begin_teardown(&self) -> bool {
        self.fire(BundleEvent::TeardownStarted).is_ok()
    }

    /// Record how a teardown started with [`begin_teardown`](Self::begin_teardown) ended.
    pub fn finish_teardown(&self, outcome: &Result<(), CleanupError>) -> BundlePhase {
        let event = match outcome {
            Ok(()) => BundleEvent::TeardownCompleted,
            Err(_) => BundleEvent::TeardownFailed,
        };
        self.fire(event).unwrap_or_else(|e| e.current)
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("identity", &self.identity)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.phase(), BundlePhase::Unprovisioned);
        lifecycle.fire(BundleEvent::ProvisioningStarted).unwrap();
        lifecycle.fire(BundleEvent::ResourcesReady).unwrap();
        assert!(lifecycle.begin_teardown());
        lifecycle.fire(BundleEvent::TeardownCompleted).unwrap();
        assert_eq!(lifecycle.phase(), BundlePhase::Released);
    }

    #[test]
    fn test_provisioning_failure_records_cleanup() {
        let sm = BundleStateMachine::new();
        let result = sm.transition(
            BundlePhase::Provisioning,
            BundleEvent::ProvisioningFailed {
                cleanup_attempted: true,
            },
        );
        match result {
            TransitionResult::Success { to, .. } => assert_eq!(
                to,
                BundlePhase::Failed {
                    cleanup_attempted: true
                }
            ),
            other => panic!("Expected Success, got {:?}", other),
        }
    }

    #[test]
    fn test_released_is_terminal() {
        let sm = BundleStateMachine::new();
        assert!(sm.valid_events(BundlePhase::Released).is_empty());
    }

    #[test]
    fn test_teardown_only_once() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.fire(BundleEvent::ProvisioningStarted).unwrap();
        lifecycle.fire(BundleEvent::ResourcesReady).unwrap();
        assert!(lifecycle.begin_teardown());
        assert!(!lifecycle.begin_teardown());
    }

    #[test]
    fn test_teardown_requires_ready() {
        let sm = BundleStateMachine::new();
        assert!(!sm.can_transition(BundlePhase::Provisioning, BundleEvent::TeardownStarted));
        assert!(!sm.can_transition(BundlePhase::Unprovisioned, BundleEvent::TeardownStarted));
        assert!(sm.can_transition(BundlePhase::Ready, BundleEvent::TeardownStarted));
    }

    #[test]
    fn test_failed_teardown() {
        let lifecycle = Lifecycle::new("test");
        lifecycle.fire(BundleEvent::ProvisioningStarted).unwrap();
        lifecycle.fire(BundleEvent::ResourcesReady).unwrap();
        lifecycle.fire(BundleEvent::TeardownStarted).unwrap();
        let phase = lifecycle.fire(BundleEvent::TeardownFailed).unwrap();
        assert_eq!(
            phase,
            BundlePhase::Failed {
                cleanup_attempted: true
            }
        );
        assert!(!lifecycle.begin_teardown());
    }

    #[test]
    fn test_invalid_transition() {
        let lifecycle = Lifecycle::new("test");
        let err = lifecycle.fire(BundleEvent::ResourcesReady).unwrap_err();
        assert_eq!(err.current, BundlePhase::Unprovisioned);
        assert_eq!(lifecycle.phase(), BundlePhase::Unprovisioned);
    }
}
