//! Channel lifecycle state machine.
//!
//! ```text
//! Uninitialized ─▶ PendingPairing ─▶ Authenticated ─▶ Ready ⇄ Disconnected
//!        any ─▶ Failed (terminal)
//! ```
//!
//! Transitions are pure; the adapter publishes the result through a watch
//! channel.

use core::fmt;

use thiserror::Error;

use crate::session::PairingChallenge;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Uninitialized,
    PendingPairing(PairingChallenge),
    Authenticated,
    Ready,
    Disconnected { reason: String },
    /// Authentication is gone; only an operator can recover.
    Failed { reason: String },
}

impl ChannelState {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::PendingPairing(_) => "pending_pairing",
            ChannelState::Authenticated => "authenticated",
            ChannelState::Ready => "ready",
            ChannelState::Disconnected { .. } => "disconnected",
            ChannelState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ChannelState::Ready)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChannelState::Failed { .. })
    }

    /// States from which readiness may be inferred from probe evidence.
    pub fn may_infer_ready(&self) -> bool {
        matches!(
            self,
            ChannelState::Authenticated | ChannelState::Disconnected { .. }
        )
    }

    /// Compute the state after `transition`.
    pub fn apply(&self, transition: &Transition) -> Result<ChannelState, InvalidTransition> {
        use ChannelState as S;
        use Transition as T;

        let next = match (self, transition) {
            (S::Failed { .. }, _) => return Err(InvalidTransition::new(self, transition)),
            (_, T::AuthLost(reason)) => S::Failed {
                reason: reason.clone(),
            },

            (S::Uninitialized | S::PendingPairing(_), T::PairingRequested(challenge)) => {
                S::PendingPairing(challenge.clone())
            }

            (
                S::Uninitialized | S::PendingPairing(_) | S::Authenticated | S::Disconnected { .. },
                T::Authenticated,
            ) => S::Authenticated,
            // Duplicate auth signal after readiness changes nothing.
            (S::Ready, T::Authenticated) => S::Ready,

            (S::Authenticated | S::Ready | S::Disconnected { .. }, T::Ready) => S::Ready,
            (S::Authenticated | S::Disconnected { .. }, T::ReadinessInferred) => S::Ready,

            (S::Authenticated | S::Ready | S::Disconnected { .. }, T::Disconnected(reason)) => {
                S::Disconnected {
                    reason: reason.clone(),
                }
            }

            _ => return Err(InvalidTransition::new(self, transition)),
        };
        Ok(next)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    PairingRequested(PairingChallenge),
    Authenticated,
    Ready,
    /// Readiness promoted from liveness-probe evidence.
    ReadinessInferred,
    Disconnected(String),
    AuthLost(String),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::PairingRequested(_) => "pairing_requested",
            Transition::Authenticated => "authenticated",
            Transition::Ready => "ready",
            Transition::ReadinessInferred => "readiness_inferred",
            Transition::Disconnected(_) => "disconnected",
            Transition::AuthLost(_) => "auth_lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid channel transition {transition} from {from}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub transition: &'static str,
}

impl InvalidTransition {
    fn new(from: &ChannelState, transition: &Transition) -> Self {
        Self {
            from: from.name(),
            transition: transition.name(),
        }
    }
}
