//! Provisioning state machine
//!
//! ```text
//! Initial ──► CreatingToken ──► TokenCreated ──► CreatingPool ──► PoolCreated
//!    ▲              │                ▲                │                │
//!    └── failed ────┘                └──── failed ────┘                ▼
//!                                                          GeneratingReference
//!                                                                      │
//!                                                                      ▼
//!                                                                  Complete
//! ```
//!
//! Failures only ever move back to the last stable state, so work that was
//! already confirmed on-chain is never discarded. [`transition`] is pure; the
//! engine feeds it the outcome of each ledger step.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

use crate::records::{EventRecord, PoolRecord};

/// Where an organizer is in the flow for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Initial,
    CreatingToken,
    TokenCreated { event_id: String, mint: Pubkey },
    CreatingPool { event_id: String, mint: Pubkey },
    PoolCreated { event_id: String, mint: Pubkey, pool: Pubkey },
    GeneratingReference { event_id: String },
    Complete { event_id: String, claim_url: String },
}

/// Something that happened to the flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    TokenRequested,
    TokenConfirmed { event_id: String, mint: Pubkey },
    TokenFailed,
    PoolRequested,
    PoolConfirmed { pool: Pubkey },
    PoolFailed,
    ReferenceRequested,
    ReferenceGenerated { claim_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {event} while {state}")]
pub struct TransitionError {
    pub state: String,
    pub event: String,
}

impl ProvisioningState {
    /// Rebuild the state of an event from what the store holds
    pub fn from_records(event: Option<&EventRecord>, pool: Option<&PoolRecord>) -> Self {
        match (event, pool) {
            (None, _) => Self::Initial,
            (Some(e), None) => Self::TokenCreated {
                event_id: e.id.clone(),
                mint: e.mint_address,
            },
            (Some(e), Some(p)) => Self::PoolCreated {
                event_id: e.id.clone(),
                mint: e.mint_address,
                pool: p.pool_address,
            },
        }
    }

    /// States the flow can sit in between user actions
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            Self::Initial | Self::TokenCreated { .. } | Self::PoolCreated { .. } | Self::Complete { .. }
        )
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Initial | Self::CreatingToken => None,
            Self::TokenCreated { event_id, .. }
            | Self::CreatingPool { event_id, .. }
            | Self::PoolCreated { event_id, .. }
            | Self::GeneratingReference { event_id }
            | Self::Complete { event_id, .. } => Some(event_id),
        }
    }

    pub fn mint(&self) -> Option<Pubkey> {
        match self {
            Self::TokenCreated { mint, .. }
            | Self::CreatingPool { mint, .. }
            | Self::PoolCreated { mint, .. } => Some(*mint),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Initial => "INITIAL",
            Self::CreatingToken => "CREATING_TOKEN",
            Self::TokenCreated { .. } => "TOKEN_CREATED",
            Self::CreatingPool { .. } => "CREATING_POOL",
            Self::PoolCreated { .. } => "POOL_CREATED",
            Self::GeneratingReference { .. } => "GENERATING_REFERENCE",
            Self::Complete { .. } => "COMPLETE",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ProvisioningEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenRequested => "token-requested",
            Self::TokenConfirmed { .. } => "token-confirmed",
            Self::TokenFailed => "token-failed",
            Self::PoolRequested => "pool-requested",
            Self::PoolConfirmed { .. } => "pool-confirmed",
            Self::PoolFailed => "pool-failed",
            Self::ReferenceRequested => "reference-requested",
            Self::ReferenceGenerated { .. } => "reference-generated",
        }
    }
}

/// Apply one event to a state
pub fn transition(
    state: &ProvisioningState,
    event: ProvisioningEvent,
) -> Result<ProvisioningState, TransitionError> {
    use ProvisioningEvent as E;
    use ProvisioningState as S;

    let next = match (state, &event) {
        (S::Initial, E::TokenRequested) => S::CreatingToken,
        (S::CreatingToken, E::TokenConfirmed { event_id, mint }) => S::TokenCreated {
            event_id: event_id.clone(),
            mint: *mint,
        },
        (S::CreatingToken, E::TokenFailed) => S::Initial,

        (S::TokenCreated { event_id, mint }, E::PoolRequested) => S::CreatingPool {
            event_id: event_id.clone(),
            mint: *mint,
        },
        (S::CreatingPool { event_id, mint }, E::PoolConfirmed { pool }) => S::PoolCreated {
            event_id: event_id.clone(),
            mint: *mint,
            pool: *pool,
        },
        (S::CreatingPool { event_id, mint }, E::PoolFailed) => S::TokenCreated {
            event_id: event_id.clone(),
            mint: *mint,
        },

        (S::PoolCreated { event_id, .. }, E::ReferenceRequested) => S::GeneratingReference {
            event_id: event_id.clone(),
        },
        (S::GeneratingReference { event_id }, E::ReferenceGenerated { claim_url }) => S::Complete {
            event_id: event_id.clone(),
            claim_url: claim_url.clone(),
        },

        _ => {
            return Err(TransitionError {
                state: state.name().to_string(),
                event: event.name().to_string(),
            })
        }
    };

    tracing::debug!(from = %state, to = %next, event = event.name(), "provisioning transition");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProvisioningEvent as E;
    use ProvisioningState as S;

    fn token_created(mint: Pubkey) -> S {
        S::TokenCreated { event_id: "event-1".into(), mint }
    }

    #[test]
    fn test_happy_path() {
        let mint = Pubkey::new_unique();
        let pool = Pubkey::new_unique();

        let s = transition(&S::Initial, E::TokenRequested).unwrap();
        assert_eq!(s, S::CreatingToken);
        let s = transition(&s, E::TokenConfirmed { event_id: "event-1".into(), mint }).unwrap();
        assert_eq!(s, token_created(mint));
        let s = transition(&s, E::PoolRequested).unwrap();
        let s = transition(&s, E::PoolConfirmed { pool }).unwrap();
        assert_eq!(s.mint(), Some(mint));
        let s = transition(&s, E::ReferenceRequested).unwrap();
        let s = transition(&s, E::ReferenceGenerated { claim_url: "https://x/claim/event-1".into() }).unwrap();

        assert!(s.is_complete());
        assert_eq!(s.event_id(), Some("event-1"));
    }

    #[test]
    fn test_token_failure_returns_to_initial() {
        let s = transition(&S::CreatingToken, E::TokenFailed).unwrap();
        assert_eq!(s, S::Initial);
    }

    #[test]
    fn test_pool_failure_keeps_token() {
        let mint = Pubkey::new_unique();
        let creating = transition(&token_created(mint), E::PoolRequested).unwrap();
        let s = transition(&creating, E::PoolFailed).unwrap();
        assert_eq!(s, token_created(mint));
    }

    #[test]
    fn test_no_skipping_steps() {
        let err = transition(&S::Initial, E::PoolRequested).unwrap_err();
        assert_eq!(err.state, "INITIAL");
        assert!(transition(&token_created(Pubkey::new_unique()), E::ReferenceRequested).is_err());
        assert!(transition(&S::Initial, E::TokenConfirmed {
            event_id: "event-1".into(),
            mint: Pubkey::new_unique(),
        })
        .is_err());
    }

    #[test]
    fn test_complete_is_terminal() {
        let done = S::Complete { event_id: "event-1".into(), claim_url: "u".into() };
        for event in [E::TokenRequested, E::PoolRequested, E::ReferenceRequested, E::PoolFailed] {
            assert!(transition(&done, event).is_err());
        }
    }

    #[test]
    fn test_stable_states() {
        assert!(S::Initial.is_stable());
        assert!(!S::CreatingToken.is_stable());
        assert!(token_created(Pubkey::new_unique()).is_stable());
        assert!(!S::GeneratingReference { event_id: "e".into() }.is_stable());
    }
}
