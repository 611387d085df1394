//! # cpop engines
//!
//! ```text
//!   ProvisioningSession ── ProvisioningEngine
//!        (state machine)     create_event ─► create_pool ─► finalize
//!                                 │               │             │
//!                                 ▼               ▼             ▼
//!                               mint           pool       claim url
//!
//!   ClaimEngine
//!     guard ─► already claimed? ─► reconcile pending ─► capacity
//!           ─► pending record ─► sign ─► submit ─► confirm ─► settle
//! ```
//!
//! Every ledger step is confirmed before it is persisted. A step that fails
//! leaves the results of earlier steps valid and reusable.

pub mod claim;
pub mod provisioning;

#[cfg(test)]
pub(crate) mod testing;

use cpop_core::{ReferenceError, TransitionError, ValidationError};
use cpop_ledger::SignerError;
use cpop_store::StoreError;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::fmt;

pub use claim::{ClaimEngine, ClaimOutcome, ReconcileReport};
pub use provisioning::{CreatedEvent, CreatedPool, PendingToken, ProvisioningEngine, ProvisioningSession};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// The ledger-facing step an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    CreateToken,
    CreatePool,
    GenerateReference,
    Claim,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateToken => "token creation",
            Self::CreatePool => "pool registration",
            Self::GenerateReference => "claim link",
            Self::Claim => "claim",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Wallet not connected")]
    NotConnected,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{step}: cancelled in wallet ({reason})")]
    UserAbort { step: Step, reason: String },

    #[error("{step}: no confirmation from the network ({reason})")]
    NetworkTimeout {
        step: Step,
        /// Submitted transaction whose fate is unknown
        signature: Option<Signature>,
        reason: String,
    },

    /// The token transaction was sent but not seen confirmed. It may still
    /// land; settle it with `ProvisioningEngine::confirm_token`.
    #[error("token creation: transaction {} not confirmed yet ({reason})", .pending.signature)]
    TokenUnconfirmed {
        pending: Box<PendingToken>,
        reason: String,
    },

    #[error("{step}: rejected by the ledger: {reason}")]
    LedgerRejection {
        step: Step,
        reason: String,
        logs: Vec<String>,
        retryable: bool,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("A claim for this wallet is already in progress")]
    InFlight,

    #[error("All {0} tokens for this event have been claimed")]
    CapacityReached(u32),

    #[error("Mint authority {0} must co-sign, but no authority signer is configured")]
    MissingAuthority(Pubkey),

    #[error("{step}: signer failed: {source}")]
    SignerFailure { step: Step, source: SignerError },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn from_ledger(step: Step, err: cpop_ledger::Error) -> Self {
        use cpop_ledger::Error as L;

        let retryable = err.is_retryable();
        match err {
            L::Transport(reason) => Self::NetworkTimeout {
                step,
                signature: None,
                reason,
            },
            L::Timeout(signature, after) => Self::NetworkTimeout {
                step,
                signature: Some(signature),
                reason: format!("not confirmed within {:?}", after),
            },
            L::Expired(signature) => Self::LedgerRejection {
                step,
                reason: format!("transaction {} expired before it landed", signature),
                logs: Vec::new(),
                retryable,
            },
            L::Rejected { reason, logs } => Self::LedgerRejection {
                step,
                reason,
                logs,
                retryable,
            },
            L::InvalidAddress(address) => Self::Config(format!("invalid address {}", address)),
            L::Encoding(err) => Self::Config(format!("cannot encode instruction: {}", err)),
        }
    }

    /// Like [`Self::from_ledger`], for errors from submitting `signature`.
    /// A transport failure while sending leaves the outcome unknown.
    pub(crate) fn from_submission(step: Step, signature: Signature, err: cpop_ledger::Error) -> Self {
        match err {
            cpop_ledger::Error::Transport(reason) => Self::NetworkTimeout {
                step,
                signature: Some(signature),
                reason,
            },
            err => Self::from_ledger(step, err),
        }
    }

    pub(crate) fn from_signer(step: Step, err: SignerError) -> Self {
        match err {
            SignerError::Rejected(reason) => Self::UserAbort { step, reason },
            source => Self::SignerFailure { step, source },
        }
    }

    /// Where in the flow this happened
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::UserAbort { step, .. }
            | Self::NetworkTimeout { step, .. }
            | Self::LedgerRejection { step, .. }
            | Self::SignerFailure { step, .. } => Some(*step),
            Self::TokenUnconfirmed { .. } => Some(Step::CreateToken),
            _ => None,
        }
    }

    /// Trying the same operation again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkTimeout { .. } | Self::InFlight => true,
            Self::LedgerRejection { retryable, .. } => *retryable,
            Self::SignerFailure { source, .. } => matches!(source, SignerError::Disconnected),
            _ => false,
        }
    }

    /// Outcome on-chain is unknown; check before resubmitting
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout { signature: Some(_), .. } | Self::TokenUnconfirmed { .. }
        )
    }

    /// The signature worth looking up in an explorer, if any
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::NetworkTimeout { signature, .. } => *signature,
            Self::TokenUnconfirmed { pending, .. } => Some(pending.signature),
            _ => None,
        }
    }

    /// The token that may still land, for `ProvisioningEngine::confirm_token`
    pub fn pending_token(&self) -> Option<&PendingToken> {
        match self {
            Self::TokenUnconfirmed { pending, .. } => Some(pending),
            _ => None,
        }
    }

    pub fn logs(&self) -> &[String] {
        match self {
            Self::LedgerRejection { logs, .. } => logs,
            _ => &[],
        }
    }

    /// What the user can do next
    pub fn recovery_hint(&self) -> String {
        let kept = match self.step() {
            Some(Step::CreatePool) | Some(Step::GenerateReference) => {
                " Your event token was created and saved; continue from this step."
            }
            _ => "",
        };
        let action = match self {
            Self::NotConnected => "Connect your wallet and try again.".to_string(),
            Self::Validation(_) => "Fix the highlighted fields and submit again.".to_string(),
            Self::UserAbort { .. } => "You cancelled in your wallet. Try again when ready.".to_string(),
            Self::NetworkTimeout {
                signature: Some(sig), ..
            } => format!(
                "Transaction {} may still land. Check its status before trying again.",
                sig
            ),
            Self::NetworkTimeout { .. } => "The network did not respond. Try again.".to_string(),
            Self::TokenUnconfirmed { pending, .. } => format!(
                "Token transaction {} may still land. Check it before creating the event again.",
                pending.signature
            ),
            Self::LedgerRejection { retryable: true, .. } => "Try again in a moment.".to_string(),
            Self::LedgerRejection { .. } => {
                "The transaction was rejected. Check your balance and the logs.".to_string()
            }
            Self::NotFound(_) => "Check the claim link or event id.".to_string(),
            Self::InFlight => "Wait for the claim already in progress to finish.".to_string(),
            Self::CapacityReached(_) => "Contact the organizer.".to_string(),
            Self::MissingAuthority(_) => "The organizer must configure the mint authority signer.".to_string(),
            Self::SignerFailure { .. } => "Reconnect your wallet and try again.".to_string(),
            Self::InvalidTransition(_) => "Resume the event from its saved state.".to_string(),
            Self::Reference(_) => "Scan the QR code again or enter the event id.".to_string(),
            Self::Store(_) | Self::Config(_) => "Check the local configuration and database.".to_string(),
        };
        format!("{}{}", action, kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_keeps_signature() {
        let sig = Signature::new_unique();
        let err = Error::from_ledger(Step::Claim, cpop_ledger::Error::Timeout(sig, Duration::from_secs(60)));
        assert!(err.is_indeterminate());
        assert!(err.is_retryable());
        assert_eq!(err.signature(), Some(sig));
        assert_eq!(err.step(), Some(Step::Claim));
        assert!(err.recovery_hint().contains(&sig.to_string()));
    }

    #[test]
    fn test_short_timeout_reads_in_millis() {
        let err = Error::from_ledger(
            Step::Claim,
            cpop_ledger::Error::Timeout(Signature::new_unique(), Duration::from_millis(30)),
        );
        assert!(err.to_string().contains("within 30ms"), "{}", err);
    }

    #[test]
    fn test_send_transport_failure_is_indeterminate() {
        let sig = Signature::new_unique();
        let err = Error::from_submission(Step::Claim, sig, cpop_ledger::Error::Transport("reset".into()));
        assert!(err.is_indeterminate());
        assert!(!Error::from_ledger(Step::Claim, cpop_ledger::Error::Transport("reset".into())).is_indeterminate());
    }

    #[test]
    fn test_wallet_rejection_is_user_abort() {
        let err = Error::from_signer(Step::CreateToken, SignerError::Rejected("User rejected".into()));
        assert!(matches!(err, Error::UserAbort { step: Step::CreateToken, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rejection_carries_logs_and_retryability() {
        let err = Error::from_ledger(
            Step::CreatePool,
            cpop_ledger::Error::Rejected {
                reason: "Transaction simulation failed: Blockhash not found".into(),
                logs: vec!["Program log: hi".into()],
            },
        );
        assert!(err.is_retryable());
        assert_eq!(err.logs().len(), 1);
        assert!(err.recovery_hint().contains("token was created"));

        let err = Error::from_ledger(Step::CreateToken, cpop_ledger::Error::rejected("insufficient lamports"));
        assert!(!err.is_retryable());
    }
}
