//! # cpop ledger plumbing
//!
//! ```text
//!   ENGINE
//!     │
//!     ├── token2022 / compression   build instructions (pure)
//!     ├── signer                    collect wallet approvals
//!     └── gateway + confirm         submit, then poll until settled
//!                │
//!                └── Solana JSON-RPC
//! ```
//!
//! The application never holds the organizer's or attendee's keys. The only
//! keypair created here is the throwaway one for a new mint account.

pub mod compression;
pub mod confirm;
pub mod gateway;
pub mod signer;
pub mod token2022;

use solana_sdk::program_error::ProgramError;
use solana_sdk::signature::Signature;
use std::time::Duration;

pub use compression::{CompressionProgram, Distribution, LightCompression};
pub use confirm::{check_transaction, confirm_transaction, submit_and_confirm, ConfirmOptions, TransactionState};
pub use gateway::{LatestBlockhash, LedgerGateway, RpcGateway, SendOptions, SignatureStatus};
pub use signer::{
    collect_signatures, missing_signers, ApprovalBridge, EphemeralSigner, SignRequest, SignerError,
    TransactionSigner,
};
pub use token2022::{MintPlan, TOKEN_2022_PROGRAM_ID};

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Substrings that mark a rejection as worth another attempt
const RETRYABLE_MARKERS: &[&str] = &[
    "signature verification failed",
    "simulation failed",
    "blockhash not found",
    "retryable",
];

/// Substrings that mean the account the transaction would create exists already
const ALREADY_EXISTS_MARKERS: &[&str] = &["already in use", "already registered", "already exists"];

/// Errors from ledger operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Transaction rejected: {reason}")]
    Rejected { reason: String, logs: Vec<String> },

    #[error("Transaction {0} expired before it was confirmed")]
    Expired(Signature),

    #[error("Transaction {0} not confirmed within {1:?}")]
    Timeout(Signature, Duration),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Instruction encoding failed: {0}")]
    Encoding(#[from] ProgramError),
}

impl Error {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            logs: Vec::new(),
        }
    }

    fn mentions(&self, markers: &[&str]) -> bool {
        match self {
            Self::Rejected { reason, logs } => {
                let reason = reason.to_lowercase();
                markers.iter().any(|m| {
                    reason.contains(m) || logs.iter().any(|l| l.to_lowercase().contains(m))
                })
            }
            _ => false,
        }
    }

    /// Worth submitting again with a fresh blockhash
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Expired(_) | Self::Timeout(..) => true,
            Self::Rejected { .. } => self.mentions(RETRYABLE_MARKERS),
            Self::InvalidAddress(_) | Self::Encoding(_) => false,
        }
    }

    /// The program refused because the target account already exists
    pub fn is_already_exists(&self) -> bool {
        self.mentions(ALREADY_EXISTS_MARKERS)
    }

    /// Outcome unknown: the transaction may still land
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout(..))
    }

    /// Signature the error refers to, if any
    pub fn signature(&self) -> Option<Signature> {
        match self {
            Self::Expired(sig) | Self::Timeout(sig, _) => Some(*sig),
            _ => None,
        }
    }

    pub fn logs(&self) -> &[String] {
        match self {
            Self::Rejected { logs, .. } => logs,
            _ => &[],
        }
    }
}
