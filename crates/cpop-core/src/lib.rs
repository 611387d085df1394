//! # cpop core
//!
//! Domain model for compressed proof-of-participation event tokens.
//!
//! ```text
//! ORGANIZER FORM
//!       │
//!       └── EventDetails (validated here, never reaches the ledger invalid)
//!               │
//!               ├── EventRecord   (mint exists on-chain)
//!               │       │
//!               │       └── PoolRecord   (mint registered for compression)
//!               │
//!               └── ClaimReference  ──QR──►  attendee  ──►  ClaimRecord
//! ```
//!
//! The ledger-facing and persistence crates build on the types defined here;
//! nothing in this crate talks to the network.

pub mod config;
pub mod details;
pub mod provisioning;
pub mod records;
pub mod reference;
pub mod retry;

pub use config::{CompressionConfig, CpopConfig, Network, RetrySettings};
pub use details::{EventDetails, TokenMetadataFields, ValidationError, ValidationIssue};
pub use provisioning::{ProvisioningEvent, ProvisioningState, TransitionError};
pub use records::{new_event_id, ClaimRecord, ClaimStatus, EventRecord, PoolRecord};
pub use reference::{ClaimReference, ReferenceError};
pub use retry::{Backoff, RetryPolicy};

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
