//! Persisted record types
//!
//! Three tables, related by explicit `event_id` foreign keys:
//!
//! ```text
//! EventRecord (1) ──── (0..1) PoolRecord
//!      │
//!      └────────────── (0..n) ClaimRecord   at most one `confirmed` per wallet
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::details::EventDetails;

/// Fresh event id, usable before anything lands on-chain
pub fn new_event_id() -> String {
    format!("event-{}", Uuid::new_v4().simple())
}

/// An event whose mint was confirmed on-chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub mint_address: Pubkey,
    pub creator: Pubkey,
    pub transaction_id: Signature,
    pub created_at: DateTime<Utc>,
    pub details: EventDetails,
}

/// Compression registration for an event's mint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub event_id: String,
    pub mint_address: Pubkey,
    pub pool_address: Pubkey,
    pub state_tree_address: Pubkey,
    /// Absent when the registration was found already in place
    pub transaction_id: Option<Signature>,
    pub created_at: DateTime<Utc>,
}

/// Claim lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Confirmed,
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown claim status '{}'", other)),
        }
    }
}

/// One claim attempt by one wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: Uuid,
    pub event_id: String,
    pub wallet_address: Pubkey,
    pub transaction_id: Option<Signature>,
    /// Block height after which the submitted transaction can no longer land
    pub last_valid_block_height: Option<u64>,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ClaimRecord {
    /// A new attempt, before anything is signed
    pub fn pending(event_id: impl Into<String>, wallet_address: Pubkey) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            event_id: event_id.into(),
            wallet_address,
            transaction_id: None,
            last_valid_block_height: None,
            status: ClaimStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == ClaimStatus::Confirmed
    }
}
