//! # cpop store
//!
//! Local record of what has been confirmed on-chain. The ledger stays the
//! source of truth; this store only remembers addresses and signatures so
//! flows can resume and claims can be checked without a chain scan.
//!
//! Writes happen only after the matching transaction is confirmed, except
//! for claims, which are written `pending` first and settled afterwards.

pub mod sqlite;

use cpop_core::{ClaimRecord, ClaimStatus, EventRecord, PoolRecord};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use uuid::Uuid;

pub use sqlite::SqliteStore;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A uniqueness rule refused the write
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Claim {0} not found")]
    ClaimNotFound(Uuid),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Persistence for events, pools and claims
pub trait RecordStore: Send + Sync {
    fn save_event(&self, event: &EventRecord) -> Result<()>;
    fn get_event_by_id(&self, id: &str) -> Result<Option<EventRecord>>;
    fn get_event_by_mint_address(&self, mint: &Pubkey) -> Result<Option<EventRecord>>;
    /// Newest first
    fn get_all_events(&self) -> Result<Vec<EventRecord>>;
    fn get_events_by_creator(&self, creator: &Pubkey) -> Result<Vec<EventRecord>>;

    fn save_pool(&self, pool: &PoolRecord) -> Result<()>;
    fn get_pool_by_event_id(&self, event_id: &str) -> Result<Option<PoolRecord>>;
    fn get_pool_by_mint_address(&self, mint: &Pubkey) -> Result<Option<PoolRecord>>;

    fn save_claim(&self, claim: &ClaimRecord) -> Result<()>;
    fn get_claim(&self, id: &Uuid) -> Result<Option<ClaimRecord>>;
    /// Oldest first
    fn get_claims_by_event_id(&self, event_id: &str) -> Result<Vec<ClaimRecord>>;
    fn get_claims_by_wallet(&self, wallet: &Pubkey) -> Result<Vec<ClaimRecord>>;
    fn has_wallet_claimed_event(&self, event_id: &str, wallet: &Pubkey) -> Result<bool>;

    /// Set status and error. A `None` transaction id keeps the stored one.
    fn update_claim_status(
        &self,
        id: &Uuid,
        status: ClaimStatus,
        transaction_id: Option<&Signature>,
        error: Option<&str>,
    ) -> Result<()>;

    /// Remember what was sent for a pending claim, before it is sent
    fn record_claim_submission(&self, id: &Uuid, transaction_id: &Signature, last_valid_block_height: u64)
        -> Result<()>;

    fn count_confirmed_claims(&self, event_id: &str) -> Result<u32>;
    fn get_pending_claims(&self, event_id: &str) -> Result<Vec<ClaimRecord>>;
}
