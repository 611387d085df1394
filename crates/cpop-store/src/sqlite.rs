//! SQLite-backed record store

use chrono::{DateTime, Utc};
use cpop_core::{ClaimRecord, ClaimStatus, EventDetails, EventRecord, PoolRecord};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::{RecordStore, Result, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id              TEXT PRIMARY KEY,
    mint_address    TEXT NOT NULL UNIQUE,
    creator         TEXT NOT NULL,
    transaction_id  TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    details         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_creator ON events(creator);

CREATE TABLE IF NOT EXISTS pools (
    event_id            TEXT PRIMARY KEY REFERENCES events(id),
    mint_address        TEXT NOT NULL UNIQUE,
    pool_address        TEXT NOT NULL,
    state_tree_address  TEXT NOT NULL,
    transaction_id      TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS claims (
    id                       TEXT PRIMARY KEY,
    event_id                 TEXT NOT NULL REFERENCES events(id),
    wallet_address           TEXT NOT NULL,
    transaction_id           TEXT,
    last_valid_block_height  INTEGER,
    status                   TEXT NOT NULL CHECK (status IN ('pending', 'confirmed', 'failed')),
    created_at               TEXT NOT NULL,
    updated_at               TEXT NOT NULL,
    error                    TEXT
);
CREATE INDEX IF NOT EXISTS idx_claims_event ON claims(event_id, status);
CREATE INDEX IF NOT EXISTS idx_claims_wallet ON claims(wallet_address);
CREATE UNIQUE INDEX IF NOT EXISTS idx_claims_one_confirmed
    ON claims(event_id, wallet_address) WHERE status = 'confirmed';
"#;

const EVENT_COLUMNS: &str = "id, mint_address, creator, transaction_id, created_at, details";
const POOL_COLUMNS: &str =
    "event_id, mint_address, pool_address, state_tree_address, transaction_id, created_at";
const CLAIM_COLUMNS: &str = "id, event_id, wallet_address, transaction_id, last_valid_block_height, \
                             status, created_at, updated_at, error";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        tracing::debug!(path = %path.display(), "opening record store");
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn query_events(&self, sql: &str, param: Option<String>) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = match param {
            Some(p) => stmt.query_map(params![p], event_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt.query_map([], event_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?,
        };
        Ok(rows)
    }

    fn query_claims(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<ClaimRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let claims = stmt
            .query_map(args, claim_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(claims)
    }
}

impl RecordStore for SqliteStore {
    fn save_event(&self, event: &EventRecord) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        self.conn()?
            .execute(
                &format!("INSERT INTO events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", EVENT_COLUMNS),
                params![
                    event.id,
                    event.mint_address.to_string(),
                    event.creator.to_string(),
                    event.transaction_id.to_string(),
                    event.created_at,
                    details,
                ],
            )
            .map_err(|e| duplicate(e, || format!("event {}", event.id)))?;
        tracing::debug!(event_id = %event.id, mint = %event.mint_address, "event saved");
        Ok(())
    }

    fn get_event_by_id(&self, id: &str) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
                params![id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn get_event_by_mint_address(&self, mint: &Pubkey) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {} FROM events WHERE mint_address = ?1", EVENT_COLUMNS),
                params![mint.to_string()],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    fn get_all_events(&self) -> Result<Vec<EventRecord>> {
        self.query_events(
            &format!("SELECT {} FROM events ORDER BY created_at DESC", EVENT_COLUMNS),
            None,
        )
    }

    fn get_events_by_creator(&self, creator: &Pubkey) -> Result<Vec<EventRecord>> {
        self.query_events(
            &format!(
                "SELECT {} FROM events WHERE creator = ?1 ORDER BY created_at DESC",
                EVENT_COLUMNS
            ),
            Some(creator.to_string()),
        )
    }

    fn save_pool(&self, pool: &PoolRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO pools ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", POOL_COLUMNS),
                params![
                    pool.event_id,
                    pool.mint_address.to_string(),
                    pool.pool_address.to_string(),
                    pool.state_tree_address.to_string(),
                    pool.transaction_id.map(|s| s.to_string()),
                    pool.created_at,
                ],
            )
            .map_err(|e| duplicate(e, || format!("pool for event {}", pool.event_id)))?;
        tracing::debug!(event_id = %pool.event_id, pool = %pool.pool_address, "pool saved");
        Ok(())
    }

    fn get_pool_by_event_id(&self, event_id: &str) -> Result<Option<PoolRecord>> {
        let conn = self.conn()?;
        let pool = conn
            .query_row(
                &format!("SELECT {} FROM pools WHERE event_id = ?1", POOL_COLUMNS),
                params![event_id],
                pool_from_row,
            )
            .optional()?;
        Ok(pool)
    }

    fn get_pool_by_mint_address(&self, mint: &Pubkey) -> Result<Option<PoolRecord>> {
        let conn = self.conn()?;
        let pool = conn
            .query_row(
                &format!("SELECT {} FROM pools WHERE mint_address = ?1", POOL_COLUMNS),
                params![mint.to_string()],
                pool_from_row,
            )
            .optional()?;
        Ok(pool)
    }

    fn save_claim(&self, claim: &ClaimRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!(
                    "INSERT INTO claims ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    CLAIM_COLUMNS
                ),
                params![
                    claim.id.to_string(),
                    claim.event_id,
                    claim.wallet_address.to_string(),
                    claim.transaction_id.map(|s| s.to_string()),
                    claim.last_valid_block_height.map(|h| h as i64),
                    claim.status.as_str(),
                    claim.created_at,
                    claim.updated_at,
                    claim.error,
                ],
            )
            .map_err(|e| {
                duplicate(e, || {
                    format!("claim by {} for event {}", claim.wallet_address, claim.event_id)
                })
            })?;
        Ok(())
    }

    fn get_claim(&self, id: &Uuid) -> Result<Option<ClaimRecord>> {
        let conn = self.conn()?;
        let claim = conn
            .query_row(
                &format!("SELECT {} FROM claims WHERE id = ?1", CLAIM_COLUMNS),
                params![id.to_string()],
                claim_from_row,
            )
            .optional()?;
        Ok(claim)
    }

    fn get_claims_by_event_id(&self, event_id: &str) -> Result<Vec<ClaimRecord>> {
        self.query_claims(
            &format!(
                "SELECT {} FROM claims WHERE event_id = ?1 ORDER BY created_at ASC",
                CLAIM_COLUMNS
            ),
            &[&event_id],
        )
    }

    fn get_claims_by_wallet(&self, wallet: &Pubkey) -> Result<Vec<ClaimRecord>> {
        self.query_claims(
            &format!(
                "SELECT {} FROM claims WHERE wallet_address = ?1 ORDER BY created_at ASC",
                CLAIM_COLUMNS
            ),
            &[&wallet.to_string()],
        )
    }

    fn has_wallet_claimed_event(&self, event_id: &str, wallet: &Pubkey) -> Result<bool> {
        let conn = self.conn()?;
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM claims \
             WHERE event_id = ?1 AND wallet_address = ?2 AND status = 'confirmed')",
            params![event_id, wallet.to_string()],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn update_claim_status(
        &self,
        id: &Uuid,
        status: ClaimStatus,
        transaction_id: Option<&Signature>,
        error: Option<&str>,
    ) -> Result<()> {
        let updated = self
            .conn()?
            .execute(
                "UPDATE claims SET status = ?1, transaction_id = COALESCE(?2, transaction_id), \
                 error = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    status.as_str(),
                    transaction_id.map(|s| s.to_string()),
                    error,
                    Utc::now(),
                    id.to_string(),
                ],
            )
            .map_err(|e| duplicate(e, || format!("confirmed claim {}", id)))?;
        if updated == 0 {
            return Err(StoreError::ClaimNotFound(*id));
        }
        tracing::debug!(claim_id = %id, %status, "claim status updated");
        Ok(())
    }

    fn record_claim_submission(
        &self,
        id: &Uuid,
        transaction_id: &Signature,
        last_valid_block_height: u64,
    ) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE claims SET transaction_id = ?1, last_valid_block_height = ?2, updated_at = ?3 \
             WHERE id = ?4",
            params![
                transaction_id.to_string(),
                last_valid_block_height as i64,
                Utc::now(),
                id.to_string(),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::ClaimNotFound(*id));
        }
        Ok(())
    }

    fn count_confirmed_claims(&self, event_id: &str) -> Result<u32> {
        let conn = self.conn()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM claims WHERE event_id = ?1 AND status = 'confirmed'",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn get_pending_claims(&self, event_id: &str) -> Result<Vec<ClaimRecord>> {
        self.query_claims(
            &format!(
                "SELECT {} FROM claims WHERE event_id = ?1 AND status = 'pending' ORDER BY created_at ASC",
                CLAIM_COLUMNS
            ),
            &[&event_id],
        )
    }
}

fn duplicate(err: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(what())
        }
        _ => StoreError::Sqlite(err),
    }
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn parse_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion(idx, e))
}

fn parse_opt_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let text: Option<String> = row.get(idx)?;
    text.map(|t| t.parse().map_err(|e| conversion(idx, e))).transpose()
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    let details: String = row.get(5)?;
    let details: EventDetails = serde_json::from_str(&details).map_err(|e| conversion(5, e))?;
    Ok(EventRecord {
        id: row.get(0)?,
        mint_address: parse_at(row, 1)?,
        creator: parse_at(row, 2)?,
        transaction_id: parse_at(row, 3)?,
        created_at: row.get::<_, DateTime<Utc>>(4)?,
        details,
    })
}

fn pool_from_row(row: &Row<'_>) -> rusqlite::Result<PoolRecord> {
    Ok(PoolRecord {
        event_id: row.get(0)?,
        mint_address: parse_at(row, 1)?,
        pool_address: parse_at(row, 2)?,
        state_tree_address: parse_at(row, 3)?,
        transaction_id: parse_opt_at(row, 4)?,
        created_at: row.get(5)?,
    })
}

fn claim_from_row(row: &Row<'_>) -> rusqlite::Result<ClaimRecord> {
    let height: Option<i64> = row.get(4)?;
    Ok(ClaimRecord {
        id: parse_at(row, 0)?,
        event_id: row.get(1)?,
        wallet_address: parse_at(row, 2)?,
        transaction_id: parse_opt_at(row, 3)?,
        last_valid_block_height: height.map(|h| h as u64),
        status: parse_at(row, 5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        error: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn event(creator: Pubkey) -> EventRecord {
        EventRecord {
            id: cpop_core::new_event_id(),
            mint_address: Pubkey::new_unique(),
            creator,
            transaction_id: Signature::new_unique(),
            created_at: Utc::now(),
            details: EventDetails {
                title: "Hackathon".into(),
                symbol: "HACK".into(),
                attendee_count: 50,
                ..EventDetails::default()
            },
        }
    }

    fn pool(event: &EventRecord) -> PoolRecord {
        PoolRecord {
            event_id: event.id.clone(),
            mint_address: event.mint_address,
            pool_address: Pubkey::new_unique(),
            state_tree_address: Pubkey::new_unique(),
            transaction_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_round_trip_and_lookups() {
        let store = SqliteStore::in_memory().unwrap();
        let creator = Pubkey::new_unique();
        let e = event(creator);
        store.save_event(&e).unwrap();

        assert_eq!(store.get_event_by_id(&e.id).unwrap(), Some(e.clone()));
        assert_eq!(store.get_event_by_mint_address(&e.mint_address).unwrap(), Some(e.clone()));
        assert_eq!(store.get_events_by_creator(&creator).unwrap().len(), 1);
        assert!(store.get_events_by_creator(&Pubkey::new_unique()).unwrap().is_empty());
        assert!(store.get_event_by_id("event-missing").unwrap().is_none());
    }

    #[test]
    fn test_events_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        let creator = Pubkey::new_unique();
        let mut older = event(creator);
        older.created_at = Utc::now() - ChronoDuration::hours(1);
        let newer = event(creator);
        store.save_event(&older).unwrap();
        store.save_event(&newer).unwrap();

        let ids: Vec<String> = store.get_all_events().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }

    #[test]
    fn test_duplicate_event_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let e = event(Pubkey::new_unique());
        store.save_event(&e).unwrap();
        assert!(matches!(store.save_event(&e), Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn test_pool_lookups() {
        let store = SqliteStore::in_memory().unwrap();
        let e = event(Pubkey::new_unique());
        store.save_event(&e).unwrap();
        let p = pool(&e);
        store.save_pool(&p).unwrap();

        assert_eq!(store.get_pool_by_event_id(&e.id).unwrap(), Some(p.clone()));
        assert_eq!(store.get_pool_by_mint_address(&e.mint_address).unwrap(), Some(p.clone()));
        assert!(matches!(store.save_pool(&p), Err(StoreError::Duplicate(_))));
    }

    #[test]
    fn test_claim_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let e = event(Pubkey::new_unique());
        store.save_event(&e).unwrap();

        let wallet = Pubkey::new_unique();
        let claim = ClaimRecord::pending(&e.id, wallet);
        store.save_claim(&claim).unwrap();
        assert!(!store.has_wallet_claimed_event(&e.id, &wallet).unwrap());
        assert_eq!(store.get_pending_claims(&e.id).unwrap().len(), 1);

        let sig = Signature::new_unique();
        store.record_claim_submission(&claim.id, &sig, 1_234).unwrap();
        store
            .update_claim_status(&claim.id, ClaimStatus::Confirmed, None, None)
            .unwrap();

        let stored = store.get_claim(&claim.id).unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Confirmed);
        // COALESCE keeps the signature recorded at submission
        assert_eq!(stored.transaction_id, Some(sig));
        assert_eq!(stored.last_valid_block_height, Some(1_234));
        assert!(store.has_wallet_claimed_event(&e.id, &wallet).unwrap());
        assert_eq!(store.count_confirmed_claims(&e.id).unwrap(), 1);
        assert!(store.get_pending_claims(&e.id).unwrap().is_empty());
        assert_eq!(store.get_claims_by_wallet(&wallet).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_claim_keeps_error() {
        let store = SqliteStore::in_memory().unwrap();
        let e = event(Pubkey::new_unique());
        store.save_event(&e).unwrap();
        let claim = ClaimRecord::pending(&e.id, Pubkey::new_unique());
        store.save_claim(&claim).unwrap();

        store
            .update_claim_status(&claim.id, ClaimStatus::Failed, None, Some("User rejected"))
            .unwrap();
        let stored = store.get_claim(&claim.id).unwrap().unwrap();
        assert_eq!(stored.status, ClaimStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("User rejected"));
        assert!(stored.transaction_id.is_none());
    }

    #[test]
    fn test_second_confirmed_claim_refused() {
        let store = SqliteStore::in_memory().unwrap();
        let e = event(Pubkey::new_unique());
        store.save_event(&e).unwrap();
        let wallet = Pubkey::new_unique();

        let first = ClaimRecord::pending(&e.id, wallet);
        let second = ClaimRecord::pending(&e.id, wallet);
        store.save_claim(&first).unwrap();
        store.save_claim(&second).unwrap();

        store.update_claim_status(&first.id, ClaimStatus::Confirmed, None, None).unwrap();
        let err = store
            .update_claim_status(&second.id, ClaimStatus::Confirmed, None, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.count_confirmed_claims(&e.id).unwrap(), 1);
    }

    #[test]
    fn test_unknown_claim_update() {
        let store = SqliteStore::in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.update_claim_status(&id, ClaimStatus::Failed, None, None),
            Err(StoreError::ClaimNotFound(_))
        ));
    }

    #[test]
    fn test_claim_requires_event() {
        let store = SqliteStore::in_memory().unwrap();
        let claim = ClaimRecord::pending("event-unknown", Pubkey::new_unique());
        assert!(store.save_claim(&claim).is_err());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.sqlite3");
        let e = event(Pubkey::new_unique());
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_event(&e).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_event_by_id(&e.id).unwrap(), Some(e));
    }
}
