//! Test doubles shared by the engine tests

use async_trait::async_trait;
use cpop_core::{CpopConfig, EventDetails, RetryPolicy};
use cpop_ledger::{
    ConfirmOptions, LatestBlockhash, LedgerGateway, LightCompression, Result as LedgerResult, SendOptions,
    SignatureStatus, SignerError, TransactionSigner,
};
use cpop_store::SqliteStore;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ClaimEngine, ProvisioningEngine};

pub(crate) const LAST_VALID_BLOCK_HEIGHT: u64 = 1_000;

/// What the next `send_transaction` call does
pub(crate) enum SendScript {
    /// Accepted and confirmed right away
    Accept,
    /// Accepted, never seen again
    Drop,
    Reject(cpop_ledger::Error),
}

/// In-memory ledger. Sends follow the script, then accept by default.
#[derive(Default)]
pub(crate) struct MockGateway {
    script: Mutex<VecDeque<SendScript>>,
    sent: Mutex<Vec<Transaction>>,
    landed: Mutex<HashSet<Signature>>,
    unreachable: Mutex<HashSet<Signature>>,
    attempts: AtomicUsize,
    block_height: AtomicU64,
}

impl MockGateway {
    pub(crate) fn script(&self, steps: Vec<SendScript>) {
        self.script.lock().unwrap().extend(steps);
    }

    /// Transactions that reached the cluster, dropped ones included
    pub(crate) fn sent(&self) -> Vec<Transaction> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// A dropped transaction turns up after all
    pub(crate) fn land(&self, signature: Signature) {
        self.landed.lock().unwrap().insert(signature);
    }

    /// Status lookups for this signature fail at the transport
    pub(crate) fn fail_status(&self, signature: Signature) {
        self.unreachable.lock().unwrap().insert(signature);
    }

    pub(crate) fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerGateway for MockGateway {
    async fn latest_blockhash(&self) -> LedgerResult<LatestBlockhash> {
        Ok(LatestBlockhash {
            blockhash: Hash::new_unique(),
            last_valid_block_height: LAST_VALID_BLOCK_HEIGHT,
        })
    }

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize) -> LedgerResult<u64> {
        Ok((data_len as u64 + 128) * 6_960)
    }

    async fn send_transaction(&self, transaction: &Transaction, _options: SendOptions) -> LedgerResult<Signature> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if transaction.verify().is_err() {
            return Err(cpop_ledger::Error::rejected(
                "Transaction signature verification failure",
            ));
        }

        let step = self.script.lock().unwrap().pop_front().unwrap_or(SendScript::Accept);
        let signature = transaction.signatures[0];
        match step {
            SendScript::Reject(err) => Err(err),
            SendScript::Accept => {
                self.sent.lock().unwrap().push(transaction.clone());
                self.land(signature);
                Ok(signature)
            }
            SendScript::Drop => {
                self.sent.lock().unwrap().push(transaction.clone());
                Ok(signature)
            }
        }
    }

    async fn signature_status(&self, signature: &Signature) -> LedgerResult<Option<SignatureStatus>> {
        if self.unreachable.lock().unwrap().contains(signature) {
            return Err(cpop_ledger::Error::Transport("connection reset".into()));
        }
        Ok(self.landed.lock().unwrap().contains(signature).then(|| SignatureStatus {
            slot: 1,
            err: None,
            confirmed: true,
        }))
    }

    async fn block_height(&self) -> LedgerResult<u64> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }
}

/// A wallet whose user always says no
pub(crate) struct RejectingSigner {
    pubkey: Pubkey,
}

impl RejectingSigner {
    pub(crate) fn new() -> Self {
        Self {
            pubkey: Pubkey::new_unique(),
        }
    }
}

#[async_trait]
impl TransactionSigner for RejectingSigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    async fn sign_transaction(&self, _transaction: Transaction) -> Result<Transaction, SignerError> {
        Err(SignerError::Rejected("User rejected the request".into()))
    }
}

pub(crate) fn hackathon() -> EventDetails {
    EventDetails {
        title: "Hackathon".into(),
        location: "Lisbon".into(),
        date: "2026-11-14".into(),
        time: "09:30".into(),
        description: "48 hours of building".into(),
        attendee_count: 50,
        symbol: "HACK".into(),
        decimals: 0,
        image_url: "https://img.example/hackathon.png".into(),
    }
}

/// Both engines over one mock ledger and one in-memory store
pub(crate) struct Harness {
    pub(crate) gateway: Arc<MockGateway>,
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) organizer: Arc<cpop_ledger::EphemeralSigner>,
    pub(crate) provisioning: ProvisioningEngine,
    pub(crate) claims: ClaimEngine,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let gateway = Arc::new(MockGateway::default());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let compression = Arc::new(LightCompression::from_config(&Default::default()).unwrap());
        let organizer = Arc::new(cpop_ledger::EphemeralSigner::new());

        let confirm = ConfirmOptions {
            timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
        };
        let config = CpopConfig::default();

        let provisioning = ProvisioningEngine::new(gateway.clone(), store.clone(), compression.clone(), config.clone())
            .with_confirm_options(confirm)
            .with_pool_retry(RetryPolicy::new(2, Duration::ZERO, cpop_core::Backoff::Fixed));
        let claims = ClaimEngine::new(gateway.clone(), store.clone(), compression, config)
            .with_authority(organizer.clone())
            .with_confirm_options(confirm);

        Self {
            gateway,
            store,
            organizer,
            provisioning,
            claims,
        }
    }

    /// An event that went through token and pool steps
    pub(crate) async fn provisioned(&self, details: &EventDetails) -> String {
        let organizer = self.organizer.pubkey();
        let created = self
            .provisioning
            .create_event(details, &organizer, Some(&*self.organizer))
            .await
            .unwrap();
        self.provisioning
            .create_pool(&created.mint_address, &organizer, Some(&*self.organizer))
            .await
            .unwrap();
        created.event_id
    }
}
