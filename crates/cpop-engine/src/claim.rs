//! Claim engine
//!
//! One wallet, one token per event. The store's confirmed record is the
//! duplicate check; a pending record that carries a signature is settled
//! against the ledger before anything new is submitted, so an earlier claim
//! whose confirmation timed out is never submitted a second time.

use cpop_core::{ClaimRecord, ClaimReference, ClaimStatus, CpopConfig, EventRecord};
use cpop_ledger::{
    check_transaction, collect_signatures, missing_signers, submit_and_confirm, CompressionProgram,
    ConfirmOptions, Distribution, LedgerGateway, SendOptions, TransactionSigner, TransactionState,
};
use cpop_store::RecordStore;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use crate::provisioning::connected;
use crate::{Error, Result, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { transaction_id: Signature },
    AlreadyClaimed,
}

/// What a reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub failed: usize,
    /// Still unknown, or owned by a claim running right now
    pub unresolved: usize,
}

/// Ledger verdict on a pending claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Confirmed,
    Failed,
    Unknown,
}

type ClaimKey = (String, Pubkey);

/// Marks an (event, wallet) pair as being claimed until dropped
struct InFlightGuard<'a> {
    claims: &'a Mutex<HashSet<ClaimKey>>,
    key: ClaimKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(claims: &'a Mutex<HashSet<ClaimKey>>, event_id: &str, wallet: &Pubkey) -> Result<Self> {
        let key = (event_id.to_string(), *wallet);
        let inserted = claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        if !inserted {
            return Err(Error::InFlight);
        }
        Ok(Self { claims, key })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct ClaimEngine {
    gateway: Arc<dyn LedgerGateway>,
    store: Arc<dyn RecordStore>,
    compression: Arc<dyn CompressionProgram>,
    config: CpopConfig,
    confirm: ConfirmOptions,
    /// Co-signer for programs that need the mint authority on every mint
    authority: Option<Arc<dyn TransactionSigner>>,
    in_flight: Mutex<HashSet<ClaimKey>>,
}

impl ClaimEngine {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        store: Arc<dyn RecordStore>,
        compression: Arc<dyn CompressionProgram>,
        config: CpopConfig,
    ) -> Self {
        let confirm = ConfirmOptions {
            timeout: config.confirm_timeout(),
            poll_interval: config.confirm_poll_interval(),
        };
        Self {
            gateway,
            store,
            compression,
            config,
            confirm,
            authority: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_authority(mut self, authority: Arc<dyn TransactionSigner>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_confirm_options(mut self, confirm: ConfirmOptions) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn config(&self) -> &CpopConfig {
        &self.config
    }

    /// Has this wallet a confirmed claim for the event
    pub fn get_claim_status(&self, event_id: &str, wallet: &Pubkey) -> Result<bool> {
        Ok(self.store.has_wallet_claimed_event(event_id, wallet)?)
    }

    /// Claim straight from whatever the scanner decoded
    pub async fn claim_scanned(
        &self,
        payload: &str,
        wallet: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<ClaimOutcome> {
        let reference = ClaimReference::parse(payload)?;
        self.claim(reference.event_id(), wallet, signer).await
    }

    pub async fn claim(
        &self,
        event_id: &str,
        wallet: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<ClaimOutcome> {
        let signer = connected(signer, wallet)?;
        let _guard = InFlightGuard::acquire(&self.in_flight, event_id, wallet)?;

        if self.store.has_wallet_claimed_event(event_id, wallet)? {
            tracing::info!(%event_id, %wallet, "already claimed");
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let earlier: Vec<ClaimRecord> = self
            .store
            .get_claims_by_wallet(wallet)?
            .into_iter()
            .filter(|c| c.event_id == event_id && c.status == ClaimStatus::Pending)
            .collect();
        for pending in &earlier {
            match self.settle(pending).await? {
                Settlement::Confirmed => return Ok(ClaimOutcome::AlreadyClaimed),
                Settlement::Failed => {}
                Settlement::Unknown => {
                    return Err(Error::NetworkTimeout {
                        step: Step::Claim,
                        signature: pending.transaction_id,
                        reason: "an earlier claim is still unconfirmed".into(),
                    })
                }
            }
        }

        let event = self
            .store
            .get_event_by_id(event_id)?
            .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))?;
        if self.store.get_pool_by_event_id(event_id)?.is_none() {
            return Err(Error::NotFound(format!("compression pool for event {}", event_id)));
        }

        // Submitted but unsettled claims hold a token too. A claim that has not
        // recorded its signature yet is not counted.
        let capacity = event.details.attendee_count;
        let unsettled = self
            .store
            .get_pending_claims(event_id)?
            .iter()
            .filter(|c| c.transaction_id.is_some())
            .count() as u32;
        let taken = self.store.count_confirmed_claims(event_id)? + unsettled;
        if taken >= capacity {
            tracing::info!(%event_id, capacity, unsettled, "event fully claimed");
            return Err(Error::CapacityReached(capacity));
        }

        let claim = ClaimRecord::pending(event_id, *wallet);
        self.store.save_claim(&claim)?;
        tracing::info!(%event_id, %wallet, claim_id = %claim.id, "claim started");

        match self.submit(&claim, &event, signer).await {
            Ok(transaction_id) => {
                self.store
                    .update_claim_status(&claim.id, ClaimStatus::Confirmed, Some(&transaction_id), None)?;
                tracing::info!(%event_id, %wallet, %transaction_id, "claim confirmed");
                Ok(ClaimOutcome::Claimed { transaction_id })
            }
            Err(err) if err.is_indeterminate() => {
                tracing::warn!(%event_id, %wallet, error = %err, "claim outcome unknown, left pending");
                Err(err)
            }
            Err(err) => {
                tracing::warn!(%event_id, %wallet, error = %err, "claim failed");
                self.store
                    .update_claim_status(&claim.id, ClaimStatus::Failed, None, Some(&err.to_string()))?;
                Err(err)
            }
        }
    }

    async fn submit(
        &self,
        claim: &ClaimRecord,
        event: &EventRecord,
        signer: &dyn TransactionSigner,
    ) -> Result<Signature> {
        let step = Step::Claim;
        let blockhash = self
            .gateway
            .latest_blockhash()
            .await
            .map_err(|e| Error::from_ledger(step, e))?;

        let distribution = Distribution {
            mint: event.mint_address,
            authority: event.creator,
            fee_payer: claim.wallet_address,
            recipient: claim.wallet_address,
            amount: event.details.unit_amount(),
        };
        let mut transaction = Transaction::new_with_payer(
            &self.compression.distribution_instructions(&distribution),
            Some(&claim.wallet_address),
        );
        transaction.message.recent_blockhash = blockhash.blockhash;

        let mut signers: Vec<&dyn TransactionSigner> = vec![signer];
        for required in missing_signers(&transaction) {
            if required == signer.pubkey() {
                continue;
            }
            match &self.authority {
                Some(authority) if authority.pubkey() == required => signers.push(authority.as_ref()),
                _ => return Err(Error::MissingAuthority(required)),
            }
        }

        let transaction = collect_signatures(transaction, &signers)
            .await
            .map_err(|e| Error::from_signer(step, e))?;
        let signature = transaction.signatures[0];
        self.store
            .record_claim_submission(&claim.id, &signature, blockhash.last_valid_block_height)?;

        submit_and_confirm(
            self.gateway.as_ref(),
            &transaction,
            &blockhash,
            SendOptions::default(),
            &self.confirm,
        )
        .await
        .map_err(|e| Error::from_submission(step, signature, e))
    }

    /// Ask the ledger what became of a pending claim and record the answer
    async fn settle(&self, claim: &ClaimRecord) -> Result<Settlement> {
        let Some(signature) = claim.transaction_id else {
            // signature is recorded before sending, so this one never left
            self.store.update_claim_status(
                &claim.id,
                ClaimStatus::Failed,
                None,
                Some("abandoned before submission"),
            )?;
            return Ok(Settlement::Failed);
        };

        // recorded together with the signature
        let last_valid = claim.last_valid_block_height.unwrap_or(u64::MAX);
        let state = check_transaction(self.gateway.as_ref(), &signature, last_valid)
            .await
            .map_err(|e| Error::from_ledger(Step::Claim, e))?;

        let settlement = match state {
            TransactionState::Confirmed => {
                self.store
                    .update_claim_status(&claim.id, ClaimStatus::Confirmed, Some(&signature), None)?;
                Settlement::Confirmed
            }
            TransactionState::Failed(reason) => {
                self.store
                    .update_claim_status(&claim.id, ClaimStatus::Failed, None, Some(&reason))?;
                Settlement::Failed
            }
            TransactionState::Expired => {
                self.store.update_claim_status(
                    &claim.id,
                    ClaimStatus::Failed,
                    None,
                    Some("transaction expired"),
                )?;
                Settlement::Failed
            }
            TransactionState::Pending => Settlement::Unknown,
        };

        tracing::debug!(claim_id = %claim.id, %signature, ?settlement, "pending claim checked");
        Ok(settlement)
    }

    /// Settle every pending claim of an event that is not running right now
    pub async fn reconcile_pending(&self, event_id: &str) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for claim in self.store.get_pending_claims(event_id)? {
            let guard = match InFlightGuard::acquire(&self.in_flight, event_id, &claim.wallet_address) {
                Ok(guard) => guard,
                Err(_) => {
                    report.unresolved += 1;
                    continue;
                }
            };
            let settled = self.settle(&claim).await;
            drop(guard);

            match settled {
                Ok(Settlement::Confirmed) => report.confirmed += 1,
                Ok(Settlement::Failed) => report.failed += 1,
                Ok(Settlement::Unknown) => report.unresolved += 1,
                Err(err) => {
                    tracing::warn!(%event_id, claim_id = %claim.id, error = %err, "pending claim not settled");
                    report.unresolved += 1;
                }
            }
        }

        tracing::info!(
            %event_id,
            confirmed = report.confirmed,
            failed = report.failed,
            unresolved = report.unresolved,
            "pending claims reconciled"
        );
        Ok(report)
    }

    pub fn claims_for_event(&self, event_id: &str) -> Result<Vec<ClaimRecord>> {
        Ok(self.store.get_claims_by_event_id(event_id)?)
    }

    pub fn claim_record(&self, id: &Uuid) -> Result<Option<ClaimRecord>> {
        Ok(self.store.get_claim(id)?)
    }
}
