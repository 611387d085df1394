//! Token provisioning
//!
//! Three separately callable steps. Each one is confirmed on-chain before
//! anything is written to the store, so a crash between steps leaves a
//! consistent record to resume from.

use chrono::Utc;
use cpop_core::provisioning::transition;
use cpop_core::{
    new_event_id, ClaimReference, CpopConfig, EventDetails, EventRecord, PoolRecord, ProvisioningEvent,
    ProvisioningState, RetryPolicy,
};
use cpop_ledger::{
    check_transaction, collect_signatures, submit_and_confirm, CompressionProgram, ConfirmOptions,
    EphemeralSigner, LedgerGateway, MintPlan, SendOptions, TransactionSigner, TransactionState,
};
use cpop_store::RecordStore;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::sync::Arc;
use url::Url;

use crate::{Error, Result, Step};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedEvent {
    pub event_id: String,
    pub mint_address: Pubkey,
    pub transaction_id: Signature,
}

/// A token transaction that was sent but not seen confirmed. Everything
/// needed to record the event if it lands after all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToken {
    pub event_id: String,
    pub mint_address: Pubkey,
    pub creator: Pubkey,
    pub details: EventDetails,
    pub signature: Signature,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPool {
    pub pool_address: Pubkey,
    /// `None` when the pool was already in place
    pub transaction_id: Option<Signature>,
    pub already_registered: bool,
}

pub struct ProvisioningEngine {
    gateway: Arc<dyn LedgerGateway>,
    store: Arc<dyn RecordStore>,
    compression: Arc<dyn CompressionProgram>,
    config: CpopConfig,
    confirm: ConfirmOptions,
    pool_retry: RetryPolicy,
}

impl ProvisioningEngine {
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
        let pool_retry = config.pool_retry.policy();
        Self {
            gateway,
            store,
            compression,
            config,
            confirm,
            pool_retry,
        }
    }

    pub fn with_confirm_options(mut self, confirm: ConfirmOptions) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_pool_retry(mut self, policy: RetryPolicy) -> Self {
        self.pool_retry = policy;
        self
    }

    pub fn config(&self) -> &CpopConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Step 1: create the event's mint with inline metadata
    pub async fn create_event(
        &self,
        details: &EventDetails,
        organizer: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<CreatedEvent> {
        details.validate(&self.config.native_symbol, self.config.max_attendees)?;
        let signer = connected(signer, organizer)?;
        let step = Step::CreateToken;

        let event_id = new_event_id();
        let mint = EphemeralSigner::new();
        let plan = MintPlan {
            payer: *organizer,
            mint: mint.pubkey(),
            authority: *organizer,
            decimals: details.decimals,
            metadata: details.token_metadata(),
        };
        tracing::info!(
            %event_id,
            mint = %plan.mint,
            name = %plan.metadata.name,
            symbol = %plan.metadata.symbol,
            "creating event token"
        );

        let rent_space = plan.rent_space().map_err(|e| Error::from_ledger(step, e))?;
        let lamports = self
            .gateway
            .minimum_balance_for_rent_exemption(rent_space)
            .await
            .map_err(|e| Error::from_ledger(step, e))?;
        let blockhash = self
            .gateway
            .latest_blockhash()
            .await
            .map_err(|e| Error::from_ledger(step, e))?;

        let instructions = plan.instructions(lamports).map_err(|e| Error::from_ledger(step, e))?;
        let mut transaction = Transaction::new_with_payer(&instructions, Some(organizer));
        transaction.message.recent_blockhash = blockhash.blockhash;
        let transaction = collect_signatures(transaction, &[&mint, signer])
            .await
            .map_err(|e| Error::from_signer(step, e))?;
        // the mint key has signed its only transaction
        drop(mint);

        let signature = transaction.signatures[0];
        let submitted = submit_and_confirm(
            self.gateway.as_ref(),
            &transaction,
            &blockhash,
            SendOptions::default(),
            &self.confirm,
        )
        .await
        .map_err(|e| Error::from_submission(step, signature, e));

        let transaction_id = match submitted {
            Ok(transaction_id) => transaction_id,
            Err(Error::NetworkTimeout {
                signature: Some(signature),
                reason,
                ..
            }) => {
                tracing::warn!(%event_id, mint = %plan.mint, %signature, %reason, "token outcome unknown");
                return Err(Error::TokenUnconfirmed {
                    pending: Box::new(PendingToken {
                        event_id,
                        mint_address: plan.mint,
                        creator: *organizer,
                        details: details.clone(),
                        signature,
                        last_valid_block_height: blockhash.last_valid_block_height,
                    }),
                    reason,
                });
            }
            Err(err) => return Err(err),
        };

        self.save_event(EventRecord {
            id: event_id,
            mint_address: plan.mint,
            creator: *organizer,
            transaction_id,
            created_at: Utc::now(),
            details: details.clone(),
        })
    }

    /// Settle a token transaction whose confirmation wait ran out. Records
    /// the event once the transaction is confirmed; `Ok(None)` while it may
    /// still land.
    pub async fn confirm_token(&self, pending: &PendingToken) -> Result<Option<CreatedEvent>> {
        let step = Step::CreateToken;
        if let Some(existing) = self.store.get_event_by_mint_address(&pending.mint_address)? {
            return Ok(Some(CreatedEvent {
                event_id: existing.id,
                mint_address: existing.mint_address,
                transaction_id: existing.transaction_id,
            }));
        }

        let state = check_transaction(
            self.gateway.as_ref(),
            &pending.signature,
            pending.last_valid_block_height,
        )
        .await
        .map_err(|e| Error::from_ledger(step, e))?;

        match state {
            TransactionState::Confirmed => self
                .save_event(EventRecord {
                    id: pending.event_id.clone(),
                    mint_address: pending.mint_address,
                    creator: pending.creator,
                    transaction_id: pending.signature,
                    created_at: Utc::now(),
                    details: pending.details.clone(),
                })
                .map(Some),
            TransactionState::Pending => {
                tracing::info!(
                    event_id = %pending.event_id,
                    signature = %pending.signature,
                    "token transaction still unconfirmed"
                );
                Ok(None)
            }
            TransactionState::Failed(reason) => {
                Err(Error::from_ledger(step, cpop_ledger::Error::rejected(reason)))
            }
            TransactionState::Expired => Err(Error::from_ledger(
                step,
                cpop_ledger::Error::Expired(pending.signature),
            )),
        }
    }

    fn save_event(&self, record: EventRecord) -> Result<CreatedEvent> {
        if let Err(err) = self.store.save_event(&record) {
            tracing::error!(
                event_id = %record.id,
                mint = %record.mint_address,
                transaction_id = %record.transaction_id,
                error = %err,
                "token confirmed but event record not saved"
            );
            return Err(err.into());
        }

        tracing::info!(
            event_id = %record.id,
            mint = %record.mint_address,
            transaction_id = %record.transaction_id,
            "event token created"
        );
        Ok(CreatedEvent {
            event_id: record.id,
            mint_address: record.mint_address,
            transaction_id: record.transaction_id,
        })
    }

    /// Step 2: register the mint with the compression program
    pub async fn create_pool(
        &self,
        mint: &Pubkey,
        organizer: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<CreatedPool> {
        let signer = connected(signer, organizer)?;
        let event = self
            .store
            .get_event_by_mint_address(mint)?
            .ok_or_else(|| Error::NotFound(format!("event for mint {}", mint)))?;

        if let Some(existing) = self.store.get_pool_by_event_id(&event.id)? {
            tracing::info!(event_id = %event.id, pool = %existing.pool_address, "pool already recorded");
            return Ok(CreatedPool {
                pool_address: existing.pool_address,
                transaction_id: existing.transaction_id,
                already_registered: true,
            });
        }

        let pool_address = self.compression.pool_address(mint);
        tracing::info!(event_id = %event.id, %mint, pool = %pool_address, "registering compression pool");

        let transaction_id = self
            .pool_retry
            .run(
                move |attempt| self.register_pool_once(mint, organizer, signer, attempt),
                Error::is_retryable,
            )
            .await?;

        let record = PoolRecord {
            event_id: event.id.clone(),
            mint_address: *mint,
            pool_address,
            state_tree_address: self.compression.state_tree(),
            transaction_id,
            created_at: Utc::now(),
        };
        self.store.save_pool(&record)?;

        tracing::info!(
            event_id = %event.id,
            pool = %pool_address,
            already_registered = transaction_id.is_none(),
            "compression pool ready"
        );
        Ok(CreatedPool {
            pool_address,
            transaction_id,
            already_registered: transaction_id.is_none(),
        })
    }

    /// One registration attempt. `Ok(None)` means the pool already existed.
    async fn register_pool_once(
        &self,
        mint: &Pubkey,
        organizer: &Pubkey,
        signer: &dyn TransactionSigner,
        attempt: u32,
    ) -> Result<Option<Signature>> {
        let step = Step::CreatePool;
        tracing::debug!(%mint, attempt, "pool registration attempt");

        let blockhash = self
            .gateway
            .latest_blockhash()
            .await
            .map_err(|e| Error::from_ledger(step, e))?;
        let mut transaction = Transaction::new_with_payer(
            &self.compression.register_instructions(mint, organizer),
            Some(organizer),
        );
        transaction.message.recent_blockhash = blockhash.blockhash;
        let transaction = collect_signatures(transaction, &[signer])
            .await
            .map_err(|e| Error::from_signer(step, e))?;

        match submit_and_confirm(
            self.gateway.as_ref(),
            &transaction,
            &blockhash,
            SendOptions::default(),
            &self.confirm,
        )
        .await
        {
            Ok(signature) => Ok(Some(signature)),
            Err(err) if err.is_already_exists() => {
                tracing::info!(%mint, "pool already registered on-chain");
                Ok(None)
            }
            Err(err) => Err(Error::from_submission(step, transaction.signatures[0], err)),
        }
    }

    /// Step 3: the shareable claim reference
    pub fn finalize(&self, event_id: &str) -> Result<ClaimReference> {
        if self.store.get_event_by_id(event_id)?.is_none() {
            return Err(Error::NotFound(format!("event {}", event_id)));
        }
        Ok(ClaimReference::new(event_id)?)
    }

    pub fn claim_url(&self, reference: &ClaimReference) -> Result<Url> {
        Ok(reference.url(&self.config.claim_origin)?)
    }
}

/// The signer, provided it speaks for `wallet`
pub(crate) fn connected<'a>(
    signer: Option<&'a dyn TransactionSigner>,
    wallet: &Pubkey,
) -> Result<&'a dyn TransactionSigner> {
    match signer {
        Some(signer) if signer.pubkey() == *wallet => Ok(signer),
        Some(signer) => {
            tracing::warn!(expected = %wallet, connected = %signer.pubkey(), "signer does not match wallet");
            Err(Error::NotConnected)
        }
        None => Err(Error::NotConnected),
    }
}

/// Drives one event through the provisioning state machine
pub struct ProvisioningSession<'a> {
    engine: &'a ProvisioningEngine,
    state: ProvisioningState,
}

impl<'a> ProvisioningSession<'a> {
    pub fn new(engine: &'a ProvisioningEngine) -> Self {
        Self {
            engine,
            state: ProvisioningState::Initial,
        }
    }

    /// Pick up an event where its records left off
    pub fn resume(engine: &'a ProvisioningEngine, event_id: &str) -> Result<Self> {
        let event = engine
            .store
            .get_event_by_id(event_id)?
            .ok_or_else(|| Error::NotFound(format!("event {}", event_id)))?;
        let pool = engine.store.get_pool_by_event_id(event_id)?;
        let state = ProvisioningState::from_records(Some(&event), pool.as_ref());
        tracing::info!(%event_id, %state, "resuming provisioning");
        Ok(Self { engine, state })
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    fn apply(&mut self, event: ProvisioningEvent) -> Result<()> {
        self.state = transition(&self.state, event)?;
        Ok(())
    }

    pub async fn create_token(
        &mut self,
        details: &EventDetails,
        organizer: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<CreatedEvent> {
        self.apply(ProvisioningEvent::TokenRequested)?;
        match self.engine.create_event(details, organizer, signer).await {
            Ok(created) => {
                self.apply(ProvisioningEvent::TokenConfirmed {
                    event_id: created.event_id.clone(),
                    mint: created.mint_address,
                })?;
                Ok(created)
            }
            Err(err) => {
                self.apply(ProvisioningEvent::TokenFailed)?;
                Err(err)
            }
        }
    }

    /// Settle a token whose confirmation timed out in this or an earlier
    /// session. Lands in `TokenCreated` once it is confirmed.
    pub async fn confirm_token(&mut self, pending: &PendingToken) -> Result<Option<CreatedEvent>> {
        self.apply(ProvisioningEvent::TokenRequested)?;
        match self.engine.confirm_token(pending).await {
            Ok(Some(created)) => {
                self.apply(ProvisioningEvent::TokenConfirmed {
                    event_id: created.event_id.clone(),
                    mint: created.mint_address,
                })?;
                Ok(Some(created))
            }
            Ok(None) => {
                self.apply(ProvisioningEvent::TokenFailed)?;
                Ok(None)
            }
            Err(err) => {
                self.apply(ProvisioningEvent::TokenFailed)?;
                Err(err)
            }
        }
    }

    pub async fn register_pool(
        &mut self,
        organizer: &Pubkey,
        signer: Option<&dyn TransactionSigner>,
    ) -> Result<CreatedPool> {
        self.apply(ProvisioningEvent::PoolRequested)?;
        let mint = self
            .state
            .mint()
            .ok_or_else(|| Error::Config("session has no mint".into()))?;
        match self.engine.create_pool(&mint, organizer, signer).await {
            Ok(created) => {
                self.apply(ProvisioningEvent::PoolConfirmed {
                    pool: created.pool_address,
                })?;
                Ok(created)
            }
            Err(err) => {
                self.apply(ProvisioningEvent::PoolFailed)?;
                Err(err)
            }
        }
    }

    /// Produce the claim URL and complete the flow
    pub fn finalize(&mut self) -> Result<Url> {
        let before = self.state.clone();
        self.apply(ProvisioningEvent::ReferenceRequested)?;

        let event_id = self.state.event_id().map(str::to_string).unwrap_or_default();
        let url = match self
            .engine
            .finalize(&event_id)
            .and_then(|reference| self.engine.claim_url(&reference))
        {
            Ok(url) => url,
            Err(err) => {
                self.state = before;
                return Err(err);
            }
        };

        self.apply(ProvisioningEvent::ReferenceGenerated {
            claim_url: url.to_string(),
        })?;
        tracing::info!(%event_id, claim_url = %url, "event ready to claim");
        Ok(url)
    }
}
