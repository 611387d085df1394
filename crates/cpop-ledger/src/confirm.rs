//! Submit and wait
//!
//! A transaction is settled once the cluster reports it confirmed, reports it
//! failed, or the chain moves past its blockhash's last valid height. Running
//! out of wall-clock time settles nothing: the caller gets
//! [`Error::Timeout`] and must treat the outcome as unknown.

use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::time::Duration;
use tokio::time::Instant;

use crate::gateway::{LatestBlockhash, LedgerGateway, SendOptions};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct ConfirmOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// What the ledger says about a transaction at one moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    Confirmed,
    Failed(String),
    /// Unseen, and the chain is past its last valid block height
    Expired,
    /// Seen but not confirmed, or unseen while still valid
    Pending,
}

/// Look at `signature` once, without waiting. Used to settle a transaction
/// whose confirmation wait ran out earlier.
pub async fn check_transaction(
    gateway: &dyn LedgerGateway,
    signature: &Signature,
    last_valid_block_height: u64,
) -> Result<TransactionState> {
    let state = match gateway.signature_status(signature).await? {
        Some(status) => match status.err {
            Some(err) => TransactionState::Failed(err),
            None if status.confirmed => TransactionState::Confirmed,
            None => TransactionState::Pending,
        },
        None if gateway.block_height().await? > last_valid_block_height => TransactionState::Expired,
        None => TransactionState::Pending,
    };
    tracing::debug!(%signature, ?state, "transaction checked");
    Ok(state)
}

/// Poll until `signature` is confirmed, fails, or expires
pub async fn confirm_transaction(
    gateway: &dyn LedgerGateway,
    signature: &Signature,
    blockhash: &LatestBlockhash,
    options: &ConfirmOptions,
) -> Result<()> {
    let started = Instant::now();

    loop {
        match gateway.signature_status(signature).await {
            Ok(Some(status)) => {
                if let Some(err) = status.err {
                    tracing::warn!(%signature, slot = status.slot, error = %err, "transaction failed");
                    return Err(Error::rejected(err));
                }
                if status.confirmed {
                    tracing::debug!(%signature, slot = status.slot, "transaction confirmed");
                    return Ok(());
                }
            }
            Ok(None) => {
                if has_expired(gateway, signature, blockhash).await {
                    tracing::warn!(
                        %signature,
                        last_valid_block_height = blockhash.last_valid_block_height,
                        "blockhash expired before confirmation"
                    );
                    return Err(Error::Expired(*signature));
                }
            }
            Err(err @ Error::Transport(_)) => {
                tracing::debug!(%signature, error = %err, "status poll failed, will poll again");
            }
            Err(err) => return Err(err),
        }

        if started.elapsed() >= options.timeout {
            return Err(Error::Timeout(*signature, options.timeout));
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

/// Past the last valid height and still unseen. Transport trouble counts as
/// "not yet" so a flaky node never turns into a false expiry.
async fn has_expired(gateway: &dyn LedgerGateway, signature: &Signature, blockhash: &LatestBlockhash) -> bool {
    match gateway.block_height().await {
        Ok(height) if height > blockhash.last_valid_block_height => {
            // one last look: it may have landed in the final valid block
            matches!(gateway.signature_status(signature).await, Ok(None))
        }
        _ => false,
    }
}

/// Send a fully signed transaction, then wait for it to settle
pub async fn submit_and_confirm(
    gateway: &dyn LedgerGateway,
    transaction: &Transaction,
    blockhash: &LatestBlockhash,
    send: SendOptions,
    confirm: &ConfirmOptions,
) -> Result<Signature> {
    let signature = match gateway.send_transaction(transaction, send).await {
        Ok(signature) => signature,
        Err(Error::Rejected { reason, .. }) if reason.contains("already been processed") => {
            let signature = transaction.signatures.first().copied().unwrap_or_default();
            tracing::debug!(%signature, "transaction already processed, confirming");
            signature
        }
        Err(err) => return Err(err),
    };

    tracing::info!(%signature, "transaction sent");
    confirm_transaction(gateway, &signature, blockhash, confirm).await?;
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::SignatureStatus;
    use async_trait::async_trait;
    use solana_sdk::hash::Hash;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers status polls from a script, then `None` forever
    struct Scripted {
        statuses: Mutex<Vec<Result<Option<SignatureStatus>>>>,
        height: AtomicU64,
        polls: AtomicUsize,
    }

    impl Scripted {
        fn new(mut statuses: Vec<Result<Option<SignatureStatus>>>, height: u64) -> Self {
            statuses.reverse();
            Self {
                statuses: Mutex::new(statuses),
                height: AtomicU64::new(height),
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerGateway for Scripted {
        async fn latest_blockhash(&self) -> Result<LatestBlockhash> {
            Ok(blockhash())
        }

        async fn minimum_balance_for_rent_exemption(&self, _data_len: usize) -> Result<u64> {
            Ok(0)
        }

        async fn send_transaction(&self, tx: &Transaction, _options: SendOptions) -> Result<Signature> {
            Ok(tx.signatures[0])
        }

        async fn signature_status(&self, _signature: &Signature) -> Result<Option<SignatureStatus>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.statuses.lock().unwrap().pop().unwrap_or(Ok(None))
        }

        async fn block_height(&self) -> Result<u64> {
            Ok(self.height.load(Ordering::SeqCst))
        }
    }

    fn blockhash() -> LatestBlockhash {
        LatestBlockhash {
            blockhash: Hash::new_unique(),
            last_valid_block_height: 100,
        }
    }

    fn quick() -> ConfirmOptions {
        ConfirmOptions {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(1),
        }
    }

    fn status(confirmed: bool, err: Option<&str>) -> Result<Option<SignatureStatus>> {
        Ok(Some(SignatureStatus {
            slot: 7,
            err: err.map(String::from),
            confirmed,
        }))
    }

    #[tokio::test]
    async fn test_confirms_after_processed() {
        let gateway = Scripted::new(vec![Ok(None), status(false, None), status(true, None)], 10);
        let sig = Signature::new_unique();
        confirm_transaction(&gateway, &sig, &blockhash(), &quick()).await.unwrap();
        assert_eq!(gateway.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_transaction_is_rejected() {
        let gateway = Scripted::new(vec![status(false, Some("InstructionError(0, Custom(1))"))], 10);
        let err = confirm_transaction(&gateway, &Signature::new_unique(), &blockhash(), &quick())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_expired_blockhash() {
        let gateway = Scripted::new(vec![], 101);
        let sig = Signature::new_unique();
        let err = confirm_transaction(&gateway, &sig, &blockhash(), &quick()).await.unwrap_err();
        assert!(matches!(err, Error::Expired(s) if s == sig));
    }

    #[tokio::test]
    async fn test_timeout_is_not_failure() {
        let gateway = Scripted::new(vec![], 10);
        let sig = Signature::new_unique();
        let err = confirm_transaction(&gateway, &sig, &blockhash(), &quick()).await.unwrap_err();
        assert!(err.is_indeterminate());
        assert_eq!(err.signature(), Some(sig));
    }

    #[tokio::test]
    async fn test_check_transaction_once() {
        let sig = Signature::new_unique();

        let gateway = Scripted::new(vec![status(true, None)], 10);
        assert_eq!(check_transaction(&gateway, &sig, 100).await.unwrap(), TransactionState::Confirmed);

        let gateway = Scripted::new(vec![status(false, Some("InstructionError(0, Custom(1))"))], 10);
        assert!(matches!(
            check_transaction(&gateway, &sig, 100).await.unwrap(),
            TransactionState::Failed(reason) if reason.contains("Custom(1)")
        ));

        let gateway = Scripted::new(vec![], 100);
        assert_eq!(check_transaction(&gateway, &sig, 100).await.unwrap(), TransactionState::Pending);
        assert_eq!(gateway.polls.load(Ordering::SeqCst), 1);

        let gateway = Scripted::new(vec![], 101);
        assert_eq!(check_transaction(&gateway, &sig, 100).await.unwrap(), TransactionState::Expired);

        let gateway = Scripted::new(vec![Err(Error::Transport("reset".into()))], 10);
        assert!(check_transaction(&gateway, &sig, 100).await.is_err());
    }

    #[tokio::test]
    async fn test_transport_errors_keep_polling() {
        let gateway = Scripted::new(
            vec![Err(Error::Transport("reset".into())), status(true, None)],
            10,
        );
        confirm_transaction(&gateway, &Signature::new_unique(), &blockhash(), &quick())
            .await
            .unwrap();
    }
}
