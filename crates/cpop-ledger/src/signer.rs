//! Signer bridge
//!
//! Wallets live outside this process. An [`ApprovalBridge`] hands
//! transactions to whoever owns the key (a wallet adapter, a hardware device,
//! a test harness) over a channel and waits for the signed copies. The
//! returned copies are checked: same message, and a valid signature from the
//! key that was asked.

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::Transaction;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    /// The holder of the key said no
    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Wallet disconnected")]
    Disconnected,

    #[error("Wallet returned a modified transaction")]
    Tampered,

    #[error("{0} is not a required signer of this transaction")]
    NotRequired(Pubkey),

    #[error("Missing signature from {0}")]
    MissingSignature(Pubkey),

    #[error("Signing failed: {0}")]
    Failed(String),
}

impl SignerError {
    /// The user, not the system, stopped the operation
    pub fn is_user_abort(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Anything that can add one key's signature to a transaction
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, SignerError>;

    async fn sign_all_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, SignerError> {
        let mut signed = Vec::with_capacity(transactions.len());
        for transaction in transactions {
            signed.push(self.sign_transaction(transaction).await?);
        }
        Ok(signed)
    }
}

/// A signing request waiting on the wallet side of the bridge
#[derive(Debug)]
pub struct SignRequest {
    pub signer: Pubkey,
    pub transactions: Vec<Transaction>,
    reply: oneshot::Sender<Result<Vec<Transaction>, SignerError>>,
}

impl SignRequest {
    pub fn approve(self, signed: Vec<Transaction>) {
        let _ = self.reply.send(Ok(signed));
    }

    pub fn reject(self, reason: impl Into<String>) {
        let _ = self.reply.send(Err(SignerError::Rejected(reason.into())));
    }
}

/// Signer whose key is held by an external wallet
#[derive(Debug, Clone)]
pub struct ApprovalBridge {
    pubkey: Pubkey,
    requests: mpsc::Sender<SignRequest>,
}

impl ApprovalBridge {
    /// Bridge plus the receiving end the wallet listens on
    pub fn channel(pubkey: Pubkey, capacity: usize) -> (Self, mpsc::Receiver<SignRequest>) {
        let (requests, inbox) = mpsc::channel(capacity.max(1));
        (Self { pubkey, requests }, inbox)
    }

    async fn request(&self, transactions: Vec<Transaction>) -> Result<Vec<Transaction>, SignerError> {
        for transaction in &transactions {
            if signer_index(transaction, &self.pubkey).is_none() {
                return Err(SignerError::NotRequired(self.pubkey));
            }
        }

        let (reply, response) = oneshot::channel();
        let request = SignRequest {
            signer: self.pubkey,
            transactions: transactions.clone(),
            reply,
        };
        self.requests
            .send(request)
            .await
            .map_err(|_| SignerError::Disconnected)?;

        let signed = response.await.map_err(|_| SignerError::Disconnected)??;
        if signed.len() != transactions.len() {
            return Err(SignerError::Tampered);
        }
        for (original, signed) in transactions.iter().zip(&signed) {
            self.verify(original, signed)?;
        }

        tracing::debug!(signer = %self.pubkey, count = signed.len(), "wallet approved");
        Ok(signed)
    }

    fn verify(&self, original: &Transaction, signed: &Transaction) -> Result<(), SignerError> {
        if signed.message != original.message || signed.signatures.len() != original.signatures.len() {
            return Err(SignerError::Tampered);
        }
        let index = signer_index(signed, &self.pubkey).ok_or(SignerError::NotRequired(self.pubkey))?;
        let signature = signed.signatures[index];
        if signature == Signature::default() {
            return Err(SignerError::MissingSignature(self.pubkey));
        }
        if !signature.verify(self.pubkey.as_ref(), &signed.message_data()) {
            return Err(SignerError::Tampered);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionSigner for ApprovalBridge {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    async fn sign_transaction(&self, transaction: Transaction) -> Result<Transaction, SignerError> {
        let mut signed = self.request(vec![transaction]).await?;
        signed.pop().ok_or(SignerError::Tampered)
    }

    async fn sign_all_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, SignerError> {
        self.request(transactions).await
    }
}

/// A keypair this process holds for the length of one operation, such as a
/// freshly generated mint account
pub struct EphemeralSigner {
    keypair: Keypair,
}

impl EphemeralSigner {
    pub fn new() -> Self {
        Self { keypair: Keypair::new() }
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }
}

impl Default for EphemeralSigner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionSigner for EphemeralSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, mut transaction: Transaction) -> Result<Transaction, SignerError> {
        if signer_index(&transaction, &self.keypair.pubkey()).is_none() {
            return Err(SignerError::NotRequired(self.keypair.pubkey()));
        }
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[&self.keypair], blockhash)
            .map_err(|e| SignerError::Failed(e.to_string()))?;
        Ok(transaction)
    }
}

fn signer_index(transaction: &Transaction, pubkey: &Pubkey) -> Option<usize> {
    let required = transaction.message.header.num_required_signatures as usize;
    transaction
        .message
        .account_keys
        .iter()
        .take(required)
        .position(|key| key == pubkey)
}

/// Required signers whose signature slot is still empty
pub fn missing_signers(transaction: &Transaction) -> Vec<Pubkey> {
    let required = transaction.message.header.num_required_signatures as usize;
    transaction
        .message
        .account_keys
        .iter()
        .take(required)
        .zip(&transaction.signatures)
        .filter(|(_, sig)| **sig == Signature::default())
        .map(|(key, _)| *key)
        .collect()
}

/// Pass a transaction through each signer in turn; every required signature
/// must be present at the end
pub async fn collect_signatures(
    mut transaction: Transaction,
    signers: &[&dyn TransactionSigner],
) -> Result<Transaction, SignerError> {
    for signer in signers {
        transaction = signer.sign_transaction(transaction).await?;
    }
    match missing_signers(&transaction).first() {
        Some(missing) => Err(SignerError::MissingSignature(*missing)),
        None => Ok(transaction),
    }
}
