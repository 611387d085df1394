//! Compression program adapter
//!
//! Registering a mint with the compression program creates its token pool.
//! After that, tokens can be minted straight into compressed accounts held in
//! a state tree, which is how attendees receive theirs.

use cpop_core::CompressionConfig;
use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use std::str::FromStr;

use crate::token2022::TOKEN_2022_PROGRAM_ID;
use crate::{Error, Result};

pub const COMPRESSED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("cTokenmWW8bLPjZEBAUgYy3zKxQZW6VKi7bqNFEVv3m");
pub const LIGHT_SYSTEM_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("SySTEM1eSU2p4BGQfQpimFEWWSC1XDFeun3Nqzz3rT7");
pub const ACCOUNT_COMPRESSION_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("compr6CUsB5m2jS4Y3831ztGSTnDpnKJTKS95d64XVq");
pub const NOOP_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("noopb9bkMVfRPU8AsbpTUg8AQkHtKwMYZiFUjNRtMmV");

const POOL_SEED: &[u8] = b"pool";
const CPI_AUTHORITY_SEED: &[u8] = b"cpi_authority";

/// One mint-to-recipient transfer into compressed state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    pub mint: Pubkey,
    /// Mint authority, must sign
    pub authority: Pubkey,
    pub fee_payer: Pubkey,
    pub recipient: Pubkey,
    pub amount: u64,
}

/// A program that can hold compressed balances for a mint
pub trait CompressionProgram: Send + Sync {
    fn program_id(&self) -> Pubkey;

    /// Where the pool for `mint` lives (derivable before it exists)
    fn pool_address(&self, mint: &Pubkey) -> Pubkey;

    /// State tree new compressed accounts are appended to
    fn state_tree(&self) -> Pubkey;

    /// Instructions that create the pool for `mint`
    fn register_instructions(&self, mint: &Pubkey, fee_payer: &Pubkey) -> Vec<Instruction>;

    /// Instructions that mint `amount` compressed tokens to the recipient
    fn distribution_instructions(&self, distribution: &Distribution) -> Vec<Instruction>;
}

/// Light Protocol compressed-token program
#[derive(Debug, Clone)]
pub struct LightCompression {
    state_tree: Pubkey,
}

/// Anchor instruction discriminator: first eight bytes of sha256("global:<name>")
pub(crate) fn discriminator(namespace: &str) -> [u8; 8] {
    let hash = Sha256::digest(namespace.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

impl LightCompression {
    pub fn new(state_tree: Pubkey) -> Self {
        Self { state_tree }
    }

    pub fn from_config(config: &CompressionConfig) -> Result<Self> {
        let state_tree = Pubkey::from_str(&config.state_tree)
            .map_err(|_| Error::InvalidAddress(config.state_tree.clone()))?;
        Ok(Self::new(state_tree))
    }

    pub fn cpi_authority() -> Pubkey {
        Pubkey::find_program_address(&[CPI_AUTHORITY_SEED], &COMPRESSED_TOKEN_PROGRAM_ID).0
    }

    fn registered_program_pda() -> Pubkey {
        Pubkey::find_program_address(&[LIGHT_SYSTEM_PROGRAM_ID.as_ref()], &ACCOUNT_COMPRESSION_PROGRAM_ID).0
    }

    fn account_compression_authority() -> Pubkey {
        Pubkey::find_program_address(&[CPI_AUTHORITY_SEED], &LIGHT_SYSTEM_PROGRAM_ID).0
    }
}

impl CompressionProgram for LightCompression {
    fn program_id(&self) -> Pubkey {
        COMPRESSED_TOKEN_PROGRAM_ID
    }

    fn pool_address(&self, mint: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[POOL_SEED, mint.as_ref()], &COMPRESSED_TOKEN_PROGRAM_ID).0
    }

    fn state_tree(&self) -> Pubkey {
        self.state_tree
    }

    fn register_instructions(&self, mint: &Pubkey, fee_payer: &Pubkey) -> Vec<Instruction> {
        vec![Instruction {
            program_id: COMPRESSED_TOKEN_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(*fee_payer, true),
                AccountMeta::new(self.pool_address(mint), false),
                AccountMeta::new_readonly(system_program::id(), false),
                AccountMeta::new(*mint, false),
                AccountMeta::new_readonly(TOKEN_2022_PROGRAM_ID, false),
                AccountMeta::new_readonly(Self::cpi_authority(), false),
            ],
            data: discriminator("global:create_token_pool").to_vec(),
        }]
    }

    fn distribution_instructions(&self, d: &Distribution) -> Vec<Instruction> {
        let mut data = discriminator("global:mint_to").to_vec();
        // recipients: Vec<Pubkey>
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(d.recipient.as_ref());
        // amounts: Vec<u64>
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&d.amount.to_le_bytes());
        // lamports: Option<u64>
        data.push(0);

        vec![Instruction {
            program_id: COMPRESSED_TOKEN_PROGRAM_ID,
            accounts: vec![
                AccountMeta::new(d.fee_payer, true),
                AccountMeta::new_readonly(d.authority, true),
                AccountMeta::new_readonly(Self::cpi_authority(), false),
                AccountMeta::new(d.mint, false),
                AccountMeta::new(self.pool_address(&d.mint), false),
                AccountMeta::new_readonly(TOKEN_2022_PROGRAM_ID, false),
                AccountMeta::new_readonly(LIGHT_SYSTEM_PROGRAM_ID, false),
                AccountMeta::new_readonly(Self::registered_program_pda(), false),
                AccountMeta::new_readonly(NOOP_PROGRAM_ID, false),
                AccountMeta::new_readonly(Self::account_compression_authority(), false),
                AccountMeta::new_readonly(ACCOUNT_COMPRESSION_PROGRAM_ID, false),
                AccountMeta::new(self.state_tree, false),
                AccountMeta::new_readonly(COMPRESSED_TOKEN_PROGRAM_ID, false),
                AccountMeta::new_readonly(system_program::id(), false),
                // no sol pool: the program id stands in for the absent optional account
                AccountMeta::new_readonly(COMPRESSED_TOKEN_PROGRAM_ID, false),
            ],
            data,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light() -> LightCompression {
        LightCompression::from_config(&CompressionConfig::default()).unwrap()
    }

    #[test]
    fn test_pool_address_is_deterministic_per_mint() {
        let light = light();
        let mint = Pubkey::new_unique();
        assert_eq!(light.pool_address(&mint), light.pool_address(&mint));
        assert_ne!(light.pool_address(&mint), light.pool_address(&Pubkey::new_unique()));
    }

    #[test]
    fn test_register_accounts() {
        let light = light();
        let mint = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let ixs = light.register_instructions(&mint, &payer);
        assert_eq!(ixs.len(), 1);

        let ix = &ixs[0];
        assert_eq!(ix.program_id, COMPRESSED_TOKEN_PROGRAM_ID);
        assert_eq!(ix.data, discriminator("global:create_token_pool"));
        assert_eq!(ix.accounts[0].pubkey, payer);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[1].pubkey, light.pool_address(&mint));
        assert_eq!(ix.accounts[3].pubkey, mint);
    }

    #[test]
    fn test_distribution_encoding() {
        let light = light();
        let d = Distribution {
            mint: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            fee_payer: Pubkey::new_unique(),
            recipient: Pubkey::new_unique(),
            amount: 1,
        };
        let ixs = light.distribution_instructions(&d);
        let ix = &ixs[0];

        assert_eq!(ix.data.len(), 8 + 4 + 32 + 4 + 8 + 1);
        assert_eq!(ix.data[12..44], d.recipient.to_bytes());
        assert_eq!(ix.data[48..56], 1u64.to_le_bytes());

        let signers: Vec<Pubkey> = ix.accounts.iter().filter(|a| a.is_signer).map(|a| a.pubkey).collect();
        assert_eq!(signers, vec![d.fee_payer, d.authority]);
        assert!(ix.accounts.iter().any(|a| a.pubkey == light.state_tree() && a.is_writable));
    }

    #[test]
    fn test_bad_state_tree_config() {
        let config = CompressionConfig {
            state_tree: "not-a-key".into(),
        };
        assert!(matches!(
            LightCompression::from_config(&config),
            Err(Error::InvalidAddress(_))
        ));
    }
}
