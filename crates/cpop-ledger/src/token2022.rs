//! Token-2022 mint creation
//!
//! An event token is a Token-2022 mint with the metadata pointer extension
//! pointing at itself and the token metadata stored inline.
//!
//! ```text
//! create_account(mint, space = mint only, lamports = rent(mint + metadata))
//! metadata_pointer::initialize(mint -> mint)
//! initialize_mint2(decimals, mint authority = freeze authority = organizer)
//! token_metadata::initialize(name, symbol, uri)
//! ```
//!
//! The metadata TLV entry is appended by the program after the account is
//! created, so rent covers both parts while the allocation only covers the
//! mint. The program reallocs into the prepaid lamports.

use cpop_core::TokenMetadataFields;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use spl_token_2022::extension::{metadata_pointer, ExtensionType};
use spl_token_2022::state::Mint;
use spl_token_metadata_interface::state::TokenMetadata;

use crate::Result;

pub use spl_token_2022::ID as TOKEN_2022_PROGRAM_ID;

/// Everything needed to create one event mint
#[derive(Debug, Clone)]
pub struct MintPlan {
    pub payer: Pubkey,
    pub mint: Pubkey,
    /// Mint, freeze and metadata update authority
    pub authority: Pubkey,
    pub decimals: u8,
    pub metadata: TokenMetadataFields,
}

impl MintPlan {
    fn token_metadata(&self) -> Result<TokenMetadata> {
        Ok(TokenMetadata {
            update_authority: Some(self.authority).try_into()?,
            mint: self.mint,
            name: self.metadata.name.clone(),
            symbol: self.metadata.symbol.clone(),
            uri: self.metadata.uri.clone(),
            additional_metadata: Vec::new(),
        })
    }

    /// Mint account carrying only the metadata pointer extension
    pub fn mint_space(&self) -> Result<usize> {
        Ok(ExtensionType::try_calculate_account_len::<Mint>(&[
            ExtensionType::MetadataPointer,
        ])?)
    }

    /// Inline metadata entry, TLV header included
    pub fn metadata_space(&self) -> Result<usize> {
        Ok(self.token_metadata()?.tlv_size_of()?)
    }

    /// Bytes rent must cover once metadata is written
    pub fn rent_space(&self) -> Result<usize> {
        Ok(self.mint_space()? + self.metadata_space()?)
    }

    /// Instructions in execution order. `lamports` is the rent for
    /// [`Self::rent_space`].
    pub fn instructions(&self, lamports: u64) -> Result<Vec<Instruction>> {
        let program = TOKEN_2022_PROGRAM_ID;
        Ok(vec![
            system_instruction::create_account(
                &self.payer,
                &self.mint,
                lamports,
                self.mint_space()? as u64,
                &program,
            ),
            metadata_pointer::instruction::initialize(
                &program,
                &self.mint,
                Some(self.authority),
                Some(self.mint),
            )?,
            spl_token_2022::instruction::initialize_mint2(
                &program,
                &self.mint,
                &self.authority,
                Some(&self.authority),
                self.decimals,
            )?,
            spl_token_metadata_interface::instruction::initialize(
                &program,
                &self.mint,
                &self.authority,
                &self.mint,
                &self.authority,
                self.metadata.name.clone(),
                self.metadata.symbol.clone(),
                self.metadata.uri.clone(),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> MintPlan {
        MintPlan {
            payer: Pubkey::new_unique(),
            mint: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
            decimals: 0,
            metadata: TokenMetadataFields::new("Hackathon", "HACK", "https://img.example/h.png"),
        }
    }

    #[test]
    fn test_mint_sizes() {
        let plan = plan();
        // 165 base + account type + metadata pointer TLV
        assert_eq!(plan.mint_space().unwrap(), 234);

        // at least type + length + the packed metadata the program writes
        let packed = 32 + 32 + (4 + 9) + (4 + 4) + (4 + 25) + 4;
        assert!(plan.metadata_space().unwrap() >= 4 + packed);
        assert_eq!(
            plan.rent_space().unwrap(),
            plan.mint_space().unwrap() + plan.metadata_space().unwrap()
        );
    }

    #[test]
    fn test_metadata_space_grows_with_fields() {
        let short = plan();
        let mut long = plan();
        long.metadata.uri = format!("{}/and/more", long.metadata.uri);
        assert_eq!(
            long.metadata_space().unwrap() - short.metadata_space().unwrap(),
            "/and/more".len()
        );
    }

    #[test]
    fn test_instruction_order_and_programs() {
        let plan = plan();
        let ixs = plan.instructions(1_000_000).unwrap();
        assert_eq!(ixs.len(), 4);
        assert_eq!(ixs[0].program_id, solana_sdk::system_program::id());
        for ix in &ixs[1..] {
            assert_eq!(ix.program_id, TOKEN_2022_PROGRAM_ID);
            assert_eq!(ix.accounts[0].pubkey, plan.mint);
        }
        // metadata pointer initialize
        assert_eq!(ixs[1].data[..2], [39, 0]);
        // initialize_mint2 with decimals, then the freeze authority is set
        assert_eq!(ixs[2].data[..2], [20, 0]);
        assert_eq!(ixs[2].data[34], 1);
    }

    #[test]
    fn test_create_account_allocates_mint_only() {
        let plan = plan();
        let ixs = plan.instructions(42).unwrap();
        let ix = &ixs[0];
        // SystemInstruction::CreateAccount { lamports: u64, space: u64, owner }
        assert_eq!(ix.data[..4], 0u32.to_le_bytes());
        assert_eq!(ix.data[4..12], 42u64.to_le_bytes());
        assert_eq!(ix.data[12..20], 234u64.to_le_bytes());
        assert_eq!(ix.data[20..52], TOKEN_2022_PROGRAM_ID.to_bytes());
    }

    #[test]
    fn test_metadata_initialize_accounts() {
        let plan = plan();
        let ixs = plan.instructions(0).unwrap();
        let ix = &ixs[3];
        // discriminator, then the borsh name
        assert_eq!(ix.data[8..12], 9u32.to_le_bytes());
        assert_eq!(&ix.data[12..21], b"Hackathon");
        assert!(ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[3].pubkey, plan.authority);
        assert!(ix.accounts[3].is_signer);
    }

    #[test]
    fn test_zero_authority_is_refused() {
        let mut plan = plan();
        plan.authority = Pubkey::default();
        assert!(matches!(plan.metadata_space(), Err(crate::Error::Encoding(_))));
    }
}
