//! Unsigned transaction assembly for list, unlist, and purchase
//!
//! Builders check their preconditions against live chain state and return a
//! complete instruction bundle with a fresh checkpoint, or fail fast. They
//! never sign and never broadcast. Precondition failures (`NotListed`,
//! `InsufficientBalance`, `InsufficientFunds`) are the expected outcome when
//! two operations race on the same asset - the chain's atomicity, not a
//! lock, provides mutual exclusion.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signer::Signer;
use solana_sdk::system_instruction;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use tracing::{debug, instrument};

use crate::escrow::derive_escrow;
use crate::trade::errors::TradeError;
use crate::trade::{ChainReader, PreparedTrade, TradeKind};

/// Rent-exempt reserve for a token account, charged when a purchase has to
/// create the buyer's account.
const TOKEN_ACCOUNT_RENT: u64 = 2_039_280;

/// Headroom for the network fee when checking buyer funds.
const NETWORK_FEE_HEADROOM: u64 = 10_000;

pub struct TradeBuilder<R: ChainReader> {
    reader: Arc<R>,
    /// Marketplace authority; seeds escrow derivation and receives the
    /// commission split.
    authority: Pubkey,
    /// Commission in basis points of the purchase price.
    fee_bps: u16,
}

impl<R: ChainReader> TradeBuilder<R> {
    pub fn new(reader: Arc<R>, authority: Pubkey, fee_bps: u16) -> Self {
        Self {
            reader,
            authority,
            fee_bps,
        }
    }

    /// Move 1 unit of `mint` from the seller into escrow custody.
    ///
    /// The price is recorded off-chain by the caller; on-chain listing state
    /// is solely the escrow account balance.
    #[instrument(skip(self), fields(mint = %mint, seller = %seller))]
    pub async fn build_list(
        &self,
        mint: &Pubkey,
        seller: &Pubkey,
        price_lamports: u64,
    ) -> Result<PreparedTrade, TradeError> {
        let seller_token = get_associated_token_address(seller, mint);
        let held = self.reader.token_balance(&seller_token).await?.unwrap_or(0);
        if held < 1 {
            return Err(TradeError::InsufficientBalance {
                mint: *mint,
                token_account: seller_token,
            });
        }

        let custodian = derive_escrow(&self.authority, mint).pubkey();
        let escrow_token = get_associated_token_address(&custodian, mint);

        let instructions = vec![
            create_associated_token_account_idempotent(seller, &custodian, mint, &spl_token::id()),
            token_transfer(&seller_token, &escrow_token, seller)?,
        ];
        let blockhash = self.reader.latest_blockhash().await?;

        debug!(price_lamports, custodian = %custodian, "list prepared");
        Ok(PreparedTrade {
            kind: TradeKind::List,
            mint: *mint,
            payer: *seller,
            instructions,
            blockhash,
            needs_escrow_signature: false,
        })
    }

    /// Return a listed asset from escrow custody to its seller.
    #[instrument(skip(self), fields(mint = %mint, seller = %seller))]
    pub async fn build_unlist(
        &self,
        mint: &Pubkey,
        seller: &Pubkey,
    ) -> Result<PreparedTrade, TradeError> {
        let custodian = derive_escrow(&self.authority, mint).pubkey();
        let escrow_token = get_associated_token_address(&custodian, mint);

        let held = self.reader.token_balance(&escrow_token).await?.unwrap_or(0);
        if held == 0 {
            return Err(TradeError::NotListed { mint: *mint });
        }

        let seller_token = get_associated_token_address(seller, mint);
        let instructions = vec![
            create_associated_token_account_idempotent(seller, seller, mint, &spl_token::id()),
            token_transfer(&escrow_token, &seller_token, &custodian)?,
        ];
        let blockhash = self.reader.latest_blockhash().await?;

        debug!(custodian = %custodian, "unlist prepared");
        Ok(PreparedTrade {
            kind: TradeKind::Unlist,
            mint: *mint,
            payer: *seller,
            instructions,
            blockhash,
            needs_escrow_signature: true,
        })
    }

    /// Pay the seller and move the asset from escrow custody to the buyer.
    ///
    /// The marketplace commission is a separate system transfer to the
    /// authority; the seller receives `price - commission`. The asset
    /// transfer and both payments are one atomic transaction.
    #[instrument(skip(self), fields(mint = %mint, buyer = %buyer, seller = %seller))]
    pub async fn build_purchase(
        &self,
        mint: &Pubkey,
        buyer: &Pubkey,
        seller: &Pubkey,
        price_lamports: u64,
    ) -> Result<PreparedTrade, TradeError> {
        let custodian = derive_escrow(&self.authority, mint).pubkey();
        let escrow_token = get_associated_token_address(&custodian, mint);

        // Custody check comes first: no payment instruction is ever built
        // for an unlisted asset.
        let held = self.reader.token_balance(&escrow_token).await?.unwrap_or(0);
        if held == 0 {
            return Err(TradeError::NotListed { mint: *mint });
        }

        let buyer_token = get_associated_token_address(buyer, mint);
        let buyer_account_missing = self.reader.token_balance(&buyer_token).await?.is_none();

        let mut required = price_lamports.saturating_add(NETWORK_FEE_HEADROOM);
        if buyer_account_missing {
            required = required.saturating_add(TOKEN_ACCOUNT_RENT);
        }
        let available = self.reader.lamports(buyer).await?;
        if available < required {
            return Err(TradeError::InsufficientFunds {
                required,
                available,
            });
        }

        let commission = commission_lamports(price_lamports, self.fee_bps);
        let mut instructions = Vec::with_capacity(4);
        instructions.push(system_instruction::transfer(
            buyer,
            seller,
            price_lamports - commission,
        ));
        if commission > 0 {
            instructions.push(system_instruction::transfer(
                buyer,
                &self.authority,
                commission,
            ));
        }
        instructions.push(create_associated_token_account_idempotent(
            buyer,
            buyer,
            mint,
            &spl_token::id(),
        ));
        instructions.push(token_transfer(&escrow_token, &buyer_token, &custodian)?);

        let blockhash = self.reader.latest_blockhash().await?;

        debug!(
            price_lamports,
            commission,
            custodian = %custodian,
            "purchase prepared"
        );
        Ok(PreparedTrade {
            kind: TradeKind::Purchase,
            mint: *mint,
            payer: *buyer,
            instructions,
            blockhash,
            needs_escrow_signature: true,
        })
    }
}

/// Transfer of exactly 1 unit - assets are non-fungible, escrow occupancy
/// is binary.
fn token_transfer(
    source: &Pubkey,
    destination: &Pubkey,
    authority: &Pubkey,
) -> Result<solana_sdk::instruction::Instruction, TradeError> {
    spl_token::instruction::transfer(&spl_token::id(), source, destination, authority, &[], 1)
        .map_err(|e| TradeError::InstructionBuild(e.to_string()))
}

fn commission_lamports(price: u64, fee_bps: u16) -> u64 {
    ((price as u128 * fee_bps as u128) / 10_000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solana_sdk::hash::Hash;
    use std::collections::HashMap;

    struct MockReader {
        // Absent key means the token account does not exist.
        token_balances: HashMap<Pubkey, u64>,
        lamports: HashMap<Pubkey, u64>,
        blockhash: Hash,
    }

    impl MockReader {
        fn new() -> Self {
            Self {
                token_balances: HashMap::new(),
                lamports: HashMap::new(),
                blockhash: Hash::new_unique(),
            }
        }
    }

    #[async_trait]
    impl ChainReader for MockReader {
        async fn token_balance(&self, token_account: &Pubkey) -> Result<Option<u64>, TradeError> {
            Ok(self.token_balances.get(token_account).copied())
        }

        async fn lamports(&self, owner: &Pubkey) -> Result<u64, TradeError> {
            Ok(self.lamports.get(owner).copied().unwrap_or(0))
        }

        async fn latest_blockhash(&self) -> Result<Hash, TradeError> {
            Ok(self.blockhash)
        }
    }

    struct Fixture {
        authority: Pubkey,
        mint: Pubkey,
        seller: Pubkey,
        buyer: Pubkey,
        reader: MockReader,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                authority: Pubkey::new_unique(),
                mint: Pubkey::new_unique(),
                seller: Pubkey::new_unique(),
                buyer: Pubkey::new_unique(),
                reader: MockReader::new(),
            }
        }

        fn escrow_token(&self) -> Pubkey {
            let custodian = derive_escrow(&self.authority, &self.mint).pubkey();
            get_associated_token_address(&custodian, &self.mint)
        }

        fn seller_token(&self) -> Pubkey {
            get_associated_token_address(&self.seller, &self.mint)
        }

        fn buyer_token(&self) -> Pubkey {
            get_associated_token_address(&self.buyer, &self.mint)
        }

        fn builder(self, fee_bps: u16) -> (TradeBuilder<MockReader>, Pubkey, Pubkey, Pubkey) {
            let (mint, seller, buyer) = (self.mint, self.seller, self.buyer);
            (
                TradeBuilder::new(Arc::new(self.reader), self.authority, fee_bps),
                mint,
                seller,
                buyer,
            )
        }
    }

    #[tokio::test]
    async fn test_list_builds_escrow_deposit() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.seller_token(), 1);
        let escrow_token = fx.escrow_token();
        let seller_token = fx.seller_token();
        let (builder, mint, seller, _) = fx.builder(0);

        let prepared = builder
            .build_list(&mint, &seller, 2_500_000_000)
            .await
            .expect("seller holds the asset");

        assert_eq!(prepared.kind, TradeKind::List);
        assert_eq!(prepared.payer, seller);
        assert!(!prepared.needs_escrow_signature);
        assert_eq!(prepared.instructions.len(), 2);

        // Create escrow account if absent, then deposit exactly 1 unit.
        assert_eq!(
            prepared.instructions[0].program_id,
            spl_associated_token_account::id()
        );
        let transfer = &prepared.instructions[1];
        assert_eq!(transfer.program_id, spl_token::id());
        assert_eq!(transfer.accounts[0].pubkey, seller_token);
        assert_eq!(transfer.accounts[1].pubkey, escrow_token);
    }

    #[tokio::test]
    async fn test_list_without_asset_fails() {
        let fx = Fixture::new();
        let seller_token = fx.seller_token();
        let (builder, mint, seller, _) = fx.builder(0);

        let err = builder
            .build_list(&mint, &seller, 1_000)
            .await
            .expect_err("seller holds nothing");

        match err {
            TradeError::InsufficientBalance {
                mint: m,
                token_account,
            } => {
                assert_eq!(m, mint);
                assert_eq!(token_account, seller_token);
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unlist_returns_asset_to_seller() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.escrow_token(), 1);
        let escrow_token = fx.escrow_token();
        let seller_token = fx.seller_token();
        let (builder, mint, seller, _) = fx.builder(0);

        let prepared = builder
            .build_unlist(&mint, &seller)
            .await
            .expect("asset is in escrow");

        assert_eq!(prepared.kind, TradeKind::Unlist);
        assert!(prepared.needs_escrow_signature);
        assert_eq!(prepared.instructions.len(), 2);

        let transfer = &prepared.instructions[1];
        assert_eq!(transfer.accounts[0].pubkey, escrow_token);
        assert_eq!(transfer.accounts[1].pubkey, seller_token);
    }

    #[tokio::test]
    async fn test_unlist_unlisted_asset_fails() {
        let fx = Fixture::new();
        let (builder, mint, seller, _) = fx.builder(0);

        let err = builder
            .build_unlist(&mint, &seller)
            .await
            .expect_err("escrow is empty");

        assert!(matches!(err, TradeError::NotListed { mint: m } if m == mint));
    }

    #[tokio::test]
    async fn test_purchase_splits_payment_and_releases_asset() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.escrow_token(), 1);
        fx.reader.lamports.insert(fx.buyer, 10_000_000_000);
        let authority = fx.authority;
        let escrow_token = fx.escrow_token();
        let buyer_token = fx.buyer_token();
        let (builder, mint, seller, buyer) = fx.builder(250);

        let price = 1_000_000_000u64;
        let prepared = builder
            .build_purchase(&mint, &buyer, &seller, price)
            .await
            .expect("listed and funded");

        assert_eq!(prepared.kind, TradeKind::Purchase);
        assert_eq!(prepared.payer, buyer);
        assert!(prepared.needs_escrow_signature);
        assert_eq!(prepared.instructions.len(), 4);

        // 2.5% commission: 975_000_000 to the seller, 25_000_000 to the
        // marketplace authority.
        assert_eq!(
            prepared.instructions[0],
            system_instruction::transfer(&buyer, &seller, 975_000_000)
        );
        assert_eq!(
            prepared.instructions[1],
            system_instruction::transfer(&buyer, &authority, 25_000_000)
        );

        let release = &prepared.instructions[3];
        assert_eq!(release.program_id, spl_token::id());
        assert_eq!(release.accounts[0].pubkey, escrow_token);
        assert_eq!(release.accounts[1].pubkey, buyer_token);
    }

    #[tokio::test]
    async fn test_purchase_with_zero_commission_omits_fee_transfer() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.escrow_token(), 1);
        fx.reader.lamports.insert(fx.buyer, 10_000_000_000);
        let (builder, mint, seller, buyer) = fx.builder(250);

        // 3 lamports at 250 bps floors to zero commission.
        let prepared = builder
            .build_purchase(&mint, &buyer, &seller, 3)
            .await
            .expect("listed and funded");

        assert_eq!(prepared.instructions.len(), 3);
        assert_eq!(
            prepared.instructions[0],
            system_instruction::transfer(&buyer, &seller, 3)
        );
    }

    #[tokio::test]
    async fn test_purchase_of_unlisted_asset_fails_before_payment() {
        let mut fx = Fixture::new();
        fx.reader.lamports.insert(fx.buyer, 10_000_000_000);
        let (builder, mint, seller, buyer) = fx.builder(250);

        let err = builder
            .build_purchase(&mint, &buyer, &seller, 1_000_000)
            .await
            .expect_err("nothing in escrow");

        assert!(matches!(err, TradeError::NotListed { .. }));
    }

    #[tokio::test]
    async fn test_purchase_underfunded_buyer_fails() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.escrow_token(), 1);
        fx.reader.lamports.insert(fx.buyer, 1_000_000);
        let (builder, mint, seller, buyer) = fx.builder(250);

        let err = builder
            .build_purchase(&mint, &buyer, &seller, 1_000_000)
            .await
            .expect_err("buyer cannot cover price plus headroom");

        match err {
            TradeError::InsufficientFunds {
                required,
                available,
            } => {
                // Buyer account is absent, so rent for its creation counts.
                assert_eq!(required, 1_000_000 + NETWORK_FEE_HEADROOM + TOKEN_ACCOUNT_RENT);
                assert_eq!(available, 1_000_000);
            }
            other => panic!("expected InsufficientFunds, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_purchase_existing_buyer_account_needs_no_rent() {
        let mut fx = Fixture::new();
        fx.reader.token_balances.insert(fx.escrow_token(), 1);
        fx.reader.token_balances.insert(fx.buyer_token(), 0);
        let price = 1_000_000u64;
        fx.reader
            .lamports
            .insert(fx.buyer, price + NETWORK_FEE_HEADROOM);
        let (builder, mint, seller, buyer) = fx.builder(0);

        builder
            .build_purchase(&mint, &buyer, &seller, price)
            .await
            .expect("existing account means no rent headroom");
    }

    #[test]
    fn test_commission_arithmetic() {
        assert_eq!(commission_lamports(1_000_000_000, 250), 25_000_000);
        assert_eq!(commission_lamports(1_000_000_000, 0), 0);
        assert_eq!(commission_lamports(3, 250), 0);
        assert_eq!(commission_lamports(10_000, 10_000), 10_000);
        // No overflow near u64::MAX.
        assert_eq!(
            commission_lamports(u64::MAX, 10_000),
            u64::MAX
        );
    }
}
