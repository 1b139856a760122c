//! Blockchain interface.
//!
//! Everything the casino needs from Solana sits behind [`ChainClient`]:
//! balances, SPL transfers (with ATA creation), SOL gas transfers, and the
//! token-account history the donation watcher polls. Two variants:
//!
//! - **Solana mode**: JSON-RPC against the configured endpoint at
//!   `confirmed` commitment
//! - **Mock mode**: an in-memory ledger producing `mock-tx-*` signatures,
//!   used by tests and local `TEE_PROVIDER=mock` runs

mod mock;
mod solana;

pub use mock::MockChain;
pub use solana::SolanaChain;

use async_trait::async_trait;
use solana_sdk::signature::Keypair;
use std::sync::Arc;

use crate::config;

/// One observed inbound transfer on a wallet's token account.
#[derive(Debug, Clone)]
pub struct TokenTransfer {
    pub signature: String,
    /// base58 wallet of the sender
    pub sender: String,
    /// USDC base units received
    pub amount: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native balance in lamports
    async fn sol_balance(&self, wallet: &str) -> Result<u64, String>;

    /// USDC balance in base units (0 if the token account does not exist)
    async fn token_balance(&self, wallet: &str) -> Result<u64, String>;

    /// Transfer `amount` base units of USDC to `to_wallet`, creating the
    /// recipient ATA if needed (sender pays rent). Returns the confirmed
    /// transaction signature - the settlement receipt.
    async fn transfer_token(
        &self,
        from: &Keypair,
        to_wallet: &str,
        amount: u64,
    ) -> Result<String, String>;

    /// Transfer lamports to `to_wallet`.
    async fn transfer_sol(
        &self,
        from: &Keypair,
        to_wallet: &str,
        lamports: u64,
    ) -> Result<String, String>;

    /// Most recent inbound transfers on `wallet`'s token account,
    /// newest first.
    async fn recent_token_transfers(
        &self,
        wallet: &str,
        limit: usize,
    ) -> Result<Vec<TokenTransfer>, String>;

    /// True for the in-memory variant; funding failures are forgiven there.
    fn is_mock(&self) -> bool {
        false
    }
}

/// Chain client matching the TEE mode: mock TEE runs settle against the
/// in-memory ledger so local scenarios work offline.
pub fn create_chain_client() -> Arc<dyn ChainClient> {
    if config::tee_provider().to_lowercase() == "mock" {
        log::info!("[CHAIN] Using in-memory mock ledger");
        Arc::new(MockChain::new())
    } else {
        let url = config::rpc_url();
        log::info!("[CHAIN] Using Solana RPC at {}", url);
        Arc::new(SolanaChain::new(&url))
    }
}
