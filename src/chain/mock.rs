//! In-memory ledger used by tests and `TEE_PROVIDER=mock` runs.
//!
//! Transfers settle instantly with `mock-tx-*` signatures. The sender is
//! debited saturating (faucet semantics) so offline runs never stall on
//! funding; balance accounting under test lives in the Coordinator, not
//! here.

use async_trait::async_trait;
use dashmap::DashMap;
use solana_sdk::signature::{Keypair, Signer};
use uuid::Uuid;

use super::{ChainClient, TokenTransfer};

#[derive(Default)]
pub struct MockChain {
    token: DashMap<String, u64>,
    sol: DashMap<String, u64>,
    /// recipient wallet -> inbound transfers, oldest first
    history: DashMap<String, Vec<TokenTransfer>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a wallet directly (test setup, third-party donations).
    pub fn deposit(&self, to_wallet: &str, sender: &str, amount: u64) -> String {
        let signature = format!("mock-tx-{}", Uuid::new_v4());
        *self.token.entry(to_wallet.to_string()).or_insert(0) += amount;
        self.history
            .entry(to_wallet.to_string())
            .or_default()
            .push(TokenTransfer {
                signature: signature.clone(),
                sender: sender.to_string(),
                amount,
            });
        signature
    }

    pub fn credit_sol(&self, wallet: &str, lamports: u64) {
        *self.sol.entry(wallet.to_string()).or_insert(0) += lamports;
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn sol_balance(&self, wallet: &str) -> Result<u64, String> {
        Ok(self.sol.get(wallet).map(|b| *b).unwrap_or(0))
    }

    async fn token_balance(&self, wallet: &str) -> Result<u64, String> {
        Ok(self.token.get(wallet).map(|b| *b).unwrap_or(0))
    }

    async fn transfer_token(
        &self,
        from: &Keypair,
        to_wallet: &str,
        amount: u64,
    ) -> Result<String, String> {
        let from_wallet = from.pubkey().to_string();
        {
            let mut balance = self.token.entry(from_wallet.clone()).or_insert(0);
            *balance = balance.saturating_sub(amount);
        }
        Ok(self.deposit(to_wallet, &from_wallet, amount))
    }

    async fn transfer_sol(
        &self,
        from: &Keypair,
        to_wallet: &str,
        lamports: u64,
    ) -> Result<String, String> {
        let from_wallet = from.pubkey().to_string();
        {
            let mut balance = self.sol.entry(from_wallet).or_insert(0);
            *balance = balance.saturating_sub(lamports);
        }
        *self.sol.entry(to_wallet.to_string()).or_insert(0) += lamports;
        Ok(format!("mock-tx-{}", Uuid::new_v4()))
    }

    async fn recent_token_transfers(
        &self,
        wallet: &str,
        limit: usize,
    ) -> Result<Vec<TokenTransfer>, String> {
        let transfers = self
            .history
            .get(wallet)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(transfers)
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transfer_moves_balance_and_records_history() {
        let chain = MockChain::new();
        let alice = Keypair::new();
        let bob = Keypair::new().pubkey().to_string();

        chain.deposit(&alice.pubkey().to_string(), "faucet", 1_000_000);
        let sig = chain.transfer_token(&alice, &bob, 10_000).await.unwrap();
        assert!(sig.starts_with("mock-tx-"));

        assert_eq!(
            chain.token_balance(&alice.pubkey().to_string()).await.unwrap(),
            990_000
        );
        assert_eq!(chain.token_balance(&bob).await.unwrap(), 10_000);

        let transfers = chain.recent_token_transfers(&bob, 10).await.unwrap();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].signature, sig);
        assert_eq!(transfers[0].sender, alice.pubkey().to_string());
        assert_eq!(transfers[0].amount, 10_000);
    }

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let chain = MockChain::new();
        for i in 0..5 {
            chain.deposit("wallet", "donor", i + 1);
        }
        let transfers = chain.recent_token_transfers("wallet", 2).await.unwrap();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].amount, 5);
        assert_eq!(transfers[1].amount, 4);
    }
}
