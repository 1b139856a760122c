//! Background watchers: donation ingestion and gas top-ups.
//!
//! The donation watcher polls the wallet's token-account history every
//! fifteen seconds. Signatures observed during this session that are not
//! game payments are donations and get reported to the Coordinator. The
//! first scan records existing history as already seen so old transfers
//! are never double-counted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::AgentContext;
use crate::chain::TokenTransfer;
use crate::config::{
    self, DONATION_POLL_SECS, GAS_POLL_SECS, SOL_TOPUP_THRESHOLD,
};
use crate::model::{DonationNotice, TopupRequest};

const HISTORY_WINDOW: usize = 50;

/// Split fresh history into donations: not yet seen this session and not a
/// recorded game payment. Everything returned is marked seen by the caller.
pub fn select_donations<'a>(
    transfers: &'a [TokenTransfer],
    seen: &HashSet<String>,
    ctx: &AgentContext,
) -> Vec<&'a TokenTransfer> {
    transfers
        .iter()
        .filter(|t| !seen.contains(&t.signature))
        .filter(|t| !ctx.game_tx_signatures.contains_key(&t.signature))
        .collect()
}

/// Poll the token-account history and report donations to the Coordinator.
pub async fn run_donation_watcher(ctx: Arc<AgentContext>) {
    let wallet = ctx.wallet_address();
    let mut seen: HashSet<String> = HashSet::new();
    let mut primed = false;
    let mut ticker = interval(Duration::from_secs(DONATION_POLL_SECS));

    log::info!("[DONATION] Watcher started for {}", wallet);

    loop {
        ticker.tick().await;

        let transfers = match ctx.chain.recent_token_transfers(&wallet, HISTORY_WINDOW).await {
            Ok(transfers) => transfers,
            Err(e) => {
                log::warn!("[DONATION] History poll failed: {}", e);
                continue;
            }
        };

        if !primed {
            // Pre-session history is not this session's donations
            for transfer in &transfers {
                seen.insert(transfer.signature.clone());
            }
            primed = true;
            log::info!(
                "[DONATION] Primed with {} existing transfers",
                seen.len()
            );
            continue;
        }

        let donations: Vec<DonationNotice> = select_donations(&transfers, &seen, &ctx)
            .into_iter()
            .map(|t| DonationNotice {
                agent_name: ctx.name.clone(),
                donor: t.sender.clone(),
                amount: config::to_ui_amount(t.amount),
            })
            .collect();

        for transfer in &transfers {
            seen.insert(transfer.signature.clone());
        }

        for donation in donations {
            log::info!(
                "[DONATION] {} USDC from {}",
                donation.amount,
                donation.donor
            );
            let url = format!("{}/api/donation-confirmed", ctx.coordinator_url);
            if let Err(e) = ctx.http.post(&url).json(&donation).send().await {
                log::warn!("[DONATION] Report to coordinator failed: {}", e);
            }
        }
    }
}

/// Ask the Coordinator for gas whenever the native balance runs low; the
/// Coordinator enforces its own throttle.
pub async fn run_gas_watcher(ctx: Arc<AgentContext>) {
    let wallet = ctx.wallet_address();
    let mut ticker = interval(Duration::from_secs(GAS_POLL_SECS));

    loop {
        ticker.tick().await;

        let balance = match ctx.chain.sol_balance(&wallet).await {
            Ok(balance) => balance,
            Err(e) => {
                log::warn!("[GAS] Balance check failed: {}", e);
                continue;
            }
        };
        if balance >= SOL_TOPUP_THRESHOLD {
            continue;
        }

        log::info!(
            "[GAS] Balance {} below threshold {}, requesting top-up",
            balance,
            SOL_TOPUP_THRESHOLD
        );
        let url = format!("{}/api/topup-sol", ctx.coordinator_url);
        let req = TopupRequest {
            agent_name: ctx.name.clone(),
            wallet_address: wallet.clone(),
        };
        if let Err(e) = ctx.http.post(&url).json(&req).send().await {
            log::warn!("[GAS] Top-up request failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::runtime::test_support::mock_context;

    fn transfer(signature: &str, sender: &str, amount: u64) -> TokenTransfer {
        TokenTransfer {
            signature: signature.to_string(),
            sender: sender.to_string(),
            amount,
        }
    }

    #[tokio::test]
    async fn game_payments_are_not_donations() {
        let ctx = mock_context("alice").await;
        // bob's stake arrives via /collect and is recorded
        ctx.record_game_tx("T1");

        let history = vec![
            transfer("T1", "BobWallet", 10_000),
            transfer("T2", "GenerousStranger", 250_000),
        ];
        let seen = HashSet::new();

        let donations = select_donations(&history, &seen, &ctx);
        assert_eq!(donations.len(), 1);
        assert_eq!(donations[0].signature, "T2");
        assert_eq!(donations[0].amount, 250_000);
        assert_eq!(crate::config::to_ui_amount(donations[0].amount), 0.25);
    }

    #[tokio::test]
    async fn already_seen_transfers_are_skipped() {
        let ctx = mock_context("alice").await;
        let history = vec![transfer("T1", "donor", 100)];
        let mut seen = HashSet::new();
        seen.insert("T1".to_string());

        assert!(select_donations(&history, &seen, &ctx).is_empty());
    }
}
