//! Initial funding and gas top-ups, paid from the Coordinator wallet.

use std::time::{Duration, Instant};

use super::state::CoordinatorState;
use crate::config::{
    INITIAL_FUNDING, INITIAL_GAS_LAMPORTS, SOL_TOPUP_AMOUNT, SOL_TOPUP_COOLDOWN_SECS,
    SOL_TOPUP_THRESHOLD,
};
use crate::model::TopupRequest;

/// Send a fresh wallet its starting gas and one unit of stablecoin.
/// Callers record the wallet in `funded_wallets` only on success.
pub async fn fund_new_agent(state: &CoordinatorState, wallet_address: &str) -> Result<(), String> {
    log::info!("[FUND] Funding new wallet {}", wallet_address);

    state
        .chain
        .transfer_sol(&state.wallet, wallet_address, INITIAL_GAS_LAMPORTS)
        .await
        .map_err(|e| format!("gas funding failed: {}", e))?;

    state
        .chain
        .transfer_token(&state.wallet, wallet_address, INITIAL_FUNDING)
        .await
        .map_err(|e| format!("stablecoin funding failed: {}", e))?;

    Ok(())
}

/// Handle an agent's `POST /api/topup-sol`: verify the requester is in the
/// pool, check the on-chain balance, and send gas - at most once per
/// wallet per cooldown window.
pub async fn topup_sol(state: &CoordinatorState, req: &TopupRequest) -> Result<String, String> {
    {
        let pool = state.pool.lock().expect("pool lock poisoned");
        match pool.get(&req.wallet_address) {
            Some(record) if record.name == req.agent_name => {}
            _ => return Err("unknown agent".to_string()),
        }
    }

    {
        let topups = state.topups.lock().expect("topups lock poisoned");
        if let Some(last) = topups.get(&req.wallet_address) {
            if last.elapsed() < Duration::from_secs(SOL_TOPUP_COOLDOWN_SECS) {
                return Err("top-up throttled, try again later".to_string());
            }
        }
    }

    let balance = state.chain.sol_balance(&req.wallet_address).await?;
    if balance >= SOL_TOPUP_THRESHOLD {
        return Ok("balance sufficient, no top-up needed".to_string());
    }

    let signature = state
        .chain
        .transfer_sol(&state.wallet, &req.wallet_address, SOL_TOPUP_AMOUNT)
        .await?;

    state
        .topups
        .lock()
        .expect("topups lock poisoned")
        .insert(req.wallet_address.clone(), Instant::now());

    log::info!(
        "[FUND] Topped up {} with {} lamports ({})",
        req.agent_name,
        SOL_TOPUP_AMOUNT,
        signature
    );
    Ok(format!("topped up: {}", signature))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainClient;
    use crate::coordinator::state::test_support::{mock_state, seed_agent};

    #[tokio::test]
    async fn topup_rejects_unknown_agents() {
        let (state, _) = mock_state().await;
        let req = TopupRequest {
            agent_name: "ghost".to_string(),
            wallet_address: "nowhere".to_string(),
        };
        assert!(topup_sol(&state, &req).await.is_err());
    }

    #[tokio::test]
    async fn topup_is_throttled_per_wallet() {
        let (state, chain) = mock_state().await;
        let (wallet, _) = seed_agent(&state, "alice", 1_000_000).await;
        let req = TopupRequest {
            agent_name: "alice".to_string(),
            wallet_address: wallet.clone(),
        };

        let first = topup_sol(&state, &req).await.unwrap();
        assert!(first.starts_with("topped up"));
        assert_eq!(chain.sol_balance(&wallet).await.unwrap(), SOL_TOPUP_AMOUNT);

        // Second request inside the cooldown is refused
        let second = topup_sol(&state, &req).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn topup_skips_wallets_with_enough_gas() {
        let (state, chain) = mock_state().await;
        let (wallet, _) = seed_agent(&state, "alice", 1_000_000).await;
        chain.credit_sol(&wallet, SOL_TOPUP_THRESHOLD);

        let req = TopupRequest {
            agent_name: "alice".to_string(),
            wallet_address: wallet.clone(),
        };
        let msg = topup_sol(&state, &req).await.unwrap();
        assert!(msg.contains("sufficient"));
        assert_eq!(chain.sol_balance(&wallet).await.unwrap(), SOL_TOPUP_THRESHOLD);
    }
}
