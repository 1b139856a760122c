//! Registration pipeline for `POST /api/register`.
//!
//! Steps run in order and short-circuit with the reason that becomes the
//! HTTP 400 body: callback resolution, attestation verification, wallet
//! signature, registration signature, duplicate check, funding, admission.

use std::net::IpAddr;

use super::events::event_types;
use super::funding;
use super::state::{AgentRecord, CoordinatorState};
use crate::config::INITIAL_FUNDING;
use crate::identity::verify_ed25519;
use crate::model::{RegisterRequest, RegisterResponse};

/// True for endpoints the Coordinator could never call back: empty, or
/// pointing at a loopback/unspecified host.
fn is_unreachable_endpoint(endpoint: &str) -> bool {
    if endpoint.trim().is_empty() {
        return true;
    }
    let Ok(parsed) = url::Url::parse(endpoint) else {
        return true;
    };
    match parsed.host_str() {
        None => true,
        Some("localhost") => true,
        Some(host) => match host.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
            Err(_) => false,
        },
    }
}

/// Run the full registration pipeline. `source_ip` is the socket peer,
/// substituted as the callback host when the declared endpoint is missing
/// or loopback (SecretVM publishes port 80 externally). The registration
/// signature is always verified against the *original* endpoint string the
/// agent signed.
pub async fn register_agent(
    state: &CoordinatorState,
    req: RegisterRequest,
    source_ip: Option<IpAddr>,
) -> Result<RegisterResponse, String> {
    let cert = &req.birth_cert;
    let wallet_address = cert.wallet_address.clone();
    let declared_endpoint = req.endpoint.clone().unwrap_or_default();

    let endpoint = if is_unreachable_endpoint(&declared_endpoint) {
        let ip = source_ip.ok_or_else(|| "no reachable endpoint for agent".to_string())?;
        let substituted = format!("http://{}", ip);
        log::info!(
            "[REGISTER] {}: substituting callback {} for '{}'",
            cert.agent_name,
            substituted,
            declared_endpoint
        );
        substituted
    } else {
        declared_endpoint.trim_end_matches('/').to_string()
    };

    // Attestation pipeline (quote, pubkey, TEE signature, rtmr3, allowlist)
    let outcome = state.verifier.verify(cert).await;
    if !outcome.ok {
        log::warn!(
            "[REGISTER] {} rejected: attestation failed: {}",
            cert.agent_name,
            outcome.reason
        );
        return Err(format!("attestation failed: {}", outcome.reason));
    }

    cert.verify_wallet_signature()
        .map_err(|e| format!("wallet signature: {}", e))?;

    // The registration signature binds this wallet to the endpoint it sent
    let register_message = format!("register:{}:{}", wallet_address, declared_endpoint);
    let wallet_pubkey = bs58::decode(&wallet_address)
        .into_vec()
        .map_err(|e| format!("walletAddress is not base58: {}", e))?;
    verify_ed25519(&wallet_pubkey, register_message.as_bytes(), &req.signature)
        .map_err(|e| format!("registration signature: {}", e))?;

    {
        let pool = state.pool.lock().expect("pool lock poisoned");
        if pool.contains_key(&wallet_address) {
            return Err(format!(
                "wallet {} is already registered",
                wallet_address
            ));
        }
    }

    // Fund the wallet once, ever. Failure is forgiven on the mock ledger
    // and surfaced (but still admitted) in production - an unfunded agent
    // simply sits at zero and gets benched.
    let already_funded = {
        let funded = state.funded_wallets.lock().expect("funded lock poisoned");
        funded.contains(&wallet_address)
    };

    let balance = if already_funded {
        match state.chain.token_balance(&wallet_address).await {
            Ok(balance) => balance,
            Err(e) => {
                log::warn!("[REGISTER] balance read for {} failed: {}", wallet_address, e);
                0
            }
        }
    } else {
        match funding::fund_new_agent(state, &wallet_address).await {
            Ok(()) => {
                state
                    .funded_wallets
                    .lock()
                    .expect("funded lock poisoned")
                    .insert(wallet_address.clone());
                INITIAL_FUNDING
            }
            Err(e) if state.chain.is_mock() => {
                log::warn!("[REGISTER] mock funding for {}: {}", wallet_address, e);
                INITIAL_FUNDING
            }
            Err(e) => {
                log::error!("[REGISTER] funding {} failed: {}", wallet_address, e);
                0
            }
        }
    };

    let record = AgentRecord::new(cert.clone(), endpoint, balance);
    let view = record.view();
    {
        let mut pool = state.pool.lock().expect("pool lock poisoned");
        if pool.contains_key(&wallet_address) {
            return Err(format!("wallet {} is already registered", wallet_address));
        }
        pool.insert(wallet_address.clone(), record);
    }

    state
        .events
        .broadcast(event_types::AGENT_JOINED, serde_json::json!(view));

    log::info!(
        "[REGISTER] {} admitted (wallet {}, platform {:?})",
        cert.agent_name,
        wallet_address,
        outcome.platform
    );

    Ok(RegisterResponse {
        success: true,
        message: format!("{} admitted to the table", cert.agent_name),
        secret_ai_key: None,
    })
}
