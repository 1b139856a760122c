//! Agent boot sequence: load-or-generate identity, then register with the
//! Coordinator.
//!
//! Boot is unborn -> booting -> registering -> running; any irrecoverable
//! error (no TEE access, corrupt persisted key) aborts the process before
//! it ever serves traffic.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::AgentContext;
use crate::chain::create_chain_client;
use crate::config::{self, env_vars, REGISTER_ATTEMPTS, REGISTER_RETRY_SECS};
use crate::identity::{
    build_birth_certificate, load_agent_state, save_agent_state, AgentStateBlob,
};
use crate::model::{RegisterRequest, RegisterResponse};
use crate::tee::create_tee_provider;

fn agent_name() -> String {
    std::env::var(env_vars::AGENT_NAME).unwrap_or_else(|_| {
        let generated = format!("agent-{}", &Uuid::new_v4().to_string()[..8]);
        log::warn!("[BOOT] {} not set, using {}", env_vars::AGENT_NAME, generated);
        generated
    })
}

/// Load-or-generate the agent identity and assemble the shared context.
pub async fn boot() -> Result<Arc<AgentContext>, String> {
    let name = agent_name();
    let tee = create_tee_provider(&name)?;
    let chain = create_chain_client();
    let state_dir = config::state_dir();
    let docker_image = config::docker_image();

    let (wallet, birth_cert) = match load_agent_state(&state_dir)? {
        Some(blob) => {
            log::info!("[BOOT] Restoring persisted identity from {}", state_dir);
            let wallet = Keypair::from_bytes(&blob.secret_key)
                .map_err(|e| format!("persisted wallet key corrupt: {}", e))?;

            // Drift check is warn-only: a fresh registration with a bad
            // quote gets rejected by the Coordinator anyway
            match tee.code_measurement().await {
                Ok(current) if !current.eq_ignore_ascii_case(&blob.birth_cert.rtmr3) => {
                    log::warn!(
                        "[BOOT] RTMR3 drift: measurement {} differs from certificate {} - possible tamper",
                        current,
                        blob.birth_cert.rtmr3
                    );
                }
                Err(e) => log::warn!("[BOOT] Could not re-read RTMR3: {}", e),
                _ => {}
            }

            (wallet, blob.birth_cert)
        }
        None => {
            log::info!("[BOOT] First boot, generating identity");
            let wallet = Keypair::new();
            let cert =
                build_birth_certificate(&name, &wallet, tee.as_ref(), &docker_image).await?;
            save_agent_state(
                &state_dir,
                &AgentStateBlob {
                    secret_key: wallet.to_bytes().to_vec(),
                    birth_cert: cert.clone(),
                    personality_config: None,
                },
            )?;
            (wallet, cert)
        }
    };

    // The certificate's name is the identity; the env var only seeds it
    let name = birth_cert.agent_name.clone();

    Ok(Arc::new(AgentContext {
        name,
        wallet: Arc::new(wallet),
        birth_cert,
        tee,
        chain,
        coordinator_url: config::coordinator_url(),
        game_tx_signatures: Arc::new(DashMap::new()),
        started_at: Instant::now(),
        http: reqwest::Client::new(),
    }))
}

/// The endpoint the agent advertises: the override when set, otherwise a
/// loopback URL the Coordinator replaces with the source address.
pub fn advertised_endpoint(port: u16) -> String {
    std::env::var(env_vars::AGENT_ENDPOINT)
        .unwrap_or_else(|_| format!("http://127.0.0.1:{}", port))
}

/// POST the registration to the Coordinator: bounded retries for transient
/// failures, immediate give-up on a 400 (a rejected certificate will not
/// get better by retrying).
pub async fn register_with_retries(ctx: &AgentContext, endpoint: &str) -> Result<(), String> {
    let message = format!("register:{}:{}", ctx.wallet_address(), endpoint);
    let request = RegisterRequest {
        birth_cert: ctx.birth_cert.clone(),
        endpoint: Some(endpoint.to_string()),
        signature: BASE64.encode(ctx.wallet.sign_message(message.as_bytes()).as_ref()),
    };
    let url = format!("{}/api/register", ctx.coordinator_url);

    for attempt in 1..=REGISTER_ATTEMPTS {
        log::info!(
            "[BOOT] Registering with {} (attempt {}/{})",
            url,
            attempt,
            REGISTER_ATTEMPTS
        );
        match ctx.http.post(&url).json(&request).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: RegisterResponse = resp
                    .json()
                    .await
                    .map_err(|e| format!("unparseable registration response: {}", e))?;
                log::info!("[BOOT] Registered: {}", body.message);
                return Ok(());
            }
            Ok(resp) if resp.status().as_u16() == 400 => {
                let reason = resp
                    .json::<RegisterResponse>()
                    .await
                    .map(|r| r.message)
                    .unwrap_or_else(|_| "unknown".to_string());
                return Err(format!("registration rejected: {}", reason));
            }
            Ok(resp) => {
                log::warn!("[BOOT] Registration returned {}", resp.status());
            }
            Err(e) => {
                log::warn!("[BOOT] Registration attempt failed: {}", e);
            }
        }
        if attempt < REGISTER_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(REGISTER_RETRY_SECS)).await;
        }
    }

    Err(format!(
        "registration failed after {} attempts",
        REGISTER_ATTEMPTS
    ))
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::chain::MockChain;
    use crate::tee::MockTeeProvider;

    /// An agent context wired to the mock TEE and the mock ledger.
    pub async fn mock_context(name: &str) -> Arc<AgentContext> {
        let wallet = Keypair::new();
        let tee = Arc::new(MockTeeProvider::new(name));
        let birth_cert = build_birth_certificate(name, &wallet, tee.as_ref(), "img:test")
            .await
            .unwrap();
        Arc::new(AgentContext {
            name: name.to_string(),
            wallet: Arc::new(wallet),
            birth_cert,
            tee,
            chain: Arc::new(MockChain::new()),
            coordinator_url: "http://coordinator.test".to_string(),
            game_tx_signatures: Arc::new(DashMap::new()),
            started_at: Instant::now(),
            http: reqwest::Client::new(),
        })
    }
}
