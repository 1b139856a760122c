//! Request/response bodies for the HTTP contracts in §4.4 and §4.5.

use serde::{Deserialize, Serialize};

use crate::identity::BirthCertificate;

/// Body of `POST /api/register`. `signature` is base64 ed25519 over
/// `"register:{walletAddress}:{endpoint}"` by the wallet key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub birth_cert: BirthCertificate,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ai_key: Option<String>,
}

/// `GET /health` body, consumed by the Coordinator's liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthView {
    pub agent_name: String,
    pub status: String,
    /// seconds since boot
    pub uptime: u64,
    pub wallet_address: String,
}

/// `GET /attestation` body - fresh values straight from the TEE provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationView {
    pub rtmr3: String,
    pub code_hash: String,
    pub timestamp: i64,
    pub provider: String,
    pub quote: String,
    pub tee_pubkey: String,
}

/// 200 response to a `/collect` call carrying an `X-Payment` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectReceipt {
    pub status: String,
    pub agent: String,
    pub tx_signature: String,
}

/// `POST /api/donation-confirmed` body, sent by an agent's donation watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationNotice {
    pub agent_name: String,
    pub donor: String,
    /// UI units (USDC)
    pub amount: f64,
}

/// `POST /api/agent-message` body. `kind` selects the event type on the bus;
/// anything other than "desperate" is forwarded as trash talk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMessage {
    pub agent_name: String,
    pub message: String,
    #[serde(default)]
    pub kind: Option<String>,
}

/// `POST /api/topup-sol` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopupRequest {
    pub agent_name: String,
    pub wallet_address: String,
}
