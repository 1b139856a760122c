//! Persisted identity blobs.
//!
//! The agent keeps a single `agent-state.json` holding its wallet secret
//! key and birth certificate; the Coordinator keeps its wallet bytes in
//! `dashboard-wallet.json` and its certificate in `dashboard-identity.json`.
//! All writes are write-then-rename so a crash never leaves a torn file.

use serde::{Deserialize, Serialize};
use solana_sdk::signature::Keypair;
use std::fs;
use std::path::{Path, PathBuf};

use super::BirthCertificate;

const AGENT_STATE_FILE: &str = "agent-state.json";
const COORDINATOR_WALLET_FILE: &str = "dashboard-wallet.json";
const COORDINATOR_IDENTITY_FILE: &str = "dashboard-identity.json";

/// Everything the agent persists across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStateBlob {
    /// 64-byte keypair bytes
    pub secret_key: Vec<u8>,
    pub birth_cert: BirthCertificate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality_config: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoordinatorIdentityBlob {
    birth_cert: BirthCertificate,
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("mkdir {:?}: {}", parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| format!("write {:?}: {}", tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| format!("rename {:?}: {}", tmp, e))
}

fn agent_state_path(state_dir: &str) -> PathBuf {
    Path::new(state_dir).join(AGENT_STATE_FILE)
}

/// Load the agent's persisted identity, if any.
pub fn load_agent_state(state_dir: &str) -> Result<Option<AgentStateBlob>, String> {
    let path = agent_state_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(|e| format!("read {:?}: {}", path, e))?;
    let blob: AgentStateBlob =
        serde_json::from_slice(&bytes).map_err(|e| format!("corrupt agent state: {}", e))?;
    if blob.secret_key.len() != 64 {
        return Err(format!(
            "corrupt agent state: secret key is {} bytes",
            blob.secret_key.len()
        ));
    }
    Ok(Some(blob))
}

pub fn save_agent_state(state_dir: &str, blob: &AgentStateBlob) -> Result<(), String> {
    let bytes = serde_json::to_vec_pretty(blob).map_err(|e| format!("encode state: {}", e))?;
    write_atomic(&agent_state_path(state_dir), &bytes)
}

/// Load the Coordinator wallet, or None on first boot.
pub fn load_coordinator_wallet(state_dir: &str) -> Result<Option<Keypair>, String> {
    let path = Path::new(state_dir).join(COORDINATOR_WALLET_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(|e| format!("read {:?}: {}", path, e))?;
    let key_bytes: Vec<u8> =
        serde_json::from_slice(&bytes).map_err(|e| format!("corrupt wallet file: {}", e))?;
    let keypair =
        Keypair::from_bytes(&key_bytes).map_err(|e| format!("corrupt wallet key: {}", e))?;
    Ok(Some(keypair))
}

pub fn save_coordinator_wallet(state_dir: &str, wallet: &Keypair) -> Result<(), String> {
    let bytes = serde_json::to_vec(&wallet.to_bytes().to_vec())
        .map_err(|e| format!("encode wallet: {}", e))?;
    write_atomic(&Path::new(state_dir).join(COORDINATOR_WALLET_FILE), &bytes)
}

pub fn load_coordinator_identity(state_dir: &str) -> Result<Option<BirthCertificate>, String> {
    let path = Path::new(state_dir).join(COORDINATOR_IDENTITY_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path).map_err(|e| format!("read {:?}: {}", path, e))?;
    let blob: CoordinatorIdentityBlob =
        serde_json::from_slice(&bytes).map_err(|e| format!("corrupt identity file: {}", e))?;
    Ok(Some(blob.birth_cert))
}

pub fn save_coordinator_identity(
    state_dir: &str,
    birth_cert: &BirthCertificate,
) -> Result<(), String> {
    let blob = CoordinatorIdentityBlob {
        birth_cert: birth_cert.clone(),
    };
    let bytes = serde_json::to_vec_pretty(&blob).map_err(|e| format!("encode identity: {}", e))?;
    write_atomic(&Path::new(state_dir).join(COORDINATOR_IDENTITY_FILE), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::build_birth_certificate;
    use crate::tee::MockTeeProvider;
    use solana_sdk::signature::Signer;

    #[tokio::test]
    async fn agent_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().to_str().unwrap();

        assert!(load_agent_state(state_dir).unwrap().is_none());

        let wallet = Keypair::new();
        let tee = MockTeeProvider::new("alice");
        let cert = build_birth_certificate("alice", &wallet, &tee, "img:test")
            .await
            .unwrap();

        let blob = AgentStateBlob {
            secret_key: wallet.to_bytes().to_vec(),
            birth_cert: cert.clone(),
            personality_config: None,
        };
        save_agent_state(state_dir, &blob).unwrap();

        let loaded = load_agent_state(state_dir).unwrap().expect("state exists");
        assert_eq!(loaded.secret_key, wallet.to_bytes().to_vec());
        assert_eq!(loaded.birth_cert.rtmr3, cert.rtmr3);

        let restored = Keypair::from_bytes(&loaded.secret_key).unwrap();
        assert_eq!(restored.pubkey(), wallet.pubkey());
    }

    #[tokio::test]
    async fn coordinator_blobs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().to_str().unwrap();

        assert!(load_coordinator_wallet(state_dir).unwrap().is_none());

        let wallet = Keypair::new();
        save_coordinator_wallet(state_dir, &wallet).unwrap();
        let loaded = load_coordinator_wallet(state_dir).unwrap().unwrap();
        assert_eq!(loaded.pubkey(), wallet.pubkey());

        let tee = MockTeeProvider::new("dashboard");
        let cert = build_birth_certificate("dashboard", &wallet, &tee, "img:test")
            .await
            .unwrap();
        save_coordinator_identity(state_dir, &cert).unwrap();
        let loaded = load_coordinator_identity(state_dir).unwrap().unwrap();
        assert_eq!(loaded.wallet_address, cert.wallet_address);
    }

    #[test]
    fn truncated_secret_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGENT_STATE_FILE);
        std::fs::write(
            &path,
            serde_json::json!({
                "secretKey": [1, 2, 3],
                "birthCert": {
                    "agentName": "x", "walletAddress": "x", "dockerImage": "x",
                    "codeHash": "x", "rtmr3": "x", "timestamp": 0,
                    "teePubkey": "x", "attestationQuote": "x",
                    "teeSignature": "x", "walletSignature": "x"
                }
            })
            .to_string(),
        )
        .unwrap();
        assert!(load_agent_state(dir.path().to_str().unwrap()).is_err());
    }
}
