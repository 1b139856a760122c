//! Birth certificates: the immutable record binding an agent's wallet, TEE
//! key, code measurement, and deployment image.
//!
//! Both signatures cover the identical canonical byte sequence
//! `"{agentName}:{walletAddress}:{dockerImage}:{codeHash}:{rtmr3}:{timestamp}"`:
//! the TEE key proves the code identity, the wallet key proves ownership of
//! the payout address.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::signature::{Keypair, Signer as _};

use crate::tee::TeeProvider;

/// Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthCertificate {
    pub agent_name: String,
    /// base58 Solana pubkey
    pub wallet_address: String,
    pub docker_image: String,
    /// hex sha256 of the code-identity string
    pub code_hash: String,
    /// hex code-measurement register value
    pub rtmr3: String,
    /// ms since epoch
    pub timestamp: i64,
    /// hex ed25519 public key generated inside the enclave
    pub tee_pubkey: String,
    /// base64 hardware-signed blob embedding `tee_pubkey` in report-data
    pub attestation_quote: String,
    /// base64 ed25519 signature over the canonical message by the TEE key
    pub tee_signature: String,
    /// base64 ed25519 signature over the same message by the wallet key
    pub wallet_signature: String,
}

impl BirthCertificate {
    /// The canonical byte sequence both signatures cover.
    pub fn canonical_message(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.agent_name,
            self.wallet_address,
            self.docker_image,
            self.code_hash,
            self.rtmr3,
            self.timestamp
        )
    }

    /// BC-1: the TEE signature verifies with the embedded TEE key.
    pub fn verify_tee_signature(&self) -> Result<(), String> {
        let pubkey = hex::decode(&self.tee_pubkey)
            .map_err(|e| format!("teePubkey is not hex: {}", e))?;
        verify_ed25519(&pubkey, self.canonical_message().as_bytes(), &self.tee_signature)
            .map_err(|e| format!("TEE signature invalid: {}", e))
    }

    /// BC-2: the wallet signature verifies with the key derived from the
    /// base58 wallet address.
    pub fn verify_wallet_signature(&self) -> Result<(), String> {
        let pubkey = bs58::decode(&self.wallet_address)
            .into_vec()
            .map_err(|e| format!("walletAddress is not base58: {}", e))?;
        verify_ed25519(&pubkey, self.canonical_message().as_bytes(), &self.wallet_signature)
            .map_err(|e| format!("wallet signature invalid: {}", e))
    }
}

/// Verify a base64 ed25519 signature over `message` with a 32-byte pubkey.
pub fn verify_ed25519(pubkey: &[u8], message: &[u8], signature_b64: &str) -> Result<(), String> {
    let pubkey: [u8; 32] = pubkey
        .try_into()
        .map_err(|_| format!("pubkey must be 32 bytes, got {}", pubkey.len()))?;
    let verifying =
        VerifyingKey::from_bytes(&pubkey).map_err(|e| format!("bad pubkey: {}", e))?;

    let sig = BASE64
        .decode(signature_b64)
        .map_err(|e| format!("signature is not base64: {}", e))?;
    let sig: [u8; 64] = sig
        .try_into()
        .map_err(|_| "signature must be 64 bytes".to_string())?;

    verifying
        .verify(message, &Signature::from_bytes(&sig))
        .map_err(|e| format!("verification failed: {}", e))
}

/// Stable code-identity input hashed into `code_hash`: the image reference
/// plus the crate version, available in every deployment mode.
pub fn code_identity(docker_image: &str) -> String {
    format!("{}@{}", docker_image, env!("CARGO_PKG_VERSION"))
}

/// Hex sha256 of the code-identity input.
pub fn code_identity_hash(docker_image: &str) -> String {
    hex::encode(Sha256::digest(code_identity(docker_image)))
}

/// Assemble and dual-sign a birth certificate. Every step must succeed or
/// the whole operation fails - an agent without a complete certificate
/// cannot register.
pub async fn build_birth_certificate(
    agent_name: &str,
    wallet: &Keypair,
    tee: &dyn TeeProvider,
    docker_image: &str,
) -> Result<BirthCertificate, String> {
    let rtmr3 = tee.code_measurement().await?;
    let tee_pubkey = tee.tee_public_key().await?;
    let attestation_quote = tee.attestation_quote().await?;

    let code_hash = code_identity_hash(docker_image);
    let timestamp = chrono::Utc::now().timestamp_millis();
    let wallet_address = wallet.pubkey().to_string();

    let mut cert = BirthCertificate {
        agent_name: agent_name.to_string(),
        wallet_address,
        docker_image: docker_image.to_string(),
        code_hash,
        rtmr3,
        timestamp,
        tee_pubkey,
        attestation_quote,
        tee_signature: String::new(),
        wallet_signature: String::new(),
    };

    let message = cert.canonical_message();
    cert.tee_signature = tee.sign(message.as_bytes()).await?;
    cert.wallet_signature = BASE64.encode(wallet.sign_message(message.as_bytes()).as_ref());

    log::info!(
        "[TEE] Birth certificate assembled for {} (wallet {}, rtmr3 {}...)",
        cert.agent_name,
        cert.wallet_address,
        &cert.rtmr3[..16.min(cert.rtmr3.len())]
    );

    Ok(cert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::MockTeeProvider;

    async fn mock_cert(name: &str) -> (BirthCertificate, Keypair) {
        let wallet = Keypair::new();
        let tee = MockTeeProvider::new(name);
        let cert = build_birth_certificate(name, &wallet, &tee, "proofofflip/agent:test")
            .await
            .unwrap();
        (cert, wallet)
    }

    #[tokio::test]
    async fn both_signatures_verify() {
        let (cert, _) = mock_cert("alice").await;
        cert.verify_tee_signature().unwrap();
        cert.verify_wallet_signature().unwrap();
    }

    #[tokio::test]
    async fn canonical_message_is_deterministic() {
        let (cert, _) = mock_cert("alice").await;
        assert_eq!(cert.canonical_message(), cert.canonical_message());
        let expected = format!(
            "alice:{}:proofofflip/agent:test:{}:{}:{}",
            cert.wallet_address, cert.code_hash, cert.rtmr3, cert.timestamp
        );
        assert_eq!(cert.canonical_message(), expected);
    }

    #[tokio::test]
    async fn tampered_tee_signature_fails() {
        let (mut cert, _) = mock_cert("alice").await;
        // Flip one bit in the decoded signature
        let mut sig = BASE64.decode(&cert.tee_signature).unwrap();
        sig[0] ^= 0x01;
        cert.tee_signature = BASE64.encode(sig);
        assert!(cert.verify_tee_signature().is_err());
    }

    #[tokio::test]
    async fn tampered_field_breaks_wallet_signature() {
        let (mut cert, _) = mock_cert("alice").await;
        cert.docker_image = "evil/image:latest".to_string();
        assert!(cert.verify_wallet_signature().is_err());
        assert!(cert.verify_tee_signature().is_err());
    }

    #[tokio::test]
    async fn report_data_embeds_tee_pubkey() {
        let (cert, _) = mock_cert("alice").await;
        let parsed = crate::tee::quote::try_parse_mock(&cert.attestation_quote).unwrap();
        assert!(parsed.report_data.starts_with(&cert.tee_pubkey));
        assert_eq!(parsed.rtmr3, cert.rtmr3);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = serde_json::json!({
            "agentName": "alice",
            "walletAddress": "1111",
            "dockerImage": "img",
            "codeHash": "aa",
            "rtmr3": "bb",
            "timestamp": 1i64,
            "teePubkey": "cc",
            "attestationQuote": "dd",
            "teeSignature": "ee",
            "walletSignature": "ff",
        });
        let cert: BirthCertificate = serde_json::from_value(json).unwrap();
        assert_eq!(cert.agent_name, "alice");
    }
}
