//! Deterministic mock TEE provider for local runs and tests.
//!
//! Keys and measurements are derived by hashing the agent name, so the
//! same name always yields the same identity across restarts - no network,
//! no hardware.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256, Sha384};

use super::quote::MockQuote;
use super::TeeProvider;

const KEY_DOMAIN: &str = "proof-of-flip:tee-key";
const RTMR3_DOMAIN: &str = "proof-of-flip:rtmr3";

pub struct MockTeeProvider {
    signing_key: SigningKey,
    rtmr3: String,
}

impl MockTeeProvider {
    pub fn new(agent_name: &str) -> Self {
        let seed: [u8; 32] = Sha256::digest(format!("{}:{}", KEY_DOMAIN, agent_name)).into();
        let signing_key = SigningKey::from_bytes(&seed);

        let measurement = Sha384::digest(format!("{}:{}", RTMR3_DOMAIN, agent_name));

        Self {
            signing_key,
            rtmr3: hex::encode(measurement),
        }
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }
}

#[async_trait]
impl TeeProvider for MockTeeProvider {
    async fn code_measurement(&self) -> Result<String, String> {
        Ok(self.rtmr3.clone())
    }

    async fn tee_public_key(&self) -> Result<String, String> {
        Ok(self.public_key_hex())
    }

    async fn attestation_quote(&self) -> Result<String, String> {
        let pubkey = self.public_key_hex();
        let quote = MockQuote {
            mock: true,
            // report_data is 64 bytes on hardware; pad the 32-byte key
            report_data: format!("{:0<128}", pubkey),
            rtmr3: self.rtmr3.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        let json = serde_json::to_vec(&quote).map_err(|e| format!("quote encode: {}", e))?;
        Ok(BASE64.encode(json))
    }

    async fn sign(&self, payload: &[u8]) -> Result<String, String> {
        let signature = self.signing_key.sign(payload);
        Ok(BASE64.encode(signature.to_bytes()))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tee::quote::try_parse_mock;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    #[tokio::test]
    async fn identity_is_deterministic_across_instances() {
        let a = MockTeeProvider::new("alice");
        let b = MockTeeProvider::new("alice");
        assert_eq!(
            a.tee_public_key().await.unwrap(),
            b.tee_public_key().await.unwrap()
        );
        assert_eq!(
            a.code_measurement().await.unwrap(),
            b.code_measurement().await.unwrap()
        );
    }

    #[tokio::test]
    async fn different_names_differ() {
        let a = MockTeeProvider::new("alice");
        let b = MockTeeProvider::new("bob");
        assert_ne!(
            a.tee_public_key().await.unwrap(),
            b.tee_public_key().await.unwrap()
        );
        assert_ne!(
            a.code_measurement().await.unwrap(),
            b.code_measurement().await.unwrap()
        );
    }

    #[tokio::test]
    async fn rtmr3_is_48_bytes() {
        let provider = MockTeeProvider::new("alice");
        assert_eq!(provider.code_measurement().await.unwrap().len(), 96);
    }

    #[tokio::test]
    async fn quote_embeds_pubkey_in_report_data() {
        let provider = MockTeeProvider::new("alice");
        let quote = provider.attestation_quote().await.unwrap();
        let parsed = try_parse_mock(&quote).expect("mock quote");
        let pubkey = provider.tee_public_key().await.unwrap();
        assert_eq!(parsed.report_data.len(), 128);
        assert!(parsed.report_data.starts_with(&pubkey));
    }

    #[tokio::test]
    async fn signatures_verify_with_the_published_key() {
        let provider = MockTeeProvider::new("alice");
        let payload = b"alice:wallet:image:hash:rtmr3:12345";
        let sig_b64 = provider.sign(payload).await.unwrap();

        let pubkey_bytes: [u8; 32] = hex::decode(provider.tee_public_key().await.unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        let verifying = VerifyingKey::from_bytes(&pubkey_bytes).unwrap();
        let sig_bytes: [u8; 64] = BASE64
            .decode(sig_b64)
            .unwrap()
            .try_into()
            .unwrap();
        assert!(verifying
            .verify(payload, &Signature::from_bytes(&sig_bytes))
            .is_ok());
    }
}
