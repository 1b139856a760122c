//! Attestation verification pipeline.
//!
//! Single entry point: [`AttestationVerifier::verify`]. Rules run in order
//! and any failure short-circuits with a machine-parsable reason that
//! doubles as the HTTP 400 body on registration. Allowlist decisions are
//! never delegated to the caller - it only sees the outcome.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::config::env_vars;
use crate::identity::BirthCertificate;
use crate::tee::quote::{try_parse_mock, Platform, QuoteParser};

/// How RTMR3 values are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistMode {
    /// Accept any measurement (mock/local only)
    Open,
    /// Trust-on-first-use: the first verified measurement is locked in
    Tofu,
    /// Preloaded from configuration
    Explicit,
}

/// Set of accepted code-measurement values.
pub struct Rtmr3Allowlist {
    mode: AllowlistMode,
    values: Mutex<HashSet<String>>,
}

impl Rtmr3Allowlist {
    pub fn new(mode: AllowlistMode, values: impl IntoIterator<Item = String>) -> Self {
        Self {
            mode,
            values: Mutex::new(values.into_iter().map(|v| v.to_lowercase()).collect()),
        }
    }

    pub fn open() -> Self {
        Self::new(AllowlistMode::Open, [])
    }

    /// Parse `RTMR3_ALLOWLIST`: "open", "tofu" (default), or a
    /// comma-separated list of accepted hex values.
    pub fn from_env() -> Self {
        match std::env::var(env_vars::RTMR3_ALLOWLIST) {
            Err(_) => Self::new(AllowlistMode::Tofu, []),
            Ok(raw) => match raw.trim().to_lowercase().as_str() {
                "" | "tofu" => Self::new(AllowlistMode::Tofu, []),
                "open" => Self::open(),
                list => Self::new(
                    AllowlistMode::Explicit,
                    list.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
                ),
            },
        }
    }

    pub fn mode(&self) -> AllowlistMode {
        self.mode
    }

    /// Check a measurement, locking it in first when in TOFU mode.
    fn admit(&self, rtmr3: &str) -> Result<(), String> {
        let rtmr3 = rtmr3.to_lowercase();
        let mut values = self.values.lock().expect("allowlist lock poisoned");
        match self.mode {
            AllowlistMode::Open => Ok(()),
            AllowlistMode::Tofu => {
                if values.is_empty() {
                    log::info!("[VERIFY] TOFU: locking RTMR3 {}...", &rtmr3[..16.min(rtmr3.len())]);
                    values.insert(rtmr3);
                    Ok(())
                } else if values.contains(&rtmr3) {
                    Ok(())
                } else {
                    Err("rtmr3 not in allowlist (TOFU lock differs)".to_string())
                }
            }
            AllowlistMode::Explicit => {
                if values.contains(&rtmr3) {
                    Ok(())
                } else {
                    Err("rtmr3 not in allowlist".to_string())
                }
            }
        }
    }
}

/// Result of a verification run.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub ok: bool,
    pub reason: String,
    pub rtmr3: Option<String>,
    pub tee_pubkey: Option<String>,
    pub platform: Option<Platform>,
}

impl VerifyOutcome {
    fn pass(cert: &BirthCertificate, platform: Platform) -> Self {
        Self {
            ok: true,
            reason: "verified".to_string(),
            rtmr3: Some(cert.rtmr3.to_lowercase()),
            tee_pubkey: Some(cert.tee_pubkey.to_lowercase()),
            platform: Some(platform),
        }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            rtmr3: None,
            tee_pubkey: None,
            platform: None,
        }
    }
}

pub struct AttestationVerifier {
    parser: QuoteParser,
    allowlist: Rtmr3Allowlist,
}

impl AttestationVerifier {
    pub fn new(parser: QuoteParser, allowlist: Rtmr3Allowlist) -> Self {
        Self { parser, allowlist }
    }

    pub fn from_env() -> Self {
        Self::new(QuoteParser::from_env(), Rtmr3Allowlist::from_env())
    }

    /// Validate a birth certificate end-to-end: quote, embedded pubkey,
    /// signatures, RTMR3 consistency, allowlist membership.
    pub async fn verify(&self, cert: &BirthCertificate) -> VerifyOutcome {
        // Mock quotes take the short path: signature + allowlist only
        if let Some(mock) = try_parse_mock(&cert.attestation_quote) {
            if !mock
                .report_data
                .to_lowercase()
                .starts_with(&cert.tee_pubkey.to_lowercase())
            {
                return VerifyOutcome::fail("pubkey mismatch: report_data does not embed teePubkey");
            }
            if let Err(e) = cert.verify_tee_signature() {
                return VerifyOutcome::fail(format!("TEE signature: {}", e));
            }
            if !mock.rtmr3.eq_ignore_ascii_case(&cert.rtmr3) {
                return VerifyOutcome::fail("rtmr3 mismatch: quote disagrees with certificate");
            }
            if let Err(e) = self.allowlist.admit(&cert.rtmr3) {
                return VerifyOutcome::fail(e);
            }
            return VerifyOutcome::pass(cert, Platform::Mock);
        }

        // Hardware path
        let parsed = match self.parser.parse(&cert.attestation_quote).await {
            Ok(parsed) => parsed,
            Err(e) => return VerifyOutcome::fail(format!("quote parse failed: {}", e)),
        };

        // First 32 bytes of report_data must equal the TEE pubkey
        let expected = cert.tee_pubkey.to_lowercase();
        if expected.len() != 64 || !parsed.report_data.to_lowercase().starts_with(&expected) {
            return VerifyOutcome::fail("pubkey mismatch: report_data does not embed teePubkey");
        }

        if let Err(e) = cert.verify_tee_signature() {
            return VerifyOutcome::fail(format!("TEE signature: {}", e));
        }

        if let Some(quote_rtmr3) = &parsed.rtmr3 {
            if !quote_rtmr3.eq_ignore_ascii_case(&cert.rtmr3) {
                return VerifyOutcome::fail("rtmr3 mismatch: quote disagrees with certificate");
            }
        }

        if let Err(e) = self.allowlist.admit(&cert.rtmr3) {
            return VerifyOutcome::fail(e);
        }

        VerifyOutcome::pass(cert, parsed.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::build_birth_certificate;
    use crate::tee::{MockTeeProvider, TeeProvider};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use solana_sdk::signature::Keypair;

    async fn cert_for(name: &str) -> crate::identity::BirthCertificate {
        let wallet = Keypair::new();
        let tee = MockTeeProvider::new(name);
        build_birth_certificate(name, &wallet, &tee, "img:test")
            .await
            .unwrap()
    }

    fn open_verifier() -> AttestationVerifier {
        AttestationVerifier::new(QuoteParser::local_only(), Rtmr3Allowlist::open())
    }

    #[tokio::test]
    async fn valid_mock_cert_verifies() {
        let cert = cert_for("alice").await;
        let outcome = open_verifier().verify(&cert).await;
        assert!(outcome.ok, "reason: {}", outcome.reason);
        assert_eq!(outcome.platform, Some(Platform::Mock));
        assert_eq!(outcome.rtmr3.unwrap(), cert.rtmr3);
    }

    #[tokio::test]
    async fn flipped_signature_bit_is_rejected() {
        let mut cert = cert_for("alice").await;
        let mut sig = BASE64.decode(&cert.tee_signature).unwrap();
        sig[10] ^= 0x80;
        cert.tee_signature = BASE64.encode(sig);

        let outcome = open_verifier().verify(&cert).await;
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("TEE signature"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn foreign_tee_pubkey_is_rejected() {
        let mut cert = cert_for("alice").await;
        let other = MockTeeProvider::new("mallory");
        cert.tee_pubkey = other.tee_public_key().await.unwrap();

        let outcome = open_verifier().verify(&cert).await;
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("pubkey mismatch"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn explicit_allowlist_rejects_unknown_measurement() {
        let cert = cert_for("alice").await;
        let verifier = AttestationVerifier::new(
            QuoteParser::local_only(),
            Rtmr3Allowlist::new(AllowlistMode::Explicit, ["deadbeef".repeat(12)]),
        );

        let outcome = verifier.verify(&cert).await;
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("allowlist"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn explicit_allowlist_admits_listed_measurement() {
        let cert = cert_for("alice").await;
        let verifier = AttestationVerifier::new(
            QuoteParser::local_only(),
            Rtmr3Allowlist::new(AllowlistMode::Explicit, [cert.rtmr3.clone()]),
        );
        assert!(verifier.verify(&cert).await.ok);
    }

    #[tokio::test]
    async fn tofu_locks_the_first_measurement() {
        let verifier = AttestationVerifier::new(
            QuoteParser::local_only(),
            Rtmr3Allowlist::new(AllowlistMode::Tofu, []),
        );

        // First verification locks alice's measurement
        let alice = cert_for("alice").await;
        assert!(verifier.verify(&alice).await.ok);
        // A second alice (same code) is still admitted
        assert!(verifier.verify(&alice).await.ok);

        // bob runs different "code" (different measurement) and is rejected
        let bob = cert_for("bob").await;
        let outcome = verifier.verify(&bob).await;
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("allowlist"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn rtmr3_disagreement_with_quote_is_rejected() {
        let mut cert = cert_for("alice").await;
        // Re-sign with a doctored rtmr3 so the signatures stay valid but
        // the quote disagrees
        cert.rtmr3 = "ab".repeat(48);
        let tee = MockTeeProvider::new("alice");
        cert.tee_signature = tee.sign(cert.canonical_message().as_bytes()).await.unwrap();

        let outcome = open_verifier().verify(&cert).await;
        assert!(!outcome.ok);
        assert!(outcome.reason.contains("rtmr3 mismatch"), "{}", outcome.reason);
    }
}
