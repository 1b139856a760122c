//! SecretVM hardware TEE provider.
//!
//! The VM publishes its attestation on a self-signed HTTPS page; the raw
//! quote hex sits inside a well-known element. RTMR3 comes from a labelled
//! hex match on the page or, as fallback, from the fixed TDX offsets of the
//! decoded quote body. The TEE public key comes from the mounted PEM file
//! or, as fallback, from the quote's report-data field. Signing is a POST
//! to the loopback-only signing service - the private key never leaves the
//! enclave.
//!
//! All three reads are cached per-process after first success.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;

lazy_static! {
    static ref QUOTE_ELEMENT_RE: Regex =
        Regex::new(r#"(?s)id="quote"[^>]*>([0-9a-fA-F\s]+)<"#).unwrap();
    static ref HEX_RUN_RE: Regex = Regex::new(r"[0-9a-fA-F]{1024,}").unwrap();
    static ref RTMR3_RE: Regex = Regex::new(r"(?i)rtmr3[^0-9a-f]{0,64}([0-9a-f]{96})").unwrap();
}

use super::quote::{parse_local_tdx, QUOTE_HEADER_LEN, RTMR3_LEN, RTMR3_OFFSET};
use super::TeeProvider;
use crate::config::env_vars;

const ATTESTATION_TIMEOUT: Duration = Duration::from_secs(15);

pub struct SecretVmProvider {
    client: reqwest::Client,
    attestation_url: String,
    signing_url: String,
    pubkey_file: Option<String>,
    quote_cache: OnceCell<String>,
    rtmr3_cache: OnceCell<String>,
    pubkey_cache: OnceCell<String>,
}

#[derive(serde::Serialize)]
struct SignRequest {
    /// hex-encoded payload
    message: String,
}

#[derive(Deserialize)]
struct SignResponse {
    /// base64 detached ed25519 signature
    signature: String,
}

impl SecretVmProvider {
    pub fn from_env() -> Result<Self, String> {
        let attestation_url = std::env::var(env_vars::ATTESTATION_URL)
            .map_err(|_| format!("{} must be set in secretvm mode", env_vars::ATTESTATION_URL))?;
        let signing_url = std::env::var(env_vars::SIGNING_URL)
            .map_err(|_| format!("{} must be set in secretvm mode", env_vars::SIGNING_URL))?;

        Ok(Self {
            // The attestation page is self-signed by design
            client: reqwest::Client::builder()
                .timeout(ATTESTATION_TIMEOUT)
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| format!("Failed to build HTTP client: {}", e))?,
            attestation_url,
            signing_url,
            pubkey_file: std::env::var(env_vars::TEE_PUBKEY_FILE).ok(),
            quote_cache: OnceCell::new(),
            rtmr3_cache: OnceCell::new(),
            pubkey_cache: OnceCell::new(),
        })
    }

    async fn fetch_attestation_page(&self) -> Result<String, String> {
        let resp = self
            .client
            .get(&self.attestation_url)
            .send()
            .await
            .map_err(|e| format!("attestation page unreachable: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("attestation page returned {}", resp.status()));
        }

        resp.text()
            .await
            .map_err(|e| format!("attestation page read failed: {}", e))
    }

    /// Raw quote hex, cached after first success.
    async fn quote_hex(&self) -> Result<String, String> {
        self.quote_cache
            .get_or_try_init(|| async {
                let html = self.fetch_attestation_page().await?;
                let hex = extract_quote_hex(&html)
                    .ok_or_else(|| "no quote found in attestation page".to_string())?;
                log::info!("[TEE] Quote fetched ({} hex chars)", hex.len());
                Ok::<String, String>(hex)
            })
            .await
            .cloned()
    }
}

/// Pull the quote hex out of the attestation HTML. Primary: the well-known
/// `id="quote"` element. Fallback: the longest contiguous hex run on the
/// page (a TDX quote is several KB of hex).
fn extract_quote_hex(html: &str) -> Option<String> {
    if let Some(cap) = QUOTE_ELEMENT_RE.captures(html) {
        let hex: String = cap[1].chars().filter(|c| !c.is_whitespace()).collect();
        if hex.len() >= 1024 {
            return Some(hex.to_lowercase());
        }
    }

    HEX_RUN_RE
        .find_iter(html)
        .max_by_key(|m| m.as_str().len())
        .map(|m| m.as_str().to_lowercase())
}

/// Pull a labelled RTMR3 value (96 hex chars) out of the attestation HTML.
fn extract_labelled_rtmr3(html: &str) -> Option<String> {
    RTMR3_RE.captures(html).map(|cap| cap[1].to_lowercase())
}

/// Last 32 bytes of the DER payload of an ed25519 public-key PEM.
fn pubkey_from_pem(pem: &str) -> Result<String, String> {
    let der_b64: String = pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = BASE64
        .decode(der_b64.trim())
        .map_err(|e| format!("invalid PEM body: {}", e))?;
    if der.len() < 32 {
        return Err(format!("PEM payload too short: {} bytes", der.len()));
    }
    Ok(hex::encode(&der[der.len() - 32..]))
}

#[async_trait]
impl TeeProvider for SecretVmProvider {
    async fn code_measurement(&self) -> Result<String, String> {
        self.rtmr3_cache
            .get_or_try_init(|| async {
                let html = self.fetch_attestation_page().await?;
                if let Some(rtmr3) = extract_labelled_rtmr3(&html) {
                    return Ok(rtmr3);
                }

                // Fallback: fixed offsets in the decoded quote body
                let quote = self.quote_hex().await?;
                let bytes =
                    hex::decode(&quote).map_err(|e| format!("quote hex decode: {}", e))?;
                if bytes.len() < QUOTE_HEADER_LEN + RTMR3_OFFSET + RTMR3_LEN {
                    return Err("quote too short for RTMR3 offsets".to_string());
                }
                let body = &bytes[QUOTE_HEADER_LEN..];
                Ok::<String, String>(hex::encode(&body[RTMR3_OFFSET..RTMR3_OFFSET + RTMR3_LEN]))
            })
            .await
            .cloned()
    }

    async fn tee_public_key(&self) -> Result<String, String> {
        self.pubkey_cache
            .get_or_try_init(|| async {
                if let Some(path) = &self.pubkey_file {
                    match std::fs::read_to_string(path) {
                        Ok(pem) => return pubkey_from_pem(&pem),
                        Err(e) => {
                            log::warn!(
                                "[TEE] pubkey file {} unreadable ({}), falling back to quote",
                                path,
                                e
                            );
                        }
                    }
                }

                // Fallback: first 32 bytes of report_data
                let quote = self.quote_hex().await?;
                let bytes =
                    hex::decode(&quote).map_err(|e| format!("quote hex decode: {}", e))?;
                let parsed = parse_local_tdx(&bytes)?;
                Ok::<String, String>(parsed.report_data[..64].to_string())
            })
            .await
            .cloned()
    }

    async fn attestation_quote(&self) -> Result<String, String> {
        let hex_quote = self.quote_hex().await?;
        let bytes = hex::decode(&hex_quote).map_err(|e| format!("quote hex decode: {}", e))?;
        Ok(BASE64.encode(bytes))
    }

    async fn sign(&self, payload: &[u8]) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.signing_url)
            .json(&SignRequest {
                message: hex::encode(payload),
            })
            .send()
            .await
            .map_err(|e| format!("signing service unreachable: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("signing service returned {}", resp.status()));
        }

        let body: SignResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid signing response: {}", e))?;
        Ok(body.signature)
    }

    fn name(&self) -> &'static str {
        "secretvm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_hex_extracted_from_element() {
        let quote = "ab".repeat(600);
        let html = format!("<html><p id=\"quote\">{}</p></html>", quote);
        assert_eq!(extract_quote_hex(&html).unwrap(), quote);
    }

    #[test]
    fn quote_hex_fallback_longest_run() {
        let short = "cd".repeat(520);
        let long = "ef".repeat(900);
        let html = format!("<pre>{}</pre><pre>{}</pre>", short, long);
        assert_eq!(extract_quote_hex(&html).unwrap(), long);
    }

    #[test]
    fn labelled_rtmr3_extracted() {
        let rtmr3 = "12".repeat(48);
        let html = format!("<td>RTMR3</td><td>{}</td>", rtmr3);
        assert_eq!(extract_labelled_rtmr3(&html).unwrap(), rtmr3);
    }

    #[test]
    fn pem_pubkey_takes_last_32_bytes() {
        // DER prefix for an ed25519 SubjectPublicKeyInfo is 12 bytes
        let mut der = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00];
        der.extend(std::iter::repeat(0x42).take(32));
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            BASE64.encode(&der)
        );
        assert_eq!(pubkey_from_pem(&pem).unwrap(), "42".repeat(32));
    }
}
