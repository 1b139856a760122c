//! Attestation-quote parsing.
//!
//! Quotes arrive as base64 blobs. Mock quotes are base64 JSON and are
//! detected first; hardware quotes are parsed either by the external PCCS
//! service or, when that is unreachable, by the local TDX-offset parser.
//!
//! Offset convention: the 48-byte quote header is stripped first and all
//! offsets below are relative to the body that follows it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config;

/// TDX quote header length
pub const QUOTE_HEADER_LEN: usize = 48;
/// report_data offset into the quote body
pub const REPORT_DATA_OFFSET: usize = 520;
/// report_data length
pub const REPORT_DATA_LEN: usize = 64;
/// RTMR3 offset into the quote body
pub const RTMR3_OFFSET: usize = 472;
/// RTMR3 register length
pub const RTMR3_LEN: usize = 48;

/// Which attestation platform produced a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Mock,
    Tdx,
    SevSnp,
}

/// Fields extracted from a quote, hex-encoded.
#[derive(Debug, Clone)]
pub struct ParsedQuote {
    pub report_data: String,
    pub rtmr3: Option<String>,
    pub platform: Platform,
}

/// Body of a synthesized mock quote (base64 JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockQuote {
    pub mock: bool,
    /// 128 hex chars: the TEE pubkey padded to the report_data width
    pub report_data: String,
    pub rtmr3: String,
    pub timestamp: i64,
}

/// Try to decode a quote as a mock quote. Returns None for hardware quotes.
pub fn try_parse_mock(quote_b64: &str) -> Option<MockQuote> {
    let bytes = BASE64.decode(quote_b64).ok()?;
    let parsed: MockQuote = serde_json::from_slice(&bytes).ok()?;
    if parsed.mock {
        Some(parsed)
    } else {
        None
    }
}

/// Parse a hardware quote with the documented TDX offsets.
pub fn parse_local_tdx(quote_bytes: &[u8]) -> Result<ParsedQuote, String> {
    if quote_bytes.len() < QUOTE_HEADER_LEN + REPORT_DATA_OFFSET + REPORT_DATA_LEN {
        return Err(format!(
            "quote too short for TDX layout: {} bytes",
            quote_bytes.len()
        ));
    }
    let body = &quote_bytes[QUOTE_HEADER_LEN..];
    let report_data = hex::encode(&body[REPORT_DATA_OFFSET..REPORT_DATA_OFFSET + REPORT_DATA_LEN]);
    let rtmr3 = if body.len() >= RTMR3_OFFSET + RTMR3_LEN {
        Some(hex::encode(&body[RTMR3_OFFSET..RTMR3_OFFSET + RTMR3_LEN]))
    } else {
        None
    };
    Ok(ParsedQuote {
        report_data,
        rtmr3,
        platform: Platform::Tdx,
    })
}

#[derive(Serialize)]
struct PccsRequest<'a> {
    quote: &'a str,
}

#[derive(Deserialize)]
struct PccsResponse {
    report_data: String,
    #[serde(default)]
    rtmr3: Option<String>,
    #[serde(default)]
    tee_type: Option<String>,
}

/// Parses quotes via the external PCCS service, falling back to the local
/// TDX-offset parser when the service is unreachable or rejects the quote.
pub struct QuoteParser {
    client: reqwest::Client,
    parser_url: Option<String>,
}

impl QuoteParser {
    pub fn from_env() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config::QUOTE_PARSER_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            parser_url: std::env::var(config::env_vars::QUOTE_PARSER_URL).ok(),
        }
    }

    /// Parser with no external service configured (local offsets only).
    pub fn local_only() -> Self {
        Self {
            client: reqwest::Client::new(),
            parser_url: None,
        }
    }

    /// Parse a hardware quote. PCCS first, local offsets second; an error
    /// means both paths failed and the quote must be rejected.
    pub async fn parse(&self, quote_b64: &str) -> Result<ParsedQuote, String> {
        if let Some(url) = &self.parser_url {
            match self.parse_via_pccs(url, quote_b64).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    log::warn!("[TEE] PCCS parse failed, using local offsets: {}", e);
                }
            }
        }

        let bytes = BASE64
            .decode(quote_b64)
            .map_err(|e| format!("quote is not valid base64: {}", e))?;
        parse_local_tdx(&bytes)
    }

    async fn parse_via_pccs(&self, url: &str, quote_b64: &str) -> Result<ParsedQuote, String> {
        let resp = self
            .client
            .post(url)
            .json(&PccsRequest { quote: quote_b64 })
            .send()
            .await
            .map_err(|e| format!("parser unreachable: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("parser returned status {}", resp.status()));
        }

        let body: PccsResponse = resp
            .json()
            .await
            .map_err(|e| format!("invalid parser response: {}", e))?;

        let platform = match body.tee_type.as_deref() {
            Some("sev-snp") => Platform::SevSnp,
            _ => Platform::Tdx,
        };

        Ok(ParsedQuote {
            report_data: body.report_data.to_lowercase(),
            rtmr3: body.rtmr3.map(|r| r.to_lowercase()),
            platform,
        })
    }
}
