//! Process configuration: environment variable names, defaults, and the
//! protocol constants both binaries share.

use std::env;

/// Environment variable names - single source of truth
pub mod env_vars {
    /// TEE provider selector: "mock" or "secretvm"
    pub const TEE_PROVIDER: &str = "TEE_PROVIDER";
    /// Directory for persisted identity blobs
    pub const STATE_DIR: &str = "POF_STATE_DIR";
    /// Solana JSON-RPC endpoint
    pub const RPC_URL: &str = "SOLANA_RPC_URL";
    /// Coordinator base URL (agent side)
    pub const COORDINATOR_URL: &str = "COORDINATOR_URL";
    /// Agent display name
    pub const AGENT_NAME: &str = "AGENT_NAME";
    /// Externally reachable agent URL override
    pub const AGENT_ENDPOINT: &str = "AGENT_ENDPOINT";
    /// Docker image identifier recorded in the birth certificate
    pub const DOCKER_IMAGE: &str = "DOCKER_IMAGE";
    /// Comma-separated RTMR3 allowlist; "tofu" or "open" select those modes
    pub const RTMR3_ALLOWLIST: &str = "RTMR3_ALLOWLIST";
    /// SecretVM attestation page URL (self-signed HTTPS)
    pub const ATTESTATION_URL: &str = "ATTESTATION_URL";
    /// Loopback-only TEE signing service URL
    pub const SIGNING_URL: &str = "TEE_SIGNING_URL";
    /// Mounted PEM file with the TEE public key
    pub const TEE_PUBKEY_FILE: &str = "TEE_PUBKEY_FILE";
    /// External PCCS quote parser URL
    pub const QUOTE_PARSER_URL: &str = "QUOTE_PARSER_URL";
    /// HTTP listen port
    pub const PORT: &str = "PORT";
    /// Match interval override in milliseconds
    pub const MATCH_INTERVAL_MS: &str = "MATCH_INTERVAL_MS";
    /// Maximum number of agents ranked active
    pub const MAX_ACTIVE: &str = "MAX_ACTIVE";
    /// Shell command that lists live VM names (offline -> deleted checks)
    pub const VM_INVENTORY_CMD: &str = "VM_INVENTORY_CMD";
}

/// Default values
pub mod defaults {
    pub const TEE_PROVIDER: &str = "mock";
    pub const STATE_DIR: &str = "./data";
    pub const RPC_URL: &str = "https://api.mainnet-beta.solana.com";
    pub const COORDINATOR_URL: &str = "http://127.0.0.1:8080";
    pub const DOCKER_IMAGE: &str = "proofofflip/agent:dev";
    pub const COORDINATOR_PORT: u16 = 8080;
    pub const AGENT_PORT: u16 = 3000;
    pub const MAX_ACTIVE: usize = 8;
}

/// USDC mint on Solana mainnet
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
/// USDC uses 6 decimals
pub const USDC_DECIMALS: u32 = 6;
/// Network identifier advertised in x402 payment requirements
pub const NETWORK_ID: &str = "solana-mainnet";

/// Game stake: 0.01 USDC
pub const GAME_STAKE: u64 = 10_000;
/// Minimum balance to stay in play: one stake
pub const MIN_STAKE: u64 = GAME_STAKE;
/// Initial funding per new wallet: 1.0 USDC
pub const INITIAL_FUNDING: u64 = 1_000_000;
/// Gas sent alongside the initial USDC grant (lamports)
pub const INITIAL_GAS_LAMPORTS: u64 = 10_000_000;
/// SOL balance below which an agent asks the Coordinator for a top-up
pub const SOL_TOPUP_THRESHOLD: u64 = 5_000_000;
/// Lamports per top-up transfer
pub const SOL_TOPUP_AMOUNT: u64 = 10_000_000;
/// Minimum seconds between top-ups for the same wallet
pub const SOL_TOPUP_COOLDOWN_SECS: u64 = 3600;

/// Default match interval
pub const MATCH_INTERVAL_MS: u64 = 60_000;
/// Liveness probe timeout
pub const HEALTH_TIMEOUT_SECS: u64 = 3;
/// /play dispatch timeout
pub const PLAY_TIMEOUT_SECS: u64 = 10;
/// External quote parser timeout
pub const QUOTE_PARSER_TIMEOUT_SECS: u64 = 10;
/// Agent-side registration retries
pub const REGISTER_ATTEMPTS: u32 = 5;
/// Spacing between registration attempts
pub const REGISTER_RETRY_SECS: u64 = 5;
/// Donation watcher poll interval
pub const DONATION_POLL_SECS: u64 = 15;
/// Gas watcher poll interval
pub const GAS_POLL_SECS: u64 = 60;
/// SSE replay buffer window
pub const EVENT_REPLAY_SECS: i64 = 15 * 60;

/// Convert base units to a UI amount (6 decimals)
pub fn to_ui_amount(base_units: u64) -> f64 {
    base_units as f64 / 10f64.powi(USDC_DECIMALS as i32)
}

/// Convert a UI amount to base units (6 decimals)
pub fn to_base_units(ui: f64) -> u64 {
    (ui * 10f64.powi(USDC_DECIMALS as i32)).round() as u64
}

pub fn tee_provider() -> String {
    env::var(env_vars::TEE_PROVIDER).unwrap_or_else(|_| defaults::TEE_PROVIDER.to_string())
}

pub fn state_dir() -> String {
    env::var(env_vars::STATE_DIR).unwrap_or_else(|_| defaults::STATE_DIR.to_string())
}

pub fn rpc_url() -> String {
    env::var(env_vars::RPC_URL).unwrap_or_else(|_| defaults::RPC_URL.to_string())
}

pub fn coordinator_url() -> String {
    env::var(env_vars::COORDINATOR_URL)
        .unwrap_or_else(|_| defaults::COORDINATOR_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

pub fn docker_image() -> String {
    env::var(env_vars::DOCKER_IMAGE).unwrap_or_else(|_| defaults::DOCKER_IMAGE.to_string())
}

pub fn port(default: u16) -> u16 {
    env::var(env_vars::PORT)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn match_interval_ms() -> u64 {
    env::var(env_vars::MATCH_INTERVAL_MS)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(MATCH_INTERVAL_MS)
}

pub fn max_active() -> usize {
    env::var(env_vars::MAX_ACTIVE)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults::MAX_ACTIVE)
}
