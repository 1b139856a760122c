//! Agent runtime: boot, HTTP endpoints, match roles, payment, watchers.

pub mod donations;
pub mod payment;
pub mod runtime;
pub mod server;

use dashmap::DashMap;
use solana_sdk::signature::Keypair;
use std::sync::Arc;
use std::time::Instant;

use crate::chain::ChainClient;
use crate::identity::BirthCertificate;
use crate::tee::TeeProvider;

/// Everything the agent's handlers and background tasks share.
pub struct AgentContext {
    pub name: String,
    pub wallet: Arc<Keypair>,
    pub birth_cert: BirthCertificate,
    pub tee: Arc<dyn TeeProvider>,
    pub chain: Arc<dyn ChainClient>,
    pub coordinator_url: String,
    /// Transaction signatures that settled games (written by `/play` and
    /// `/collect`), read by the donation watcher to tell donations from
    /// game payments.
    pub game_tx_signatures: Arc<DashMap<String, ()>>,
    pub started_at: Instant,
    pub http: reqwest::Client,
}

impl AgentContext {
    pub fn wallet_address(&self) -> String {
        use solana_sdk::signature::Signer;
        self.wallet.pubkey().to_string()
    }

    /// Record a settlement receipt so the donation watcher skips it.
    pub fn record_game_tx(&self, signature: &str) {
        self.game_tx_signatures.insert(signature.to_string(), ());
    }
}
