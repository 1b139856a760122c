//! TEE Provider Abstraction
//!
//! Uniform interface over hardware-attested signing, public-key retrieval,
//! and code-measurement readout. Two operational modes:
//!
//! - **SecretVM mode**: reads the quote from the VM's self-signed
//!   attestation page and signs via the loopback-only signing service
//! - **Mock mode**: deterministic keys and measurements derived from the
//!   agent name, so local tests run offline and reproducibly
//!
//! The mode is selected by the `TEE_PROVIDER` environment variable
//! (`mock` by default, `secretvm` in production).

mod mock;
pub mod quote;
mod secretvm;

pub use mock::MockTeeProvider;
pub use secretvm::SecretVmProvider;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config;

/// Capability set every TEE variant exposes. The private half of the
/// signing key never crosses this boundary; only `sign` does.
#[async_trait]
pub trait TeeProvider: Send + Sync {
    /// Code integrity register value (RTMR3), hex
    async fn code_measurement(&self) -> Result<String, String>;

    /// Ed25519 public key generated inside the enclave, hex
    async fn tee_public_key(&self) -> Result<String, String>;

    /// Hardware-signed attestation blob, base64. Its report-data field
    /// embeds the TEE public key.
    async fn attestation_quote(&self) -> Result<String, String>;

    /// Detached ed25519 signature over `payload` by the TEE key, base64
    async fn sign(&self, payload: &[u8]) -> Result<String, String>;

    /// Provider name for logging and `/attestation` responses
    fn name(&self) -> &'static str;
}

/// Create the TEE provider selected by `TEE_PROVIDER`.
pub fn create_tee_provider(agent_name: &str) -> Result<Arc<dyn TeeProvider>, String> {
    let mode = config::tee_provider().to_lowercase();

    log::info!("[TEE] Initializing provider in {} mode", mode);

    match mode.as_str() {
        "mock" => Ok(Arc::new(MockTeeProvider::new(agent_name))),
        "secretvm" => {
            let provider = SecretVmProvider::from_env()?;
            Ok(Arc::new(provider))
        }
        _ => Err(format!(
            "Unknown TEE_PROVIDER '{}'. Use 'mock' or 'secretvm'.",
            mode
        )),
    }
}
