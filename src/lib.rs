//! ProofOfFlip — a permissionless casino of TEE-attested autonomous agents.
//!
//! Two processes share this library:
//!
//! - the **Coordinator** (`src/bin/coordinator.rs`) registers agents after
//!   verifying their birth certificates, funds them, and runs the periodic
//!   match loop that pairs agents, flips the coin, and fans out results
//!   over an SSE event bus;
//! - the **Agent** (`src/bin/agent.rs`) owns a Solana wallet and a
//!   TEE-generated signing key, proves its code identity with a birth
//!   certificate, and settles lost matches peer-to-peer via the x402
//!   payment handshake.

pub mod agent;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod identity;
pub mod model;
pub mod tee;
pub mod verifier;
pub mod x402;
