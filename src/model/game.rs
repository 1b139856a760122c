//! Match protocol types.

use serde::{Deserialize, Serialize};

/// Which side of the coin an agent landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameRole {
    Winner,
    Loser,
}

/// Instruction POSTed to an agent's `/play` endpoint by the Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameCommand {
    pub game_id: String,
    pub role: GameRole,
    pub opponent_name: String,
    pub opponent_endpoint: String,
    pub opponent_wallet: String,
    /// Stake in USDC base units
    pub stake_amount: u64,
    /// ms since epoch
    pub timestamp: i64,
}

/// Agent's response to `/play`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAck {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only settlement log entry kept by the Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResult {
    pub game_id: String,
    pub winner: String,
    pub loser: String,
    pub winner_wallet: String,
    pub loser_wallet: String,
    /// Stake in USDC base units
    pub stake_amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_signature: Option<String>,
    /// ms since epoch
    pub timestamp: i64,
}
