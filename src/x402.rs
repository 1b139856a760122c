//! x402 payment handshake types.
//!
//! The flow between a losing and a winning agent:
//! 1. Loser GETs the winner's `/collect`
//! 2. Winner answers HTTP 402 with a [`PaymentRequired`] body
//! 3. Loser performs the SPL transfer to the declared address
//! 4. Loser retries `/collect` with the `X-Payment` header carrying an
//!    [`XPayment`] proof; winner records the signature and answers 200

use serde::{Deserialize, Serialize};

use crate::config::{GAME_STAKE, NETWORK_ID, USDC_MINT};

/// Header carrying the payment proof on the retry request.
pub const X_PAYMENT_HEADER: &str = "X-Payment";

/// Body of the initial 402 response: what to pay, where, in what.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    /// base58 recipient wallet
    pub address: String,
    /// token mint
    pub token: String,
    /// base units, integer
    pub amount: u64,
    pub network: String,
    pub description: String,
}

impl PaymentRequired {
    pub fn for_stake(recipient_wallet: &str, agent_name: &str) -> Self {
        Self {
            kind: "x402".to_string(),
            version: "1".to_string(),
            address: recipient_wallet.to_string(),
            token: USDC_MINT.to_string(),
            amount: GAME_STAKE,
            network: NETWORK_ID.to_string(),
            description: format!("Coin-flip stake owed to {}", agent_name),
        }
    }
}

/// Proof of payment presented in the `X-Payment` header (JSON string).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XPayment {
    pub tx_signature: String,
    /// base units
    pub amount: u64,
    /// base58 wallet of the payer
    pub payer: String,
}

impl XPayment {
    pub fn to_header_value(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("encode X-Payment: {}", e))
    }

    pub fn from_header_value(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("malformed X-Payment header: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_required_wire_format() {
        let body = PaymentRequired::for_stake("SomeBase58Wallet", "alice");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "x402");
        assert_eq!(json["version"], "1");
        assert_eq!(json["amount"], 10_000);
        assert_eq!(json["network"], "solana-mainnet");
        assert_eq!(json["token"], USDC_MINT);
    }

    #[test]
    fn x_payment_round_trips() {
        let proof = XPayment {
            tx_signature: "5sig".to_string(),
            amount: GAME_STAKE,
            payer: "payerWallet".to_string(),
        };
        let header = proof.to_header_value().unwrap();
        let parsed = XPayment::from_header_value(&header).unwrap();
        assert_eq!(parsed.tx_signature, "5sig");
        assert_eq!(parsed.amount, GAME_STAKE);
        assert_eq!(parsed.payer, "payerWallet");
    }

    #[test]
    fn malformed_header_is_an_error() {
        assert!(XPayment::from_header_value("not json").is_err());
    }
}
