//! Loser-side settlement: the x402 handshake with a direct-transfer
//! safety net.
//!
//! The fallback fires only when the handshake itself fails (dead winner
//! endpoint, non-402 answer, unparseable requirements) - the Coordinator
//! has already accepted the match, so the loser still pays the proven
//! wallet. A transfer that fails *inside* the x402 path is a hard error:
//! retrying against the raw wallet could double-pay.
//!
//! Once the transfer confirms the payment is settled; the second
//! `/collect` with the `X-Payment` proof is advisory and its failure is
//! only logged.

use std::time::Duration;

use super::AgentContext;
use crate::model::GameCommand;
use crate::x402::{PaymentRequired, XPayment, X_PAYMENT_HEADER};

const COLLECT_TIMEOUT: Duration = Duration::from_secs(8);

enum PayError {
    /// The handshake never got as far as a transfer
    Handshake(String),
    /// The transfer itself failed
    Transfer(String),
}

/// Pay the winner the stake. Returns the settlement tx signature.
pub async fn pay_winner(ctx: &AgentContext, command: &GameCommand) -> Result<String, String> {
    let collect_url = format!(
        "{}/collect",
        command.opponent_endpoint.trim_end_matches('/')
    );

    match x402_handshake(ctx, &collect_url, command).await {
        Ok(tx_signature) => Ok(tx_signature),
        Err(PayError::Transfer(e)) => Err(format!("x402 transfer failed: {}", e)),
        Err(PayError::Handshake(e)) => {
            log::warn!(
                "[X402] Handshake with {} failed ({}), paying wallet directly",
                command.opponent_name,
                e
            );
            ctx.chain
                .transfer_token(
                    &ctx.wallet,
                    &command.opponent_wallet,
                    command.stake_amount,
                )
                .await
                .map_err(|e| format!("fallback transfer failed: {}", e))
        }
    }
}

async fn x402_handshake(
    ctx: &AgentContext,
    collect_url: &str,
    command: &GameCommand,
) -> Result<String, PayError> {
    log::info!("[X402] Requesting payment terms from {}", collect_url);

    let resp = ctx
        .http
        .get(collect_url)
        .timeout(COLLECT_TIMEOUT)
        .send()
        .await
        .map_err(|e| PayError::Handshake(format!("collect unreachable: {}", e)))?;

    if resp.status().as_u16() != 402 {
        return Err(PayError::Handshake(format!(
            "expected 402, got {}",
            resp.status()
        )));
    }

    let terms: PaymentRequired = resp
        .json()
        .await
        .map_err(|e| PayError::Handshake(format!("unparseable payment terms: {}", e)))?;

    if terms.amount != command.stake_amount {
        // The stake the Coordinator commanded is authoritative
        log::warn!(
            "[X402] {} asks {} but the stake is {}, paying the stake",
            command.opponent_name,
            terms.amount,
            command.stake_amount
        );
    }

    let tx_signature = ctx
        .chain
        .transfer_token(&ctx.wallet, &terms.address, command.stake_amount)
        .await
        .map_err(PayError::Transfer)?;

    log::info!(
        "[X402] Paid {} base units to {} ({})",
        command.stake_amount,
        terms.address,
        tx_signature
    );

    // Advisory ack: the payment already settled on-chain
    let proof = XPayment {
        tx_signature: tx_signature.clone(),
        amount: command.stake_amount,
        payer: ctx.wallet_address(),
    };
    match proof.to_header_value() {
        Ok(header) => {
            let ack = ctx
                .http
                .get(collect_url)
                .timeout(COLLECT_TIMEOUT)
                .header(X_PAYMENT_HEADER, header)
                .send()
                .await;
            match ack {
                Ok(resp) if resp.status().is_success() => {
                    log::info!("[X402] {} acknowledged the payment", command.opponent_name);
                }
                Ok(resp) => {
                    log::warn!("[X402] Payment ack returned {}", resp.status());
                }
                Err(e) => {
                    log::warn!("[X402] Payment ack failed: {}", e);
                }
            }
        }
        Err(e) => log::warn!("[X402] Could not encode payment proof: {}", e),
    }

    Ok(tx_signature)
}
