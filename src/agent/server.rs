//! Agent HTTP contract: liveness, identity, payment collection, and the
//! `/play` dispatch the Coordinator drives matches through.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use std::sync::Arc;

use super::{payment, AgentContext};
use crate::identity::code_identity_hash;
use crate::model::{AttestationView, CollectReceipt, GameCommand, GameRole, HealthView, PlayAck};
use crate::x402::{PaymentRequired, XPayment, X_PAYMENT_HEADER};

type Context = web::Data<Arc<AgentContext>>;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/birth-cert").route(web::get().to(birth_cert)))
        .service(web::resource("/attestation").route(web::get().to(attestation)))
        .service(web::resource("/collect").route(web::get().to(collect)))
        .service(web::resource("/play").route(web::post().to(play)));
}

async fn health(ctx: Context) -> impl Responder {
    HttpResponse::Ok().json(HealthView {
        agent_name: ctx.name.clone(),
        status: "ok".to_string(),
        uptime: ctx.started_at.elapsed().as_secs(),
        wallet_address: ctx.wallet_address(),
    })
}

async fn birth_cert(ctx: Context) -> impl Responder {
    HttpResponse::Ok().json(&ctx.birth_cert)
}

/// Fresh values straight from the TEE provider, not the stored cert.
async fn attestation(ctx: Context) -> impl Responder {
    let tee = &ctx.tee;
    let fresh = async {
        Ok::<AttestationView, String>(AttestationView {
            rtmr3: tee.code_measurement().await?,
            code_hash: code_identity_hash(&ctx.birth_cert.docker_image),
            timestamp: chrono::Utc::now().timestamp_millis(),
            provider: tee.name().to_string(),
            quote: tee.attestation_quote().await?,
            tee_pubkey: tee.tee_public_key().await?,
        })
    }
    .await;

    match fresh {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": e })),
    }
}

/// The x402 payment endpoint. Without a payment proof: 402 with the terms.
/// With one: record the receipt (suppressing double-count by signature)
/// and confirm.
async fn collect(ctx: Context, req: HttpRequest) -> impl Responder {
    let Some(header) = req.headers().get(X_PAYMENT_HEADER) else {
        return HttpResponse::PaymentRequired()
            .json(PaymentRequired::for_stake(&ctx.wallet_address(), &ctx.name));
    };

    let proof = header
        .to_str()
        .map_err(|e| format!("unreadable X-Payment header: {}", e))
        .and_then(XPayment::from_header_value);

    match proof {
        Ok(proof) => {
            ctx.record_game_tx(&proof.tx_signature);
            log::info!(
                "[COLLECT] Recorded payment {} from {} ({} base units)",
                proof.tx_signature,
                proof.payer,
                proof.amount
            );
            HttpResponse::Ok().json(CollectReceipt {
                status: "collected".to_string(),
                agent: ctx.name.clone(),
                tx_signature: proof.tx_signature,
            })
        }
        Err(e) => HttpResponse::BadRequest().json(serde_json::json!({ "error": e })),
    }
}

/// Coordinator dispatch. Winners acknowledge and wait to be paid; losers
/// pay before answering.
async fn play(ctx: Context, body: web::Json<GameCommand>) -> impl Responder {
    let command = body.into_inner();
    log::info!(
        "[PLAY] Game {}: {:?} vs {}",
        command.game_id,
        command.role,
        command.opponent_name
    );

    match command.role {
        GameRole::Winner => HttpResponse::Ok().json(PlayAck {
            status: "acknowledged".to_string(),
            game_id: Some(command.game_id),
            tx_signature: None,
            error: None,
        }),
        GameRole::Loser => match payment::pay_winner(&ctx, &command).await {
            Ok(tx_signature) => {
                ctx.record_game_tx(&tx_signature);
                HttpResponse::Ok().json(PlayAck {
                    status: "paid".to_string(),
                    game_id: Some(command.game_id),
                    tx_signature: Some(tx_signature),
                    error: None,
                })
            }
            Err(e) => {
                log::error!("[PLAY] Game {} payment failed: {}", command.game_id, e);
                HttpResponse::InternalServerError().json(PlayAck {
                    status: "payment_failed".to_string(),
                    game_id: Some(command.game_id),
                    tx_signature: None,
                    error: Some(e),
                })
            }
        },
    }
}
