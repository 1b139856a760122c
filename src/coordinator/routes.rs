//! Coordinator HTTP API.
//!
//! Reads serve the authoritative in-memory view; writes funnel through the
//! registration pipeline and the funding throttle. `/api/events` is the
//! SSE stream every dashboard client watches.

use actix_web::web::{self, Bytes};
use actix_web::{HttpRequest, HttpResponse, Responder};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

use super::events::{event_types, Event};
use super::funding;
use super::registration;
use super::state::CoordinatorState;
use crate::identity::code_identity_hash;
use crate::model::{AgentMessage, AttestationView, DonationNotice, RegisterRequest, TopupRequest};

type State = web::Data<Arc<CoordinatorState>>;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/register").route(web::post().to(register)))
        .service(web::resource("/api/agents").route(web::get().to(agents)))
        .service(web::resource("/api/leaderboard").route(web::get().to(leaderboard)))
        .service(web::resource("/api/games").route(web::get().to(games)))
        .service(web::resource("/api/stats").route(web::get().to(stats)))
        .service(web::resource("/api/events").route(web::get().to(events)))
        .service(web::resource("/api/attestation").route(web::get().to(attestation)))
        .service(web::resource("/api/birth-cert").route(web::get().to(birth_cert)))
        .service(web::resource("/api/topup-sol").route(web::post().to(topup_sol)))
        .service(web::resource("/api/agent-message").route(web::post().to(agent_message)))
        .service(
            web::resource("/api/donation-confirmed").route(web::post().to(donation_confirmed)),
        );
}

async fn register(
    state: State,
    body: web::Json<RegisterRequest>,
    req: HttpRequest,
) -> impl Responder {
    let source_ip = req.peer_addr().map(|addr| addr.ip());
    match registration::register_agent(&state, body.into_inner(), source_ip).await {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(reason) => HttpResponse::BadRequest().json(serde_json::json!({
            "success": false,
            "message": reason,
        })),
    }
}

async fn agents(state: State) -> impl Responder {
    let pool = state.pool.lock().expect("pool lock poisoned");
    let mut views: Vec<_> = pool.values().map(|a| a.view()).collect();
    views.sort_by_key(|v| v.registered_at);
    HttpResponse::Ok().json(views)
}

async fn leaderboard(state: State) -> impl Responder {
    HttpResponse::Ok().json(state.leaderboard())
}

async fn games(state: State) -> impl Responder {
    let games = state.games.lock().expect("games lock poisoned");
    HttpResponse::Ok().json(&*games)
}

async fn stats(state: State) -> impl Responder {
    HttpResponse::Ok().json(state.stats())
}

/// SSE stream: hello frame, then the replay backlog, then live events.
/// The client entry is pruned by the bus once its channel closes.
async fn events(state: State) -> HttpResponse {
    let (_client_id, rx, backlog) = state.events.subscribe();

    let mut intro: Vec<Result<Bytes, actix_web::Error>> =
        vec![Ok(Bytes::from("data: {\"type\":\"connected\"}\n\n"))];
    intro.extend(
        backlog
            .iter()
            .map(|event| Ok(Bytes::from(event.to_frame()))),
    );

    let live = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event: Event| {
            (
                Ok::<Bytes, actix_web::Error>(Bytes::from(event.to_frame())),
                rx,
            )
        })
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream::iter(intro).chain(live))
}

/// The Coordinator's own attestation, fresh from its TEE provider.
async fn attestation(state: State) -> impl Responder {
    let tee = &state.tee;
    let fresh = async {
        Ok::<AttestationView, String>(AttestationView {
            rtmr3: tee.code_measurement().await?,
            code_hash: code_identity_hash(&crate::config::docker_image()),
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

async fn birth_cert(state: State) -> impl Responder {
    HttpResponse::Ok().json(&state.birth_cert)
}

async fn topup_sol(state: State, body: web::Json<TopupRequest>) -> impl Responder {
    match funding::topup_sol(&state, &body).await {
        Ok(message) => HttpResponse::Ok().json(serde_json::json!({ "message": message })),
        Err(reason) => HttpResponse::BadRequest().json(serde_json::json!({ "error": reason })),
    }
}

fn agent_in_pool(state: &CoordinatorState, agent_name: &str) -> bool {
    let pool = state.pool.lock().expect("pool lock poisoned");
    pool.values().any(|a| a.name == agent_name)
}

async fn agent_message(state: State, body: web::Json<AgentMessage>) -> impl Responder {
    if !agent_in_pool(&state, &body.agent_name) {
        return HttpResponse::Forbidden().json(serde_json::json!({
            "error": "unknown agent",
        }));
    }

    let kind = match body.kind.as_deref() {
        Some("desperate") => event_types::AGENT_DESPERATE,
        _ => event_types::TRASH_TALK,
    };
    state.events.broadcast(
        kind,
        serde_json::json!({
            "agentName": body.agent_name,
            "message": body.message,
        }),
    );
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

async fn donation_confirmed(state: State, body: web::Json<DonationNotice>) -> impl Responder {
    {
        let mut pool = state.pool.lock().expect("pool lock poisoned");
        let Some(record) = pool.values_mut().find(|a| a.name == body.agent_name) else {
            return HttpResponse::Forbidden().json(serde_json::json!({
                "error": "unknown agent",
            }));
        };
        record.total_donations += crate::config::to_base_units(body.amount);
    }

    log::info!(
        "[DONATION] {} received {} from {}",
        body.agent_name,
        body.amount,
        body.donor
    );
    state.events.broadcast(
        event_types::DONATION,
        serde_json::json!({
            "agentName": body.agent_name,
            "donor": body.donor,
            "amount": body.amount,
        }),
    );
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
