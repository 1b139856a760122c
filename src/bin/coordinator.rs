use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

use proof_of_flip::chain::create_chain_client;
use proof_of_flip::config::{self, defaults};
use proof_of_flip::coordinator::match_loop::create_vm_inventory;
use proof_of_flip::coordinator::{routes, CoordinatorState, HttpAgentTransport, MatchRunner};
use proof_of_flip::identity::{
    build_birth_certificate, load_coordinator_identity, load_coordinator_wallet,
    save_coordinator_identity, save_coordinator_wallet,
};
use proof_of_flip::tee::create_tee_provider;
use proof_of_flip::verifier::AttestationVerifier;
use solana_sdk::signature::Keypair;

const COORDINATOR_NAME: &str = "dashboard";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let state_dir = config::state_dir();
    log::info!("Coordinator state directory: {}", state_dir);

    let tee = create_tee_provider(COORDINATOR_NAME).expect("Failed to initialize TEE provider");

    // Load-or-create the Coordinator's own wallet and birth certificate so
    // /api/attestation and /api/birth-cert serve real data
    let wallet = match load_coordinator_wallet(&state_dir).expect("Failed to read wallet blob") {
        Some(wallet) => wallet,
        None => {
            log::info!("First boot, generating coordinator wallet");
            let wallet = Keypair::new();
            save_coordinator_wallet(&state_dir, &wallet).expect("Failed to persist wallet");
            wallet
        }
    };

    let birth_cert =
        match load_coordinator_identity(&state_dir).expect("Failed to read identity blob") {
            Some(cert) => cert,
            None => {
                let cert = build_birth_certificate(
                    COORDINATOR_NAME,
                    &wallet,
                    tee.as_ref(),
                    &config::docker_image(),
                )
                .await
                .expect("Failed to build coordinator birth certificate");
                save_coordinator_identity(&state_dir, &cert)
                    .expect("Failed to persist identity");
                cert
            }
        };

    let chain = create_chain_client();
    let verifier = AttestationVerifier::from_env();
    let max_active = config::max_active();

    let state = Arc::new(CoordinatorState::new(
        verifier,
        chain,
        Arc::new(wallet),
        birth_cert,
        tee,
        max_active,
    ));

    // The match loop: one tick at a time, every MATCH_INTERVAL
    let runner = Arc::new(MatchRunner::new(
        state.clone(),
        Arc::new(HttpAgentTransport::new()),
        create_vm_inventory(),
        config::match_interval_ms(),
    ));
    tokio::spawn(runner.run());

    let port = config::port(defaults::COORDINATOR_PORT);
    log::info!(
        "Starting coordinator on port {} (max_active: {}, interval: {}ms)",
        port,
        max_active,
        config::match_interval_ms()
    );

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(Arc::clone(&state)))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(routes::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
