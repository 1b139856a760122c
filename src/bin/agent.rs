use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

use proof_of_flip::agent::{donations, runtime, server};
use proof_of_flip::config::{self, defaults};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    // unborn -> booting: without an identity there is nothing to serve
    let ctx = match runtime::boot().await {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("[BOOT] Aborted: {}", e);
            std::process::exit(1);
        }
    };

    let port = config::port(defaults::AGENT_PORT);
    let endpoint = runtime::advertised_endpoint(port);
    log::info!(
        "Starting agent '{}' on port {} (wallet {}, endpoint {})",
        ctx.name,
        port,
        ctx.wallet_address(),
        endpoint
    );

    // booting -> registering, concurrently with the HTTP server so the
    // Coordinator can probe us as soon as we are admitted
    let boot_ctx = ctx.clone();
    tokio::spawn(async move {
        match runtime::register_with_retries(&boot_ctx, &endpoint).await {
            Ok(()) => {
                log::info!("[BOOT] Running");
                tokio::spawn(donations::run_donation_watcher(boot_ctx.clone()));
                tokio::spawn(donations::run_gas_watcher(boot_ctx));
            }
            Err(e) => {
                log::error!("[BOOT] {}", e);
                std::process::exit(1);
            }
        }
    });

    let app_ctx = ctx.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&app_ctx)))
            .wrap(Logger::default())
            .configure(server::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
