use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kiosk_pay_server::bootstrap::bootstrap;
use kiosk_pay_server::config::ServerConfig;
use kiosk_pay_server::cors::build_cors;
use kiosk_pay_server::routes;

/// Request bodies above this are rejected before reaching a handler.
const BODY_LIMIT: usize = 65_536;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "configuration loaded");

    let state = match bootstrap(&config) {
        Ok(state) => state,
        Err(e) => {
            // No in-memory fallback: a lost ledger would allow double settlement.
            tracing::error!("Refusing to start: {e}");
            std::process::exit(1);
        }
    };
    state.engine.start_lock_cleanup();
    let state = web::Data::from(state);

    let port = config.port;
    let cors_origins = config.allowed_origins.clone();

    tracing::info!("kiosk-pay listening on port {port}");
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  POST http://localhost:{port}/payments/{{tenant}}/click/prepare");
    tracing::info!("  POST http://localhost:{port}/payments/{{tenant}}/click/complete");
    tracing::info!("  POST http://localhost:{port}/payments/{{tenant}}/payme/check");
    tracing::info!("  POST http://localhost:{port}/payments/{{tenant}}/payme/perform");

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&cors_origins))
            .wrap(Governor::new(&governor_conf))
            .wrap(Logger::default())
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(BODY_LIMIT))
            .app_data(web::PayloadConfig::new(BODY_LIMIT))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
