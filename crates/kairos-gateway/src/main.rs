//! Kairos API Gateway Server
//!
//! High-performance HTTP API gateway built with Rust and Actix Web.
//!
//! This binary is the main server entry point: it loads and validates
//! configuration, builds the gateway's process-wide state, and starts the
//! HTTP server with the proxy engine and health routes.

use kairos_rs::config::hot_reload::ConfigManager;
use kairos_rs::config::settings::load_settings;
use kairos_rs::config::validation::ConfigValidator;
use kairos_rs::logs::logger::configure_logger;
use kairos_rs::proxy::{self, GatewayState};
use kairos_rs::routes::health;

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let config = load_settings().expect("failed to load configuration");
    info!("starting kairos-rs gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation_result = ConfigValidator::validate_comprehensive(&config);
    if !validation_result.is_valid {
        error!("configuration validation failed:");
        for err in &validation_result.errors {
            error!("  - {}", err);
        }
        std::process::exit(1);
    }
    info!(
        "configuration validated with {} warning(s)",
        validation_result.warnings.len()
    );

    let host = config.bind_host.clone();
    let port = config.bind_port;

    let config_path =
        std::env::var("KAIROS_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());
    let config_manager = Arc::new(ConfigManager::new(config.clone(), config_path));
    config_manager.start().await;

    let state = Arc::new(GatewayState::new(config));

    // Keep the gateway's route table in sync with hot-reloaded configuration.
    {
        let state = state.clone();
        let mut updates = config_manager.subscribe();
        tokio::spawn(async move {
            while let Ok(update) = updates.recv().await {
                *state.route_table.write().await = update.route_table;
                *state.config.write().await = update.config;
                info!("gateway state reloaded to config version {}", update.version);
            }
        });
    }

    info!("binding server on {}:{}", host, port);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::from(state.clone()))
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T"#,
            ))
            .wrap(actix_web::middleware::Compress::default())
            .configure(health::configure_health)
            .configure(proxy::configure)
    })
    .bind((host.as_str(), port))?
    .run();

    info!("server started successfully");

    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped gracefully"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, stopping server...");
        }
    }

    Ok(())
}
