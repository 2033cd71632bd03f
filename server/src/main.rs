use std::{fs::OpenOptions, sync::Arc};

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use chrono::Utc;
use field_trip_data_management::{hash_token, DataManager};
use server::{config::ServerConfig, server_state::ServerState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", config.log_dir))?;
    let log_file = config.log_dir.join("server.log");

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {:?}", log_file))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,field_trip_data_management=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting server...");

    let data_manager = DataManager::start(config.database_path.as_deref()).await?;

    for user in &config.bootstrap_users {
        let token_hash = hash_token(&user.token);
        if data_manager.find_user_by_token_hash(&token_hash).await?.is_none() {
            let registered = data_manager.register_user(&user.name, &token_hash, Utc::now()).await?;
            tracing::info!("Registered bootstrap user {} with id {}", registered.user_name, registered.user_id);
        }
    }

    let server_state = Arc::new(ServerState::new(data_manager.clone(), config.room_capacity));
    let app = server::app(server_state);

    match &config.tls {
        Some(tls) => {
            // configure certificate and private key used by https
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("Failed to load TLS certificate")?;

            tracing::info!("Listening on https://{}", config.bind);
            axum_server::bind_rustls(config.bind, rustls)
                .serve(app.into_make_service())
                .await?;
        },
        None => {
            let listener = tokio::net::TcpListener::bind(config.bind).await
                .with_context(|| format!("Failed to bind {}", config.bind))?;

            tracing::info!("Listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        },
    }

    data_manager.close().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
