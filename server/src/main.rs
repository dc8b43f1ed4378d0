//! Mentionbot Server - Main Entry Point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use mentionbot_server::{
    agent::HttpAgent,
    api,
    audit::{AuditLog, AuditSink, LogAuditSink, PgAuditSink},
    config, db,
    mentions::{FrameStore, GatewaySettings, MentionGateway},
    observability,
    publish::NeynarPublisher,
    replies::{self, ChannelPublishers, ReplyProcessor},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    // Initialize tracing; the guard flushes exporters on exit
    let _otel_guard = observability::init(&config.observability)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        trigger_tag = %config.trigger_tag,
        "Starting Mentionbot Server"
    );

    // Audit log (optional database)
    let audit_sink: Arc<dyn AuditSink> = if let Some(url) = &config.database_url {
        let pool = db::create_pool(url).await?;
        db::run_migrations(&pool).await?;
        Arc::new(PgAuditSink::new(pool))
    } else {
        warn!("DATABASE_URL not set, audit records go to the log only");
        Arc::new(LogAuditSink)
    };

    // Redis (optional; enables the durable queue and frame store)
    let redis = match &config.redis_url {
        Some(url) => Some(db::create_redis_client(url).await?),
        None => None,
    };

    // Reply dispatch
    let publisher = NeynarPublisher::new(
        &config.neynar_api_url,
        &config.neynar_api_key,
        &config.neynar_signer_uuid,
    )?;
    let processor = ReplyProcessor::new(ChannelPublishers {
        farcaster: Arc::new(publisher),
    });
    let (dispatcher, worker) =
        replies::build_dispatcher(&config.replies, redis.clone(), processor);

    // Mention gateway
    let agent = HttpAgent::new(
        &config.agent_api_url,
        &config.agent_api_key,
        config.agent_timeout(),
    )?;
    let frames = redis.map(|client| {
        FrameStore::new(
            client,
            config.frame_key_prefix(),
            Duration::from_secs(config.frame_ttl_secs),
        )
    });
    let gateway = MentionGateway::new(
        GatewaySettings::from_config(&config),
        Arc::new(agent),
        dispatcher.clone(),
        AuditLog::new(audit_sink),
        frames,
    );

    // Build application state and router
    let bind_address = config.bind_address.clone();
    let state = api::AppState::new(config, gateway, dispatcher);
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Let the reply worker finish its current job
    if let Some(worker) = worker {
        worker.stop().await;
    }

    info!("Server shutdown complete");

    Ok(())
}
