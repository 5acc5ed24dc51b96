use anyhow::{Context, Result};
use bridge_translator::config::Config;
use bridge_translator::dictionary::DictionaryStore;
use bridge_translator::glossary::GlossaryStore;
use bridge_translator::mirror::MirrorGraph;
use bridge_translator::orchestrator::TranslationOrchestrator;
use bridge_translator::relay::{BannerSettings, BridgeConfig, NoFetch, Relay};
use bridge_translator::server::{self, AppState, Heartbeat};
use bridge_translator::session::SessionManager;
use bridge_translator::storage::Storage;
use bridge_translator::{scheduler, services};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bridge_translator=info".parse()?),
        )
        .init();

    info!("Starting bridge translator");

    let config = Config::from_env()?;
    let http = reqwest::Client::builder()
        .timeout(config.external_call_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let (translator, judge) = services::from_config(&config, http.clone());

    // Persisted state
    let storage = Arc::new(Storage::from_config(&config, http)?);
    let glossary = Arc::new(GlossaryStore::default());
    glossary.reload(&storage).await;
    let dictionary = Arc::new(DictionaryStore::default());
    dictionary.reload(&storage).await;
    let graph = Arc::new(MirrorGraph::load(&config.mirror_store_path, config.mirror_max_per_guild).await);
    let bridges = Arc::new(BridgeConfig::load(&config.guilds_file)?);

    let orchestrator = Arc::new(TranslationOrchestrator::new(
        translator,
        judge,
        Arc::clone(&glossary),
        config.pipeline.clone(),
    ));
    let relay = Arc::new(Relay::new(
        bridges,
        orchestrator,
        Arc::clone(&dictionary),
        Arc::clone(&graph),
        Arc::new(NoFetch),
        BannerSettings {
            icon: config.reply_icon.clone(),
            preview_limit: config.reply_preview_limit,
        },
    ));

    let heartbeat = Arc::new(Heartbeat::new());
    let sessions = Arc::new(SessionManager::new(config.session_ttl));
    let mut scheduler = scheduler::start_scheduler(Arc::clone(&heartbeat), Arc::clone(&sessions)).await?;

    let state = AppState {
        relay,
        glossary,
        dictionary,
        storage,
        sessions,
        heartbeat,
        api_key: config.api_key.clone(),
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown requested");
    };
    server::serve(state, config.port, shutdown).await?;

    if let Err(e) = scheduler.shutdown().await {
        error!("Scheduler did not stop cleanly: {}", e);
    }
    if !graph.flush().await {
        error!("Final mirror graph flush failed");
    }
    info!("Bridge translator stopped");
    Ok(())
}
