use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatgate::config::Config;
use chatgate::dispatch::{Dispatcher, LlmReplyDispatcher};
use chatgate::im::ImAdapter;
use chatgate::llm;
use chatgate::platform::TelegramAdapter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatgate=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Backend: {:?}", config.llm.backend);
    info!("  Model: {}", config.llm.model);

    let backend = llm::build_backend(&config.llm);
    let dispatcher: Arc<dyn Dispatcher> =
        Arc::new(LlmReplyDispatcher::new(backend, config.llm.clone()));

    let mut adapters: Vec<Arc<dyn ImAdapter>> = Vec::new();
    if let Some(telegram) = config.telegram.clone() {
        info!("  Telegram allowed users: {:?}", telegram.allowed_user_ids);
        let bot = Bot::new(&telegram.bot_token);
        adapters.push(Arc::new(TelegramAdapter::new(
            bot,
            telegram,
            dispatcher.clone(),
        )));
    }

    futures::future::try_join_all(adapters.iter().map(|adapter| adapter.start())).await?;
    info!("{} adapter(s) running, press Ctrl-C to stop", adapters.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");

    let results = futures::future::join_all(adapters.iter().map(|adapter| adapter.stop())).await;
    for (adapter, result) in adapters.iter().zip(results) {
        if let Err(e) = result {
            error!("Failed to stop {}: {:#}", adapter.name(), e);
        }
    }

    Ok(())
}
