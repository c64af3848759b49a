use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tokio::time::interval;

use simbazar::core::{config, init_logger};
use simbazar::payment::{CryptoGateway, RialGateway};
use simbazar::provision::{GrammersClient, LoginRegistry};
use simbazar::storage::scratchpad::Scratchpad;
use simbazar::storage::create_pool;
use simbazar::telegram::{webhook, AppState, TelegramTransport};

/// Main entry point for the marketplace bot
#[tokio::main]
async fn main() -> Result<()> {
    // Catch panics from spawned update tasks and keep serving
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    // Load environment variables from .env if present
    let _ = dotenv();

    init_logger(&config::LOG_FILE_PATH)?;

    let pool = create_pool(&config::DATABASE_PATH)?;
    log::info!("Database ready at {}", &*config::DATABASE_PATH);

    let mut bot = Bot::new(config::BOT_TOKEN.clone());
    if let Some(api_url) = config::BOT_API_URL.as_deref() {
        bot = bot.set_api_url(api_url.parse()?);
        log::info!("Using custom Bot API server: {}", api_url);
    }

    let client_factory = GrammersClient::factory();
    let state = Arc::new(AppState {
        pool,
        transport: Arc::new(TelegramTransport::new(bot)),
        scratchpad: Arc::new(Scratchpad::new()),
        logins: Arc::new(LoginRegistry::new(client_factory.clone())),
        client_factory,
        crypto_gateway: Arc::new(CryptoGateway::new()),
        rial_gateway: Arc::new(RialGateway::new()),
    });

    // Periodic sweep of expired multi-turn flow state
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            sweep_state.scratchpad.purge_expired();
        }
    });

    webhook::run(*config::WEBHOOK_PORT, state).await?;
    Ok(())
}
