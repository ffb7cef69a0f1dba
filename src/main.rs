mod bot;
mod config;
mod quiz;

use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use teloxide::{error_handlers::LoggingErrorHandler, prelude::*};

use config::Config;
use quiz::{parser::ArchiveSource, session::SessionEngine, store::RedisStore};

#[tokio::main]
async fn main() {
    dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting quiz bot...");

    if let Err(err) = run().await {
        log::error!("Quiz bot stopped: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), bot::HandlerError> {
    let config = Config::from_env()?;

    log::info!("Connecting to Redis...");
    let store = RedisStore::connect(config.redis.clone()).await?;
    log::info!("Connection established");

    let source = ArchiveSource::new(
        config.quiz_file.clone(),
        config.encoding,
        config.selection,
        config.markers.clone(),
    );
    log::info!(
        "Questions are read from '{}' ({})",
        config.quiz_file.display(),
        config.encoding.name()
    );

    let engine = Arc::new(SessionEngine::new(
        Arc::new(source),
        Arc::new(store),
        config.retry,
    ));
    tokio::spawn(evict_idle_sessions(Arc::clone(&engine), config.session_idle));
    let bot = Bot::new(config.telegram_token);

    Dispatcher::builder(bot, bot::schema())
        .dependencies(dptree::deps![engine, config.retry])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn evict_idle_sessions(engine: Arc<SessionEngine>, max_idle: Duration) {
    let mut ticks = tokio::time::interval(max_idle);
    loop {
        ticks.tick().await;
        engine.evict_idle(max_idle);
    }
}
