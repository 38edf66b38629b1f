mod discord;

use anyhow::Context as _;
use poise::{Framework, FrameworkOptions, serenity_prelude as serenity};
use sebot_db::ConfigStore;
use sebot_engine::config::Config;
use sebot_engine::helpers::SystemClock;
use sebot_engine::query::HttpQuery;
use sebot_engine::translations::Translations;
use sebot_engine::{Engine, EngineDeps};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

pub(crate) struct Data {
    pub(crate) engine: Arc<Engine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = "debug";
    #[cfg(not(debug_assertions))]
    let log_level = "info";

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting server watcher bot...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, poll={}s, status={}s, query_url={}",
        config.port,
        config.database_path,
        config.poll_interval.as_secs(),
        config.status_interval.as_secs(),
        config.query_url_template
    );
    let token = config
        .discord_token
        .clone()
        .context("DISCORD_TOKEN must be set")?;

    let store = ConfigStore::open(&config.database_path)
        .await
        .with_context(|| format!("opening config store at {}", config.database_path))?;
    let translations = match &config.translations_path {
        Some(path) => Translations::load(path).await,
        None => Translations::builtin(),
    };
    let query = HttpQuery::new(&config.query_url_template, config.query_timeout)
        .context("building query client")?;

    let http = Arc::new(serenity::Http::new(&token));
    let presence = Arc::new(discord::ShardPresence::default());
    let engine = Arc::new(Engine::new(
        &config,
        EngineDeps {
            store,
            query: Arc::new(query),
            messenger: Arc::new(discord::DiscordMessenger::new(http)),
            presence: presence.clone(),
            clock: Arc::new(SystemClock),
            translations,
        },
    ));

    let app = engine.http_app(config.request_timeout);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Status surface listening on {}", addr);

    let intents = serenity::GatewayIntents::default();
    let framework = Framework::builder()
        .options(FrameworkOptions {
            event_handler: |ctx, event, framework, data| {
                Box::pin(discord::handle_event(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup({
            let engine = Arc::clone(&engine);
            move |ctx, _ready, _framework| {
                Box::pin(async move {
                    let commands = discord::create_commands(&engine.router);
                    tracing::info!(count = commands.len(), "registering slash commands");
                    serenity::Command::set_global_commands(ctx, commands).await?;
                    Ok(Data { engine })
                })
            }
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&token, intents)
        .framework(framework)
        .await
        .context("creating Discord client")?;
    presence.attach(Arc::clone(&client.shard_manager));
    let shard_manager = Arc::clone(&client.shard_manager);

    let lifecycle = engine.start().await.context("starting background loops")?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("Axum server error: {}", e);
            }
        }
        result = client.start() => {
            if let Err(e) = result {
                tracing::error!("Discord client error: {:?}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received");
        }
    }

    let report = lifecycle.shutdown().await;
    if !report.is_clean() {
        tracing::warn!(timed_out = ?report.timed_out, "some loops were abandoned");
    }
    shard_manager.shutdown_all().await;
    tracing::info!("Bye");
    Ok(())
}
