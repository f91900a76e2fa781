use std::sync::Arc;

use ::serenity::all::ClientBuilder;
use dotenv::dotenv;
use poise::serenity_prelude as serenity;
use songbird::{SerenityInit, Songbird};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hubbot::commands::presence::PresenceState;
use hubbot::config::BotConfig;
use hubbot::plugins::registry::PluginRegistry;
use hubbot::voice::manager::VoiceManager;
use hubbot::voice::songbird_transport::SongbirdTransport;
use hubbot::{Data, Error, router};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize logging with debug level for our crate
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hubbot=debug,warn")),
        )
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .with_ansi(true)
        .pretty()
        .init();

    dotenv().ok();

    let config = match BotConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.ensure_directories() {
        error!("{}", e);
        std::process::exit(1);
    }
    if let Err(e) = config.verify_executables() {
        error!("{}", e);
        std::process::exit(1);
    }

    let config = Arc::new(config);
    let http_client = reqwest::Client::new();
    let songbird = Songbird::serenity();

    let transport = SongbirdTransport::new(
        songbird.clone(),
        http_client.clone(),
        config.media.clone(),
    );
    let voice = VoiceManager::new(Arc::new(transport));
    let plugins = Arc::new(PluginRegistry::new(config.plugin_dir.clone()));

    let intents = serenity::GatewayIntents::non_privileged()
        | serenity::GatewayIntents::MESSAGE_CONTENT
        | serenity::GatewayIntents::GUILD_VOICE_STATES
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let setup_config = config.clone();
    let framework = poise::Framework::builder()
        .options(router::framework_options(&config))
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Logged in as {}", ready.user.tag());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                info!(
                    "Registered {} application commands",
                    framework.options().commands.len()
                );

                let presence = PresenceState::default();
                ctx.set_presence(
                    presence.activity.as_ref().map(|a| a.to_activity_data()),
                    presence.status,
                );

                Ok(Data {
                    config: setup_config,
                    voice,
                    plugins,
                    http_client,
                    presence: parking_lot::Mutex::new(presence),
                })
            })
        })
        .build();

    let mut client = ClientBuilder::new(config.token.clone(), intents)
        .application_id(serenity::ApplicationId::new(config.application_id))
        .framework(framework)
        .register_songbird_with(songbird)
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.map_err(Into::into)
}
