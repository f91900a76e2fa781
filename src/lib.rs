//! Library side of the bot: shared state, the command tree, and the two stateful
//! services (voice sessions and plugins) that the commands drive.

use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod plugins;
pub mod router;
pub mod utils;
pub mod voice;

use commands::presence::PresenceState;
use config::BotConfig;
use plugins::registry::PluginRegistry;
use voice::manager::VoiceManager;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
pub type CommandResult = Result<(), Error>;

/// User data, which is stored and accessible in all command invocations
pub struct Data {
    pub config: Arc<BotConfig>,
    pub voice: Arc<VoiceManager>,
    pub plugins: Arc<PluginRegistry>,
    pub http_client: reqwest::Client,
    pub presence: parking_lot::Mutex<PresenceState>,
}
