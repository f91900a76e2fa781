//! The seams between the session manager and whatever actually moves audio.

use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;

use super::VoiceResult;
use super::source::AudioSource;

/// Opens voice connections.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>>;
}

/// A live connection to one voice channel.
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Starts `source`, replacing whatever the connection was playing. `observer`
    /// is told when the playback ends or fails.
    async fn play(
        &self,
        source: &AudioSource,
        observer: Arc<dyn PlaybackObserver>,
    ) -> VoiceResult<Box<dyn PlaybackHandle>>;

    /// Leaves the channel and releases the connection.
    async fn disconnect(&self);
}

/// Owns one running playback. Dropping it must release everything it holds.
pub trait PlaybackHandle: Send + Sync {
    fn stop(&self);
}

/// Receives the terminal event of a playback.
pub trait PlaybackObserver: Send + Sync {
    fn finished(&self);
    fn failed(&self, description: String);
}

/// Where asynchronous playback failures are announced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, message: String);
}
