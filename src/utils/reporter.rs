use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, Http};
use serenity::async_trait;
use tracing::warn;

use crate::voice::transport::FailureReporter;

/// Reports playback failures as plain messages in the channel the command came
/// from.
pub struct ChannelReporter {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelReporter {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Arc<Self> {
        Arc::new(Self { http, channel_id })
    }
}

#[async_trait]
impl FailureReporter for ChannelReporter {
    async fn report(&self, message: String) {
        if let Err(e) = self.channel_id.say(&*self.http, message).await {
            warn!(
                "Failed to report playback failure to channel {}: {}",
                self.channel_id, e
            );
        }
    }
}
