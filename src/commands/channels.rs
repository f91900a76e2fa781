use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use poise::serenity_prelude as serenity;
use serenity::{
    ChannelType, CreateChannel, CreateMessage, GetMessages, GuildChannel, Mentionable, MessageId,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{CommandResult, Context};

pub const MAX_MESSAGES: u32 = 100;
pub const MAX_CHANNELS: u32 = 50;
pub const MAX_FLOOD: u32 = 1000;
pub const FLOOD_BATCH_SIZE: usize = 5;
pub const FLOOD_BATCH_DELAY: Duration = Duration::from_secs(1);
const CLEAN_NOTICE_LIFETIME: Duration = Duration::from_secs(5);
/// Discord's bulk delete ignores messages older than two weeks.
const BULK_DELETE_MAX_AGE_SECS: i64 = 14 * 24 * 60 * 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CountError {
    #[error("Please provide a valid number of {what} (1-{max}).")]
    OutOfRange { what: &'static str, max: u32 },
}

/// Accepts `1..=max`, rejecting everything else before any platform call.
pub fn validate_count(count: i64, max: u32, what: &'static str) -> Result<u32, CountError> {
    if count < 1 || count > max as i64 {
        return Err(CountError::OutOfRange { what, max });
    }
    Ok(count as u32)
}

/// Messages for a flood of `count`, grouped into batches sent together.
pub fn flood_batches(count: u32, notify: bool) -> Vec<Vec<String>> {
    let messages: Vec<String> = (1..=count)
        .map(|i| {
            if notify {
                format!("@everyone Message {}/{}", i, count)
            } else {
                format!("Message {}/{}", i, count)
            }
        })
        .collect();
    messages
        .chunks(FLOOD_BATCH_SIZE)
        .map(|batch| batch.to_vec())
        .collect()
}

/// Deletes `channel` and creates a copy with the same name, kind, topic, category,
/// position and permission overwrites.
async fn recreate_channel(
    ctx: Context<'_>,
    channel: &GuildChannel,
) -> Result<GuildChannel, serenity::Error> {
    let mut builder = CreateChannel::new(channel.name.clone())
        .kind(channel.kind)
        .position(channel.position)
        .nsfw(channel.nsfw)
        .permissions(channel.permission_overwrites.clone());
    if let Some(topic) = &channel.topic {
        builder = builder.topic(topic.clone());
    }
    if let Some(parent) = channel.parent_id {
        builder = builder.category(parent);
    }
    if let Some(rate) = channel.rate_limit_per_user {
        builder = builder.rate_limit_per_user(rate);
    }

    info!("Recreating channel #{} ({})", channel.name, channel.id);
    channel.delete(ctx).await?;
    channel.guild_id.create_channel(ctx, builder).await
}

/// Interactions must be answered before their channel disappears.
async fn acknowledge_nuke(ctx: Context<'_>) -> CommandResult {
    if let poise::Context::Application(_) = ctx {
        ctx.send(
            poise::CreateReply::default()
                .content("Recreating this channel...")
                .ephemeral(true),
        )
        .await?;
    }
    Ok(())
}

async fn current_channel(ctx: Context<'_>) -> Result<Option<GuildChannel>, crate::Error> {
    let channel = ctx.guild_channel().await;
    if channel.is_none() {
        ctx.say("This command only works in a server text channel.")
            .await?;
    }
    Ok(channel)
}

/// Report a failure once the original channel may no longer exist.
async fn notify_author(ctx: Context<'_>, message: String) {
    let dm = CreateMessage::new().content(message);
    if let Err(e) = ctx.author().direct_message(ctx, dm).await {
        warn!("Could not DM {} about a failed nuke: {}", ctx.author().tag(), e);
    }
}

/// Post numbered messages in this channel
#[poise::command(prefix_command, slash_command, guild_only, category = "Channels")]
pub async fn create(
    ctx: Context<'_>,
    #[description = "How many messages (1-100)"] count: i64,
) -> CommandResult {
    let count = match validate_count(count, MAX_MESSAGES, "messages to create") {
        Ok(count) => count,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    if let poise::Context::Application(_) = ctx {
        ctx.defer().await?;
    }
    for i in 1..=count {
        ctx.channel_id()
            .say(ctx, format!("Message {}/{}", i, count))
            .await?;
    }
    ctx.say(format!("Created {} messages.", count)).await?;
    Ok(())
}

/// Create a batch of new text channels
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Channels",
    required_permissions = "MANAGE_CHANNELS",
    required_bot_permissions = "MANAGE_CHANNELS"
)]
pub async fn createchannels(
    ctx: Context<'_>,
    #[description = "How many channels (1-50)"] count: i64,
) -> CommandResult {
    let count = match validate_count(count, MAX_CHANNELS, "channels to create") {
        Ok(count) => count,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };
    let guild_id = ctx.guild_id().ok_or("Not in a guild")?;

    ctx.defer().await?;
    let stamp = Utc::now().timestamp_millis();
    for i in 0..count {
        let builder = CreateChannel::new(format!("new-channel-{}-{}", stamp, i)).kind(ChannelType::Text);
        if let Err(e) = guild_id.create_channel(ctx, builder).await {
            error!("Error creating channels: {}", e);
            ctx.say(format!("Failed to create channels after {} of {}.", i, count))
                .await?;
            return Ok(());
        }
    }

    ctx.say(format!("Created {} new text channels.", count))
        .await?;
    Ok(())
}

/// Delete this channel and recreate it with the same settings
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Channels",
    aliases("n", "nukechannel"),
    required_permissions = "MANAGE_CHANNELS",
    required_bot_permissions = "MANAGE_CHANNELS"
)]
pub async fn nuke(ctx: Context<'_>) -> CommandResult {
    let Some(channel) = current_channel(ctx).await? else {
        return Ok(());
    };
    acknowledge_nuke(ctx).await?;

    match recreate_channel(ctx, &channel).await {
        Ok(fresh) => {
            fresh
                .say(ctx, format!("🌋 Channel nuked by {}!", ctx.author().mention()))
                .await?;
        }
        Err(e) => {
            error!("Error in nuke command: {}", e);
            notify_author(ctx, format!("Failed to nuke channel: {}", e)).await;
        }
    }
    Ok(())
}

/// Nuke this channel, then flood the new one with numbered messages
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Channels",
    required_permissions = "ADMINISTRATOR",
    required_bot_permissions = "MANAGE_CHANNELS"
)]
pub async fn nukeflood(
    ctx: Context<'_>,
    #[description = "How many messages (1-1000)"] count: i64,
    #[description = "Write `notify` to ping @everyone"] notify: Option<String>,
) -> CommandResult {
    let count = match validate_count(count, MAX_FLOOD, "messages") {
        Ok(count) => count,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };
    let notify = notify.is_some_and(|n| n.eq_ignore_ascii_case("notify"));

    let Some(channel) = current_channel(ctx).await? else {
        return Ok(());
    };
    acknowledge_nuke(ctx).await?;

    let fresh = match recreate_channel(ctx, &channel).await {
        Ok(fresh) => fresh,
        Err(e) => {
            error!("Error in nukeflood command: {}", e);
            notify_author(ctx, format!("Failed to complete nukeflood: {}", e)).await;
            return Ok(());
        }
    };

    let flood = async {
        fresh
            .say(
                ctx,
                format!("Channel nuked by {}! Starting flood...", ctx.author().mention()),
            )
            .await?;

        let batches = flood_batches(count, notify);
        let total = batches.len();
        for (index, batch) in batches.into_iter().enumerate() {
            let sends = batch.into_iter().map(|content| fresh.say(ctx, content));
            for result in join_all(sends).await {
                result?;
            }
            debug!("Flood batch {}/{} sent", index + 1, total);
            if index + 1 < total {
                tokio::time::sleep(FLOOD_BATCH_DELAY).await;
            }
        }

        fresh.say(ctx, "✅ Nuke flood complete!").await?;
        Ok::<(), serenity::Error>(())
    };

    if let Err(e) = flood.await {
        error!("Error in nukeflood command: {}", e);
        notify_author(ctx, format!("Failed to complete nukeflood: {}", e)).await;
    }
    Ok(())
}

/// Recreate this channel and leave a short-lived notice
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Channels",
    aliases("nc"),
    required_permissions = "ADMINISTRATOR",
    required_bot_permissions = "MANAGE_CHANNELS"
)]
pub async fn nukeclean(ctx: Context<'_>) -> CommandResult {
    let Some(channel) = current_channel(ctx).await? else {
        return Ok(());
    };
    acknowledge_nuke(ctx).await?;

    let fresh = match recreate_channel(ctx, &channel).await {
        Ok(fresh) => fresh,
        Err(e) => {
            error!("Error in nukeclean command: {}", e);
            notify_author(ctx, format!("Failed to clean channel: {}", e)).await;
            return Ok(());
        }
    };

    let notice = fresh
        .say(ctx, format!("🧹 Channel cleaned by {}!", ctx.author().mention()))
        .await?;
    let http = ctx.serenity_context().http.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CLEAN_NOTICE_LIFETIME).await;
        if let Err(e) = notice.delete(&*http).await {
            debug!("Clean notice already gone: {}", e);
        }
    });
    Ok(())
}

/// Delete the bot's own messages among the last 100 in this channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Channels",
    required_permissions = "MANAGE_MESSAGES",
    required_bot_permissions = "MANAGE_MESSAGES"
)]
pub async fn deletebot(ctx: Context<'_>) -> CommandResult {
    let bot_id = ctx.cache().current_user().id;
    let channel_id = ctx.channel_id();

    let messages = channel_id
        .messages(ctx, GetMessages::new().limit(100))
        .await?;
    let cutoff = Utc::now().timestamp() - BULK_DELETE_MAX_AGE_SECS;
    let ids: Vec<MessageId> = messages
        .iter()
        .filter(|m| m.author.id == bot_id && m.timestamp.unix_timestamp() > cutoff)
        .map(|m| m.id)
        .collect();

    if ids.is_empty() {
        ctx.say("No bot messages found in the last 100 messages.")
            .await?;
        return Ok(());
    }

    match channel_id.delete_messages(ctx, &ids).await {
        Ok(()) => {
            info!("Deleted {} bot messages in {}", ids.len(), channel_id);
            ctx.say(format!("Deleted {} bot messages.", ids.len()))
                .await?;
        }
        Err(e) => {
            error!("Error deleting bot messages: {}", e);
            ctx.say("Failed to delete bot messages. Make sure I have \"Manage Messages\" permission.")
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case(0, MAX_MESSAGES ; "zero")]
    #[test_case(-3, MAX_MESSAGES ; "negative")]
    #[test_case(101, MAX_MESSAGES ; "over message cap")]
    #[test_case(51, MAX_CHANNELS ; "over channel cap")]
    #[test_case(1001, MAX_FLOOD ; "over flood cap")]
    fn test_count_rejected(count: i64, max: u32) {
        assert_matches!(
            validate_count(count, max, "things"),
            Err(CountError::OutOfRange { .. })
        );
    }

    #[test]
    fn test_count_bounds_accepted() {
        assert_eq!(validate_count(1, MAX_CHANNELS, "channels"), Ok(1));
        assert_eq!(validate_count(50, MAX_CHANNELS, "channels"), Ok(50));
        assert_eq!(
            validate_count(51, MAX_CHANNELS, "channels to create")
                .unwrap_err()
                .to_string(),
            "Please provide a valid number of channels to create (1-50)."
        );
    }

    #[test]
    fn test_flood_batches_number_every_message_once() {
        let batches = flood_batches(12, false);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![5, 5, 2]);

        let all: Vec<String> = batches.into_iter().flatten().collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("Message {}/12", i)).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_flood_batches_notify_prefix() {
        let batches = flood_batches(1, true);
        assert_eq!(batches, vec![vec!["@everyone Message 1/1".to_string()]]);
    }

    #[test]
    fn test_flood_batches_at_cap() {
        let batches = flood_batches(MAX_FLOOD, false);
        assert_eq!(batches.len(), 200);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 1000);
    }
}
