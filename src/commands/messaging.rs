use std::sync::LazyLock;

use poise::serenity_prelude as serenity;
use regex::Regex;
use serenity::{
    CreateMessage, CreateWebhook, ExecuteWebhook, GuildId, Mentionable, User, UserId, Webhook,
};
use tracing::{debug, error, info, warn};

use crate::{CommandResult, Context};

const WEBHOOK_NAME: &str = "FakeMessage Bot Webhook";
const MEMBER_SEARCH_LIMIT: u64 = 50;

static MENTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@!?(\d+)>$").expect("mention pattern is valid"));
static ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{17,19}$").expect("id pattern is valid"));

/// How a user was named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentifier {
    Mention(UserId),
    Id(UserId),
    Name(String),
}

/// Mentions win over raw ids, which win over names.
pub fn classify_identifier(raw: &str) -> UserIdentifier {
    let raw = raw.trim();
    if let Some(id) = MENTION_PATTERN
        .captures(raw)
        .and_then(|caps| caps[1].parse::<u64>().ok())
        .filter(|id| *id != 0)
    {
        return UserIdentifier::Mention(UserId::new(id));
    }
    if ID_PATTERN.is_match(raw) {
        if let Ok(id) = raw.parse::<u64>() {
            if id != 0 {
                return UserIdentifier::Id(UserId::new(id));
            }
        }
    }
    UserIdentifier::Name(raw.to_string())
}

/// The names a guild member can be addressed by.
#[derive(Debug, Clone)]
pub struct MemberName {
    pub id: UserId,
    pub display_name: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    None,
    One(UserId),
    Many,
}

/// Exact, case-insensitive match against display names and usernames.
pub fn match_member_name(members: &[MemberName], name: &str) -> NameMatch {
    let target = name.to_lowercase();
    let mut found: Vec<UserId> = members
        .iter()
        .filter(|m| m.display_name.to_lowercase() == target || m.username.to_lowercase() == target)
        .map(|m| m.id)
        .collect();
    found.dedup();
    match found.as_slice() {
        [] => NameMatch::None,
        [id] => NameMatch::One(*id),
        _ => NameMatch::Many,
    }
}

fn cached_member_names(ctx: Context<'_>, guild_id: GuildId) -> Vec<MemberName> {
    ctx.cache()
        .guild(guild_id)
        .map(|guild| {
            guild
                .members
                .values()
                .map(|m| MemberName {
                    id: m.user.id,
                    display_name: m.display_name().to_string(),
                    username: m.user.name.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Looks `name` up in the cache first, then through a member search.
async fn find_member_by_name(
    ctx: Context<'_>,
    guild_id: GuildId,
    name: &str,
) -> Result<NameMatch, serenity::Error> {
    let cached = match_member_name(&cached_member_names(ctx, guild_id), name);
    if cached != NameMatch::None {
        return Ok(cached);
    }

    let searched: Vec<MemberName> = guild_id
        .search_members(ctx, name, Some(MEMBER_SEARCH_LIMIT))
        .await?
        .into_iter()
        .map(|m| MemberName {
            id: m.user.id,
            display_name: m.display_name().to_string(),
            username: m.user.name.clone(),
        })
        .collect();
    Ok(match_member_name(&searched, name))
}

/// The reply to the invoker when a direct message bounced.
pub fn dm_failed_notice(target_tag: &str) -> String {
    format!(
        "Failed to send a direct message to {}. They might have DMs disabled. Sending message in this channel instead as a fallback.",
        target_tag
    )
}

/// The channel post that stands in for an undeliverable direct message.
pub fn dm_fallback_post(target_mention: &str, author_mention: &str, content: &str) -> String {
    format!(
        "{}, you have a message from {}: {}",
        target_mention, author_mention, content
    )
}

async fn deliver_direct_message(
    ctx: Context<'_>,
    user: String,
    message: Option<String>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("Not in a guild")?;

    let user_id = match classify_identifier(&user) {
        UserIdentifier::Mention(id) => Some(id),
        UserIdentifier::Id(id) => match id.to_user(ctx).await {
            Ok(_) => Some(id),
            Err(e) => {
                warn!("Could not fetch user by id {}: {}", id, e);
                None
            }
        },
        UserIdentifier::Name(_) => None,
    };

    let user_id = match user_id {
        Some(id) => id,
        None => match find_member_by_name(ctx, guild_id, &user).await? {
            NameMatch::One(id) => id,
            NameMatch::Many => {
                ctx.say(format!(
                    "Multiple users found with the exact name \"{}\". Please be more specific, mention the user, or provide their ID.",
                    user
                ))
                .await?;
                return Ok(());
            }
            NameMatch::None => {
                ctx.say("Could not find a user with that exact display name, username, or ID. Please mention the user or provide their exact name/ID.")
                    .await?;
                return Ok(());
            }
        },
    };

    let Some(content) = message.filter(|m| !m.trim().is_empty()) else {
        ctx.say("Please provide a message to send.").await?;
        return Ok(());
    };

    let target = user_id.to_user(ctx).await?;
    match target
        .direct_message(ctx, CreateMessage::new().content(&content))
        .await
    {
        Ok(_) => {
            info!("{} sent a DM to {}", ctx.author().tag(), target.tag());
            ctx.say(format!("Direct message sent to {}.", target.tag()))
                .await?;
        }
        Err(e) => {
            error!("Error sending DM to {}: {}", target.tag(), e);
            ctx.say(dm_failed_notice(&target.tag())).await?;
            let post = dm_fallback_post(
                &target.mention().to_string(),
                &ctx.author().mention().to_string(),
                &content,
            );
            ctx.channel_id().say(ctx, post).await?;
        }
    }
    Ok(())
}

/// Send someone a direct message, falling back to this channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Messaging",
    required_permissions = "MANAGE_MESSAGES",
    aliases("dm", "snedmessage", "nukesendmessage", "nuksendemessage")
)]
pub async fn sendmessage(
    ctx: Context<'_>,
    #[description = "Mention, user id, or exact display name"] user: String,
    #[description = "Message to send"]
    #[rest]
    message: Option<String>,
) -> CommandResult {
    deliver_direct_message(ctx, user, message).await
}

/// Send someone a direct message (administrators only)
#[poise::command(
    prefix_command,
    guild_only,
    category = "Messaging",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn messagecall(
    ctx: Context<'_>,
    #[description = "Mention, user id, or exact display name"] user: String,
    #[description = "Message to send"]
    #[rest]
    message: Option<String>,
) -> CommandResult {
    deliver_direct_message(ctx, user, message).await
}

/// The bot-owned webhook in this channel, created on first use.
async fn channel_webhook(ctx: Context<'_>) -> Result<Webhook, serenity::Error> {
    let bot_id = ctx.cache().current_user().id;
    let channel_id = ctx.channel_id();

    let existing = channel_id
        .webhooks(ctx)
        .await?
        .into_iter()
        .find(|w| w.user.as_ref().is_some_and(|u| u.id == bot_id));
    if let Some(webhook) = existing {
        return Ok(webhook);
    }

    debug!("Creating webhook in channel {}", channel_id);
    channel_id
        .create_webhook(
            ctx,
            CreateWebhook::new(WEBHOOK_NAME).audit_log_reason("Needed for the fakemessage command"),
        )
        .await
}

async fn resolve_fake_target(ctx: Context<'_>, target: &str) -> Result<Option<User>, serenity::Error> {
    if target.eq_ignore_ascii_case("bot") {
        return Ok(Some(User::clone(&ctx.cache().current_user())));
    }
    match classify_identifier(target) {
        UserIdentifier::Mention(id) | UserIdentifier::Id(id) => id.to_user(ctx).await.map(Some),
        UserIdentifier::Name(_) => Ok(None),
    }
}

async fn send_as(
    ctx: Context<'_>,
    target: &str,
    content: &str,
    username: Option<&str>,
) -> CommandResult {
    let Some(user) = resolve_fake_target(ctx, target).await? else {
        ctx.say("Please provide both a user (or \"bot\") and a message (e.g., `!fakemessage @user This is a fake message.`).")
            .await?;
        return Ok(());
    };
    let shown_name = username.unwrap_or(&user.name).to_string();

    let sent = async {
        let webhook = channel_webhook(ctx).await?;
        let builder = ExecuteWebhook::new()
            .content(content)
            .username(shown_name.clone())
            .avatar_url(user.face());
        webhook.execute(ctx, false, builder).await
    };

    match sent.await {
        Ok(_) => {
            info!("{} posted a message as {}", ctx.author().tag(), shown_name);
            let shown = username.map(str::to_string).unwrap_or_else(|| user.tag());
            ctx.send(
                poise::CreateReply::default()
                    .content(format!("Successfully sent a message as {}.", shown))
                    .ephemeral(true),
            )
            .await?;
        }
        Err(e) => {
            error!("Error in fakemessage command: {}", e);
            ctx.say(format!(
                "Failed to send fake message: {}. Make sure I have \"Manage Webhooks\" permission.",
                e
            ))
            .await?;
        }
    }
    Ok(())
}

/// Post a message under another user's name and avatar
#[poise::command(
    prefix_command,
    guild_only,
    category = "Messaging",
    required_permissions = "ADMINISTRATOR",
    required_bot_permissions = "MANAGE_WEBHOOKS"
)]
pub async fn fakemessage(
    ctx: Context<'_>,
    #[description = "A user mention, or `bot`"] target: String,
    #[description = "Message to post"]
    #[rest]
    message: String,
) -> CommandResult {
    send_as(ctx, &target, &message, None).await
}

/// Post a message under another user's name and avatar
#[poise::command(
    slash_command,
    guild_only,
    rename = "fakemessage",
    category = "Messaging",
    required_permissions = "ADMINISTRATOR",
    required_bot_permissions = "MANAGE_WEBHOOKS"
)]
pub async fn fakemessage_slash(
    ctx: Context<'_>,
    #[description = "User to impersonate"] user: serenity::User,
    #[description = "Message to post"] message: String,
    #[description = "Name to show instead of the user's"] username: Option<String>,
) -> CommandResult {
    send_as(ctx, &user.mention().to_string(), &message, username.as_deref()).await
}
