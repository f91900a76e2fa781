use std::fmt;

use poise::serenity_prelude as serenity;
use serenity::{ActivityData, OnlineStatus};
use thiserror::Error;
use tracing::info;

use crate::utils::urls::is_http_url;
use crate::{CommandResult, Context};

/// Activity shown from startup until someone changes it.
pub const DEFAULT_ACTIVITY: &str = "me tgc :cmds yu";

const STATUSES: &[&str] = &["online", "idle", "dnd", "invisible"];
const ACTIVITY_TYPES: &[&str] = &["playing", "streaming", "listening", "watching", "competing"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("Invalid status. Please use one of: `online, idle, dnd, invisible`.")]
    InvalidStatus,

    #[error("Invalid activity type. Please use one of: `playing, streaming, listening, watching, competing`.")]
    InvalidActivityType,

    #[error("Please provide an activity name.")]
    MissingName,

    #[error("For streaming activity, please provide a valid Twitch/YouTube URL as the last argument.")]
    MissingStreamUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Competing,
}

impl ActivityKind {
    fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Playing => "playing",
            ActivityKind::Streaming => "streaming",
            ActivityKind::Listening => "listening",
            ActivityKind::Watching => "watching",
            ActivityKind::Competing => "competing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivitySpec {
    pub kind: ActivityKind,
    pub name: String,
    pub url: Option<String>,
}

impl ActivitySpec {
    pub fn playing(name: &str) -> Self {
        Self {
            kind: ActivityKind::Playing,
            name: name.to_string(),
            url: None,
        }
    }

    pub fn to_activity_data(&self) -> ActivityData {
        match (self.kind, &self.url) {
            (ActivityKind::Streaming, Some(url)) => ActivityData::streaming(&self.name, url)
                .unwrap_or_else(|_| ActivityData::playing(&self.name)),
            (ActivityKind::Streaming, None) | (ActivityKind::Playing, _) => {
                ActivityData::playing(&self.name)
            }
            (ActivityKind::Listening, _) => ActivityData::listening(&self.name),
            (ActivityKind::Watching, _) => ActivityData::watching(&self.name),
            (ActivityKind::Competing, _) => ActivityData::competing(&self.name),
        }
    }
}

impl fmt::Display for ActivitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` `{}`", self.kind.as_str(), self.name)?;
        if let Some(url) = &self.url {
            write!(f, " (URL: {})", url)?;
        }
        Ok(())
    }
}

/// What the bot currently shows; the gateway does not echo our own presence back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceState {
    pub status: OnlineStatus,
    pub activity: Option<ActivitySpec>,
}

impl Default for PresenceState {
    fn default() -> Self {
        Self {
            status: OnlineStatus::Online,
            activity: Some(ActivitySpec::playing(DEFAULT_ACTIVITY)),
        }
    }
}

fn status_name(status: OnlineStatus) -> &'static str {
    match status {
        OnlineStatus::Idle => "idle",
        OnlineStatus::DoNotDisturb => "dnd",
        OnlineStatus::Invisible | OnlineStatus::Offline => "invisible",
        _ => "online",
    }
}

pub fn parse_status(input: &str) -> Result<OnlineStatus, PresenceError> {
    match input.trim().to_lowercase().as_str() {
        "online" => Ok(OnlineStatus::Online),
        "idle" => Ok(OnlineStatus::Idle),
        "dnd" => Ok(OnlineStatus::DoNotDisturb),
        "invisible" => Ok(OnlineStatus::Invisible),
        _ => Err(PresenceError::InvalidStatus),
    }
}

/// Parses `<type> <name...> [url]`. Streaming needs an http(s) URL as its last
/// word, which is taken out of the name.
pub fn parse_activity(kind: &str, rest: &str) -> Result<ActivitySpec, PresenceError> {
    let kind = match kind.trim().to_lowercase().as_str() {
        "playing" => ActivityKind::Playing,
        "streaming" => ActivityKind::Streaming,
        "listening" => ActivityKind::Listening,
        "watching" => ActivityKind::Watching,
        "competing" => ActivityKind::Competing,
        _ => return Err(PresenceError::InvalidActivityType),
    };
    let words: Vec<&str> = rest.split_whitespace().collect();

    if kind == ActivityKind::Streaming {
        let (url, name_words) = match words.split_last() {
            Some((last, init)) if is_http_url(last) => (last.to_string(), init),
            _ => return Err(PresenceError::MissingStreamUrl),
        };
        return Ok(ActivitySpec {
            kind,
            name: name_words.join(" "),
            url: Some(url),
        });
    }

    if words.is_empty() {
        return Err(PresenceError::MissingName);
    }
    Ok(ActivitySpec {
        kind,
        name: words.join(" "),
        url: None,
    })
}

pub fn render_overview(state: &PresenceState, prefix: &str) -> String {
    let activity = match &state.activity {
        Some(spec) => {
            let mut info = format!("Type: `{}`, Name: `{}`", spec.kind.as_str(), spec.name);
            if let Some(url) = &spec.url {
                info.push_str(&format!(", URL: `{}`", url));
            }
            info
        }
        None => "No custom activity set.".to_string(),
    };
    format!(
        "**Bot Presence Control:**\nCurrent Status: `{status}`\nCurrent Activity: {activity}\n\n**Usage:**\n`{p}control status <{statuses}>`\n`{p}control activity <{types}> <name> [url (for streaming)]`\n`{p}control clear` - Clears custom activity.",
        status = status_name(state.status),
        activity = activity,
        p = prefix,
        statuses = STATUSES.join("|"),
        types = ACTIVITY_TYPES.join("|"),
    )
}

fn apply(ctx: Context<'_>, state: &PresenceState) {
    let activity = state.activity.as_ref().map(ActivitySpec::to_activity_data);
    ctx.serenity_context().set_presence(activity, state.status);
}

/// Show or change the bot's status and activity
#[poise::command(
    prefix_command,
    slash_command,
    category = "Presence",
    required_permissions = "ADMINISTRATOR",
    subcommands("status", "activity", "clear")
)]
pub async fn control(ctx: Context<'_>) -> CommandResult {
    let state = ctx.data().presence.lock().clone();
    ctx.say(render_overview(&state, &ctx.data().config.prefix))
        .await?;
    Ok(())
}

/// Set online, idle, dnd or invisible
#[poise::command(prefix_command, slash_command, required_permissions = "ADMINISTRATOR")]
pub async fn status(
    ctx: Context<'_>,
    #[description = "online, idle, dnd or invisible"] status: String,
) -> CommandResult {
    let new_status = match parse_status(&status) {
        Ok(status) => status,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    let state = {
        let mut presence = ctx.data().presence.lock();
        presence.status = new_status;
        presence.clone()
    };
    apply(ctx, &state);
    info!("Status set to {:?} by {}", new_status, ctx.author().tag());

    ctx.say(format!("✅ Bot status set to `{}`.", status_name(new_status)))
        .await?;
    Ok(())
}

/// Set what the bot is playing, streaming, listening to, watching or competing in
#[poise::command(prefix_command, slash_command, required_permissions = "ADMINISTRATOR")]
pub async fn activity(
    ctx: Context<'_>,
    #[description = "playing, streaming, listening, watching or competing"] kind: String,
    #[description = "Activity name; streaming ends with its URL"]
    #[rest]
    name: Option<String>,
) -> CommandResult {
    let spec = match parse_activity(&kind, name.as_deref().unwrap_or_default()) {
        Ok(spec) => spec,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };

    let state = {
        let mut presence = ctx.data().presence.lock();
        presence.activity = Some(spec.clone());
        presence.clone()
    };
    apply(ctx, &state);
    info!("Activity set to {:?} by {}", spec, ctx.author().tag());

    ctx.say(format!("✅ Bot activity set to {}.", spec)).await?;
    Ok(())
}

/// Remove the custom activity
#[poise::command(prefix_command, slash_command, required_permissions = "ADMINISTRATOR")]
pub async fn clear(ctx: Context<'_>) -> CommandResult {
    let state = {
        let mut presence = ctx.data().presence.lock();
        presence.activity = None;
        presence.clone()
    };
    apply(ctx, &state);

    ctx.say("✅ Bot custom activity cleared.").await?;
    Ok(())
}
