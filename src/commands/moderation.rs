use std::sync::LazyLock;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use poise::serenity_prelude as serenity;
use regex::Regex;
use serenity::{EditMember, Mentionable, RoleId};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{CommandResult, Context};

const NO_REASON: &str = "No reason provided.";
const SAY_LIFETIME: Duration = Duration::from_secs(5);
/// Discord refuses communication timeouts longer than 28 days.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 60 * 60);

static DURATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)([smhd])$").expect("duration pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("Invalid duration format. Use (e.g., 10s, 5m, 1h, 2d).")]
    Format,

    #[error("Timeouts can last at most 28 days.")]
    TooLong,
}

/// Parses `<n><s|m|h|d>` into a positive duration no longer than [`MAX_TIMEOUT`].
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let caps = DURATION_PATTERN
        .captures(input.trim())
        .ok_or(DurationError::Format)?;
    let value: u64 = caps[1].parse().map_err(|_| DurationError::TooLong)?;
    if value == 0 {
        return Err(DurationError::Format);
    }

    let unit = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => 24 * 60 * 60,
    };
    let seconds = value.checked_mul(unit).ok_or(DurationError::TooLong)?;
    let duration = Duration::from_secs(seconds);
    if duration > MAX_TIMEOUT {
        return Err(DurationError::TooLong);
    }
    Ok(duration)
}

fn reason_or_default(reason: Option<String>) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| NO_REASON.to_string())
}

/// What `rank` did with each requested role.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RankReport {
    pub added: Vec<String>,
    pub failed: Vec<String>,
}

impl RankReport {
    pub fn render(&self, member_tag: &str) -> String {
        let mut response = format!("**Role assignment for {}:**\n", member_tag);
        if !self.added.is_empty() {
            response.push_str(&format!("✅ Added: {}\n", self.added.join(", ")));
        }
        if !self.failed.is_empty() {
            response.push_str(&format!("❌ Failed: {}\n", self.failed.join(", ")));
        }
        if self.added.is_empty() && self.failed.is_empty() {
            response.push_str("No roles were assigned or found.");
        }
        response
    }
}

/// A guild role as seen from the cache.
#[derive(Debug, Clone)]
struct RoleInfo {
    id: RoleId,
    name: String,
    position: u16,
}

/// Snapshot of the guild's roles and the bot's highest role position. Taken from
/// the cache so nothing is held across an await.
fn guild_roles(ctx: Context<'_>) -> Option<(Vec<RoleInfo>, Option<u16>)> {
    let bot_id = ctx.cache().current_user().id;
    let guild = ctx.guild()?;
    let roles = guild
        .roles
        .values()
        .map(|r| RoleInfo {
            id: r.id,
            name: r.name.clone(),
            position: r.position,
        })
        .collect::<Vec<_>>();
    let bot_top = guild.members.get(&bot_id).and_then(|m| {
        m.roles
            .iter()
            .filter_map(|id| guild.roles.get(id))
            .map(|r| r.position)
            .max()
    });
    Some((roles, bot_top))
}

fn find_role<'a>(roles: &'a [RoleInfo], name: &str) -> Option<&'a RoleInfo> {
    let wanted = name.trim().to_lowercase();
    roles.iter().find(|r| r.name.to_lowercase() == wanted)
}

fn is_in_voice(ctx: Context<'_>, user_id: serenity::UserId) -> bool {
    ctx.guild()
        .and_then(|g| g.voice_states.get(&user_id).and_then(|vs| vs.channel_id))
        .is_some()
}

/// Kick a member from the server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "KICK_MEMBERS",
    required_bot_permissions = "KICK_MEMBERS"
)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    let reason = reason_or_default(reason);
    match member.kick_with_reason(ctx, &reason).await {
        Ok(()) => {
            info!("Kicked {} ({})", member.user.tag(), reason);
            ctx.say(format!(
                "{} has been kicked. Reason: {}",
                member.user.tag(),
                reason
            ))
            .await?;
        }
        Err(e) => {
            error!("Error kicking member: {}", e);
            ctx.say("I cannot kick this member. They might have a higher role or I lack permissions.")
                .await?;
        }
    }
    Ok(())
}

/// Ban a member from the server
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "BAN_MEMBERS",
    required_bot_permissions = "BAN_MEMBERS"
)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    let reason = reason_or_default(reason);
    match member.ban_with_reason(ctx, 0, &reason).await {
        Ok(()) => {
            info!("Banned {} ({})", member.user.tag(), reason);
            ctx.say(format!(
                "{} has been banned. Reason: {}",
                member.user.tag(),
                reason
            ))
            .await?;
        }
        Err(e) => {
            error!("Error banning member: {}", e);
            ctx.say("I cannot ban this member. They might have a higher role or I lack permissions.")
                .await?;
        }
    }
    Ok(())
}

/// Time out a member, e.g. `10m`
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MODERATE_MEMBERS",
    required_bot_permissions = "MODERATE_MEMBERS"
)]
pub async fn timeout(
    ctx: Context<'_>,
    #[description = "Member to time out"] member: serenity::Member,
    #[description = "Duration such as 10s, 5m, 1h, 2d"] duration: String,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    let length = match parse_duration(&duration) {
        Ok(length) => length,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };
    let reason = reason_or_default(reason);
    let until = Utc::now() + TimeDelta::from_std(length)?;

    let edit = EditMember::new()
        .disable_communication_until(until.to_rfc3339())
        .audit_log_reason(&reason);
    match member.guild_id.edit_member(ctx, member.user.id, edit).await {
        Ok(_) => {
            ctx.say(format!(
                "{} has been timed out for {}. Reason: {}",
                member.user.tag(),
                duration,
                reason
            ))
            .await?;
        }
        Err(e) => {
            error!("Error timing out member: {}", e);
            ctx.say("I cannot timeout this member. They might have a higher role or I lack permissions.")
                .await?;
        }
    }
    Ok(())
}

/// Remove a member's timeout
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MODERATE_MEMBERS",
    required_bot_permissions = "MODERATE_MEMBERS"
)]
pub async fn untimeout(
    ctx: Context<'_>,
    #[description = "Member to release"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    let reason = reason_or_default(reason);
    let edit = EditMember::new()
        .enable_communication()
        .audit_log_reason(&reason);
    match member.guild_id.edit_member(ctx, member.user.id, edit).await {
        Ok(_) => {
            ctx.say(format!(
                "{}'s timeout has been removed. Reason: {}",
                member.user.tag(),
                reason
            ))
            .await?;
        }
        Err(e) => {
            error!("Error removing timeout: {}", e);
            ctx.say("Failed to remove timeout from the member.").await?;
        }
    }
    Ok(())
}

async fn set_voice_mute(
    ctx: Context<'_>,
    member: serenity::Member,
    reason: Option<String>,
    mute: bool,
) -> CommandResult {
    let verb = if mute { "muted" } else { "unmuted" };
    if !is_in_voice(ctx, member.user.id) {
        ctx.say(format!("{} is not in a voice channel.", member.user.tag()))
            .await?;
        return Ok(());
    }

    let reason = reason_or_default(reason);
    let edit = EditMember::new().mute(mute).audit_log_reason(&reason);
    match member.guild_id.edit_member(ctx, member.user.id, edit).await {
        Ok(_) => {
            ctx.say(format!(
                "{} has been voice {}. Reason: {}",
                member.user.tag(),
                verb,
                reason
            ))
            .await?;
        }
        Err(e) => {
            error!("Error voice {} member: {}", verb, e);
            ctx.say(format!("Failed to voice {} the member.", verb.trim_end_matches('d')))
                .await?;
        }
    }
    Ok(())
}

/// Server-mute a member in voice
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MUTE_MEMBERS",
    required_bot_permissions = "MUTE_MEMBERS"
)]
pub async fn mutevoice(
    ctx: Context<'_>,
    #[description = "Member to mute"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    set_voice_mute(ctx, member, reason, true).await
}

/// Lift a member's server voice mute
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MUTE_MEMBERS",
    required_bot_permissions = "MUTE_MEMBERS"
)]
pub async fn unmutevoice(
    ctx: Context<'_>,
    #[description = "Member to unmute"] member: serenity::Member,
    #[description = "Reason"]
    #[rest]
    reason: Option<String>,
) -> CommandResult {
    set_voice_mute(ctx, member, reason, false).await
}

/// Add a role to a member, or remove it if they already have it
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MANAGE_ROLES",
    required_bot_permissions = "MANAGE_ROLES"
)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Member to change"] member: serenity::Member,
    #[description = "Role name"]
    #[rest]
    role_name: String,
) -> CommandResult {
    let Some((roles, bot_top)) = guild_roles(ctx) else {
        ctx.say("Could not read this server's roles.").await?;
        return Ok(());
    };
    let Some(role) = find_role(&roles, &role_name) else {
        ctx.say(format!("Role \"{}\" not found.", role_name.trim()))
            .await?;
        return Ok(());
    };
    if bot_top.is_some_and(|top| role.position >= top) {
        ctx.say("I cannot manage this role as it is higher than or equal to my highest role.")
            .await?;
        return Ok(());
    }

    let result = if member.roles.contains(&role.id) {
        member
            .remove_role(ctx, role.id)
            .await
            .map(|_| format!("Removed role **{}** from {}.", role.name, member.user.tag()))
    } else {
        member
            .add_role(ctx, role.id)
            .await
            .map(|_| format!("Added role **{}** to {}.", role.name, member.user.tag()))
    };

    match result {
        Ok(reply) => ctx.say(reply).await?,
        Err(e) => {
            error!("Error managing role: {}", e);
            ctx.say("Failed to manage the role. Make sure the role exists and I have permissions.")
                .await?
        }
    };
    Ok(())
}

/// Assign several roles at once
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "MANAGE_ROLES",
    required_bot_permissions = "MANAGE_ROLES"
)]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "Member to promote"] member: serenity::Member,
    #[description = "Role names separated by spaces"]
    #[rest]
    role_names: String,
) -> CommandResult {
    let requested: Vec<String> = role_names
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    if requested.is_empty() {
        ctx.say("Please provide at least one role name to assign (e.g., `!rank @user admin mod vip`).")
            .await?;
        return Ok(());
    }

    let Some((roles, bot_top)) = guild_roles(ctx) else {
        ctx.say("Could not read this server's roles.").await?;
        return Ok(());
    };

    let mut report = RankReport::default();
    for name in &requested {
        let Some(role) = find_role(&roles, name) else {
            report.failed.push(format!("`{}` (not found)", name));
            continue;
        };
        if bot_top.is_some_and(|top| role.position >= top) {
            report.failed.push(format!("`{}` (bot cannot manage)", name));
            continue;
        }
        if member.roles.contains(&role.id) {
            report.failed.push(format!("`{}` (already has)", name));
            continue;
        }
        match member.add_role(ctx, role.id).await {
            Ok(()) => report.added.push(format!("`{}`", role.name)),
            Err(e) => {
                warn!("Error adding role {} to {}: {}", role.name, member.user.tag(), e);
                report.failed.push(format!("`{}` (failed to add)", role.name));
            }
        }
    }

    ctx.say(report.render(&member.user.tag())).await?;
    Ok(())
}

/// Make the bot say something; the message removes itself after a few seconds
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Moderation",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn say(
    ctx: Context<'_>,
    #[description = "What to say"]
    #[rest]
    text: String,
) -> CommandResult {
    if let poise::Context::Prefix(prefix) = ctx {
        if let Err(e) = prefix.msg.delete(ctx).await {
            warn!("Failed to delete say command message: {}", e);
        }
    } else {
        ctx.send(poise::CreateReply::default().content("Sent.").ephemeral(true))
            .await?;
    }

    let sent = ctx.channel_id().say(ctx, text).await?;
    let http = ctx.serenity_context().http.clone();
    tokio::spawn(async move {
        tokio::time::sleep(SAY_LIFETIME).await;
        if let Err(e) = sent.delete(http).await {
            warn!("Failed to delete said message: {}", e);
        }
    });
    Ok(())
}

/// Post an alert, optionally in another channel
#[poise::command(prefix_command, slash_command, guild_only, category = "Moderation")]
pub async fn alert(
    ctx: Context<'_>,
    #[description = "Channel to alert (defaults to this one)"]
    channel: Option<serenity::GuildChannel>,
    #[description = "Alert text"]
    #[rest]
    message: String,
) -> CommandResult {
    let target = channel.as_ref().map(|c| c.id).unwrap_or(ctx.channel_id());
    let text = format!("🚨 **ALERT from {}:** {}", ctx.author().tag(), message);

    match target.say(ctx, text).await {
        Ok(_) if target != ctx.channel_id() => {
            ctx.say(format!("Alert sent to {}.", target.mention())).await?;
        }
        Ok(_) => {
            // Interactions need an answer of their own.
            if let poise::Context::Application(_) = ctx {
                ctx.send(poise::CreateReply::default().content("Alert sent.").ephemeral(true))
                    .await?;
            }
        }
        Err(e) => {
            error!("Error sending alert: {}", e);
            ctx.say(format!(
                "Failed to send alert to {}. Make sure I have permission to send messages there.",
                target.mention()
            ))
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("10s", 10)]
    #[case("5m", 300)]
    #[case("1h", 3600)]
    #[case("2d", 172_800)]
    #[case("28d", 2_419_200)]
    fn test_parse_duration(#[case] input: &str, #[case] seconds: u64) {
        assert_eq!(parse_duration(input), Ok(Duration::from_secs(seconds)));
    }

    #[rstest]
    #[case("0s", DurationError::Format)]
    #[case("10", DurationError::Format)]
    #[case("5w", DurationError::Format)]
    #[case("1H", DurationError::Format)]
    #[case("29d", DurationError::TooLong)]
    #[case("99999999999999999999s", DurationError::TooLong)]
    fn test_parse_duration_rejects(#[case] input: &str, #[case] expected: DurationError) {
        assert_eq!(parse_duration(input), Err(expected));
    }

    #[test]
    fn test_reason_defaults() {
        assert_eq!(reason_or_default(None), NO_REASON);
        assert_eq!(reason_or_default(Some("  ".into())), NO_REASON);
        assert_eq!(reason_or_default(Some(" spam ".into())), "spam");
    }

    #[test]
    fn test_find_role_ignores_case() {
        let roles = vec![
            RoleInfo {
                id: RoleId::new(1),
                name: "Moderator".into(),
                position: 3,
            },
            RoleInfo {
                id: RoleId::new(2),
                name: "VIP".into(),
                position: 1,
            },
        ];
        assert_eq!(find_role(&roles, "vip").map(|r| r.id), Some(RoleId::new(2)));
        assert!(find_role(&roles, "admin").is_none());
    }

    #[test]
    fn test_rank_report_render() {
        let report = RankReport {
            added: vec!["`VIP`".into()],
            failed: vec!["`admin` (not found)".into()],
        };
        assert_eq!(
            report.render("user#0001"),
            "**Role assignment for user#0001:**\n✅ Added: `VIP`\n❌ Failed: `admin` (not found)\n"
        );
        assert_eq!(
            RankReport::default().render("u"),
            "**Role assignment for u:**\nNo roles were assigned or found."
        );
    }
}
