use poise::{CreateReply, serenity_prelude as serenity};
use serenity::{CreateAttachment, CreateEmbed, EditProfile};
use tokio::process::Command;
use tracing::{error, info};

use crate::commands::messaging::{UserIdentifier, classify_identifier};
use crate::commands::plugins::{plugin_context, render_reload, run_blocking};
use crate::plugins::script;
use crate::utils::messages::send_output;
use crate::utils::urls::is_http_url;
use crate::{CommandResult, Context};

const UP_TO_DATE_MARKER: &str = "Already up to date.";
const AVATAR_SIZE: u16 = 1024;

/// What a finished host command printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub text: String,
}

/// Runs `argv` to completion. The reported text is stdout, or stderr when
/// stdout is empty.
pub async fn run_host_command(argv: &[String]) -> Result<CommandOutput, std::io::Error> {
    let Some((program, args)) = argv.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ));
    };
    let output = Command::new(program).args(args).output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let text = if stdout.trim().is_empty() { stderr } else { stdout };
    Ok(CommandOutput {
        success: output.status.success(),
        text,
    })
}

pub fn already_up_to_date(pull_output: &str) -> bool {
    pull_output.contains(UP_TO_DATE_MARKER)
}

async fn reload_plugins(ctx: Context<'_>) -> CommandResult {
    let plugin_ctx = plugin_context(ctx);
    let registry = ctx.data().plugins.clone();
    let results = run_blocking(registry, move |r| r.reload_all(&plugin_ctx)).await?;
    ctx.say(format!("**Plugin Reload Results:**\n{}", render_reload(&results)))
        .await?;
    Ok(())
}

/// Pull the latest code, rebuild when it changed, and reload plugins
#[poise::command(
    prefix_command,
    slash_command,
    category = "Diagnostics",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn update(ctx: Context<'_>) -> CommandResult {
    let config = ctx.data().config.clone();
    info!("{} started an update", ctx.author().tag());

    ctx.say("**Starting update process...**\n1. Pulling latest changes from Git...")
        .await?;
    let pull = match run_host_command(&config.update_pull_command).await {
        Ok(pull) if pull.success => pull,
        Ok(pull) => {
            error!("Update pull failed: {}", pull.text.trim());
            send_output(ctx, "Failed to pull from Git:", &pull.text).await?;
            return Ok(());
        }
        Err(e) => {
            error!("Update pull could not run: {}", e);
            send_output(ctx, "Failed to pull from Git:", &e.to_string()).await?;
            return Ok(());
        }
    };
    send_output(ctx, "Git pull output:", &pull.text).await?;

    if already_up_to_date(&pull.text) {
        ctx.say("No new code changes. Skipping dependency update. Reloading plugins...")
            .await?;
        return reload_plugins(ctx).await;
    }

    ctx.say("2. Updating dependencies and rebuilding...").await?;
    match run_host_command(&config.update_install_command).await {
        Ok(install) if install.success => {
            send_output(ctx, "Install output:", &install.text).await?;
        }
        Ok(install) => {
            error!("Update install failed: {}", install.text.trim());
            send_output(ctx, "Failed to update dependencies:", &install.text).await?;
            return Ok(());
        }
        Err(e) => {
            error!("Update install could not run: {}", e);
            send_output(ctx, "Failed to update dependencies:", &e.to_string()).await?;
            return Ok(());
        }
    }

    ctx.say("3. Reloading all loaded plugins...").await?;
    reload_plugins(ctx).await?;
    ctx.say("✅ **Update complete!** For core bot changes to take effect, a manual restart might be required.")
        .await?;
    Ok(())
}

/// Run a snippet in the script sandbox and show what it printed
#[poise::command(
    prefix_command,
    slash_command,
    category = "Diagnostics",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn eval(
    ctx: Context<'_>,
    #[description = "Script to run"]
    #[rest]
    code: Option<String>,
) -> CommandResult {
    let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
        ctx.say("Please provide a script to run.").await?;
        return Ok(());
    };
    let code = strip_code_fence(&code).to_string();

    let result = tokio::task::spawn_blocking(move || script::evaluate(&code)).await?;
    match result {
        Ok(output) => {
            send_output(ctx, "**Output:**", &output.render()).await?;
        }
        Err(e) => {
            send_output(ctx, "**Error:**", &e.to_string()).await?;
        }
    }
    Ok(())
}

/// Accepts code pasted inside a Discord code block.
pub fn strip_code_fence(code: &str) -> &str {
    let trimmed = code.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    // Drop a language tag on the opening fence.
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.trim().contains(' ') => body.trim(),
        _ => inner.trim(),
    }
}

/// Change the bot's avatar to an image URL or another user's avatar
#[poise::command(
    prefix_command,
    slash_command,
    category = "Diagnostics",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn setavatar(
    ctx: Context<'_>,
    #[description = "Image URL, or a user mention or id"] source: Option<String>,
) -> CommandResult {
    let Some(source) = source.filter(|s| !s.trim().is_empty()) else {
        ctx.say("Please provide either an image URL or mention a user to use their avatar.")
            .await?;
        return Ok(());
    };

    let image_url = match classify_identifier(&source) {
        UserIdentifier::Mention(id) | UserIdentifier::Id(id) => {
            let user = id.to_user(ctx).await?;
            user.avatar_url()
                .map(|url| sized_avatar(&url))
                .unwrap_or_else(|| user.default_avatar_url())
        }
        UserIdentifier::Name(raw) if is_http_url(&raw) => raw,
        UserIdentifier::Name(_) => {
            ctx.say("Please provide a valid URL for the avatar image.")
                .await?;
            return Ok(());
        }
    };

    let result = async {
        let attachment = CreateAttachment::url(ctx, &image_url).await?;
        let mut me = ctx.cache().current_user().clone();
        me.edit(ctx, EditProfile::new().avatar(&attachment)).await
    };

    match result.await {
        Ok(()) => {
            info!("Avatar changed by {} to {}", ctx.author().tag(), image_url);
            ctx.send(
                CreateReply::default()
                    .content("✅ Bot avatar updated successfully!")
                    .ephemeral(true),
            )
            .await?;
        }
        Err(e) => {
            error!("Error setting bot avatar: {}", e);
            ctx.say(format!(
                "Failed to set bot avatar: {}. Make sure the URL is a direct link to an image (PNG, JPG, GIF) and the image size is within Discord limits.",
                e
            ))
            .await?;
        }
    }
    Ok(())
}

fn sized_avatar(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{}?size={}", base, AVATAR_SIZE),
        None => format!("{}?size={}", url, AVATAR_SIZE),
    }
}

/// Show a user's avatar
#[poise::command(prefix_command, slash_command, category = "General")]
pub async fn avatar(
    ctx: Context<'_>,
    #[description = "Whose avatar (defaults to you)"] user: Option<serenity::User>,
) -> CommandResult {
    let user = user.as_ref().unwrap_or_else(|| ctx.author());
    let embed = CreateEmbed::new()
        .title(format!("{}'s avatar", user.name))
        .image(sized_avatar(&user.face()));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("Updating 1a2b..3c4d\nFast-forward", false ; "changes pulled")]
    #[test_case("Already up to date.\n", true ; "nothing new")]
    fn test_already_up_to_date(output: &str, expected: bool) {
        assert_eq!(already_up_to_date(output), expected);
    }

    #[test_case("40 + 2", "40 + 2" ; "bare")]
    #[test_case("```rhai\nlet x = 1;\nx\n```", "let x = 1;\nx" ; "tagged fence")]
    #[test_case("```1 + 1```", "1 + 1" ; "inline fence")]
    fn test_strip_code_fence(input: &str, expected: &str) {
        assert_eq!(strip_code_fence(input), expected);
    }

    #[test]
    fn test_sized_avatar() {
        assert_eq!(
            sized_avatar("https://cdn.example/a.webp?size=128"),
            "https://cdn.example/a.webp?size=1024"
        );
        assert_eq!(
            sized_avatar("https://cdn.example/a.png"),
            "https://cdn.example/a.png?size=1024"
        );
    }

    #[tokio::test]
    async fn test_host_command_prefers_stdout() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo out; echo err >&2".to_string()];
        let output = run_host_command(&argv).await.unwrap();
        assert!(output.success);
        assert_eq!(output.text, "out\n");
    }

    #[tokio::test]
    async fn test_host_command_falls_back_to_stderr() {
        let argv = vec!["sh".to_string(), "-c".to_string(), "echo broken >&2; exit 1".to_string()];
        let output = run_host_command(&argv).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.text, "broken\n");
    }

    #[tokio::test]
    async fn test_empty_host_command() {
        assert_matches!(run_host_command(&[]).await, Err(_));
    }
}
