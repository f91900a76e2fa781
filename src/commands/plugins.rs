use std::sync::Arc;

use tracing::{error, info};

use crate::plugins::PluginContext;
use crate::plugins::registry::{PluginEntry, PluginRegistry, PluginResult, PluginStatus};
use crate::utils::messages::chunk_response;
use crate::{CommandResult, Context};

pub fn render_plugin_list(entries: &[PluginEntry]) -> String {
    let mut out = String::from("**Available Plugins:**\n");
    if entries.is_empty() {
        out.push_str("No plugins found in the `plugins` directory.");
        return out;
    }
    let rows: Vec<String> = entries
        .iter()
        .map(|entry| {
            let status = if entry.loaded { "Loaded" } else { "Unloaded" };
            format!("`{}` ({})", entry.name, status)
        })
        .collect();
    out.push_str(&rows.join("\n"));
    out
}

/// One `- ` line per lifecycle step, each followed by whatever the plugin
/// said during that step.
pub fn render_reload(results: &[PluginResult<PluginStatus>]) -> String {
    if results.is_empty() {
        return "- No plugins are loaded.".to_string();
    }
    let mut lines = Vec::new();
    for result in results {
        match result {
            Ok(status) => {
                lines.push(format!("- {}", status.message));
                lines.extend(status.said.iter().map(|said| format!("  > {}", said)));
            }
            Err(e) => lines.push(format!("- {}", e)),
        }
    }
    lines.join("\n")
}

pub(crate) fn plugin_context(ctx: Context<'_>) -> PluginContext {
    PluginContext::new(ctx.guild_id().map(|g| g.get()), ctx.channel_id().get())
}

/// Script hooks are synchronous and may run up to their operation limit, so they
/// stay off the async workers.
pub(crate) async fn run_blocking<T, F>(registry: Arc<PluginRegistry>, f: F) -> Result<T, crate::Error>
where
    T: Send + 'static,
    F: FnOnce(&PluginRegistry) -> T + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(move || f(&registry)).await?)
}

/// Send the result line followed by whatever the plugin said.
async fn reply_status(ctx: Context<'_>, result: PluginResult<PluginStatus>) -> CommandResult {
    match result {
        Ok(status) => {
            ctx.say(status.message).await?;
            for line in status.said {
                ctx.channel_id().say(ctx, line).await?;
            }
        }
        Err(e) => {
            ctx.say(e.to_string()).await?;
        }
    }
    Ok(())
}

/// Manage script plugins
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Plugins",
    required_permissions = "ADMINISTRATOR",
    subcommands("load", "unload", "list", "reload")
)]
pub async fn plugin(ctx: Context<'_>) -> CommandResult {
    ctx.say("Usage: `plugin <load|unload|list|reload> [name]`")
        .await?;
    Ok(())
}

/// Load a plugin from the plugin directory
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn load(
    ctx: Context<'_>,
    #[description = "Plugin name, without extension"] name: String,
) -> CommandResult {
    let plugin_ctx = plugin_context(ctx);
    info!("{} is loading plugin {}", ctx.author().tag(), name);
    let registry = ctx.data().plugins.clone();
    let result = run_blocking(registry, move |r| r.load(&name, &plugin_ctx)).await?;
    reply_status(ctx, result).await
}

/// Unload a loaded plugin
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn unload(
    ctx: Context<'_>,
    #[description = "Plugin name"] name: String,
) -> CommandResult {
    let plugin_ctx = plugin_context(ctx);
    info!("{} is unloading plugin {}", ctx.author().tag(), name);
    let registry = ctx.data().plugins.clone();
    let result = run_blocking(registry, move |r| r.unload(&name, &plugin_ctx)).await?;
    reply_status(ctx, result).await
}

/// List plugins and whether they are loaded
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn list(ctx: Context<'_>) -> CommandResult {
    match ctx.data().plugins.list() {
        Ok(entries) => {
            chunk_response(ctx, render_plugin_list(&entries)).await?;
        }
        Err(e) => {
            error!("Error listing plugins: {}", e);
            ctx.say("Failed to list plugins.").await?;
        }
    }
    Ok(())
}

/// Unload and load again every loaded plugin
#[poise::command(prefix_command, slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn reload(ctx: Context<'_>) -> CommandResult {
    let plugin_ctx = plugin_context(ctx);
    let registry = ctx.data().plugins.clone();
    let results = run_blocking(registry, move |r| r.reload_all(&plugin_ctx)).await?;
    chunk_response(
        ctx,
        format!("**Plugin Reload Results:**\n{}", render_reload(&results)),
    )
    .await
}
