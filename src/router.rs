//! Turns prefixed messages and slash interactions into command invocations, and
//! turns whatever goes wrong along the way into a reply.

use std::fmt;

use poise::serenity_prelude as serenity;
use poise::{CreateReply, FrameworkError};
use serenity::{CreateInteractionResponse, CreateInteractionResponseMessage};
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::{Context, Data, Error, commands};

const UNKNOWN_COMMAND: &str = "Unknown command!";
const NO_PERMISSION: &str = "You do not have permission to use this command.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Prefix,
    Slash,
}

/// One line of the command log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub kind: InvocationKind,
    pub command_name: String,
    pub args: String,
    pub invoker: String,
    pub guild: Option<u64>,
    pub channel: u64,
}

impl CommandInvocation {
    pub fn from_context(ctx: Context<'_>) -> Self {
        let kind = match ctx {
            poise::Context::Prefix(_) => InvocationKind::Prefix,
            poise::Context::Application(_) => InvocationKind::Slash,
        };
        Self {
            kind,
            command_name: ctx.command().qualified_name.clone(),
            args: ctx.invocation_string(),
            invoker: ctx.author().tag(),
            guild: ctx.guild_id().map(|g| g.get()),
            channel: ctx.channel_id().get(),
        }
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            InvocationKind::Prefix => "prefix",
            InvocationKind::Slash => "slash",
        };
        write!(
            f,
            "{} command `{}` from {} in ",
            kind, self.command_name, self.invoker
        )?;
        match self.guild {
            Some(guild) => write!(f, "guild {} channel {}", guild, self.channel)?,
            None => write!(f, "DM {}", self.channel)?,
        }
        write!(f, ": {}", self.args)
    }
}

/// The reply for a failed command.
pub fn command_failure_message(command_name: &str, error: &Error) -> String {
    format!(
        "Something went wrong while running `{}`: {}",
        command_name, error
    )
}

async fn reply_ephemeral(ctx: Context<'_>, content: String) {
    let reply = CreateReply::default().content(content).ephemeral(true);
    if let Err(e) = ctx.send(reply).await {
        warn!("Could not deliver error reply: {}", e);
    }
}

async fn on_error(error: FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::UnknownCommand { msg_content, .. } => {
            debug!("Ignoring unknown command: {}", msg_content);
        }
        FrameworkError::UnknownInteraction {
            ctx, interaction, ..
        } => {
            warn!("Unknown interaction `{}`", interaction.data.name);
            let response = CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(UNKNOWN_COMMAND)
                    .ephemeral(true),
            );
            if let Err(e) = interaction.create_response(ctx, response).await {
                warn!("Could not answer unknown interaction: {}", e);
            }
        }
        FrameworkError::Command { error, ctx, .. } => {
            let name = ctx.command().qualified_name.clone();
            error!("Error in command `{}`: {:?}", name, error);
            reply_ephemeral(ctx, command_failure_message(&name, &error)).await;
        }
        FrameworkError::MissingUserPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            info!(
                "{} lacks {:?} for `{}`",
                ctx.author().tag(),
                missing_permissions,
                ctx.command().qualified_name
            );
            reply_ephemeral(ctx, NO_PERMISSION.to_string()).await;
        }
        FrameworkError::MissingBotPermissions {
            missing_permissions,
            ctx,
            ..
        } => {
            warn!(
                "Missing bot permissions {} for `{}`",
                missing_permissions,
                ctx.command().qualified_name
            );
            reply_ephemeral(
                ctx,
                format!(
                    "I am missing the following permissions for this command: {}",
                    missing_permissions
                ),
            )
            .await;
        }
        FrameworkError::ArgumentParse {
            error, input, ctx, ..
        } => {
            debug!(
                "Bad arguments for `{}` ({:?}): {}",
                ctx.command().qualified_name,
                input,
                error
            );
            let prefix = match ctx {
                poise::Context::Prefix(p) => p.prefix.to_string(),
                poise::Context::Application(_) => "/".to_string(),
            };
            reply_ephemeral(
                ctx,
                format!(
                    "Invalid arguments: {}. See `{}help {}` for usage.",
                    error,
                    prefix,
                    ctx.command().qualified_name
                ),
            )
            .await;
        }
        FrameworkError::GuildOnly { ctx, .. } => {
            reply_ephemeral(ctx, "This command only works in a server.".to_string()).await;
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!("Error while handling error: {}", e);
            }
        }
    }
}

/// Framework options with every command, the configured prefix, and the
/// logging and error hooks.
pub fn framework_options(config: &BotConfig) -> poise::FrameworkOptions<Data, Error> {
    poise::FrameworkOptions {
        commands: commands::all(),
        prefix_options: poise::PrefixFrameworkOptions {
            prefix: Some(config.prefix.clone()),
            mention_as_prefix: true,
            case_insensitive_commands: true,
            ..Default::default()
        },
        on_error: |error| Box::pin(on_error(error)),
        pre_command: |ctx| {
            Box::pin(async move {
                info!("{}", CommandInvocation::from_context(ctx));
            })
        },
        post_command: |ctx| {
            Box::pin(async move {
                debug!("Finished `{}`", ctx.command().qualified_name);
            })
        },
        ..Default::default()
    }
}
