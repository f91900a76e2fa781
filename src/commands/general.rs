use std::fmt;
use std::sync::LazyLock;

use rand::Rng;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::{CommandResult, Context};

pub const MAX_DICE: u32 = 100;
pub const MAX_SIDES: u32 = 1000;

static DICE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)d(\d+)$").expect("dice pattern is valid"));

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiceError {
    #[error("Invalid dice roll format. Use XdY (e.g., `!roll 2d6`).")]
    Format,

    #[error("Number of dice and sides must be positive integers.")]
    NotPositive,

    #[error("Please keep the number of dice (max 100) and sides (max 1000) reasonable.")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiceSpec {
    pub dice: u32,
    pub sides: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    pub spec: DiceSpec,
    pub values: Vec<u32>,
    pub total: u32,
}

/// Parses `XdY`. Every bound is checked before anything is rolled.
pub fn parse_dice(input: &str) -> Result<DiceSpec, DiceError> {
    let caps = DICE_PATTERN
        .captures(input.trim())
        .ok_or(DiceError::Format)?;

    // The pattern only admits digits, so a parse failure means overflow.
    let dice: u64 = caps[1].parse().map_err(|_| DiceError::TooLarge)?;
    let sides: u64 = caps[2].parse().map_err(|_| DiceError::TooLarge)?;

    if dice == 0 || sides == 0 {
        return Err(DiceError::NotPositive);
    }
    if dice > MAX_DICE as u64 || sides > MAX_SIDES as u64 {
        return Err(DiceError::TooLarge);
    }

    Ok(DiceSpec {
        dice: dice as u32,
        sides: sides as u32,
    })
}

impl DiceSpec {
    pub fn roll<R: Rng>(&self, rng: &mut R) -> DiceRoll {
        let values: Vec<u32> = (0..self.dice)
            .map(|_| rng.random_range(1..=self.sides))
            .collect();
        let total = values.iter().sum();
        DiceRoll {
            spec: *self,
            values,
            total,
        }
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values: Vec<String> = self.values.iter().map(u32::to_string).collect();
        write!(
            f,
            "🎲 Rolling {}d{}: [{}] Total: **{}**",
            self.spec.dice,
            self.spec.sides,
            values.join(", "),
            self.total
        )
    }
}

/// Show help for all commands or a single one
#[poise::command(prefix_command, slash_command, category = "General")]
pub async fn help(
    ctx: Context<'_>,
    #[description = "Specific command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    command: Option<String>,
) -> CommandResult {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            show_context_menu_commands: true,
            extra_text_at_bottom: "Prefix commands and slash commands share the same names.",
            ..Default::default()
        },
    )
    .await
    .map_err(|e| e.into())
}

/// Register or unregister the slash commands
#[poise::command(prefix_command, hide_in_help, owners_only)]
pub async fn register(ctx: Context<'_>) -> CommandResult {
    poise::builtins::register_application_commands_buttons(ctx)
        .await
        .map_err(|e| e.into())
}

/// Check that the bot is responding
#[poise::command(prefix_command, slash_command, category = "General")]
pub async fn test(ctx: Context<'_>) -> CommandResult {
    ctx.say("Test successful!").await?;
    Ok(())
}

/// Roll dice, e.g. `2d6`
#[poise::command(prefix_command, slash_command, category = "General")]
pub async fn roll(
    ctx: Context<'_>,
    #[description = "Dice in XdY form, e.g. 2d6"] dice: Option<String>,
) -> CommandResult {
    let Some(dice) = dice else {
        ctx.say("Please provide a dice roll in the format XdY (e.g., `!roll 2d6`).")
            .await?;
        return Ok(());
    };

    let reply = match parse_dice(&dice) {
        Ok(spec) => {
            let roll = spec.roll(&mut rand::rng());
            debug!("Rolled {:?}", roll);
            roll.to_string()
        }
        Err(e) => e.to_string(),
    };

    ctx.say(reply).await?;
    Ok(())
}
