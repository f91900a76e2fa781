use std::path::Path;
use std::sync::Arc;

use poise::{CreateReply, serenity_prelude as serenity};
use serenity::{
    ChannelId, ChannelType, CreateEmbed, CreateEmbedFooter, CreateInvite, CreateMessage,
    GuildChannel, Mentionable, Timestamp,
};
use tracing::{error, info, warn};

use crate::utils::reporter::ChannelReporter;
use crate::utils::urls::is_http_url;
use crate::voice::manager::{EnqueueOutcome, SessionSnapshot};
use crate::voice::source::{
    AudioSource, CLIP_EXTENSIONS, VIDEO_EXTENSIONS, list_media_files, resolve_media_file,
};
use crate::voice::transport::FailureReporter;
use crate::voice::VoiceError;
use crate::{CommandResult, Context};

const CALL_INVITE_MAX_AGE_SECS: u32 = 600;

/// The voice channel the command author is sitting in, if any.
fn author_voice_channel(ctx: Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|vs| vs.channel_id)
}

fn channel_reporter(ctx: Context<'_>) -> Arc<dyn FailureReporter> {
    ChannelReporter::new(ctx.serenity_context().http.clone(), ctx.channel_id())
}

/// Renders a session for the `queue` command.
pub fn describe_session(snapshot: &SessionSnapshot) -> String {
    let mut out = match &snapshot.now_playing {
        Some(source) => format!("**Now playing:** `{}`", source),
        None => "Nothing is playing.".to_string(),
    };
    if snapshot.queued.is_empty() {
        out.push_str("\nThe queue is empty.");
    } else {
        out.push_str("\n**Up next:**");
        for (i, source) in snapshot.queued.iter().enumerate() {
            out.push_str(&format!("\n{}. `{}`", i + 1, source));
        }
    }
    out
}

/// Renders a directory listing, or `empty` when there is nothing to show.
pub fn describe_files(heading: &str, files: &[String], empty: &str) -> String {
    if files.is_empty() {
        empty.to_string()
    } else {
        format!("{}\n{}", heading, files.join(", "))
    }
}

async fn list_files(
    ctx: Context<'_>,
    dir: &Path,
    extensions: &[&str],
    heading: &str,
    empty: &str,
    what: &str,
) -> CommandResult {
    match list_media_files(dir, extensions) {
        Ok(files) => {
            ctx.say(describe_files(heading, &files, empty)).await?;
        }
        Err(e) => {
            error!("Error reading {}: {}", dir.display(), e);
            ctx.say(format!("Failed to list {}.", what)).await?;
        }
    }
    Ok(())
}

/// Resolves a media file, replying with the lookup error when it fails.
async fn resolve_or_reply(
    ctx: Context<'_>,
    dir: &Path,
    name: &str,
    extensions: &[&str],
) -> Result<Option<AudioSource>, crate::Error> {
    match resolve_media_file(dir, name, extensions) {
        Ok(path) => Ok(Some(AudioSource::StaticFile { path })),
        Err(e) => {
            ctx.say(format!("{} Looked in `{}`.", e, dir.display()))
                .await?;
            Ok(None)
        }
    }
}

/// Plays `source` in the bot's current channel, replying with `announce` when
/// it starts.
async fn play_in_current(
    ctx: Context<'_>,
    source: AudioSource,
    announce: String,
    failure_prefix: &str,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    if !ensure_session(ctx).await? {
        return Ok(());
    }
    let voice = ctx.data().voice.clone();

    match voice.play(guild_id, source, channel_reporter(ctx)).await {
        Ok(_) => {
            ctx.say(announce).await?;
        }
        Err(VoiceError::NotConnected) => {
            ctx.say(VoiceError::NotConnected.to_string()).await?;
        }
        Err(e) => {
            error!("{} in guild {}: {}", failure_prefix, guild_id, e);
            ctx.say(format!("{}: {}", failure_prefix, e)).await?;
        }
    }
    Ok(())
}

/// Joins the author's voice channel when the guild has no session yet.
/// Replies and returns false when there is nothing to join.
async fn ensure_session(ctx: Context<'_>) -> Result<bool, crate::Error> {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    let voice = ctx.data().voice.clone();
    if voice.has_session(guild_id) {
        return Ok(true);
    }
    let Some(channel_id) = author_voice_channel(ctx) else {
        ctx.say(VoiceError::UserNotInVoiceChannel.to_string()).await?;
        return Ok(false);
    };

    match voice.ensure_joined(guild_id, channel_id).await {
        Ok(()) => Ok(true),
        Err(e) => {
            error!("Error joining voice channel {}: {}", channel_id, e);
            ctx.say(format!("Failed to join the voice channel: {}", e))
                .await?;
            Ok(false)
        }
    }
}

/// Join the voice channel you are in
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Voice",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn call(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    let Some(channel_id) = author_voice_channel(ctx) else {
        ctx.say("You need to be in a voice channel to use this command!")
            .await?;
        return Ok(());
    };

    match ctx.data().voice.join(guild_id, channel_id).await {
        Ok(()) => {
            let name = channel_id
                .name(ctx)
                .await
                .unwrap_or_else(|_| channel_id.to_string());
            ctx.say(format!("Joined voice channel: **{}**", name)).await?;
        }
        Err(e) => {
            error!("Error joining voice channel {}: {}", channel_id, e);
            ctx.say("Failed to join the voice channel.").await?;
        }
    }
    Ok(())
}

/// Join a voice channel and play a video's audio there
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Voice",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn callvoice(
    ctx: Context<'_>,
    #[description = "Voice channel to join"] channel: GuildChannel,
    #[description = "File from the videos directory"] file: String,
) -> CommandResult {
    if !matches!(channel.kind, ChannelType::Voice | ChannelType::Stage) {
        ctx.say("Please mention a valid voice channel (e.g., `#general-voice`).")
            .await?;
        return Ok(());
    }
    let videos_dir = ctx.data().config.videos_dir.clone();
    let Some(source) = resolve_or_reply(ctx, &videos_dir, &file, VIDEO_EXTENSIONS).await? else {
        return Ok(());
    };

    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    if let Err(e) = ctx.data().voice.join(guild_id, channel.id).await {
        error!("Error joining {}: {}", channel.name, e);
        ctx.say(format!("Failed to join channel or play video: {}.", e))
            .await?;
        return Ok(());
    }
    ctx.say(format!("Joined voice channel: **{}**", channel.name))
        .await?;

    play_in_current(
        ctx,
        source,
        format!(
            "Now playing audio from local video in **{}**: `{}`",
            channel.name, file
        ),
        &format!("Failed to play local video audio in **{}**", channel.name),
    )
    .await
}

/// Play a soundboard clip, or list them when no name is given
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Voice",
    aliases("sound")
)]
pub async fn playsound(
    ctx: Context<'_>,
    #[description = "Clip name, with or without extension"] clip: Option<String>,
) -> CommandResult {
    let dir = ctx.data().config.soundboard_dir.clone();
    let Some(clip) = clip.filter(|c| !c.trim().is_empty()) else {
        return list_files(
            ctx,
            &dir,
            CLIP_EXTENSIONS,
            "Available soundboard clips:",
            "No soundboard clips found. Please provide a clip name once some are added.",
            "soundboard clips",
        )
        .await;
    };

    let Some(source) = resolve_or_reply(ctx, &dir, &clip, CLIP_EXTENSIONS).await? else {
        return Ok(());
    };
    play_in_current(
        ctx,
        source,
        format!("Now playing soundboard clip: `{}`", clip),
        "Failed to play soundboard clip",
    )
    .await
}

/// List the soundboard clips
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn listsounds(ctx: Context<'_>) -> CommandResult {
    let dir = ctx.data().config.soundboard_dir.clone();
    list_files(
        ctx,
        &dir,
        CLIP_EXTENSIONS,
        "Available soundboard clips:",
        "No soundboard clips found in the `soundboard_clips` directory.",
        "soundboard clips",
    )
    .await
}

/// Stream the audio of a video URL, replacing whatever is playing
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn ytplay(
    ctx: Context<'_>,
    #[description = "Video URL"] url: Option<String>,
) -> CommandResult {
    let Some(url) = url.filter(|u| is_http_url(u)) else {
        ctx.say("Please provide a YouTube URL.").await?;
        return Ok(());
    };
    if !ensure_session(ctx).await? {
        return Ok(());
    }

    ctx.say(format!("Attempting to play YouTube audio from: `{}`...", url))
        .await?;
    play_in_current(
        ctx,
        AudioSource::Downloaded { url },
        "Now playing YouTube audio!".to_string(),
        "Failed to play YouTube audio",
    )
    .await
}

/// Add a video URL's audio to the queue
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn enqueue(
    ctx: Context<'_>,
    #[description = "Video URL"] url: Option<String>,
) -> CommandResult {
    let Some(url) = url.filter(|u| is_http_url(u)) else {
        ctx.say("Please provide a YouTube URL.").await?;
        return Ok(());
    };
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    if !ensure_session(ctx).await? {
        return Ok(());
    }
    let voice = ctx.data().voice.clone();

    let source = AudioSource::Downloaded { url: url.clone() };
    match voice.enqueue(guild_id, source, channel_reporter(ctx)).await {
        Ok(EnqueueOutcome::Started { .. }) => {
            ctx.say(format!("Now playing: `{}`", url)).await?;
        }
        Ok(EnqueueOutcome::Queued { position }) => {
            ctx.say(format!("Queued `{}` at position {}.", url, position))
                .await?;
        }
        Err(VoiceError::NotConnected) => {
            ctx.say(VoiceError::NotConnected.to_string()).await?;
        }
        Err(e) => {
            error!("Failed to enqueue {} in guild {}: {}", url, guild_id, e);
            ctx.say(format!("Failed to play YouTube audio: {}", e))
                .await?;
        }
    }
    Ok(())
}

/// Show what is playing and what is queued
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn queue(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    match ctx.data().voice.snapshot(guild_id) {
        Some(snapshot) => {
            ctx.say(describe_session(&snapshot)).await?;
        }
        None => {
            ctx.say(VoiceError::NotConnected.to_string()).await?;
        }
    }
    Ok(())
}

/// Play a live audio stream URL
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn livestream(
    ctx: Context<'_>,
    #[description = "Stream URL"] url: Option<String>,
) -> CommandResult {
    let Some(url) = url.filter(|u| is_http_url(u)) else {
        ctx.say("Please provide a live audio stream URL.").await?;
        return Ok(());
    };
    if !ensure_session(ctx).await? {
        return Ok(());
    }

    ctx.say(format!("Attempting to play live stream from: `{}`...", url))
        .await?;
    play_in_current(
        ctx,
        AudioSource::LiveStream { url },
        "Now playing live stream!".to_string(),
        "Failed to play live stream",
    )
    .await
}

/// Play the audio track of a local video
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn playvideo(
    ctx: Context<'_>,
    #[description = "File from the videos directory"] file: Option<String>,
) -> CommandResult {
    let Some(file) = file.filter(|f| !f.trim().is_empty()) else {
        ctx.say("Please provide a filename (e.g., `video.mp4`) from the `videos` directory.")
            .await?;
        return Ok(());
    };
    let dir = ctx.data().config.videos_dir.clone();
    let Some(source) = resolve_or_reply(ctx, &dir, &file, VIDEO_EXTENSIONS).await? else {
        return Ok(());
    };
    play_in_current(
        ctx,
        source,
        format!("Now playing audio from local video: `{}`", file),
        "Failed to play local video audio",
    )
    .await
}

/// List the local videos
#[poise::command(prefix_command, slash_command, guild_only, category = "Voice")]
pub async fn listvideos(ctx: Context<'_>) -> CommandResult {
    let dir = ctx.data().config.videos_dir.clone();
    list_files(
        ctx,
        &dir,
        VIDEO_EXTENSIONS,
        "Available videos:",
        "No videos found in the `videos` directory.",
        "videos",
    )
    .await
}

/// Stop playback and leave the voice channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Voice",
    aliases("stopvideo", "leave")
)]
pub async fn stop(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    if ctx.data().voice.stop(guild_id).await {
        ctx.say("Stopped audio and left the voice channel.").await?;
    } else {
        ctx.say("I am not in a voice channel.").await?;
    }
    Ok(())
}

fn incoming_call_embed(caller: &str, invite_url: &str) -> CreateEmbed {
    CreateEmbed::new()
        .colour(0x3498db)
        .title("📞 Incoming Call")
        .description(format!("**{}** is calling you!", caller))
        .field(
            "To Answer",
            format!("Click here to join the call: {}", invite_url),
            false,
        )
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "Call from {} • Click the link to join",
            caller
        )))
}

fn outgoing_call_embed(target: &str, channel_name: &str) -> CreateEmbed {
    CreateEmbed::new()
        .colour(0x2ecc71)
        .title("📞 Outgoing Call")
        .description(format!("Calling **{}**...", target))
        .field(
            "Status",
            format!(
                "I've joined **{}** and sent them an invite.",
                channel_name
            ),
            false,
        )
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(format!(
            "Calling {} • Waiting for answer",
            target
        )))
}

/// Call someone into your voice channel
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    category = "Voice",
    aliases("onlinephone", "phonecommand"),
    subcommands("phone_call", "phone_hangup")
)]
pub async fn phone(ctx: Context<'_>) -> CommandResult {
    ctx.say("Please specify a subcommand: `call` or `hangup`")
        .await?;
    Ok(())
}

/// Join your voice channel and send someone a single-use invite
#[poise::command(prefix_command, slash_command, guild_only, rename = "call")]
pub async fn phone_call(
    ctx: Context<'_>,
    #[description = "Who to call"] user: serenity::User,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    let Some(channel_id) = author_voice_channel(ctx) else {
        ctx.say("You need to be in a voice channel to make a call!")
            .await?;
        return Ok(());
    };
    if user.bot {
        ctx.say("You cannot call a bot.").await?;
        return Ok(());
    }
    if user.id == ctx.author().id {
        ctx.say("You cannot call yourself.").await?;
        return Ok(());
    }

    let caller = match ctx.author_member().await {
        Some(member) => member.display_name().to_string(),
        None => ctx.author().name.clone(),
    };

    let placed = async {
        let target = guild_id
            .member(ctx, user.id)
            .await
            .map(|m| m.display_name().to_string())
            .unwrap_or_else(|_| user.name.clone());

        ctx.data().voice.join(guild_id, channel_id).await?;
        let channel_name = channel_id
            .name(ctx)
            .await
            .unwrap_or_else(|_| channel_id.to_string());

        let invite = channel_id
            .create_invite(
                ctx,
                CreateInvite::new()
                    .max_uses(1)
                    .max_age(CALL_INVITE_MAX_AGE_SECS)
                    .unique(true)
                    .audit_log_reason(&format!("Call from {}", caller)),
            )
            .await?;
        Ok::<_, crate::Error>((target, channel_name, invite.url()))
    };

    let (target, channel_name, invite_url) = match placed.await {
        Ok(placed) => placed,
        Err(e) => {
            error!("Error initiating phone call: {}", e);
            ctx.say(format!("Failed to initiate call: {}", e)).await?;
            return Ok(());
        }
    };
    info!("{} is calling {} in {}", caller, target, channel_name);

    let dm = CreateMessage::new().embed(incoming_call_embed(&caller, &invite_url));
    match user.direct_message(ctx, dm).await {
        Ok(_) => {
            ctx.send(CreateReply::default().embed(outgoing_call_embed(&target, &channel_name)))
                .await?;
        }
        Err(e) => {
            warn!("Error sending phone call DM to {}: {}", user.tag(), e);
            ctx.say(format!(
                "Failed to send DM to {}. They might have DMs disabled. Posting invite in this channel instead.",
                target
            ))
            .await?;
            ctx.channel_id()
                .send_message(
                    ctx,
                    CreateMessage::new()
                        .content(format!(
                            "📞 {}, {} is calling you!",
                            user.mention(),
                            ctx.author().mention()
                        ))
                        .embed(incoming_call_embed(&caller, &invite_url)),
                )
                .await?;
        }
    }
    Ok(())
}

/// End the current call
#[poise::command(prefix_command, slash_command, guild_only, rename = "hangup")]
pub async fn phone_hangup(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or(VoiceError::NotInGuild)?;
    if !ctx.data().voice.stop(guild_id).await {
        ctx.say("I am not currently in a call.").await?;
        return Ok(());
    }

    let embed = CreateEmbed::new()
        .colour(0xe74c3c)
        .title("📞 Call Ended")
        .description("The call has been ended.")
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "Call ended • Thanks for using Discord Phone",
        ));
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}
