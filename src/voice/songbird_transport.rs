use std::sync::Arc;

use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;
use serenity::prelude::Mutex as SerenityMutex;
use songbird::input::{File as FileInput, HttpRequest, Input};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{Call, Event, EventContext, EventHandler, Songbird, TrackEvent};
use tracing::{debug, error, info, warn};

use super::media::{END_GRACE, MediaProcess, ProcessExit};
use super::source::AudioSource;
use super::transport::{PlaybackHandle, PlaybackObserver, VoiceConnection, VoiceTransport};
use super::{VoiceError, VoiceResult};
use crate::config::MediaConfig;

/// Voice transport backed by songbird.
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http_client: reqwest::Client,
    media: MediaConfig,
}

impl SongbirdTransport {
    pub fn new(songbird: Arc<Songbird>, http_client: reqwest::Client, media: MediaConfig) -> Self {
        Self {
            songbird,
            http_client,
            media,
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>> {
        let call = self.songbird.join(guild_id, channel_id).await.map_err(|e| {
            error!("Failed to join voice channel: {}", e);
            VoiceError::JoinFailed(e.to_string())
        })?;

        info!("Joined voice channel {} in guild {}", channel_id, guild_id);
        Ok(Arc::new(SongbirdConnection {
            songbird: self.songbird.clone(),
            call,
            guild_id,
            http_client: self.http_client.clone(),
            media: self.media.clone(),
        }))
    }
}

struct SongbirdConnection {
    songbird: Arc<Songbird>,
    call: Arc<SerenityMutex<Call>>,
    guild_id: GuildId,
    http_client: reqwest::Client,
    media: MediaConfig,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    async fn play(
        &self,
        source: &AudioSource,
        observer: Arc<dyn PlaybackObserver>,
    ) -> VoiceResult<Box<dyn PlaybackHandle>> {
        let mut process = None;
        let input: Input = match source {
            AudioSource::Downloaded { url } => {
                let mut child = MediaProcess::spawn(&self.media, url, observer.clone())?;
                let input = child.take_input().ok_or_else(|| {
                    VoiceError::MediaProcess("the download tool has no output stream".into())
                })?;
                process = Some(child);
                input
            }
            AudioSource::StaticFile { path } => FileInput::new(path.clone()).into(),
            AudioSource::LiveStream { url } => {
                HttpRequest::new(self.http_client.clone(), url.clone()).into()
            }
        };

        let exit = process.as_ref().map(MediaProcess::exit);
        let track = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            let forwarder = TrackEventForwarder {
                observer: observer.clone(),
                exit: exit.clone(),
            };
            if let Err(e) = track.add_event(Event::Track(event), forwarder) {
                warn!("Failed to attach track event handler: {}", e);
                let _ = track.stop();
                return Err(VoiceError::Playback(e.to_string()));
            }
        }

        debug!("Started {} ({}) in guild {}", source, source.kind(), self.guild_id);
        Ok(Box::new(SongbirdPlayback { track, process }))
    }

    async fn disconnect(&self) {
        if let Err(e) = self.songbird.remove(self.guild_id).await {
            warn!("Failed to leave voice channel in guild {}: {}", self.guild_id, e);
        }
    }
}

struct SongbirdPlayback {
    track: TrackHandle,
    process: Option<MediaProcess>,
}

impl PlaybackHandle for SongbirdPlayback {
    fn stop(&self) {
        if let Err(e) = self.track.stop() {
            debug!("Track already gone: {}", e);
        }
        if let Some(process) = &self.process {
            process.kill();
        }
    }
}

/// Turns songbird track events into observer calls. For downloaded sources the
/// end of the track waits on the download tool's exit status.
struct TrackEventForwarder {
    observer: Arc<dyn PlaybackObserver>,
    exit: Option<ProcessExit>,
}

impl TrackEventForwarder {
    fn failed(&self, description: String) {
        match &self.exit {
            Some(exit) => exit.playback_failed(&self.observer, description),
            None => self.observer.failed(description),
        }
    }

    fn ended(&self) {
        match &self.exit {
            Some(exit) => {
                let exit = exit.clone();
                let observer = self.observer.clone();
                tokio::spawn(async move { exit.stream_ended(observer, END_GRACE).await });
            }
            None => self.observer.finished(),
        }
    }
}

#[async_trait]
impl EventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in tracks.iter() {
                match &state.playing {
                    PlayMode::Errored(e) => self.failed(e.to_string()),
                    PlayMode::End | PlayMode::Stop => self.ended(),
                    _ => {}
                }
            }
        }
        None
    }
}
