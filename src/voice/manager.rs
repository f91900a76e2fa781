use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId};
use tracing::{debug, error, info, warn};

use super::source::AudioSource;
use super::transport::{
    FailureReporter, PlaybackHandle, PlaybackObserver, VoiceConnection, VoiceTransport,
};
use super::{VoiceError, VoiceResult};

/// The item currently owning the guild's player.
struct ActivePlayback {
    id: u64,
    source: AudioSource,
    handle: Box<dyn PlaybackHandle>,
    reporter: Arc<dyn FailureReporter>,
}

struct QueuedSource {
    source: AudioSource,
    reporter: Arc<dyn FailureReporter>,
}

/// State for one guild. Exactly one of these exists per guild with a live
/// connection.
struct GuildVoiceSession {
    channel_id: ChannelId,
    connection: Arc<dyn VoiceConnection>,
    player: Option<ActivePlayback>,
    queue: VecDeque<QueuedSource>,
}

impl GuildVoiceSession {
    fn release_player(&mut self) {
        if let Some(active) = self.player.take() {
            active.handle.stop();
        }
    }
}

/// What `enqueue` did with the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The player was idle, so the source started right away.
    Started { playback_id: u64 },
    /// The source is waiting at this 1-based position.
    Queued { position: usize },
}

/// A read-only view of a guild's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub channel_id: ChannelId,
    pub now_playing: Option<AudioSource>,
    pub queued: Vec<AudioSource>,
}

/// Owns every guild's voice session.
///
/// Sessions live in a `DashMap`; no map guard is ever held across an await, so two
/// commands racing on the same guild simply see last-write-wins. Asynchronous
/// playback events carry the id of the playback they belong to and are dropped
/// when that playback is no longer the current one.
pub struct VoiceManager {
    transport: Arc<dyn VoiceTransport>,
    sessions: DashMap<GuildId, GuildVoiceSession>,
    next_playback_id: AtomicU64,
}

impl VoiceManager {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            sessions: DashMap::new(),
            next_playback_id: AtomicU64::new(1),
        })
    }

    pub fn has_session(&self, guild_id: GuildId) -> bool {
        self.sessions.contains_key(&guild_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn channel_of(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.sessions.get(&guild_id).map(|s| s.channel_id)
    }

    /// Connects to `channel_id`. If the guild already has a session, only the
    /// tracked connection and channel are replaced; the previous connection is not
    /// closed here, so callers switching channels should `stop` first.
    pub async fn join(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<()> {
        info!("Joining voice channel {} in guild {}", channel_id, guild_id);
        let connection = self.transport.join(guild_id, channel_id).await?;

        self.sessions
            .entry(guild_id)
            .and_modify(|session| {
                debug!("Replacing tracked connection for guild {}", guild_id);
                session.channel_id = channel_id;
                session.connection = connection.clone();
            })
            .or_insert_with(|| GuildVoiceSession {
                channel_id,
                connection: connection.clone(),
                player: None,
                queue: VecDeque::new(),
            });

        Ok(())
    }

    /// Joins only when the guild has no session yet.
    pub async fn ensure_joined(
        self: &Arc<Self>,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> VoiceResult<()> {
        if self.has_session(guild_id) {
            return Ok(());
        }
        self.join(guild_id, channel_id).await
    }

    /// Plays `source` now, preempting the current playback. Queued items stay
    /// queued. Returns the new playback id.
    pub async fn play(
        self: &Arc<Self>,
        guild_id: GuildId,
        source: AudioSource,
        reporter: Arc<dyn FailureReporter>,
    ) -> VoiceResult<u64> {
        let connection = {
            let mut session = self
                .sessions
                .get_mut(&guild_id)
                .ok_or(VoiceError::NotConnected)?;
            session.release_player();
            session.connection.clone()
        };

        self.start(guild_id, connection, source, reporter).await
    }

    /// Appends `source` to the guild's queue, starting it immediately when the
    /// player is idle.
    pub async fn enqueue(
        self: &Arc<Self>,
        guild_id: GuildId,
        source: AudioSource,
        reporter: Arc<dyn FailureReporter>,
    ) -> VoiceResult<EnqueueOutcome> {
        let idle_connection = {
            let mut session = self
                .sessions
                .get_mut(&guild_id)
                .ok_or(VoiceError::NotConnected)?;

            if session.player.is_some() {
                session.queue.push_back(QueuedSource { source, reporter });
                let position = session.queue.len();
                debug!("Queued item {} for guild {}", position, guild_id);
                return Ok(EnqueueOutcome::Queued { position });
            }
            session.connection.clone()
        };

        let playback_id = self
            .start(guild_id, idle_connection, source, reporter)
            .await?;
        Ok(EnqueueOutcome::Started { playback_id })
    }

    /// Tears down the guild's session. Returns whether one existed.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        let Some((_, mut session)) = self.sessions.remove(&guild_id) else {
            debug!("Stop requested for guild {} with no session", guild_id);
            return false;
        };

        session.release_player();
        session.queue.clear();
        session.connection.disconnect().await;
        info!("Stopped voice session for guild {}", guild_id);
        true
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.sessions.get(&guild_id).map(|session| SessionSnapshot {
            channel_id: session.channel_id,
            now_playing: session.player.as_ref().map(|p| p.source.clone()),
            queued: session.queue.iter().map(|q| q.source.clone()).collect(),
        })
    }

    pub fn current_playback_id(&self, guild_id: GuildId) -> Option<u64> {
        self.sessions
            .get(&guild_id)
            .and_then(|s| s.player.as_ref().map(|p| p.id))
    }

    async fn start(
        self: &Arc<Self>,
        guild_id: GuildId,
        connection: Arc<dyn VoiceConnection>,
        source: AudioSource,
        reporter: Arc<dyn FailureReporter>,
    ) -> VoiceResult<u64> {
        let id = self.next_playback_id.fetch_add(1, Ordering::Relaxed);
        let observer = Arc::new(SessionObserver {
            manager: Arc::downgrade(self),
            guild_id,
            playback_id: id,
            done: AtomicBool::new(false),
        });

        debug!("Starting playback {} ({}) in guild {}", id, source, guild_id);
        let handle = match connection.play(&source, observer).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start {} in guild {}: {}", source, guild_id, e);
                self.stop(guild_id).await;
                return Err(e);
            }
        };

        let displaced = {
            let Some(mut session) = self.sessions.get_mut(&guild_id) else {
                // Stopped while the source was starting.
                handle.stop();
                return Err(VoiceError::NotConnected);
            };
            session.player.replace(ActivePlayback {
                id,
                source,
                handle,
                reporter,
            })
        };
        if let Some(old) = displaced {
            debug!("Playback {} displaced by {} in guild {}", old.id, id, guild_id);
            old.handle.stop();
        }

        Ok(id)
    }

    /// Called when playback `playback_id` ends normally. Starts the next queued
    /// source, if any.
    pub async fn handle_finished(self: &Arc<Self>, guild_id: GuildId, playback_id: u64) {
        let next = {
            let Some(mut session) = self.sessions.get_mut(&guild_id) else {
                return;
            };
            if session.player.as_ref().map(|p| p.id) != Some(playback_id) {
                debug!("Ignoring stale end of playback {} in guild {}", playback_id, guild_id);
                return;
            }
            session.player = None;
            session
                .queue
                .pop_front()
                .map(|next| (next, session.connection.clone()))
        };

        let Some((next, connection)) = next else {
            debug!("Queue drained for guild {}", guild_id);
            return;
        };

        let reporter = next.reporter.clone();
        if let Err(e) = self.start(guild_id, connection, next.source, next.reporter).await {
            reporter
                .report(format!("Failed to play the next queued item: {}", e))
                .await;
        }
    }

    /// Called when playback `playback_id` fails. The whole session is torn down so
    /// nothing is left half-alive, then the failure is reported once.
    pub async fn handle_failure(
        self: &Arc<Self>,
        guild_id: GuildId,
        playback_id: u64,
        description: String,
    ) {
        let removed = self.sessions.remove_if(&guild_id, |_, session| {
            session.player.as_ref().map(|p| p.id) == Some(playback_id)
        });

        let Some((_, mut session)) = removed else {
            debug!(
                "Ignoring stale failure of playback {} in guild {}: {}",
                playback_id, guild_id, description
            );
            return;
        };

        warn!(
            "Playback {} failed in guild {}: {}",
            playback_id, guild_id, description
        );

        let reporter = session.player.as_ref().map(|p| p.reporter.clone());
        session.release_player();
        session.queue.clear();
        session.connection.disconnect().await;

        if let Some(reporter) = reporter {
            reporter
                .report(format!("Playback failed: {}", description))
                .await;
        }
    }
}

/// Bridges one playback's terminal event back into the manager, at most once.
struct SessionObserver {
    manager: Weak<VoiceManager>,
    guild_id: GuildId,
    playback_id: u64,
    done: AtomicBool,
}

impl PlaybackObserver for SessionObserver {
    fn finished(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            let (guild_id, playback_id) = (self.guild_id, self.playback_id);
            tokio::spawn(async move { manager.handle_finished(guild_id, playback_id).await });
        }
    }

    fn failed(&self, description: String) {
        if self.done.swap(true, Ordering::AcqRel) {
            debug!(
                "Dropping duplicate failure for playback {}: {}",
                self.playback_id, description
            );
            return;
        }
        if let Some(manager) = self.manager.upgrade() {
            let (guild_id, playback_id) = (self.guild_id, self.playback_id);
            tokio::spawn(async move {
                manager
                    .handle_failure(guild_id, playback_id, description)
                    .await
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::transport::{MockFailureReporter, MockVoiceTransport};
    use assert_matches::assert_matches;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConnection {
        observers: Mutex<Vec<Arc<dyn PlaybackObserver>>>,
        disconnects: AtomicU64,
    }

    struct NoopHandle;

    impl PlaybackHandle for NoopHandle {
        fn stop(&self) {}
    }

    #[serenity::async_trait]
    impl VoiceConnection for RecordingConnection {
        async fn play(
            &self,
            _source: &AudioSource,
            observer: Arc<dyn PlaybackObserver>,
        ) -> VoiceResult<Box<dyn PlaybackHandle>> {
            self.observers.lock().unwrap().push(observer);
            Ok(Box::new(NoopHandle))
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn clip(name: &str) -> AudioSource {
        AudioSource::StaticFile {
            path: PathBuf::from(name),
        }
    }

    fn manager_with(connection: Arc<RecordingConnection>) -> Arc<VoiceManager> {
        let mut transport = MockVoiceTransport::new();
        transport.expect_join().returning(move |_, _| {
            let connection: Arc<dyn VoiceConnection> = connection.clone();
            Ok(connection)
        });
        VoiceManager::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn test_join_failure_leaves_no_session() {
        let mut transport = MockVoiceTransport::new();
        transport
            .expect_join()
            .times(1)
            .returning(|_, _| Err(VoiceError::JoinFailed("no route".into())));
        let manager = VoiceManager::new(Arc::new(transport));

        let result = manager.join(GuildId::new(1), ChannelId::new(2)).await;
        assert_matches!(result, Err(VoiceError::JoinFailed(_)));
        assert!(!manager.has_session(GuildId::new(1)));
    }

    #[tokio::test]
    async fn test_failure_reported_exactly_once() {
        let connection = Arc::new(RecordingConnection::default());
        let manager = manager_with(connection.clone());
        let guild = GuildId::new(1);
        manager.join(guild, ChannelId::new(2)).await.unwrap();

        let mut reporter = MockFailureReporter::new();
        reporter
            .expect_report()
            .withf(|msg| msg.contains("exit status 1"))
            .times(1)
            .returning(|_| ());
        let id = manager
            .play(guild, clip("a.mp3"), Arc::new(reporter))
            .await
            .unwrap();

        manager
            .handle_failure(guild, id, "exit status 1".into())
            .await;
        manager
            .handle_failure(guild, id, "exit status 1".into())
            .await;

        assert!(!manager.has_session(guild));
        assert_eq!(connection.disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observer_swallows_second_event() {
        let connection = Arc::new(RecordingConnection::default());
        let manager = manager_with(connection.clone());
        let guild = GuildId::new(1);
        manager.join(guild, ChannelId::new(2)).await.unwrap();

        let mut reporter = MockFailureReporter::new();
        reporter.expect_report().times(1).returning(|_| ());
        manager
            .play(guild, clip("a.mp3"), Arc::new(reporter))
            .await
            .unwrap();

        let observer = connection.observers.lock().unwrap()[0].clone();
        observer.failed("process error".into());
        observer.failed("non-zero exit".into());
        observer.finished();

        // Let the spawned teardown run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!manager.has_session(guild));
    }
}
