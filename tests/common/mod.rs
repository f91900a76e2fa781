//! Fakes and fixtures shared by the integration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use hubbot::voice::VoiceResult;
use hubbot::voice::source::AudioSource;
use hubbot::voice::transport::{
    FailureReporter, PlaybackHandle, PlaybackObserver, VoiceConnection, VoiceTransport,
};
use parking_lot::Mutex;
use poise::serenity_prelude::{ChannelId, GuildId};
use serenity::async_trait;

/// A connection that records every playback so tests can end or fail them.
#[derive(Default)]
pub struct FakeConnection {
    pub plays: Mutex<Vec<(AudioSource, Arc<dyn PlaybackObserver>)>>,
    pub stops: Arc<AtomicUsize>,
    pub disconnects: AtomicUsize,
}

impl FakeConnection {
    pub fn played(&self) -> Vec<AudioSource> {
        self.plays.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn observer(&self, index: usize) -> Arc<dyn PlaybackObserver> {
        self.plays.lock()[index].1.clone()
    }
}

struct FakeHandle {
    stops: Arc<AtomicUsize>,
}

impl PlaybackHandle for FakeHandle {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    async fn play(
        &self,
        source: &AudioSource,
        observer: Arc<dyn PlaybackObserver>,
    ) -> VoiceResult<Box<dyn PlaybackHandle>> {
        self.plays.lock().push((source.clone(), observer));
        Ok(Box::new(FakeHandle {
            stops: self.stops.clone(),
        }))
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out one fresh `FakeConnection` per join and keeps them for inspection.
#[derive(Default)]
pub struct FakeTransport {
    pub connections: Mutex<Vec<Arc<FakeConnection>>>,
}

impl FakeTransport {
    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock()[index].clone()
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn join(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> VoiceResult<Arc<dyn VoiceConnection>> {
        let connection = Arc::new(FakeConnection::default());
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

/// Collects reported failures.
#[derive(Default)]
pub struct RecordingReporter {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl FailureReporter for RecordingReporter {
    async fn report(&self, message: String) {
        self.messages.lock().push(message);
    }
}

pub fn clip(name: &str) -> AudioSource {
    AudioSource::StaticFile {
        path: PathBuf::from(name),
    }
}

pub fn stream(url: &str) -> AudioSource {
    AudioSource::Downloaded {
        url: url.to_string(),
    }
}

/// Polls `condition` until it holds, giving spawned event tasks time to run.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// A plugin directory holding `files` as `(file name, source)` pairs.
pub fn plugin_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("temp dir");
    for (name, source) in files {
        std::fs::write(dir.path().join(name), source).expect("write plugin");
    }
    dir
}
