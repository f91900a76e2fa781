use std::sync::Arc;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use hubbot::voice::VoiceError;
use hubbot::voice::manager::{EnqueueOutcome, VoiceManager};
use hubbot::voice::transport::FailureReporter;
use poise::serenity_prelude::{ChannelId, GuildId};
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use crate::common::{FakeTransport, RecordingReporter, clip, eventually, stream};
use crate::test_utils;

const GUILD: GuildId = GuildId::new(1);
const OTHER_GUILD: GuildId = GuildId::new(2);
const LOBBY: ChannelId = ChannelId::new(10);
const STAGE: ChannelId = ChannelId::new(11);

fn setup() -> (Arc<FakeTransport>, Arc<VoiceManager>, Arc<RecordingReporter>) {
    test_utils::init();
    let transport = Arc::new(FakeTransport::default());
    let manager = VoiceManager::new(transport.clone());
    (transport, manager, Arc::new(RecordingReporter::default()))
}

fn as_reporter(reporter: &Arc<RecordingReporter>) -> Arc<dyn FailureReporter> {
    reporter.clone()
}

#[tokio::test]
async fn stop_without_session_reports_nothing_to_stop() {
    let (_, manager, _) = setup();
    assert!(!manager.stop(GUILD).await);
}

#[tokio::test]
async fn play_requires_a_connection() {
    let (_, manager, reporter) = setup();
    let result = manager.play(GUILD, clip("a.mp3"), as_reporter(&reporter)).await;
    assert_matches!(result, Err(VoiceError::NotConnected));
    assert!(!manager.has_session(GUILD));
}

#[tokio::test]
async fn play_after_implicit_join_uses_the_new_session() {
    let (transport, manager, reporter) = setup();
    assert_ok!(manager.ensure_joined(GUILD, LOBBY).await);
    assert!(manager.has_session(GUILD));
    assert_eq!(manager.channel_of(GUILD), Some(LOBBY));

    assert_ok!(manager.play(GUILD, clip("a.mp3"), as_reporter(&reporter)).await);
    assert_eq!(transport.connection(0).played(), vec![clip("a.mp3")]);
}

#[tokio::test]
async fn implicit_join_keeps_an_existing_session() {
    let (transport, manager, _) = setup();
    assert_ok!(manager.join(GUILD, LOBBY).await);
    assert_ok!(manager.ensure_joined(GUILD, STAGE).await);

    assert_eq!(manager.channel_of(GUILD), Some(LOBBY));
    assert_eq!(transport.connections.lock().len(), 1);
}

#[tokio::test]
async fn second_join_keeps_one_session_per_guild() {
    let (transport, manager, _) = setup();
    assert_ok!(manager.join(GUILD, LOBBY).await);
    assert_ok!(manager.join(GUILD, STAGE).await);
    assert_ok!(manager.join(OTHER_GUILD, LOBBY).await);

    assert_eq!(manager.session_count(), 2);
    assert_eq!(manager.channel_of(GUILD), Some(STAGE));
    assert_eq!(transport.connections.lock().len(), 3);
}

#[tokio::test]
async fn play_preempts_current_playback() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();

    let first = manager.play(GUILD, clip("a.mp3"), as_reporter(&reporter)).await.unwrap();
    let second = manager.play(GUILD, clip("b.mp3"), as_reporter(&reporter)).await.unwrap();

    assert!(second > first);
    assert_eq!(manager.current_playback_id(GUILD), Some(second));
    let connection = transport.connection(0);
    assert_eq!(connection.played(), vec![clip("a.mp3"), clip("b.mp3")]);
    assert_eq!(connection.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn enqueue_is_fifo_and_advances_on_finish() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();

    let started = manager.enqueue(GUILD, stream("https://v/1"), as_reporter(&reporter)).await.unwrap();
    assert_matches!(started, EnqueueOutcome::Started { .. });
    let queued = manager.enqueue(GUILD, stream("https://v/2"), as_reporter(&reporter)).await.unwrap();
    assert_eq!(queued, EnqueueOutcome::Queued { position: 1 });
    let queued = manager.enqueue(GUILD, stream("https://v/3"), as_reporter(&reporter)).await.unwrap();
    assert_eq!(queued, EnqueueOutcome::Queued { position: 2 });

    let connection = transport.connection(0);
    connection.observer(0).finished();
    assert!(eventually(|| connection.plays.lock().len() == 2).await);

    let snapshot = manager.snapshot(GUILD).unwrap();
    assert_eq!(snapshot.now_playing, Some(stream("https://v/2")));
    assert_eq!(snapshot.queued, vec![stream("https://v/3")]);

    connection.observer(1).finished();
    assert!(eventually(|| connection.plays.lock().len() == 3).await);
    connection.observer(2).finished();
    assert!(eventually(|| manager.current_playback_id(GUILD).is_none()).await);
    assert!(manager.has_session(GUILD));
}

#[tokio::test]
async fn failure_tears_down_session_and_reports_once() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();
    manager.play(GUILD, stream("https://v/broken"), as_reporter(&reporter)).await.unwrap();
    manager.enqueue(GUILD, stream("https://v/next"), as_reporter(&reporter)).await.unwrap();

    let observer = transport.connection(0).observer(0);
    observer.failed("the download tool exited with status 1".to_string());
    observer.failed("decoder error".to_string());
    observer.finished();

    assert!(eventually(|| !manager.has_session(GUILD)).await);
    assert!(eventually(|| reporter.messages.lock().len() == 1).await);
    assert_eq!(
        reporter.messages.lock()[0],
        "Playback failed: the download tool exited with status 1"
    );
    assert_eq!(transport.connection(0).disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(transport.connection(0).plays.lock().len(), 1);
}

#[tokio::test]
async fn events_from_replaced_playback_are_ignored() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();
    manager.play(GUILD, clip("old.mp3"), as_reporter(&reporter)).await.unwrap();
    let current = manager.play(GUILD, clip("new.mp3"), as_reporter(&reporter)).await.unwrap();

    let stale = transport.connection(0).observer(0);
    stale.failed("late error".to_string());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(manager.has_session(GUILD));
    assert_eq!(manager.current_playback_id(GUILD), Some(current));
    assert!(reporter.messages.lock().is_empty());
}

#[tokio::test]
async fn failure_in_one_guild_leaves_others_alone() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();
    manager.join(OTHER_GUILD, LOBBY).await.unwrap();
    manager.play(GUILD, clip("a.mp3"), as_reporter(&reporter)).await.unwrap();
    let other = manager.play(OTHER_GUILD, clip("b.mp3"), as_reporter(&reporter)).await.unwrap();

    transport.connection(0).observer(0).failed("boom".to_string());

    assert!(eventually(|| !manager.has_session(GUILD)).await);
    assert_eq!(manager.current_playback_id(OTHER_GUILD), Some(other));
}

#[tokio::test]
async fn stop_releases_player_queue_and_connection() {
    let (transport, manager, reporter) = setup();
    manager.join(GUILD, LOBBY).await.unwrap();
    manager.play(GUILD, clip("a.mp3"), as_reporter(&reporter)).await.unwrap();
    manager.enqueue(GUILD, clip("b.mp3"), as_reporter(&reporter)).await.unwrap();

    assert!(manager.stop(GUILD).await);

    let connection = transport.connection(0);
    assert_eq!(connection.stops.load(Ordering::SeqCst), 1);
    assert_eq!(connection.disconnects.load(Ordering::SeqCst), 1);
    assert!(manager.snapshot(GUILD).is_none());
    assert!(!manager.stop(GUILD).await);
}
