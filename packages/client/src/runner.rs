//! Scripted demo session against the in-memory backend.
//!
//! Walks through what a chat screen does: enter a room, show the first
//! history page, send messages optimistically, survive a dropped connection
//! (with a message posted while offline), page older history, and play a
//! voice message while drawing its waveform progress.

use std::{sync::Arc, time::Duration};

use idobata_core::{
    domain::{
        FeedEvent, Message, MessageId, MessageType, OutgoingMessage, PlaybackRate,
        PlaybackSession, PreferenceStore, Room, RoomId, RoomType, SubscriptionState, Timestamp,
        UserId,
    },
    infrastructure::{
        audio::SimulatedAudioDevice,
        backend::InMemoryChatBackend,
        preference::{InMemoryPreferenceStore, JsonFilePreferenceStore},
        publisher::ChannelFeedEventPublisher,
        repository::InMemoryFeedRepository,
    },
    settings::Settings,
    usecase::{
        AudioPlaybackEngine, LoadHistoryUseCase, MessageMerger, RoomCoordinator,
        RoomStatusReceiver, SendMessageUseCase, WaveformConfig, WaveformProgressController,
    },
};
use idobata_shared::time::{Clock, SystemClock};
use tokio::sync::mpsc;

use crate::{error::ClientError, formatter::MessageFormatter};

const STATE_TIMEOUT: Duration = Duration::from_secs(10);
const VOICE_DURATION_SECS: f64 = 3.0;
const VOICE_URI: &str = "mem://voice/voice-1.m4a";

/// Options of a demo run
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub room: String,
    /// Messages the demo user sends after entering
    pub messages: usize,
    pub user: String,
}

/// Run the scripted demo session
pub async fn run_demo(settings: &Settings, options: DemoOptions) -> Result<(), ClientError> {
    let room_id = RoomId::new(options.room.clone())?;
    let user_id = UserId::new(options.user.clone())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let backend = Arc::new(InMemoryChatBackend::with_clock(clock.clone()));
    let seeded = seed_history(&room_id, clock.now_millis(), settings.history.page_size + 5)?;
    let voice = seeded.iter().rev().find(|m| m.is_voice()).cloned();
    backend.seed(seeded).await;

    let repository = Arc::new(InMemoryFeedRepository::new());
    let publisher = Arc::new(ChannelFeedEventPublisher::new());
    let merger = Arc::new(MessageMerger::new(
        backend.clone(),
        repository.clone(),
        publisher.clone(),
    ));
    let history = Arc::new(LoadHistoryUseCase::new(
        backend.clone(),
        repository.clone(),
        settings.history.page_size,
    ));
    let coordinator = RoomCoordinator::new(
        merger,
        history.clone(),
        repository.clone(),
        settings.backoff_policy(),
    );
    let sender = SendMessageUseCase::new(backend.clone(), repository, publisher, clock.clone());

    // Enter the room and follow its feed and connection status
    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let mut status = coordinator.enter(&room_id, feed_tx).await?;
    let summary = Room::new(
        room_id.clone(),
        room_id.to_string(),
        RoomType::Global,
        Timestamp::new(clock.now_millis()),
    );
    let feed_printer = tokio::spawn(print_feed(feed_rx, summary));
    let status_printer = tokio::spawn(print_status(room_id.to_string(), status.clone()));

    wait_for_state(&mut status, "subscription", |s| {
        *s == SubscriptionState::Subscribed
    })
    .await?;

    let feed = history.load_initial(&room_id).await?;
    print!("{}", MessageFormatter::format_history(&feed));

    for i in 1..=options.messages {
        let outgoing = OutgoingMessage {
            room_id: room_id.clone(),
            sender_id: user_id.clone(),
            sender_name: options.user.clone(),
            sender_avatar: None,
            content: format!("hello from the demo #{}", i),
            message_type: MessageType::Text,
            reply_to: None,
        };
        if let Err(e) = sender.execute(outgoing).await {
            tracing::warn!("Message #{} was not sent: {}", i, e);
        }
    }

    // Drop the connection while someone else keeps chatting
    tracing::info!("Simulating a dropped connection");
    backend.disconnect().await;
    wait_for_state(&mut status, "disconnect", |s| {
        matches!(s, SubscriptionState::Disconnected { .. })
    })
    .await?;
    let missed = offline_message(&room_id, clock.now_millis())?;
    backend.push_insert(&room_id, &missed).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    backend.restore().await;
    wait_for_state(&mut status, "reconnection", |s| {
        *s == SubscriptionState::Subscribed
    })
    .await?;

    let older = history.load_more(&room_id).await?;
    println!(
        "Loaded {} older messages{}",
        older.messages.len(),
        if older.has_more { "" } else { " (reached the beginning)" }
    );

    let engine = playback_engine(settings).await;
    if let Some(voice) = voice {
        play_voice_message(settings, &engine, &voice).await?;
    }
    show_recording_meter(settings, &engine);
    engine.cleanup().await;

    coordinator.leave(&room_id).await;
    status_printer.abort();
    match tokio::time::timeout(STATE_TIMEOUT, feed_printer).await {
        Ok(Ok(summary)) => println!("{}", MessageFormatter::format_room_summary(&summary)),
        Ok(Err(e)) => tracing::warn!("Feed printer stopped unexpectedly: {}", e),
        Err(_) => tracing::warn!("Feed printer did not finish"),
    }

    Ok(())
}

async fn print_feed(mut feed_rx: mpsc::UnboundedReceiver<FeedEvent>, mut room: Room) -> Room {
    while let Some(event) = feed_rx.recv().await {
        println!("{}", MessageFormatter::format_feed_event(&event));
        match &event {
            FeedEvent::Insert(message)
            | FeedEvent::Update(message)
            | FeedEvent::Reconciled { message, .. } => {
                room.apply_preview(message);
            }
            FeedEvent::Delete(_) => {}
        }
    }
    room
}

async fn print_status(room: String, mut status: RoomStatusReceiver) {
    while status.changed().await.is_ok() {
        let state = status.borrow_and_update().clone();
        println!("{}", MessageFormatter::format_status(&room, &state));
    }
}

async fn wait_for_state(
    status: &mut RoomStatusReceiver,
    what: &'static str,
    predicate: impl FnMut(&SubscriptionState) -> bool,
) -> Result<(), ClientError> {
    match tokio::time::timeout(STATE_TIMEOUT, status.wait_for(predicate)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(ClientError::Timeout(what)),
    }
}

async fn playback_engine(settings: &Settings) -> AudioPlaybackEngine {
    let preferences: Arc<dyn PreferenceStore> = match &settings.playback.preference_path {
        Some(path) => Arc::new(JsonFilePreferenceStore::new(path.clone())),
        None => Arc::new(InMemoryPreferenceStore::new()),
    };
    let device = Arc::new(SimulatedAudioDevice::new());
    device.set_duration(VOICE_URI, VOICE_DURATION_SECS);
    AudioPlaybackEngine::new(device, preferences, settings.playback_config()).await
}

async fn play_voice_message(
    settings: &Settings,
    engine: &AudioPlaybackEngine,
    voice: &Message,
) -> Result<(), ClientError> {
    let samples = demo_waveform(settings.waveform.bar_count * 3);
    let controller = WaveformProgressController::for_message(
        engine.clone(),
        voice.id.clone(),
        None,
        settings.waveform_config(),
    );

    println!("Playing voice message from @{}", voice.sender_name);
    engine
        .play(voice.id.clone(), &voice.content, VOICE_DURATION_SECS)
        .await?;
    engine.set_waveform(&voice.id, samples).await;

    let frame_interval = settings.playback_config().status_interval * 2;
    for _ in 0..3 {
        tokio::time::sleep(frame_interval).await;
        println!("{}", MessageFormatter::format_waveform(&controller.frame().await));
    }

    // Jump ahead as if the waveform was tapped at three quarters of its width
    controller.tap(75.0, 100.0).await?;
    println!("{}", MessageFormatter::format_waveform(&controller.frame().await));

    let rate = engine.playback_rate().await.next();
    if let Err(e) = engine.set_playback_rate(rate).await {
        tracing::warn!("Could not change playback rate: {}", e);
    }
    println!("{}", MessageFormatter::format_playback(&engine.session().await));

    let mut updates = engine.subscribe();
    let finished = tokio::time::timeout(
        STATE_TIMEOUT,
        updates.wait_for(|session| session.current_message_id.is_none()),
    )
    .await;
    if finished.is_err() {
        tracing::warn!("Voice message did not finish in time");
    }
    println!("{}", MessageFormatter::format_playback(&engine.session().await));
    Ok(())
}

fn show_recording_meter(settings: &Settings, engine: &AudioPlaybackEngine) {
    let mut meter = WaveformProgressController::for_recording(
        engine.clone(),
        WaveformConfig {
            bar_count: settings.waveform.bar_count.min(16),
            ..settings.waveform_config()
        },
    );
    for decibels in [-60.0, -45.0, -20.0, -8.0, -3.0, -12.0, -30.0, -50.0] {
        meter.push_decibels(decibels);
    }
    let frame = meter.frame_for(&PlaybackSession::empty(PlaybackRate::Normal));
    println!("Recording {}", MessageFormatter::format_waveform(&frame));
}

fn seed_history(
    room_id: &RoomId,
    now_millis: i64,
    count: usize,
) -> Result<Vec<Message>, ClientError> {
    let speakers = [("bob", "Bob"), ("carol", "Carol")];
    let mut messages = Vec::with_capacity(count + 1);

    for i in 0..count {
        let (id, name) = speakers[i % speakers.len()];
        let minutes_ago = (count - i) as i64;
        messages.push(Message::new(
            MessageId::confirmed(format!("seed-{}", i + 1))?,
            room_id.clone(),
            UserId::new(id.to_string())?,
            name.to_string(),
            format!("message number {}", i + 1),
            MessageType::Text,
            Timestamp::new(now_millis - minutes_ago * 60_000),
        ));
    }

    messages.push(Message::new(
        MessageId::confirmed("voice-1".to_string())?,
        room_id.clone(),
        UserId::new("carol".to_string())?,
        "Carol".to_string(),
        VOICE_URI.to_string(),
        MessageType::Audio,
        Timestamp::new(now_millis - 30_000),
    ));

    Ok(messages)
}

fn offline_message(room_id: &RoomId, now_millis: i64) -> Result<Message, ClientError> {
    Ok(Message::new(
        MessageId::confirmed("offline-1".to_string())?,
        room_id.clone(),
        UserId::new("bob".to_string())?,
        "Bob".to_string(),
        "did anyone see my last message?".to_string(),
        MessageType::Text,
        Timestamp::new(now_millis),
    ))
}

fn demo_waveform(samples: usize) -> Vec<f32> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / samples.max(1) as f32;
            (0.5 + 0.45 * (t * 19.0).sin() * (t * 3.0).cos()).abs()
        })
        .collect()
}
