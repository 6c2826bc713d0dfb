//! End-to-end session flows against an in-process engine stub: playback
//! ordering, status derivation, and interruption handling.

mod common;

use common::{audio_message, spawn_engine_stub, test_config, tone, wait_for_event};
use kirana::session::{ConversationStatus, Session, SessionEvent};
use kirana::tools::ProviderRegistry;
use std::time::Duration;

#[tokio::test]
async fn connect_reaches_listening() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");

    assert_eq!(session.status(), ConversationStatus::Listening);
    assert!(session.is_live());
    assert!(!session.id().is_empty());
}

#[tokio::test]
async fn setup_is_sent_exactly_once_at_connect() {
    let mut stub = spawn_engine_stub().await;
    let _session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");

    let setup = stub.expect_inbound(|v| v.get("setup").is_some()).await;
    assert_eq!(setup["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
    assert!(setup["setup"]["realtimeInputConfig"]["automaticActivityDetection"].is_object());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = stub.drain_inbound().await;
    assert!(later.iter().all(|v| v.get("setup").is_none()));
}

#[tokio::test]
async fn buffers_play_in_arrival_order_and_status_tracks_playback() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");
    let mut events = session.events();

    // Three buffers, ~150ms each, arriving back to back.
    for _ in 0..3 {
        stub.send(audio_message(&tone(150)));
    }

    // All three are decoded and queued in arrival order.
    for _ in 0..3 {
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::AudioChunk { .. })).await;
    }

    // Speaking while audio is in flight...
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Speaking))
    })
    .await;
    assert_eq!(session.status(), ConversationStatus::Speaking);

    // ...and back to Listening only once the last buffer finishes.
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Listening))
    })
    .await;
    assert_eq!(session.status(), ConversationStatus::Listening);
    assert_eq!(session.playback_queue_len(), 0);
}

#[tokio::test]
async fn interruption_flushes_queue_immediately() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");
    let mut events = session.events();

    // One long buffer playing plus one queued behind it.
    stub.send(audio_message(&tone(1_000)));
    stub.send(audio_message(&tone(1_000)));
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Speaking))
    })
    .await;

    stub.send(r#"{"serverContent":{"interrupted":true}}"#);
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::Interrupted)).await;

    // Queue is observably empty and the remainder never plays.
    assert_eq!(session.playback_queue_len(), 0);
    assert_eq!(session.status(), ConversationStatus::Listening);
}

#[tokio::test]
async fn status_never_speaking_while_queue_is_silent() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");
    let mut events = session.events();

    assert_ne!(session.status(), ConversationStatus::Speaking);

    stub.send(audio_message(&tone(150)));
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Listening))
    })
    .await;

    // Fully drained: Speaking must not be claimed again.
    assert_eq!(session.playback_queue_len(), 0);
    assert_ne!(session.status(), ConversationStatus::Speaking);
}

#[tokio::test]
async fn corrupt_audio_buffer_is_dropped_and_playback_continues() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");
    let mut events = session.events();

    // Undecodable payload first, then a valid buffer.
    stub.send(
        r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"!!not-base64!!"}}
        ]}}}"#,
    );
    stub.send(audio_message(&tone(150)));

    // The valid buffer still plays; the session does not abort.
    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Speaking))
    })
    .await;
    assert!(session.is_live());
}

#[tokio::test]
async fn user_transcript_moves_listening_to_thinking() {
    let stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");
    let mut events = session.events();

    stub.send(r#"{"serverContent":{"inputTranscription":{"text":"do you have milk"}}}"#);

    wait_for_event(&mut events, |e| {
        matches!(e, SessionEvent::StatusChanged(ConversationStatus::Thinking))
    })
    .await;
    assert_eq!(session.status(), ConversationStatus::Thinking);
}

#[tokio::test]
async fn outbound_frames_carry_pcm16_base64() {
    let mut stub = spawn_engine_stub().await;
    let session = Session::connect_headless(test_config(&stub.url), ProviderRegistry::new())
        .await
        .expect("connect succeeds");

    session.send_frame(vec![0.0; 2048]);

    let frame = stub
        .expect_inbound(|v| v["realtimeInput"]["audio"].is_object())
        .await;
    let mime = frame["realtimeInput"]["audio"]["mimeType"]
        .as_str()
        .unwrap_or_default();
    assert_eq!(mime, "audio/pcm;rate=16000");
    let data = frame["realtimeInput"]["audio"]["data"]
        .as_str()
        .unwrap_or_default();
    // 2048 samples × 2 bytes, base64-encoded.
    assert_eq!(data.len(), 4096usize.div_ceil(3) * 4);
}
