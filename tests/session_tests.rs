// Integration tests for the voice session lifecycle
//
// A mock transport plays the realtime service and virtual devices stand in
// for the microphone and speaker.

mod common;

use common::{eventually, test_config, Behavior, MockTransport, ObservedDevices};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use voice_copilot::audio::{TransportPacket, VirtualDevices};
use voice_copilot::error::{ErrorKind, VoiceError};
use voice_copilot::protocol::{ClientMessage, InboundEvent};
use voice_copilot::session::{SessionState, VoiceClient, VoiceSession};
use voice_copilot::transport::TransportEvent;

fn client(behavior: Behavior) -> (VoiceClient, MockTransport, VirtualDevices) {
    let transport = MockTransport::new(behavior);
    let devices = VirtualDevices::new();
    let client = VoiceClient::new(Arc::new(transport.clone()), Arc::new(devices.clone()));
    (client, transport, devices)
}

async fn wait_open(session: &VoiceSession) {
    let state = tokio::time::timeout(
        Duration::from_secs(2),
        session.wait_until(|s| s.is_open() || s.is_terminal()),
    )
    .await
    .expect("session did not settle");
    assert_eq!(state, SessionState::Open, "history: {:?}", session.history());
}

async fn wait_terminal(session: &VoiceSession) -> SessionState {
    tokio::time::timeout(Duration::from_secs(2), session.wait_terminal())
        .await
        .expect("session did not reach a terminal state")
}

#[tokio::test]
async fn test_full_conversation_turn() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    assert_eq!(session.state(), SessionState::Connecting);

    wait_open(&session).await;
    assert_eq!(devices.open_handles(), 2);
    assert!(devices.is_capturing());

    // Setup went out first, carrying the configured voice
    let sent = transport.sent();
    match &sent[0] {
        ClientMessage::Setup(setup) => assert_eq!(setup.voice_name(), Some("Zephyr")),
        other => panic!("expected setup first, got {:?}", other),
    }

    // Three 200ms segments at 24kHz
    for _ in 0..3 {
        transport.push_audio(&vec![0.25; 4800], 24000).await;
    }
    eventually("three segments scheduled", || devices.scheduled().len() == 3).await;

    let scheduled = devices.scheduled();
    assert_eq!(scheduled[0].start_at, Duration::ZERO);
    for pair in scheduled.windows(2) {
        assert_eq!(pair[1].start_at, pair[0].end(), "segments must be contiguous");
    }
    assert_eq!(scheduled[2].end(), Duration::from_millis(600));

    // Barge-in flushes everything still queued
    transport.push(TransportEvent::Inbound(InboundEvent::Interrupted)).await;
    eventually("playback flushed", || devices.playing() == 0).await;
    assert_eq!(devices.stopped().len(), 3);
    eventually("interruption counted", || session.stats().interruptions == 1).await;

    session.close();
    assert_eq!(wait_terminal(&session).await, SessionState::Closed);

    assert_eq!(devices.open_handles(), 0);
    assert!(!devices.is_capturing());
    assert!(transport.outbound_closed());

    let stats = session.stats();
    assert_eq!(stats.teardown_runs, 1);
    assert_eq!(stats.segments_scheduled, 3);

    assert_eq!(
        session.history(),
        vec![
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Open,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
}

#[tokio::test]
async fn test_close_twice_tears_down_once() {
    let (client, _transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    client.close_session(&session);
    client.close_session(&session);
    assert_eq!(wait_terminal(&session).await, SessionState::Closed);

    session.close();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.stats().teardown_runs, 1);
    assert_eq!(devices.open_handles(), 0);
}

#[tokio::test]
async fn test_close_while_connecting() {
    let (client, transport, devices) = client(Behavior::Silent);
    let session = client.open_session(test_config()).unwrap();

    eventually("connection attempt", || transport.connects() == 1).await;
    session.close();

    assert_eq!(wait_terminal(&session).await, SessionState::Closed);
    assert_eq!(
        session.history(),
        vec![
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Closing,
            SessionState::Closed,
        ]
    );
    assert_eq!(devices.open_handles(), 0);
    assert_eq!(session.stats().teardown_runs, 1);
}

#[tokio::test]
async fn test_close_while_transport_hangs() {
    let (client, _transport, devices) = client(Behavior::Hang);
    let session = client.open_session(test_config()).unwrap();

    session.close();

    assert_eq!(wait_terminal(&session).await, SessionState::Closed);
    assert_eq!(devices.open_handles(), 0);
}

#[tokio::test]
async fn test_connect_timeout_fails_session() {
    let (client, _transport, devices) = client(Behavior::Silent);
    let session = client.open_session(test_config()).unwrap();

    let state = wait_terminal(&session).await;
    let failure = state.failure().expect("expected failure").clone();
    assert_eq!(failure.kind, ErrorKind::Connect);
    assert!(failure.message.contains("not ready"), "{}", failure.message);

    assert_eq!(devices.open_handles(), 0);
    assert_eq!(session.stats().teardown_runs, 1);
    assert!(!session.history().contains(&SessionState::Open));
}

#[tokio::test]
async fn test_refused_connection_fails_session() {
    let (client, _transport, _devices) = client(Behavior::Refuse);
    let session = client.open_session(test_config()).unwrap();

    let state = wait_terminal(&session).await;
    assert_eq!(state.failure().map(|f| f.kind), Some(ErrorKind::Connect));
}

#[tokio::test]
async fn test_transport_error_while_open() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    transport.push_audio(&vec![0.1; 2400], 24000).await;
    transport
        .push(TransportEvent::Error("connection reset by peer".to_string()))
        .await;

    let state = wait_terminal(&session).await;
    let failure = state.failure().expect("expected failure");
    assert_eq!(failure.kind, ErrorKind::Transport);
    assert!(failure.message.contains("connection reset"));

    assert_eq!(devices.open_handles(), 0);
    assert_eq!(devices.playing(), 0);
    assert_eq!(session.stats().teardown_runs, 1);
}

#[tokio::test]
async fn test_missing_device_rejected_before_connecting() {
    let (client, transport, devices) = client(Behavior::Ready);
    devices.set_output_available(false);

    let err = client.open_session(test_config()).err().expect("open should fail");
    assert!(matches!(err, VoiceError::DeviceUnavailable { .. }));
    assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);

    assert_eq!(transport.connects(), 0);
    assert!(client.active_session().is_none());
}

#[tokio::test]
async fn test_input_denied_during_acquisition() {
    let (client, _transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();

    // Permission revoked after the availability check
    devices.set_input_available(false);

    let state = wait_terminal(&session).await;
    assert_eq!(
        state.failure().map(|f| f.kind),
        Some(ErrorKind::DeviceUnavailable)
    );
    assert!(!session.history().contains(&SessionState::Open));

    // The output opened first and must have been released again
    assert_eq!(devices.open_handles(), 0);
}

#[tokio::test]
async fn test_malformed_packet_does_not_fail_session() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    transport.push_audio(&vec![0.2; 2400], 24000).await;
    transport
        .push_packet(TransportPacket {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: "not base64 at all!!".to_string(),
        })
        .await;
    transport.push_audio(&vec![0.2; 2400], 24000).await;

    eventually("two segments scheduled", || devices.scheduled().len() == 2).await;
    eventually("malformed counted", || session.stats().packets_malformed == 1).await;

    let scheduled = devices.scheduled();
    assert_eq!(scheduled[1].start_at, scheduled[0].end());
    assert_eq!(session.state(), SessionState::Open);

    session.close();
    wait_terminal(&session).await;
}

#[tokio::test]
async fn test_captured_audio_forwarded() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    // One full 256ms frame at 16kHz
    assert!(devices.speak(&vec![0.3; 4096]));
    eventually("frame sent", || transport.audio_frames_sent() == 1).await;

    let sent = transport.sent();
    let frame = sent.iter().find(|m| m.is_audio_input()).unwrap();
    match frame {
        ClientMessage::RealtimeInput(input) => {
            assert_eq!(input.media_chunks.len(), 1);
            assert_eq!(input.media_chunks[0].mime_type, "audio/pcm;rate=16000");
        }
        other => panic!("unexpected message {:?}", other),
    }

    session.close();
    wait_terminal(&session).await;
    assert_eq!(session.stats().frames_sent, 1);
}

#[tokio::test]
async fn test_stale_capture_frames_superseded() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    // Three frames land before the session task gets to run
    assert!(devices.speak(&vec![0.1; 4096 * 3]));
    eventually("newest frame sent", || transport.audio_frames_sent() == 1).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(transport.audio_frames_sent(), 1);

    let stats = session.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.frames_superseded, 2);
    assert_eq!(stats.frames_captured, 3);

    session.close();
    wait_terminal(&session).await;
}

#[tokio::test]
async fn test_segment_completion_tracked() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    transport.push_audio(&vec![0.1; 4800], 24000).await;
    eventually("segment scheduled", || devices.playing() == 1).await;

    devices.advance(Duration::from_millis(250));
    eventually("segment completed", || session.stats().segments_completed == 1).await;

    // Underrun: the next segment starts at the current clock, not in the past
    transport.push_audio(&vec![0.1; 2400], 24000).await;
    eventually("second segment", || devices.scheduled().len() == 2).await;
    assert_eq!(devices.scheduled()[1].start_at, Duration::from_millis(250));

    session.close();
    wait_terminal(&session).await;
}

#[tokio::test]
async fn test_one_live_session_per_client() {
    let (client, _transport, _devices) = client(Behavior::Ready);
    let first = client.open_session(test_config()).unwrap();
    wait_open(&first).await;

    let err = client.open_session(test_config()).err().expect("second open should fail");
    assert!(matches!(err, VoiceError::SessionActive(ref id) if id == first.id()));

    first.close();
    wait_terminal(&first).await;

    let second = client.open_session(test_config()).unwrap();
    wait_open(&second).await;
    assert_ne!(first.id(), second.id());

    second.close();
    wait_terminal(&second).await;
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let (client, transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;

    transport
        .push(TransportEvent::Closed {
            reason: Some("server shutting down".to_string()),
        })
        .await;

    assert_eq!(wait_terminal(&session).await, SessionState::Closed);
    assert_eq!(devices.open_handles(), 0);
}

#[tokio::test]
async fn test_dropping_handle_closes_session() {
    let (client, _transport, devices) = client(Behavior::Ready);
    let session = client.open_session(test_config()).unwrap();
    wait_open(&session).await;
    let mut states = session.subscribe();

    drop(session);

    tokio::time::timeout(Duration::from_secs(2), states.wait_for(|s| s.is_terminal()))
        .await
        .expect("session did not close")
        .unwrap();
    eventually("devices released", || devices.open_handles() == 0).await;

    let (_, state) = client.active_session().unwrap();
    assert_eq!(state, SessionState::Closed);
}

#[tokio::test]
async fn test_failure_published_before_devices_released() {
    let transport = MockTransport::new(Behavior::Ready);
    let devices = ObservedDevices::new();
    let client = VoiceClient::new(Arc::new(transport.clone()), Arc::new(devices.clone()));
    let session = client.open_session(test_config()).unwrap();
    devices.watch_session(session.subscribe());
    wait_open(&session).await;

    transport
        .push(TransportEvent::Error("stream reset".to_string()))
        .await;

    let state = wait_terminal(&session).await;
    assert_eq!(state.failure().map(|f| f.kind), Some(ErrorKind::Transport));

    let released = devices.states_at_release();
    assert_eq!(released.len(), 1);
    assert!(
        matches!(released[0], SessionState::Failed(_)),
        "output released while {:?}",
        released[0]
    );
    assert_eq!(devices.inner.open_handles(), 0);
}

#[tokio::test]
async fn test_close_releases_devices_while_closing() {
    let transport = MockTransport::new(Behavior::Ready);
    let devices = ObservedDevices::new();
    let client = VoiceClient::new(Arc::new(transport), Arc::new(devices.clone()));
    let session = client.open_session(test_config()).unwrap();
    devices.watch_session(session.subscribe());
    wait_open(&session).await;

    session.close();
    assert_eq!(wait_terminal(&session).await, SessionState::Closed);

    assert_eq!(devices.states_at_release(), vec![SessionState::Closing]);
    assert_eq!(devices.inner.open_handles(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_check_runs_without_client_lock() {
    let transport = MockTransport::new(Behavior::Ready);
    let devices = ObservedDevices::new();
    let client = Arc::new(VoiceClient::new(
        Arc::new(transport),
        Arc::new(devices.clone()),
    ));

    // The availability check reads back from the client that called it
    let owner: Arc<OnceLock<Weak<VoiceClient>>> = Arc::new(OnceLock::new());
    let _ = owner.set(Arc::downgrade(&client));
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let owner = Arc::clone(&owner);
        let seen = Arc::clone(&seen);
        devices.on_check(move || {
            if let Some(client) = owner.get().and_then(Weak::upgrade) {
                seen.lock().push(client.active_session().map(|(id, _)| id));
            }
        });
    }

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let runtime = tokio::runtime::Handle::current();
    let opener = Arc::clone(&client);
    std::thread::spawn(move || {
        let _guard = runtime.enter();
        let _ = done_tx.send(opener.open_session(test_config()));
    });

    let session = tokio::task::spawn_blocking(move || done_rx.recv_timeout(Duration::from_secs(2)))
        .await
        .unwrap()
        .expect("open_session blocked during the device check")
        .unwrap();

    assert_eq!(*seen.lock(), vec![None]);
    wait_open(&session).await;

    // A second open is refused before devices are consulted
    assert!(client.open_session(test_config()).is_err());
    assert_eq!(seen.lock().len(), 1);

    session.close();
    wait_terminal(&session).await;
}
