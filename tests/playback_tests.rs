// Tests for gapless playback scheduling against the virtual output sink

use std::time::Duration;
use tokio::sync::mpsc;
use voice_copilot::audio::{
    encode, DeviceProvider, PlaybackScheduler, TransportPacket, VirtualDevices,
};

fn scheduler(devices: &VirtualDevices) -> (PlaybackScheduler, mpsc::UnboundedReceiver<u64>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = devices.open_output(None, 24000, tx).unwrap();
    (PlaybackScheduler::new(sink, 24000), rx)
}

fn packet_ms(ms: usize) -> TransportPacket {
    encode(&vec![0.1; 24 * ms], 24000)
}

#[test]
fn test_segments_are_contiguous_despite_jitter() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    // Packets arrive faster than they play, with uneven gaps
    let mut previous_end = None;
    for (i, advance_ms) in [0u64, 30, 5, 70, 10].iter().enumerate() {
        devices.advance(Duration::from_millis(*advance_ms));
        let segment = playback.enqueue(&packet_ms(100)).unwrap().unwrap();

        if let Some(end) = previous_end {
            assert_eq!(segment.start_at, end, "segment {} left a gap", i);
        }
        assert!(segment.start_at >= playback.now());
        previous_end = Some(segment.end());
    }

    assert_eq!(playback.cursor(), Duration::from_millis(500));
    assert_eq!(playback.pending_segments(), 5);
}

#[test]
fn test_underrun_starts_at_now() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    playback.enqueue(&packet_ms(100)).unwrap();
    devices.advance(Duration::from_millis(400));

    let late = playback.enqueue(&packet_ms(100)).unwrap().unwrap();
    assert_eq!(late.start_at, Duration::from_millis(400));
    assert_eq!(playback.cursor(), Duration::from_millis(500));
}

#[test]
fn test_interrupt_flushes_everything() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    for _ in 0..5 {
        playback.enqueue(&packet_ms(200)).unwrap();
    }
    devices.advance(Duration::from_millis(50));

    assert_eq!(playback.interrupt(), 5);
    assert_eq!(playback.pending_segments(), 0);
    assert_eq!(devices.playing(), 0);
    assert_eq!(devices.stopped().len(), 5);
    assert!(playback.cursor() <= playback.now());

    // Next segment starts immediately
    let next = playback.enqueue(&packet_ms(100)).unwrap().unwrap();
    assert_eq!(next.start_at, Duration::from_millis(50));
    assert_eq!(playback.stats().interruptions, 1);
}

#[test]
fn test_interrupt_with_nothing_scheduled() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    assert_eq!(playback.interrupt(), 0);
    assert_eq!(playback.cursor(), playback.now());
}

#[test]
fn test_corrupt_packet_is_skipped() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    for i in 0..10 {
        let packet = if i == 5 {
            TransportPacket {
                mime_type: "audio/pcm;rate=24000".to_string(),
                data: "@@not-base64@@".to_string(),
            }
        } else {
            packet_ms(50)
        };
        playback.enqueue(&packet).unwrap();
    }

    let scheduled = devices.scheduled();
    assert_eq!(scheduled.len(), 9);
    for pair in scheduled.windows(2) {
        assert_eq!(pair[1].start_at, pair[0].end());
    }
    assert_eq!(playback.stats().packets_malformed, 1);
    assert_eq!(playback.stats().segments_scheduled, 9);
}

#[test]
fn test_rate_tag_sets_segment_duration() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    let segment = playback
        .enqueue(&encode(&vec![0.0; 1600], 16000))
        .unwrap()
        .unwrap();
    assert_eq!(segment.duration, Duration::from_millis(100));
    assert_eq!(devices.scheduled()[0].sample_rate, 16000);
}

#[test]
fn test_empty_packet_schedules_nothing() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);

    assert!(playback.enqueue(&encode(&[], 24000)).unwrap().is_none());
    assert!(devices.scheduled().is_empty());
    assert_eq!(playback.cursor(), Duration::ZERO);
}

#[tokio::test]
async fn test_completion_removes_segment() {
    let devices = VirtualDevices::new();
    let (mut playback, mut completions) = scheduler(&devices);

    let first = playback.enqueue(&packet_ms(100)).unwrap().unwrap();
    let second = playback.enqueue(&packet_ms(100)).unwrap().unwrap();

    devices.advance(Duration::from_millis(100));
    let finished = completions.recv().await.unwrap();
    assert_eq!(finished, first.id);

    assert!(playback.on_segment_finished(finished));
    assert!(!playback.is_scheduled(first.id));
    assert!(playback.is_scheduled(second.id));

    // A late completion for a flushed segment is ignored
    assert!(!playback.on_segment_finished(first.id));
    assert_eq!(playback.stats().segments_completed, 1);
}

#[test]
fn test_close_releases_output() {
    let devices = VirtualDevices::new();
    let (mut playback, _rx) = scheduler(&devices);
    playback.enqueue(&packet_ms(100)).unwrap();

    playback.close().unwrap();
    playback.close().unwrap();

    assert_eq!(devices.open_handles(), 0);
    assert_eq!(devices.playing(), 0);
    assert!(playback.enqueue(&packet_ms(100)).unwrap().is_none());
}
