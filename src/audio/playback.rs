use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::backend::{AudioDomain, AudioFrame, OutputSink, SegmentId};
use super::codec::{self, TransportPacket};
use crate::error::{Result, VoiceError};

/// Placement of one decoded segment on the output timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    pub id: SegmentId,
    pub start_at: Duration,
    pub duration: Duration,
}

impl ScheduledSegment {
    pub fn end(&self) -> Duration {
        self.start_at + self.duration
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub segments_scheduled: u64,
    pub segments_completed: u64,
    pub packets_malformed: u64,
    pub interruptions: u64,
}

/// Gapless scheduler for inbound model audio
///
/// Every segment starts where the previous one ends (or now, if playback has
/// drained), so segments arriving in order play back to back regardless of
/// network jitter.
pub struct PlaybackScheduler {
    sink: Box<dyn OutputSink>,
    /// Rate assumed for packets whose format tag carries none
    default_sample_rate: u32,
    /// Earliest start for the next segment; never moves backwards except on interrupt
    cursor: Duration,
    /// Segments scheduled on the sink that have not finished
    scheduled: BTreeSet<SegmentId>,
    stats: PlaybackStats,
    closed: bool,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn OutputSink>, default_sample_rate: u32) -> Self {
        let cursor = sink.now();
        info!(
            "Playback scheduler ready on {} ({}Hz)",
            sink.name(),
            default_sample_rate
        );

        Self {
            sink,
            default_sample_rate,
            cursor,
            scheduled: BTreeSet::new(),
            stats: PlaybackStats::default(),
            closed: false,
        }
    }

    /// Decode `packet` and schedule it right after the audio already queued.
    ///
    /// Returns `Ok(None)` when the packet is dropped (malformed or empty); a
    /// bad packet never interrupts playback. Errors come only from the sink.
    pub fn enqueue(&mut self, packet: &TransportPacket) -> Result<Option<ScheduledSegment>> {
        if self.closed {
            debug!("Dropping packet for closed playback scheduler");
            return Ok(None);
        }

        let samples = match codec::decode(packet) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.packets_malformed += 1;
                warn!("Dropping inbound audio packet: {}", e);
                return Ok(None);
            }
        };

        if samples.is_empty() {
            return Ok(None);
        }

        let sample_rate = packet.sample_rate().unwrap_or(self.default_sample_rate);
        let segment = AudioFrame::mono(samples, sample_rate, AudioDomain::Playback);
        let duration = segment.duration();

        let start_at = self.cursor.max(self.sink.now());
        let id = self.sink.schedule(segment, start_at)?;

        self.scheduled.insert(id);
        self.cursor = start_at + duration;
        self.stats.segments_scheduled += 1;

        debug!(
            "Scheduled segment {} at {:?} for {:?} ({} pending)",
            id,
            start_at,
            duration,
            self.scheduled.len()
        );

        Ok(Some(ScheduledSegment {
            id,
            start_at,
            duration,
        }))
    }

    /// Completion callback from the sink
    pub fn on_segment_finished(&mut self, id: SegmentId) -> bool {
        let removed = self.scheduled.remove(&id);
        if removed {
            self.stats.segments_completed += 1;
        }
        removed
    }

    /// Barge-in: silence everything scheduled and restart the timeline at now
    pub fn interrupt(&mut self) -> usize {
        let pending = std::mem::take(&mut self.scheduled);
        let stopped = pending.len();

        for id in pending {
            if let Err(e) = self.sink.stop_segment(id) {
                warn!("Failed to stop segment {}: {}", id, e);
            }
        }

        self.cursor = self.sink.now();
        self.stats.interruptions += 1;

        info!("Playback interrupted: {} segments flushed", stopped);
        stopped
    }

    /// Stop everything and release the output device; later calls are no-ops
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        for id in std::mem::take(&mut self.scheduled) {
            if let Err(e) = self.sink.stop_segment(id) {
                debug!("Ignoring stop error for segment {} during close: {}", id, e);
            }
        }

        info!("Closing output sink {}", self.sink.name());
        self.sink
            .close()
            .map_err(|e| VoiceError::teardown("output sink", e.to_string()))
    }

    pub fn cursor(&self) -> Duration {
        self.cursor
    }

    pub fn now(&self) -> Duration {
        self.sink.now()
    }

    pub fn pending_segments(&self) -> usize {
        self.scheduled.len()
    }

    pub fn is_scheduled(&self, id: SegmentId) -> bool {
        self.scheduled.contains(&id)
    }

    pub fn stats(&self) -> PlaybackStats {
        self.stats
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close playback on drop: {}", e);
        }
    }
}
