// Capture-side sample processing
//
// Device buffers arrive at the hardware's native rate and channel count and
// with whatever buffer size the driver picked. The capture pipeline needs
// fixed-size mono frames at 16kHz, so each buffer goes through:
//   downmix -> resample -> reframe

use super::backend::StreamFormat;

/// Average interleaved channels into mono
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler (mono)
///
/// Keeps the last input sample and the fractional read position between
/// calls so consecutive buffers resample without seams.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input samples advanced per output sample
    step: f64,
    /// Read position relative to `prev` (index 0 once a buffer has been seen)
    position: f64,
    prev: Option<f32>,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: input_rate as f64 / output_rate.max(1) as f64,
            position: 0.0,
            prev: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let mut buf = Vec::with_capacity(input.len() + 1);
        if let Some(prev) = self.prev {
            buf.push(prev);
        }
        buf.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        let last = (buf.len() - 1) as f64;

        while self.position <= last {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let sample = match buf.get(index + 1) {
                Some(next) => buf[index] + (next - buf[index]) * frac,
                None if frac == 0.0 => buf[index],
                // Needs the next buffer's first sample
                None => break,
            };
            output.push(sample);
            self.position += self.step;
        }

        // Rebase so the last sample becomes index 0 of the next call
        self.position -= last;
        self.prev = buf.last().copied();

        output
    }
}

/// Converts device buffers into fixed-size mono frames at the target rate
#[derive(Debug)]
pub struct Reframer {
    native: StreamFormat,
    resampler: LinearResampler,
    frame_len: usize,
    pending: Vec<f32>,
}

impl Reframer {
    pub fn new(native: StreamFormat, target_rate: u32, frame_len: usize) -> Self {
        Self {
            native,
            resampler: LinearResampler::new(native.sample_rate, target_rate),
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Feed one interleaved device buffer; returns every completed frame
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<Vec<f32>> {
        let mono = downmix_to_mono(interleaved, self.native.channels);
        let resampled = self.resampler.process(&mono);
        self.pending.extend_from_slice(&resampled);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples buffered towards the next frame
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
