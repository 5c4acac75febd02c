//! Renderable segment - one continuous run over a buffer
//!
//! A segment is built by `play()`, starts at a fixed offset and runs until it
//! is torn down or reaches the end of its buffer. It is never rewound: resuming
//! after a pause builds a new segment at the new offset.

use std::sync::Arc;

use crate::buffer::DecodedAudioBuffer;

pub(crate) struct Segment {
    buffer: Arc<DecodedAudioBuffer>,
    position: f64, // source frames, fractional
    generation: u64,
}

impl Segment {
    pub(crate) fn new(buffer: Arc<DecodedAudioBuffer>, offset_seconds: f64, generation: u64) -> Self {
        let frames = buffer.frames() as f64;
        let position = (offset_seconds.max(0.0) * buffer.sample_rate() as f64).min(frames);

        Segment { buffer, position, generation }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn is_mono(&self) -> bool {
        self.buffer.channels() == 1
    }

    /// Source frames to advance per output frame at the given playback rate.
    pub(crate) fn step_for(&self, rate: f64, output_rate: u32) -> f64 {
        rate * self.buffer.sample_rate() as f64 / output_rate.max(1) as f64
    }

    /// Next stereo frame, or `None` once a non-looping run has passed the end.
    #[inline]
    pub(crate) fn next_frame(&mut self, step: f64, looping: bool) -> Option<(f32, f32)> {
        let frames = self.buffer.frames();
        if frames == 0 {
            return None;
        }

        if self.position >= frames as f64 {
            if !looping {
                return None;
            }
            self.position %= frames as f64;
        }

        let frame = self.interpolate(frames);
        self.position += step;
        Some(frame)
    }

    // Linear interpolation between neighbouring frames
    #[inline]
    fn interpolate(&self, frames: usize) -> (f32, f32) {
        let idx = self.position as usize;
        let (l1, r1) = self.buffer.stereo_frame(idx);

        if idx + 1 < frames {
            let frac = (self.position - idx as f64) as f32;
            let (l2, r2) = self.buffer.stereo_frame(idx + 1);
            (l1 * (1.0 - frac) + l2 * frac, r1 * (1.0 - frac) + r2 * frac)
        } else {
            (l1, r1)
        }
    }
}
