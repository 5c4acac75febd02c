//! Mix bus - render side of the engine
//!
//! Every loaded track owns a strip on the bus (gain, pan, rate, loop flag and
//! at most one active segment). A render pass sums all strips, scales by the
//! master volume, writes the device block and feeds the analyzer tap.
//!
//! The bus is shared between the control thread and the output callback as
//! `Arc<Mutex<MixBus>>`; parameter changes land on the next rendered block.
//! End-of-buffer is reported back through a lock-free event queue. A report
//! that does not fit stays parked on its strip and is re-posted on every
//! later block until the control side has made room for it.

use std::f32::consts::FRAC_PI_2;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::clock::RenderClock;
use crate::segment::Segment;
use crate::track::TrackHandle;

pub type BusHandle = Arc<Mutex<MixBus>>;

/// Lock the bus, recovering the guard if a panicking thread poisoned it.
pub(crate) fn lock_bus(bus: &BusHandle) -> MutexGuard<'_, MixBus> {
    bus.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BusEvent {
    SegmentEnded { track: TrackHandle, generation: u64 },
}

struct Strip {
    gain: f32,
    pan: f32,
    rate: f64,
    looping: bool,
    segment: Option<Segment>,
    unreported_end: Option<u64>, // generation of an ended segment not yet queued
}

pub struct MixBus {
    sample_rate: u32,
    master_volume: f32,
    strips: Vec<(TrackHandle, Strip)>,
    tap: Vec<f32>,
    tap_pos: usize,
    events: rtrb::Producer<BusEvent>,
    clock: RenderClock,
}

impl MixBus {
    pub(crate) fn new(
        sample_rate: u32,
        master_volume: f32,
        tap_size: usize,
        clock: RenderClock,
        events: rtrb::Producer<BusEvent>,
    ) -> Self {
        MixBus {
            sample_rate: sample_rate.max(1),
            master_volume: master_volume.clamp(0.0, 1.0),
            strips: Vec::new(),
            tap: vec![0.0; tap_size.max(1)],
            tap_pos: 0,
            events,
            clock,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn strip_count(&self) -> usize {
        self.strips.len()
    }

    pub fn is_attached(&self, track: TrackHandle) -> bool {
        self.strips.iter().any(|(id, _)| *id == track)
    }

    pub fn has_active_segment(&self, track: TrackHandle) -> bool {
        self.strip(track).is_some_and(|s| s.segment.is_some())
    }

    pub fn active_segments(&self) -> usize {
        self.strips.iter().filter(|(_, s)| s.segment.is_some()).count()
    }

    /// Ended segments whose report is still waiting for queue space.
    pub fn unreported_ends(&self) -> usize {
        self.strips.iter().filter(|(_, s)| s.unreported_end.is_some()).count()
    }

    /// Clamped to 0.0..=1.0
    pub(crate) fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = volume.clamp(0.0, 1.0);
    }

    pub(crate) fn attach(&mut self, track: TrackHandle, gain: f32, pan: f32, rate: f64, looping: bool) {
        if self.is_attached(track) {
            return;
        }
        self.strips.push((track, Strip { gain, pan, rate, looping, segment: None, unreported_end: None }));
    }

    pub(crate) fn detach(&mut self, track: TrackHandle) -> bool {
        let before = self.strips.len();
        self.strips.retain(|(id, _)| *id != track);
        before != self.strips.len()
    }

    /// Connect a fresh segment, tearing down whatever was running on the strip.
    pub(crate) fn start_segment(&mut self, track: TrackHandle, segment: Segment) {
        if let Some(strip) = self.strip_mut(track) {
            strip.unreported_end = None;
            if let Some(old) = strip.segment.replace(segment) {
                log::debug!("track {}: replaced segment {}", track, old.generation());
            }
        }
    }

    /// Tear down the active segment. A pending end report for it is dropped too.
    pub(crate) fn stop_segment(&mut self, track: TrackHandle) {
        if let Some(strip) = self.strip_mut(track) {
            strip.segment = None;
            strip.unreported_end = None;
        }
    }

    pub(crate) fn set_gain(&mut self, track: TrackHandle, gain: f32) {
        if let Some(strip) = self.strip_mut(track) {
            strip.gain = gain;
        }
    }

    pub(crate) fn set_pan(&mut self, track: TrackHandle, pan: f32) {
        if let Some(strip) = self.strip_mut(track) {
            strip.pan = pan;
        }
    }

    pub(crate) fn set_rate(&mut self, track: TrackHandle, rate: f64) {
        if let Some(strip) = self.strip_mut(track) {
            strip.rate = rate;
        }
    }

    pub(crate) fn set_looping(&mut self, track: TrackHandle, looping: bool) {
        if let Some(strip) = self.strip_mut(track) {
            strip.looping = looping;
        }
    }

    /// Render one interleaved block. `out` is overwritten.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        out.fill(0.0);

        for (track, strip) in self.strips.iter_mut() {
            if let Some(generation) = strip.unreported_end {
                if self.events.push(BusEvent::SegmentEnded { track: *track, generation }).is_ok() {
                    strip.unreported_end = None;
                }
            }

            let Some(segment) = strip.segment.as_mut() else {
                continue;
            };

            let step = segment.step_for(strip.rate, self.sample_rate);
            let mono = segment.is_mono();
            let mut ended = false;

            for frame in out.chunks_exact_mut(channels) {
                let Some((left, right)) = segment.next_frame(step, strip.looping) else {
                    ended = true;
                    break;
                };
                let (left, right) = pan_frame(left * strip.gain, right * strip.gain, strip.pan, mono);
                if channels == 1 {
                    frame[0] += (left + right) * 0.5;
                } else {
                    frame[0] += left;
                    frame[1] += right;
                }
            }

            if ended {
                let generation = segment.generation();
                strip.segment = None;
                if self.events.push(BusEvent::SegmentEnded { track: *track, generation }).is_err() {
                    log::warn!("track {}: event queue full, end-of-buffer deferred", track);
                    strip.unreported_end = Some(generation);
                }
            }
        }

        let frames = out.len() / channels;
        for frame in out.chunks_exact_mut(channels) {
            for sample in frame.iter_mut() {
                *sample *= self.master_volume;
            }
            let mono = if channels == 1 { frame[0] } else { (frame[0] + frame[1]) * 0.5 };
            self.tap[self.tap_pos] = mono;
            self.tap_pos = (self.tap_pos + 1) % self.tap.len();
        }

        self.clock.advance(frames as u64);
    }

    /// Copy the tap, oldest sample first.
    pub(crate) fn copy_tap(&self, into: &mut Vec<f32>) {
        into.clear();
        into.extend_from_slice(&self.tap[self.tap_pos..]);
        into.extend_from_slice(&self.tap[..self.tap_pos]);
    }

    fn strip(&self, track: TrackHandle) -> Option<&Strip> {
        self.strips.iter().find(|(id, _)| *id == track).map(|(_, s)| s)
    }

    fn strip_mut(&mut self, track: TrackHandle) -> Option<&mut Strip> {
        self.strips.iter_mut().find(|(id, _)| *id == track).map(|(_, s)| s)
    }
}

/// Constant-power stereo panner. Mono sources are spread across both sides;
/// stereo sources are balanced, folding the far side into the near one.
#[inline]
pub(crate) fn pan_frame(left: f32, right: f32, pan: f32, mono: bool) -> (f32, f32) {
    if mono {
        let angle = (pan + 1.0) * 0.5 * FRAC_PI_2;
        (left * angle.cos(), left * angle.sin())
    } else if pan <= 0.0 {
        let angle = (pan + 1.0) * FRAC_PI_2;
        (left + right * angle.cos(), right * angle.sin())
    } else {
        let angle = pan * FRAC_PI_2;
        (left * angle.cos(), right + left * angle.sin())
    }
}
