use std::fmt;
use std::sync::Arc;

use crate::buffer::DecodedAudioBuffer;
use crate::bus::{BusHandle, lock_bus};
use crate::clock::Clock;
use crate::error::{MixError, MixResult};
use crate::segment::Segment;

/// Opaque, engine-assigned track identifier. Never reused within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackHandle(pub(crate) u64);

impl TrackHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Paused,
}

/// One loaded track: its buffer, its strip parameters and its transport.
///
/// Every transport method is a fire-and-forget command. Segment connects and
/// parameter changes are written to the bus and heard from the next rendered
/// block on.
pub struct TrackChannel {
    id: TrackHandle,
    name: String,
    buffer: Arc<DecodedAudioBuffer>,
    volume: f32,
    pan: f32, // -1.0 left, 1.0 right
    playback_rate: f64,
    looping: bool,
    state: TransportState,
    pause_offset: f64,
    segment_offset: f64, // buffer position the running segment is anchored at
    play_start: f64,
    generation: u64,
    bus: BusHandle,
    clock: Arc<dyn Clock>,
}

impl TrackChannel {
    /// Creates the channel and attaches its strip to the bus.
    pub(crate) fn new(
        id: TrackHandle,
        name: String,
        buffer: Arc<DecodedAudioBuffer>,
        bus: BusHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let channel = TrackChannel {
            id,
            name,
            buffer,
            volume: 1.0,
            pan: 0.0,
            playback_rate: 1.0,
            looping: false,
            state: TransportState::Stopped,
            pause_offset: 0.0,
            segment_offset: 0.0,
            play_start: 0.0,
            generation: 0,
            bus,
            clock,
        };

        lock_bus(&channel.bus).attach(id, channel.volume, channel.pan, channel.playback_rate, channel.looping);
        channel
    }

    pub fn id(&self) -> TrackHandle {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> &DecodedAudioBuffer {
        &self.buffer
    }

    pub fn duration_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn transport_state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == TransportState::Playing
    }

    pub fn pause_offset_seconds(&self) -> f64 {
        self.pause_offset
    }

    /// Clock time the running segment started at; only meaningful while playing.
    pub fn play_start_clock(&self) -> Option<f64> {
        (self.state == TransportState::Playing).then_some(self.play_start)
    }

    /// Current playback position in buffer seconds
    pub fn position_seconds(&self) -> f64 {
        match self.state {
            TransportState::Stopped => 0.0,
            TransportState::Paused => self.pause_offset,
            TransportState::Playing => {
                let position = self.elapsed_position();
                if self.looping {
                    wrap(position, self.duration_seconds())
                } else {
                    position.min(self.duration_seconds())
                }
            }
        }
    }

    /// Start (or resume) playback from the pause offset. No-op while playing.
    pub fn play(&mut self) -> MixResult<()> {
        if self.state == TransportState::Playing {
            return Ok(());
        }
        if let Some(reason) = self.buffer.unusable_reason() {
            return Err(MixError::InvalidTrack(format!("'{}': {}", self.name, reason)));
        }

        self.generation += 1;
        let offset = self.pause_offset;
        let segment = Segment::new(Arc::clone(&self.buffer), offset, self.generation);
        lock_bus(&self.bus).start_segment(self.id, segment);

        self.segment_offset = offset;
        self.play_start = self.clock.now();
        self.state = TransportState::Playing;
        log::debug!("track {} '{}': playing from {:.3}s", self.id, self.name, offset);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != TransportState::Playing {
            return;
        }

        self.pause_offset = wrap(self.elapsed_position(), self.duration_seconds());
        lock_bus(&self.bus).stop_segment(self.id);
        self.state = TransportState::Paused;
        log::debug!("track {} '{}': paused at {:.3}s", self.id, self.name, self.pause_offset);
    }

    pub fn stop(&mut self) {
        lock_bus(&self.bus).stop_segment(self.id);
        self.pause_offset = 0.0;
        self.segment_offset = 0.0;
        if self.state != TransportState::Stopped {
            log::debug!("track {} '{}': stopped", self.id, self.name);
        }
        self.state = TransportState::Stopped;
    }

    /// Clamped to 0.0..=1.0
    pub fn set_volume(&mut self, volume: f32) {
        let Some(volume) = finite(volume, "volume", &self.name) else { return };
        self.volume = volume.clamp(0.0, 1.0);
        lock_bus(&self.bus).set_gain(self.id, self.volume);
    }

    /// Clamped to -1.0..=1.0
    pub fn set_pan(&mut self, pan: f32) {
        let Some(pan) = finite(pan, "pan", &self.name) else { return };
        self.pan = pan.clamp(-1.0, 1.0);
        lock_bus(&self.bus).set_pan(self.id, self.pan);
    }

    /// Any positive rate is accepted; zero, negative or non-finite rates are ignored.
    pub fn set_playback_rate(&mut self, rate: f64) {
        if !(rate.is_finite() && rate > 0.0) {
            log::warn!("track {} '{}': ignoring playback rate {}", self.id, self.name, rate);
            return;
        }

        // Fold the time played at the old rate into the anchor
        if self.state == TransportState::Playing {
            self.reanchor(self.elapsed_position());
        }

        self.playback_rate = rate;
        lock_bus(&self.bus).set_rate(self.id, rate);
    }

    /// Also reaches a running segment. Switching looping off keeps only the
    /// position within the current lap, which is where the audio actually is.
    pub fn set_loop(&mut self, looping: bool) {
        if self.state == TransportState::Playing && self.looping && !looping {
            self.reanchor(wrap(self.elapsed_position(), self.duration_seconds()));
        }
        self.looping = looping;
        lock_bus(&self.bus).set_looping(self.id, looping);
    }

    /// Move the playhead to `seconds`, clamped to the buffer's last frame.
    ///
    /// A playing track restarts its segment at the target. A paused track only
    /// moves its resume point. A stopped track is cued up: it becomes paused at
    /// the target, unless the target is the start.
    pub fn seek(&mut self, seconds: f64) {
        if !seconds.is_finite() {
            log::warn!("track {} '{}': ignoring seek to {}", self.id, self.name, seconds);
            return;
        }
        if self.buffer.unusable_reason().is_some() {
            return;
        }

        let last_frame = (self.buffer.frames() - 1) as f64 / self.buffer.sample_rate() as f64;
        let target = seconds.clamp(0.0, last_frame);

        match self.state {
            TransportState::Playing => {
                self.generation += 1;
                let segment = Segment::new(Arc::clone(&self.buffer), target, self.generation);
                lock_bus(&self.bus).start_segment(self.id, segment);
                self.reanchor(target);
            }
            TransportState::Stopped if target == 0.0 => return,
            TransportState::Stopped | TransportState::Paused => {
                self.pause_offset = target;
                self.state = TransportState::Paused;
            }
        }
        log::debug!("track {} '{}': seek to {:.3}s", self.id, self.name, target);
    }

    /// Apply an end-of-buffer report from the render side. Reports for a
    /// segment that has since been paused, stopped or replaced are ignored.
    pub(crate) fn handle_segment_end(&mut self, generation: u64) -> bool {
        if self.state != TransportState::Playing || generation != self.generation {
            log::debug!("track {}: ignoring stale end of segment {}", self.id, generation);
            return false;
        }

        self.pause_offset = 0.0;
        self.segment_offset = 0.0;
        self.state = TransportState::Stopped;
        log::debug!("track {} '{}': reached end of buffer", self.id, self.name);
        true
    }

    /// Stop and detach from the bus.
    pub(crate) fn release(&mut self) {
        self.stop();
        lock_bus(&self.bus).detach(self.id);
    }

    // Restart the position clock at now, from a known buffer position
    fn reanchor(&mut self, position: f64) {
        self.segment_offset = position;
        self.play_start = self.clock.now();
    }

    fn elapsed_position(&self) -> f64 {
        self.segment_offset + (self.clock.now() - self.play_start).max(0.0) * self.playback_rate
    }
}

fn wrap(position: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    let wrapped = position.rem_euclid(duration);
    if wrapped >= duration { 0.0 } else { wrapped }
}

fn finite(value: f32, what: &str, track: &str) -> Option<f32> {
    if value.is_finite() {
        Some(value)
    } else {
        log::warn!("track '{}': ignoring {} {}", track, what, value);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MixBus;
    use crate::clock::{ManualClock, RenderClock};
    use approx::assert_abs_diff_eq;
    use std::sync::Mutex;

    fn channel(seconds: f32) -> (TrackChannel, ManualClock, BusHandle) {
        let (tx, _rx) = rtrb::RingBuffer::new(8);
        let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(1000, 1.0, 16, RenderClock::new(1000), tx)));
        let clock = ManualClock::new();
        let buffer = Arc::new(DecodedAudioBuffer::mono(vec![0.1; (seconds * 1000.0) as usize], 1000));
        let channel = TrackChannel::new(TrackHandle(1), "kick".to_string(), buffer, Arc::clone(&bus), Arc::new(clock.clone()));
        (channel, clock, bus)
    }

    #[test]
    fn test_defaults() {
        let (ch, _clock, bus) = channel(1.0);
        assert_eq!(ch.volume(), 1.0);
        assert_eq!(ch.pan(), 0.0);
        assert_eq!(ch.playback_rate(), 1.0);
        assert!(!ch.is_looping());
        assert_eq!(ch.transport_state(), TransportState::Stopped);
        assert_eq!(ch.pause_offset_seconds(), 0.0);
        assert!(lock_bus(&bus).is_attached(TrackHandle(1)));
    }

    #[test]
    fn test_pause_resume_tracks_offset() {
        let (mut ch, clock, _bus) = channel(10.0);
        ch.play().unwrap();
        clock.advance(3.0);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 3.0, epsilon = 0.02);

        ch.play().unwrap();
        clock.advance(2.0);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 5.0, epsilon = 0.02);
    }

    #[test]
    fn test_play_is_idempotent() {
        let (mut ch, clock, bus) = channel(10.0);
        ch.play().unwrap();
        clock.advance(1.0);
        ch.play().unwrap();
        assert_eq!(ch.play_start_clock(), Some(0.0));
        assert_eq!(lock_bus(&bus).active_segments(), 1);
    }

    #[test]
    fn test_stop_resets_offset_from_any_state() {
        let (mut ch, clock, bus) = channel(10.0);
        ch.stop();
        assert_eq!(ch.pause_offset_seconds(), 0.0);

        ch.play().unwrap();
        clock.advance(4.0);
        ch.pause();
        ch.stop();
        assert_eq!(ch.transport_state(), TransportState::Stopped);
        assert_eq!(ch.pause_offset_seconds(), 0.0);

        ch.play().unwrap();
        clock.advance(1.0);
        ch.stop();
        assert_eq!(ch.pause_offset_seconds(), 0.0);
        assert!(!lock_bus(&bus).has_active_segment(TrackHandle(1)));
    }

    #[test]
    fn test_pause_wraps_by_duration() {
        let (mut ch, clock, _bus) = channel(2.0);
        ch.set_loop(true);
        ch.play().unwrap();
        clock.advance(5.0);
        assert_abs_diff_eq!(ch.position_seconds(), 1.0, epsilon = 1e-9);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rate_change_reanchors_position() {
        let (mut ch, clock, _bus) = channel(10.0);
        ch.play().unwrap();
        clock.advance(2.0);
        ch.set_playback_rate(2.0);
        clock.advance(1.0);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_loop_off_after_wraps_keeps_lap_position() {
        let (mut ch, clock, _bus) = channel(1.0);
        ch.set_loop(true);
        ch.play().unwrap();
        clock.advance(2.3);
        ch.set_loop(false);
        clock.advance(0.2);
        assert_abs_diff_eq!(ch.position_seconds(), 0.5, epsilon = 1e-9);

        clock.advance(0.3);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_seek_while_playing_restarts_segment() {
        let (mut ch, clock, bus) = channel(10.0);
        ch.play().unwrap();
        clock.advance(2.0);
        let before = ch.generation;

        ch.seek(7.0);
        assert!(ch.is_playing());
        assert_abs_diff_eq!(ch.position_seconds(), 7.0, epsilon = 1e-9);
        clock.advance(1.0);
        assert_abs_diff_eq!(ch.position_seconds(), 8.0, epsilon = 1e-9);
        assert_eq!(lock_bus(&bus).active_segments(), 1);

        assert!(!ch.handle_segment_end(before));
        assert!(ch.is_playing());
    }

    #[test]
    fn test_seek_while_paused_moves_resume_point() {
        let (mut ch, clock, bus) = channel(10.0);
        ch.play().unwrap();
        clock.advance(1.0);
        ch.pause();

        ch.seek(4.5);
        assert_eq!(ch.transport_state(), TransportState::Paused);
        assert_eq!(ch.pause_offset_seconds(), 4.5);
        assert!(!lock_bus(&bus).has_active_segment(TrackHandle(1)));

        ch.play().unwrap();
        clock.advance(0.5);
        ch.pause();
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_seek_from_stopped_cues_track() {
        let (mut ch, _clock, _bus) = channel(10.0);
        ch.seek(0.0);
        assert_eq!(ch.transport_state(), TransportState::Stopped);

        ch.seek(3.0);
        assert_eq!(ch.transport_state(), TransportState::Paused);
        assert_eq!(ch.pause_offset_seconds(), 3.0);

        ch.seek(25.0);
        assert_abs_diff_eq!(ch.pause_offset_seconds(), 9.999, epsilon = 1e-9);
        assert!(ch.pause_offset_seconds() < ch.duration_seconds());
        ch.seek(-1.0);
        assert_eq!(ch.pause_offset_seconds(), 0.0);
        ch.seek(f64::NAN);
        assert_eq!(ch.pause_offset_seconds(), 0.0);
    }

    #[test]
    fn test_invalid_rate_ignored() {
        let (mut ch, _clock, _bus) = channel(1.0);
        ch.set_playback_rate(0.0);
        ch.set_playback_rate(-1.0);
        ch.set_playback_rate(f64::NAN);
        assert_eq!(ch.playback_rate(), 1.0);
        ch.set_playback_rate(0.25);
        assert_eq!(ch.playback_rate(), 0.25);
    }

    #[test]
    fn test_parameter_clamping() {
        let (mut ch, _clock, _bus) = channel(1.0);
        ch.set_volume(1.5);
        assert_eq!(ch.volume(), 1.0);
        ch.set_volume(-0.2);
        assert_eq!(ch.volume(), 0.0);
        ch.set_volume(f32::NAN);
        assert_eq!(ch.volume(), 0.0);
        ch.set_pan(-3.0);
        assert_eq!(ch.pan(), -1.0);
        ch.set_pan(2.0);
        assert_eq!(ch.pan(), 1.0);
    }

    #[test]
    fn test_stale_segment_end_is_ignored() {
        let (mut ch, clock, _bus) = channel(1.0);
        ch.play().unwrap();
        let first = ch.generation;
        ch.stop();
        ch.play().unwrap();
        clock.advance(0.5);

        assert!(!ch.handle_segment_end(first));
        assert!(ch.is_playing());
        assert!(ch.handle_segment_end(ch.generation));
        assert_eq!(ch.transport_state(), TransportState::Stopped);
        assert_eq!(ch.pause_offset_seconds(), 0.0);
    }

    #[test]
    fn test_segment_end_after_pause_is_ignored() {
        let (mut ch, clock, _bus) = channel(1.0);
        ch.play().unwrap();
        clock.advance(0.3);
        ch.pause();
        assert!(!ch.handle_segment_end(ch.generation));
        assert_eq!(ch.transport_state(), TransportState::Paused);
    }

    #[test]
    fn test_play_rejects_empty_buffer() {
        let (tx, _rx) = rtrb::RingBuffer::new(8);
        let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(1000, 1.0, 16, RenderClock::new(1000), tx)));
        let buffer = Arc::new(DecodedAudioBuffer::mono(Vec::new(), 1000));
        let mut ch = TrackChannel::new(TrackHandle(9), "empty".to_string(), buffer, bus, Arc::new(ManualClock::new()));

        assert!(matches!(ch.play(), Err(MixError::InvalidTrack(_))));
        assert_eq!(ch.transport_state(), TransportState::Stopped);
        ch.pause();
        ch.stop();
        assert_eq!(ch.transport_state(), TransportState::Stopped);
    }

    #[test]
    fn test_release_detaches() {
        let (mut ch, _clock, bus) = channel(1.0);
        ch.play().unwrap();
        ch.release();
        assert!(!lock_bus(&bus).is_attached(TrackHandle(1)));
    }
}
