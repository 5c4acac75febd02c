use std::path::Path;
use std::sync::{Arc, Mutex};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use crate::analyzer::Analyzer;
use crate::buffer::DecodedAudioBuffer;
use crate::bus::{BusEvent, BusHandle, MixBus, lock_bus};
use crate::clock::{Clock, RenderClock};
use crate::config::EngineConfig;
use crate::error::{MixError, MixResult};
use crate::track::{TrackChannel, TrackHandle, TransportState};
use crate::utils::track_name_from_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// play/pause/stop issued by the host
    Command,
    /// A non-looping track ran off the end of its buffer
    EndOfBuffer,
    /// The track was stopped because it is being removed
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportChange {
    pub track: TrackHandle,
    pub from: TransportState,
    pub to: TransportState,
    pub cause: ChangeCause,
}

type Observer = Box<dyn FnMut(&TransportChange)>;

/// Owns the tracks, the mix bus and the analyzer.
///
/// Lives on one control thread. Rendering happens either on the output
/// stream's callback (see [`MixEngine::start_output`]) or through
/// [`MixEngine::render`] for offline use. Call [`MixEngine::process_events`]
/// regularly (once per UI frame is plenty) so end-of-buffer stops reach the
/// tracks and the observers.
pub struct MixEngine {
    config: EngineConfig,
    tracks: Vec<TrackChannel>, // insertion order is display order
    next_track_id: u64,
    bus: BusHandle,
    events: rtrb::Consumer<BusEvent>,
    clock: Arc<dyn Clock>,
    analyzer: Analyzer,
    observers: Vec<Observer>,
    muted_volume: Option<f32>,
    stream: Option<Stream>,
}

impl MixEngine {
    /// Offline engine timed by the frames its bus renders.
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, None)
    }

    /// Engine whose tracks are timed by a host supplied clock.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, Some(clock))
    }

    /// Engine matched to the default output device and already playing into it.
    pub fn with_default_output(config: EngineConfig) -> MixResult<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()
            .ok_or_else(|| MixError::AudioError("No output device found".to_string()))?;
        let supported = device.default_output_config()
            .map_err(|e| MixError::AudioError(e.to_string()))?;

        let config = config
            .with_sample_rate(supported.sample_rate().0)
            .with_channels(supported.channels());

        let mut engine = Self::new(config);
        engine.start_output()?;
        Ok(engine)
    }

    fn build(config: EngineConfig, clock: Option<Arc<dyn Clock>>) -> Self {
        let render_clock = RenderClock::new(config.sample_rate);
        let clock: Arc<dyn Clock> = match clock {
            Some(clock) => clock,
            None => Arc::new(render_clock.clone()),
        };
        let (event_tx, events) = rtrb::RingBuffer::new(config.event_capacity);

        let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(
            config.sample_rate,
            config.master_volume,
            config.fft_size,
            render_clock,
            event_tx,
        )));
        let analyzer = Analyzer::new(Arc::clone(&bus), config.fft_size, config.min_decibels, config.max_decibels);

        MixEngine {
            config,
            tracks: Vec::new(),
            next_track_id: 1,
            bus,
            events,
            clock,
            analyzer,
            observers: Vec::new(),
            muted_volume: None,
            stream: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Current engine time in seconds
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // Tracks

    /// Register a decoded buffer as a new track, wired into the bus.
    pub fn load_track(&mut self, buffer: DecodedAudioBuffer, name: impl Into<String>) -> MixResult<TrackHandle> {
        let name = name.into();
        if let Some(reason) = buffer.unusable_reason() {
            log::warn!("Rejected track '{}': {}", name, reason);
            return Err(MixError::DecodeRejected(format!("'{}': {}", name, reason)));
        }

        let id = TrackHandle(self.next_track_id);
        self.next_track_id += 1;

        log::info!(
            "Loaded track {} '{}': {:.2}s, {} Hz, {} channels",
            id,
            name,
            buffer.duration_seconds(),
            buffer.sample_rate(),
            buffer.channels()
        );

        let channel = TrackChannel::new(id, name, Arc::new(buffer), Arc::clone(&self.bus), Arc::clone(&self.clock));
        self.tracks.push(channel);
        Ok(id)
    }

    /// Load a .wav file as a track named after the file, minus its extension.
    pub fn load_track_file<P: AsRef<Path>>(&mut self, path: P) -> MixResult<TrackHandle> {
        let path = path.as_ref();
        let buffer = DecodedAudioBuffer::from_wav(path)?;
        self.load_track(buffer, track_name_from_path(path))
    }

    /// Stop, disconnect and drop a track. Unknown handles are ignored.
    pub fn remove_track(&mut self, handle: TrackHandle) {
        self.process_events();

        let Some(index) = self.tracks.iter().position(|t| t.id() == handle) else {
            return;
        };

        let mut channel = self.tracks.remove(index);
        let from = channel.transport_state();
        channel.release();
        log::info!("Removed track {} '{}'", handle, channel.name());

        if from != TransportState::Stopped {
            self.notify(TransportChange { track: handle, from, to: TransportState::Stopped, cause: ChangeCause::Removed });
        }
    }

    pub fn track(&self, handle: TrackHandle) -> Option<&TrackChannel> {
        self.tracks.iter().find(|t| t.id() == handle)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackChannel> {
        self.tracks.iter()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    // Per-track transport

    pub fn play(&mut self, handle: TrackHandle) -> MixResult<()> {
        self.process_events();
        self.command(handle, |ch| ch.play()).unwrap_or(Ok(()))
    }

    pub fn pause(&mut self, handle: TrackHandle) {
        self.process_events();
        self.command(handle, |ch| ch.pause());
    }

    pub fn stop(&mut self, handle: TrackHandle) {
        self.process_events();
        self.command(handle, |ch| ch.stop());
    }

    /// Move a track's playhead; see [`TrackChannel::seek`].
    pub fn seek(&mut self, handle: TrackHandle, seconds: f64) {
        self.process_events();
        self.command(handle, |ch| ch.seek(seconds));
    }

    pub fn set_track_volume(&mut self, handle: TrackHandle, volume: f32) {
        self.command(handle, |ch| ch.set_volume(volume));
    }

    pub fn set_track_pan(&mut self, handle: TrackHandle, pan: f32) {
        self.command(handle, |ch| ch.set_pan(pan));
    }

    pub fn set_track_rate(&mut self, handle: TrackHandle, rate: f64) {
        self.command(handle, |ch| ch.set_playback_rate(rate));
    }

    pub fn set_track_loop(&mut self, handle: TrackHandle, looping: bool) {
        self.command(handle, |ch| ch.set_loop(looping));
    }

    // Engine-wide transport

    /// Play every track. A track that cannot play is reported and skipped;
    /// the rest still start.
    pub fn play_all(&mut self) -> Vec<(TrackHandle, MixError)> {
        self.process_events();

        let mut failures = Vec::new();
        for handle in self.handles() {
            if let Some(Err(e)) = self.command(handle, |ch| ch.play()) {
                log::warn!("play_all: track {} failed: {}", handle, e);
                failures.push((handle, e));
            }
        }
        failures
    }

    pub fn pause_all(&mut self) {
        self.process_events();
        for handle in self.handles() {
            self.command(handle, |ch| ch.pause());
        }
    }

    pub fn stop_all(&mut self) {
        self.process_events();
        for handle in self.handles() {
            self.command(handle, |ch| ch.stop());
        }
    }

    // Master bus

    /// Clamped to 0.0..=1.0. Also lifts a master mute.
    pub fn set_master_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            log::warn!("Ignoring master volume {}", volume);
            return;
        }
        self.muted_volume = None;
        lock_bus(&self.bus).set_master_volume(volume);
    }

    pub fn master_volume(&self) -> f32 {
        lock_bus(&self.bus).master_volume()
    }

    /// Mute remembers the current master volume, unmute restores it.
    /// Returns whether the master is now muted.
    pub fn toggle_master_mute(&mut self) -> bool {
        let mut bus = lock_bus(&self.bus);
        match self.muted_volume.take() {
            Some(volume) => {
                bus.set_master_volume(volume);
                false
            }
            None => {
                self.muted_volume = Some(bus.master_volume());
                bus.set_master_volume(0.0);
                true
            }
        }
    }

    pub fn is_master_muted(&self) -> bool {
        self.muted_volume.is_some()
    }

    // Observers and events

    /// Called for every transport state change, including end-of-buffer stops.
    pub fn on_transport_change<F>(&mut self, observer: F)
    where
        F: FnMut(&TransportChange) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Apply end-of-buffer reports from the render side. Returns how many
    /// tracks changed state.
    pub fn process_events(&mut self) -> usize {
        let mut changed = 0;
        while let Ok(event) = self.events.pop() {
            match event {
                BusEvent::SegmentEnded { track, generation } => {
                    let Some(channel) = self.tracks.iter_mut().find(|t| t.id() == track) else {
                        continue;
                    };
                    if channel.handle_segment_end(generation) {
                        changed += 1;
                        self.notify(TransportChange {
                            track,
                            from: TransportState::Playing,
                            to: TransportState::Stopped,
                            cause: ChangeCause::EndOfBuffer,
                        });
                    }
                }
            }
        }
        changed
    }

    // Output

    /// Render one interleaved block in the configured channel layout.
    pub fn render(&self, out: &mut [f32]) {
        lock_bus(&self.bus).render(out, self.config.channels as usize);
    }

    pub fn start_output(&mut self) -> MixResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_output_device()
            .ok_or_else(|| MixError::AudioError("No output device".to_string()))?;

        let config = StreamConfig {
            channels: self.config.channels,
            sample_rate: cpal::SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let channels = self.config.channels as usize;
        let bus = Arc::clone(&self.bus);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                lock_bus(&bus).render(data, channels);
            },
            |err| log::error!("Stream error: {}", err),
            None
        ).map_err(|e| MixError::AudioError(e.to_string()))?;

        stream.play().map_err(|e| MixError::AudioError(e.to_string()))?;
        self.stream = Some(stream);

        log::info!("Output started: {} Hz, {} channels", self.config.sample_rate, self.config.channels);
        Ok(())
    }

    pub fn stop_output(&mut self) {
        if self.stream.take().is_some() {
            log::info!("Output stopped");
        }
    }

    pub fn is_output_running(&self) -> bool {
        self.stream.is_some()
    }

    fn handles(&self) -> Vec<TrackHandle> {
        self.tracks.iter().map(|t| t.id()).collect()
    }

    /// Run `f` on a track and report any transport change it caused.
    fn command<R>(&mut self, handle: TrackHandle, f: impl FnOnce(&mut TrackChannel) -> R) -> Option<R> {
        let channel = self.tracks.iter_mut().find(|t| t.id() == handle)?;
        let from = channel.transport_state();
        let result = f(channel);
        let to = channel.transport_state();

        if from != to {
            self.notify(TransportChange { track: handle, from, to, cause: ChangeCause::Command });
        }
        Some(result)
    }

    fn notify(&mut self, change: TransportChange) {
        for observer in self.observers.iter_mut() {
            observer(&change);
        }
    }
}
