//! Engine configuration
//!
//! Output format, master bus defaults and analyzer settings. Everything has a
//! sensible default so `EngineConfig::default()` is enough for most hosts.

/// Default output sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default output channel count (stereo)
pub const DEFAULT_CHANNELS: u16 = 2;

/// Master gain applied when the engine starts
pub const DEFAULT_MASTER_VOLUME: f32 = 0.8;

/// Transform size of the analyzer; the bin count is half of this
pub const DEFAULT_FFT_SIZE: usize = 256;

/// dB range mapped onto the 0..=255 spectrum scale
pub const DEFAULT_MIN_DECIBELS: f32 = -100.0;
pub const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Capacity of the render -> control event queue
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub master_volume: f32,
    pub fft_size: usize,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            master_volume: DEFAULT_MASTER_VOLUME,
            fft_size: DEFAULT_FFT_SIZE,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate.max(1);
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_master_volume(mut self, volume: f32) -> Self {
        self.master_volume = volume.clamp(0.0, 1.0);
        self
    }

    /// Rounded up to the next power of two, minimum 32
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size.max(32).next_power_of_two();
        self
    }

    pub fn with_decibel_range(mut self, min_decibels: f32, max_decibels: f32) -> Self {
        if min_decibels < max_decibels {
            self.min_decibels = min_decibels;
            self.max_decibels = max_decibels;
        }
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }
}
