//! Spectrum analyzer over the master bus
//!
//! Each call takes a fresh snapshot of the bus tap (the last `fft_size` mono
//! samples of the master output) and transforms it. There is no smoothing or
//! history between calls; a visualizer simply calls again every frame.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::bus::{BusHandle, lock_bus};

#[derive(Clone)]
pub struct Analyzer {
    bus: BusHandle,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    min_decibels: f32,
    max_decibels: f32,
}

impl Analyzer {
    pub(crate) fn new(bus: BusHandle, fft_size: usize, min_decibels: f32, max_decibels: f32) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Analyzer {
            bus,
            fft,
            window: blackman(fft_size),
            min_decibels,
            max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.window.len() / 2
    }

    /// Magnitude spectrum, one byte per bin. `min_decibels` and below map to 0,
    /// `max_decibels` and above to 255. A silent bus reads all zeros.
    pub fn sample_spectrum(&self) -> Vec<u8> {
        let samples = self.snapshot();
        let size = self.window.len();

        let mut bins: Vec<Complex<f32>> = samples
            .iter()
            .zip(&self.window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut bins);

        let range = self.max_decibels - self.min_decibels;
        bins.iter()
            .take(self.frequency_bin_count())
            .map(|bin| {
                let magnitude = bin.norm() / size as f32;
                if magnitude <= 0.0 {
                    return 0;
                }
                let db = 20.0 * magnitude.log10();
                (255.0 * (db - self.min_decibels) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Time-domain view of the same window: 128 is silence.
    pub fn sample_waveform(&self) -> Vec<u8> {
        self.snapshot()
            .iter()
            .map(|s| (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    fn snapshot(&self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.window.len());
        lock_bus(&self.bus).copy_tap(&mut samples);
        samples.resize(self.window.len(), 0.0);
        samples
    }
}

fn blackman(size: usize) -> Vec<f32> {
    use std::f32::consts::TAU;
    (0..size)
        .map(|n| {
            let x = n as f32 / size as f32;
            0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MixBus;
    use crate::clock::RenderClock;
    use crate::segment::Segment;
    use crate::track::TrackHandle;
    use crate::waveform::WaveformType;
    use std::sync::Mutex;

    const RATE: u32 = 8000;
    const FFT: usize = 256;

    fn analyzer() -> (Analyzer, BusHandle) {
        let (tx, _rx) = rtrb::RingBuffer::new(8);
        let bus: BusHandle = Arc::new(Mutex::new(MixBus::new(RATE, 1.0, FFT, RenderClock::new(RATE), tx)));
        (Analyzer::new(Arc::clone(&bus), FFT, -100.0, -30.0), bus)
    }

    #[test]
    fn test_silent_bus_reads_zero() {
        let (analyzer, bus) = analyzer();
        let spectrum = analyzer.sample_spectrum();
        assert_eq!(spectrum.len(), 128);
        assert!(spectrum.iter().all(|&b| b == 0));

        let mut out = vec![0.0; 512];
        lock_bus(&bus).render(&mut out, 2);
        assert!(analyzer.sample_spectrum().iter().all(|&b| b == 0));
        assert!(analyzer.sample_waveform().iter().all(|&b| b == 128));
    }

    #[test]
    fn test_tone_peaks_in_its_bin() {
        let (analyzer, bus) = analyzer();
        // 500 Hz sits exactly on bin 16 at 8 kHz / 256
        let tone = Arc::new(WaveformType::Sine.tone(500.0, 0.05, 1.0, RATE));
        {
            let mut bus = lock_bus(&bus);
            bus.attach(TrackHandle(1), 1.0, 0.0, 1.0, true);
            bus.start_segment(TrackHandle(1), Segment::new(tone, 0.0, 1));
            let mut out = vec![0.0; FFT * 2];
            bus.render(&mut out, 2);
        }

        let spectrum = analyzer.sample_spectrum();
        let peak = spectrum
            .iter()
            .enumerate()
            .max_by_key(|(i, b)| (**b, std::cmp::Reverse(*i)))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(16));
        assert!(spectrum[16] > 0);
    }

    #[test]
    fn test_window_shape() {
        let window = blackman(64);
        assert!(window[0].abs() < 1e-6);
        assert!((window[32] - 1.0).abs() < 1e-5);
    }
}
