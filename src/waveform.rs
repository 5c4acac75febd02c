use crate::buffer::DecodedAudioBuffer;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaveformType {
    Sine,
    Square,
    Triangle,
    Sawtooth,
    Noise,
}

impl WaveformType {
    /// One sample of the shape at `phase` cycles. Only the fractional part of
    /// the phase matters; output is within -1.0..=1.0.
    pub fn sample_at(&self, phase: f32) -> f32 {
        let phase = phase.rem_euclid(1.0);
        match self {
            WaveformType::Sine => (std::f32::consts::TAU * phase).sin(),
            WaveformType::Square => 1.0f32.copysign(0.5 - phase),
            WaveformType::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            WaveformType::Sawtooth => 2.0 * phase - 1.0,
            WaveformType::Noise => fastrand::f32().mul_add(2.0, -1.0),
        }
    }

    /// Render a mono tone into a buffer the engine can load. Handy for demos
    /// and for feeding the analyzer something with a known spectrum.
    pub fn tone(&self, frequency: f32, amplitude: f32, seconds: f32, sample_rate: u32) -> DecodedAudioBuffer {
        let frames = (seconds.max(0.0) * sample_rate as f32) as usize;
        let step = frequency / sample_rate.max(1) as f32;
        let mut phase = 0.0f32;

        let samples = (0..frames)
            .map(|_| {
                let s = self.sample_at(phase) * amplitude;
                phase = (phase + step).fract();
                s
            })
            .collect();

        DecodedAudioBuffer::mono(samples, sample_rate)
    }
}
