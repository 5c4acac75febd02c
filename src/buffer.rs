use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::error::{MixError, MixResult};

/// Decoded PCM handed to the engine. Samples are interleaved `f32` in -1.0..1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl DecodedAudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        DecodedAudioBuffer { samples, sample_rate, channels }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Why this buffer cannot be played, if it cannot.
    pub fn unusable_reason(&self) -> Option<String> {
        if self.channels == 0 {
            Some("buffer has no channels".to_string())
        } else if self.sample_rate == 0 {
            Some("buffer has a zero sample rate".to_string())
        } else if self.frames() == 0 {
            Some("buffer has no samples".to_string())
        } else {
            None
        }
    }

    pub fn is_playable(&self) -> bool {
        self.unusable_reason().is_none()
    }

    /// Left/right pair for a frame. Mono buffers return the same value twice,
    /// anything past the second channel is ignored.
    #[inline]
    pub(crate) fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = frame * channels;
        match self.samples.get(base..base + channels) {
            Some([mono]) => (*mono, *mono),
            Some([left, right, ..]) => (*left, *right),
            _ => (0.0, 0.0),
        }
    }

    /// Load a .wav file (integer PCM up to 32 bit, or 32-bit float)
    pub fn from_wav<P: AsRef<Path>>(path: P) -> MixResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MixError::FileError(format!("{}: {}", path.display(), e)))?;
        let buffer = Self::from_wav_reader(BufReader::new(file))?;

        log::info!(
            "Loaded '{}': {} Hz, {} channels, {:.2}s",
            path.display(),
            buffer.sample_rate,
            buffer.channels,
            buffer.duration_seconds()
        );
        Ok(buffer)
    }

    pub fn from_wav_reader<R: Read>(reader: R) -> MixResult<Self> {
        let reject = |e: hound::Error| MixError::DecodeRejected(e.to_string());

        let mut reader = WavReader::new(reader).map_err(reject)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(reject)?,
            SampleFormat::Int => {
                let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|r| r.map(|s| s as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(reject)?
            }
        };

        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_duration_from_frames() {
        let buffer = DecodedAudioBuffer::new(vec![0.0; 8000], 4000, 2);
        assert_eq!(buffer.frames(), 4000);
        assert_eq!(buffer.duration_seconds(), 1.0);
        assert!(buffer.is_playable());
    }

    #[test]
    fn test_unusable_buffers() {
        assert!(!DecodedAudioBuffer::mono(Vec::new(), 44100).is_playable());
        assert!(!DecodedAudioBuffer::new(vec![0.5; 16], 0, 1).is_playable());
        assert!(!DecodedAudioBuffer::new(vec![0.5; 16], 44100, 0).is_playable());
        assert_eq!(DecodedAudioBuffer::new(vec![0.5; 16], 0, 1).duration_seconds(), 0.0);
    }

    #[test]
    fn test_stereo_frame() {
        let stereo = DecodedAudioBuffer::new(vec![0.1, 0.2, 0.3, 0.4], 44100, 2);
        assert_eq!(stereo.stereo_frame(1), (0.3, 0.4));
        assert_eq!(stereo.stereo_frame(2), (0.0, 0.0));

        let mono = DecodedAudioBuffer::mono(vec![0.25, 0.5], 44100);
        assert_eq!(mono.stereo_frame(1), (0.5, 0.5));
    }

    #[test]
    fn test_read_int_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [0i16, 16384, -16384, i16::MAX] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.set_position(0);

        let buffer = DecodedAudioBuffer::from_wav_reader(cursor).unwrap();
        assert_eq!(buffer.sample_rate(), 8000);
        assert_eq!(buffer.frames(), 4);
        assert_eq!(buffer.samples()[1], 0.5);
        assert_eq!(buffer.samples()[2], -0.5);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = DecodedAudioBuffer::from_wav_reader(Cursor::new(b"not a wav".to_vec())).unwrap_err();
        assert!(matches!(err, MixError::DecodeRejected(_)));
    }
}
