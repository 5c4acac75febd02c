use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MixError {
    /// The buffer handed to the engine cannot be played (no samples, zero duration).
    #[error("Decode Rejected: {0}")]
    DecodeRejected(String),

    /// `play()` on a channel whose buffer is unusable.
    #[error("Invalid Track: {0}")]
    InvalidTrack(String),

    #[error("Audio Error: {0}")]
    AudioError(String),

    #[error("File Error: {0}")]
    FileError(String),
}

pub type MixResult<T> = Result<T, MixError>;
