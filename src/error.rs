//! Error types shared by every mixer operation.

use thiserror::Error;

use crate::effect::EffectId;

/// Everything that can go wrong when talking to the mixer.
///
/// Caller errors (bad channel, bad chunk, unknown effect) leave the engine
/// untouched. Nothing here is ever raised from inside the mixing pass; that
/// path degrades by skipping work instead.
#[derive(Debug, Error)]
pub enum MixerError {
    /// The engine has not been opened (or was closed).
    #[error("audio device hasn't been opened")]
    NotOpen,

    /// A channel index past the end of the registry.
    #[error("invalid channel number {0}")]
    InvalidChannel(usize),

    /// Chunk length is empty or not a whole number of frames.
    #[error("tried to play a chunk with a bad frame ({len} bytes, frame is {frame} bytes)")]
    BadFrame {
        /// Length of the chunk buffer in bytes.
        len: usize,
        /// Frame width of the open device in bytes.
        frame: usize,
    },

    /// Automatic assignment found no inert channel above the reserved range.
    #[error("no free channels available")]
    NoFreeChannel,

    /// Unregistering an effect that isn't in the chain.
    #[error("no such effect registered: {0:?}")]
    NoSuchEffect(EffectId),

    /// Growing the channel registry failed; the old registry is intact.
    #[error("channel allocation failed ({0} channels requested)")]
    ChannelAllocation(usize),

    /// The output backend refused to open or start.
    #[error("audio device error: {0}")]
    Device(String),

    /// A format that can't be represented or converted.
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// No decoder recognised the data.
    #[error("unrecognized audio format")]
    UnrecognizedFormat,

    /// A decoder ran but produced nothing.
    #[error("no audio data")]
    NoAudioData,

    /// A decoder failed part way.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MixerError>;
