//! klangmix - multichannel sample mixer
//!
//! Design principles:
//! - Chunks are decoded once, up front, into the device's native format
//! - A fixed, resizable set of channels plays chunks with loops, fades and expiry
//! - One lock guards the engine; the device pull mixes everything in one pass
//! - Effects are per-channel or post-mix chains over raw device-format bytes
//! - The output device is a trait; cpal is one implementation of it
//!
//! ```
//! use klangmix::{Loops, ManualBackend, Mixer};
//!
//! let mixer = Mixer::new();
//! let backend = ManualBackend::new();
//! let output = backend.handle();
//! mixer.open(backend, None).unwrap();
//!
//! // two frames of 16-bit stereo, played three times in total
//! let chunk = mixer.quick_load_raw(vec![0, 1, 0, 1, 0, 2, 0, 2]).unwrap();
//! mixer.play_channel(None, &chunk, Loops::Times(2), None).unwrap();
//!
//! let mixed = output.pull(64).unwrap();
//! assert_eq!(mixed.len(), 64);
//! ```
//!
//! With the `cpal_sink` feature, `CpalBackend` plays through a real device.

mod backend;
mod channel;
mod chunk;
mod clock;
#[cfg(feature = "cpal_sink")]
mod device;
mod effect;
mod error;
mod format;
mod hooks;
pub mod load;
mod mix;
mod mixer;
mod state;

/// Loudest volume for channels, chunks and the master stage.
pub const MAX_VOLUME: u8 = 128;

/// Channels a freshly opened mixer starts with.
pub const DEFAULT_MIX_CHANNELS: usize = 8;

pub use backend::{ManualBackend, ManualPull, OutputBackend, PullCallback};
pub use channel::{Fading, Loops, Target, NO_GROUP};
pub use chunk::Chunk;
pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "cpal_sink")]
pub use device::{CpalBackend, CpalDevice};
pub use effect::{Effect, EffectFn, EffectId, EffectTarget};
pub use error::{MixerError, Result};
pub use format::{mix_audio, AudioSpec, SampleFormat, DEFAULT_CHANNELS, DEFAULT_FREQUENCY};
pub use hooks::{ChannelFinished, MixHook, NoHook};
pub use load::{ChunkDecoder, ChunkLoader, Decoded, FormatConverter, StreamDecoder, StreamDecoderFactory};
pub use mixer::{Mixer, MixerBuilder, MixerGuard};
pub use state::MixerState;
