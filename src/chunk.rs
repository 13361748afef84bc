//! Decoded sample buffers ("chunks").

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{MixerError, Result};
use crate::format::AudioSpec;
use crate::MAX_VOLUME;

/// A fully decoded PCM buffer in the mixer's output format.
///
/// The sample data never changes after construction, so any number of
/// channels can play the same chunk at once through an `Arc<Chunk>`. Only the
/// chunk volume is mutable, and it is atomic so it can be changed while the
/// chunk is playing.
///
/// The buffer length is always a whole number of frames for the spec it was
/// built against; constructors truncate a trailing partial frame.
pub struct Chunk {
    data: Box<[u8]>,
    volume: AtomicU8,
}

impl Chunk {
    /// Wrap raw samples already in the format described by `spec`.
    ///
    /// A trailing partial frame is dropped.
    pub fn from_pcm(mut data: Vec<u8>, spec: &AudioSpec) -> Arc<Chunk> {
        let aligned = spec.align_to_frame(data.len());
        data.truncate(aligned);
        Arc::new(Self {
            data: data.into_boxed_slice(),
            volume: AtomicU8::new(MAX_VOLUME),
        })
    }

    /// Lift the `data` sub-chunk out of an in-memory WAV file without decoding it.
    ///
    /// The samples must already be in the mixer's format; no header fields
    /// are checked. Use [`ChunkLoader`](crate::load::ChunkLoader) for anything
    /// that may need conversion.
    pub fn from_wav_bytes(mem: &[u8], spec: &AudioSpec) -> Result<Arc<Chunk>> {
        // RIFF header is 12 bytes, then a sequence of (id, le32 size, payload)
        let mut pos = 12;
        while pos + 8 <= mem.len() {
            let id = &mem[pos..pos + 4];
            let size = u32::from_le_bytes([mem[pos + 4], mem[pos + 5], mem[pos + 6], mem[pos + 7]]) as usize;
            pos += 8;
            let end = pos.saturating_add(size).min(mem.len());
            if id == b"data" {
                return Ok(Self::from_pcm(mem[pos..end].to_vec(), spec));
            }
            pos = end;
        }
        Err(MixerError::Decode("no data chunk in WAV buffer".into()))
    }

    /// The raw sample bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Set the chunk volume, clamped to [`MAX_VOLUME`]. Returns the previous value.
    ///
    /// `None` only queries.
    pub fn set_volume(&self, volume: Option<u8>) -> u8 {
        match volume {
            Some(v) => self.volume.swap(v.min(MAX_VOLUME), Ordering::Relaxed),
            None => self.volume(),
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.data.len())
            .field("volume", &self.volume())
            .finish()
    }
}
