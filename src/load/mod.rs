//! Turning encoded audio into [`Chunk`]s.
//!
//! A [`ChunkLoader`] sniffs the first four bytes of its input. Container
//! decoders ([`ChunkDecoder`]) are used only on an exact magic match;
//! everything else falls through to the streaming decoders
//! ([`StreamDecoderFactory`]), which are drained in fixed-size fragments until
//! they stop. The decoded audio is then converted to the mixer's format.

mod convert;
#[cfg(feature = "vorbis_src")]
mod vorbis;
mod wav;

use std::io::Read;
use std::sync::Arc;

use hashbrown::HashMap;
use tracing::{debug, trace};

use crate::chunk::Chunk;
use crate::error::{MixerError, Result};
use crate::format::AudioSpec;

pub use convert::{FormatConverter, LinearConverter};
#[cfg(feature = "vorbis_src")]
pub use vorbis::VorbisDecoder;
pub use wav::WavDecoder;

/// Frames per fragment when draining a streaming decoder.
pub const DEFAULT_FRAGMENT_FRAMES: usize = 4096;

/// PCM produced by a decoder, in the decoder's own format.
#[derive(Clone, Debug)]
pub struct Decoded {
    pub spec: AudioSpec,
    pub data: Vec<u8>,
}

/// Decodes a whole container in one go.
pub trait ChunkDecoder: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn decode(&self, data: &[u8]) -> Result<Decoded>;
}

/// A decoder that hands out PCM a piece at a time.
pub trait StreamDecoder {
    /// Format of the bytes `read` produces.
    fn spec(&self) -> AudioSpec;

    /// Fill as much of `buf` as possible. Zero means the stream is done.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// False once the decoder has stopped on its own.
    fn is_playing(&self) -> bool {
        true
    }
}

/// Recognises data a [`StreamDecoder`] can handle.
pub trait StreamDecoderFactory: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// `None` if the data isn't in this factory's format.
    fn open(&self, data: &[u8]) -> Option<Box<dyn StreamDecoder>>;
}

/// Decoder registry plus the conversion step.
///
/// # Example
///
/// ```
/// use klangmix::{AudioSpec, ChunkLoader, SampleFormat};
///
/// let loader = ChunkLoader::default().with_fragment_frames(1024);
/// let spec = AudioSpec::new(SampleFormat::S16LE, 2, 44100);
///
/// // not audio
/// assert!(loader.load(&b"hello world"[..], &spec).is_err());
/// ```
pub struct ChunkLoader {
    decoders: HashMap<[u8; 4], Arc<dyn ChunkDecoder>>,
    streams: Vec<Arc<dyn StreamDecoderFactory>>,
    converter: Box<dyn FormatConverter>,
    fragment_frames: usize,
}

impl Default for ChunkLoader {
    fn default() -> Self {
        let wav: Arc<dyn ChunkDecoder> = Arc::new(WavDecoder);
        let loader = Self::empty()
            .with_decoder(*b"RIFF", Arc::clone(&wav))
            .with_decoder(*b"WAVE", wav);

        #[cfg(feature = "vorbis_src")]
        let loader = loader.with_stream_decoder(Arc::new(VorbisDecoder));

        loader
    }
}

impl ChunkLoader {
    /// A loader with no decoders at all.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
            streams: Vec::new(),
            converter: Box::new(LinearConverter),
            fragment_frames: DEFAULT_FRAGMENT_FRAMES,
        }
    }

    /// Use `decoder` for data starting with `magic`, replacing any previous one.
    pub fn with_decoder(mut self, magic: [u8; 4], decoder: Arc<dyn ChunkDecoder>) -> Self {
        self.decoders.insert(magic, decoder);
        self
    }

    /// Add a fallback streaming decoder. They're tried in the order added.
    pub fn with_stream_decoder(mut self, factory: Arc<dyn StreamDecoderFactory>) -> Self {
        self.streams.push(factory);
        self
    }

    pub fn with_converter<C: FormatConverter>(mut self, converter: C) -> Self {
        self.converter = Box::new(converter);
        self
    }

    pub fn with_fragment_frames(mut self, frames: usize) -> Self {
        self.fragment_frames = frames.max(1);
        self
    }

    /// Decode everything `reader` yields and convert it to `target`.
    pub fn load<R: Read>(&self, mut reader: R, target: &AudioSpec) -> Result<Arc<Chunk>> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        if data.len() < 4 {
            return Err(MixerError::Decode("couldn't read magic".into()));
        }
        let magic = [data[0], data[1], data[2], data[3]];

        let decoded = match self.decoders.get(&magic) {
            Some(decoder) => {
                debug!(decoder = decoder.name(), "decoding container");
                decoder.decode(&data)?
            }
            None => self.decode_stream(&data)?,
        };
        if decoded.data.is_empty() {
            return Err(MixerError::NoAudioData);
        }

        let pcm = if decoded.spec == *target {
            decoded.data
        } else {
            debug!(from = ?decoded.spec, to = ?target, "converting");
            self.converter.convert(&decoded.spec, &decoded.data, target)?
        };
        let chunk = Chunk::from_pcm(pcm, target);
        if chunk.is_empty() {
            return Err(MixerError::NoAudioData);
        }
        Ok(chunk)
    }

    fn decode_stream(&self, data: &[u8]) -> Result<Decoded> {
        let (factory, mut stream) = self
            .streams
            .iter()
            .find_map(|factory| factory.open(data).map(|stream| (factory, stream)))
            .ok_or(MixerError::UnrecognizedFormat)?;
        debug!(decoder = factory.name(), "decoding stream");

        let spec = stream.spec();
        let fragment_len = self.fragment_frames * spec.frame_size();
        let mut fragments: Vec<Vec<u8>> = Vec::new();
        while stream.is_playing() {
            let mut fragment = vec![0; fragment_len];
            let count = stream.read(&mut fragment)?;
            if count == 0 {
                break;
            }
            fragment.truncate(count);
            trace!(bytes = count, "decoded fragment");
            fragments.push(fragment);
            if count < fragment_len {
                break;
            }
        }

        Ok(Decoded {
            spec,
            data: fragments.concat(),
        })
    }
}
