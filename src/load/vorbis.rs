use std::io::Cursor;

use lewton::inside_ogg::OggStreamReader;
use tracing::debug;

use super::{StreamDecoder, StreamDecoderFactory};
use crate::error::{MixerError, Result};
use crate::format::{AudioSpec, SampleFormat};

/// Ogg Vorbis through lewton, decoded packet by packet to 16-bit PCM.
#[derive(Clone, Copy, Debug, Default)]
pub struct VorbisDecoder;

impl StreamDecoderFactory for VorbisDecoder {
    fn name(&self) -> &str {
        "OGG"
    }

    fn open(&self, data: &[u8]) -> Option<Box<dyn StreamDecoder>> {
        if !data.starts_with(b"OggS") {
            return None;
        }
        match OggStreamReader::new(Cursor::new(data.to_vec())) {
            Ok(reader) => Some(Box::new(VorbisStream {
                reader,
                pending: Vec::new(),
                offset: 0,
                finished: false,
            })),
            Err(err) => {
                debug!(%err, "not a vorbis stream");
                None
            }
        }
    }
}

struct VorbisStream {
    reader: OggStreamReader<Cursor<Vec<u8>>>,
    /// Decoded bytes not yet handed out.
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl VorbisStream {
    fn refill(&mut self) -> Result<()> {
        self.pending.clear();
        self.offset = 0;
        while self.pending.is_empty() {
            match self.reader.read_dec_packet_itl() {
                Ok(Some(samples)) => {
                    self.pending.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
                }
                Ok(None) => {
                    self.finished = true;
                    break;
                }
                Err(err) => return Err(MixerError::Decode(err.to_string())),
            }
        }
        Ok(())
    }
}

impl StreamDecoder for VorbisStream {
    fn spec(&self) -> AudioSpec {
        let ident = &self.reader.ident_hdr;
        AudioSpec::new(SampleFormat::S16LE, ident.audio_channels as u16, ident.audio_sample_rate)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            if self.offset == self.pending.len() {
                if self.finished {
                    break;
                }
                self.refill()?;
                continue;
            }
            let count = (self.pending.len() - self.offset).min(buf.len() - written);
            buf[written..written + count].copy_from_slice(&self.pending[self.offset..self.offset + count]);
            self.offset += count;
            written += count;
        }
        Ok(written)
    }

    fn is_playing(&self) -> bool {
        !self.finished || self.offset < self.pending.len()
    }
}
