use tracing::trace;

use super::{ChunkDecoder, Decoded};
use crate::error::{MixerError, Result};
use crate::format::{AudioSpec, SampleFormat};

const FORMAT_PCM: u16 = 0x0001;
const FORMAT_FLOAT: u16 = 0x0003;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// RIFF/WAVE decoder for integer PCM (8, 16, 24 and 32 bit) and 32-bit float.
///
/// 24-bit samples are widened to 32-bit on the way out.
#[derive(Clone, Copy, Debug, Default)]
pub struct WavDecoder;

struct FmtChunk {
    tag: u16,
    channels: u16,
    freq: u32,
    bits: u16,
}

impl ChunkDecoder for WavDecoder {
    fn name(&self) -> &str {
        "WAVE"
    }

    fn decode(&self, data: &[u8]) -> Result<Decoded> {
        let mut pos = match data.get(..4) {
            Some(b"RIFF") if data.get(8..12) == Some(&b"WAVE"[..]) => 12,
            Some(b"WAVE") => 4,
            _ => return Err(MixerError::Decode("not a RIFF/WAVE file".into())),
        };

        let mut fmt = None;
        let mut samples = None;
        while pos + 8 <= data.len() {
            let id = &data[pos..pos + 4];
            let size = le_u32(&data[pos + 4..pos + 8]) as usize;
            let body = pos + 8;
            let end = body.saturating_add(size).min(data.len());
            trace!(id = %String::from_utf8_lossy(id), size, "wav sub-chunk");
            match id {
                b"fmt " => fmt = Some(parse_fmt(&data[body..end])?),
                b"data" => samples = Some(&data[body..end]),
                _ => {}
            }
            // sub-chunks are padded to even sizes
            pos = end + (size & 1);
        }

        let fmt = fmt.ok_or_else(|| MixerError::Decode("missing fmt chunk".into()))?;
        let samples = samples.ok_or_else(|| MixerError::Decode("missing data chunk".into()))?;

        let (format, data) = match (fmt.tag, fmt.bits) {
            (FORMAT_PCM, 8) => (SampleFormat::U8, samples.to_vec()),
            (FORMAT_PCM, 16) => (SampleFormat::S16LE, samples.to_vec()),
            (FORMAT_PCM, 24) => (SampleFormat::S32LE, widen_24(samples)),
            (FORMAT_PCM, 32) => (SampleFormat::S32LE, samples.to_vec()),
            (FORMAT_FLOAT, 32) => (SampleFormat::F32LE, samples.to_vec()),
            (tag, bits) => {
                return Err(MixerError::UnsupportedFormat(format!(
                    "WAV format tag {tag:#06x} with {bits} bits per sample"
                )))
            }
        };

        Ok(Decoded {
            spec: AudioSpec::new(format, fmt.channels, fmt.freq),
            data,
        })
    }
}

fn parse_fmt(body: &[u8]) -> Result<FmtChunk> {
    if body.len() < 16 {
        return Err(MixerError::Decode("fmt chunk too short".into()));
    }
    let mut tag = le_u16(&body[0..2]);
    if tag == FORMAT_EXTENSIBLE {
        // the real tag leads the sub-format GUID
        tag = body
            .get(24..26)
            .map(le_u16)
            .ok_or_else(|| MixerError::Decode("truncated WAVE_FORMAT_EXTENSIBLE".into()))?;
    }
    let channels = le_u16(&body[2..4]);
    if channels == 0 {
        return Err(MixerError::Decode("zero channels".into()));
    }
    Ok(FmtChunk {
        tag,
        channels,
        freq: le_u32(&body[4..8]),
        bits: le_u16(&body[14..16]),
    })
}

fn widen_24(samples: &[u8]) -> Vec<u8> {
    samples
        .chunks_exact(3)
        .flat_map(|s| [0, s[0], s[1], s[2]])
        .collect()
}

#[inline]
fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

#[inline]
fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}
