//! Sample formats, device specs and the saturating sample mixer.
//!
//! Everything the engine renders is raw bytes in the device's native format.
//! This module is the only place that knows how those bytes map to samples.

use dasp_sample::Sample;

/// Default output rate when the caller doesn't request one.
pub const DEFAULT_FREQUENCY: u32 = 44100;

/// Default output channel count (stereo).
pub const DEFAULT_CHANNELS: u16 = 2;

/// PCM sample encodings the mixer can render into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit, silence at 0x80.
    U8,
    /// Signed 8-bit.
    S8,
    /// Signed 16-bit little endian.
    S16LE,
    /// Signed 16-bit big endian.
    S16BE,
    /// Signed 32-bit little endian.
    S32LE,
    /// Signed 32-bit big endian.
    S32BE,
    /// 32-bit float little endian, nominal range -1.0..=1.0.
    F32LE,
    /// 32-bit float big endian.
    F32BE,
}

impl SampleFormat {
    /// Width of one sample in bytes.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16LE | SampleFormat::S16BE => 2,
            SampleFormat::S32LE | SampleFormat::S32BE | SampleFormat::F32LE | SampleFormat::F32BE => 4,
        }
    }

    /// Width of one sample in bits.
    #[inline]
    pub fn bits(self) -> usize {
        self.bytes() * 8
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, SampleFormat::F32LE | SampleFormat::F32BE)
    }

    /// Byte value that fills a buffer with silence.
    #[inline]
    pub fn silence(self) -> u8 {
        match self {
            SampleFormat::U8 => 0x80,
            _ => 0,
        }
    }

    /// Decode one sample to a normalised f32.
    ///
    /// `bytes` must be exactly [`bytes`](Self::bytes) long.
    pub fn read_f32(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => bytes[0].to_sample::<f32>(),
            SampleFormat::S8 => (bytes[0] as i8).to_sample::<f32>(),
            SampleFormat::S16LE => i16::from_le_bytes(array(bytes)).to_sample::<f32>(),
            SampleFormat::S16BE => i16::from_be_bytes(array(bytes)).to_sample::<f32>(),
            SampleFormat::S32LE => i32::from_le_bytes(array(bytes)).to_sample::<f32>(),
            SampleFormat::S32BE => i32::from_be_bytes(array(bytes)).to_sample::<f32>(),
            SampleFormat::F32LE => f32::from_le_bytes(array(bytes)),
            SampleFormat::F32BE => f32::from_be_bytes(array(bytes)),
        }
    }

    /// Encode a normalised f32 into `out`, clamping to the format's range.
    pub fn write_f32(self, value: f32, out: &mut [u8]) {
        let value = value.clamp(-1.0, 1.0);
        match self {
            SampleFormat::U8 => out[0] = value.to_sample::<u8>(),
            SampleFormat::S8 => out[0] = value.to_sample::<i8>() as u8,
            SampleFormat::S16LE => out.copy_from_slice(&value.to_sample::<i16>().to_le_bytes()),
            SampleFormat::S16BE => out.copy_from_slice(&value.to_sample::<i16>().to_be_bytes()),
            SampleFormat::S32LE => out.copy_from_slice(&value.to_sample::<i32>().to_le_bytes()),
            SampleFormat::S32BE => out.copy_from_slice(&value.to_sample::<i32>().to_be_bytes()),
            SampleFormat::F32LE => out.copy_from_slice(&value.to_le_bytes()),
            SampleFormat::F32BE => out.copy_from_slice(&value.to_be_bytes()),
        }
    }
}

/// The negotiated output format: encoding, channel count and rate.
///
/// Fixed for as long as the mixer stays open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioSpec {
    pub format: SampleFormat,
    pub channels: u16,
    /// Sample rate in Hz.
    pub freq: u32,
}

impl AudioSpec {
    pub fn new(format: SampleFormat, channels: u16, freq: u32) -> Self {
        Self {
            format,
            channels: channels.max(1),
            freq,
        }
    }

    /// Bytes per frame (one sample for every output channel).
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.format.bytes() * self.channels as usize
    }

    /// Whether a nested open with `other` can share the current device.
    ///
    /// Only encoding and channel count matter; the rate is the device's call.
    #[inline]
    pub fn is_compatible(&self, other: &AudioSpec) -> bool {
        self.format == other.format && self.channels == other.channels
    }

    /// False for zero channels or a zero rate; the mixer won't open on those.
    #[inline]
    pub fn is_playable(&self) -> bool {
        self.channels > 0 && self.freq > 0
    }

    /// Round `len` down to a whole number of frames. Zero for a zero-width frame.
    #[inline]
    pub fn align_to_frame(&self, len: usize) -> usize {
        match len.checked_rem(self.frame_size()) {
            Some(partial) => len - partial,
            None => 0,
        }
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::new(SampleFormat::S16LE, DEFAULT_CHANNELS, DEFAULT_FREQUENCY)
    }
}

#[inline]
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Add `src` into `dst` scaled by `gain`, saturating at the format's limits.
///
/// Both slices are raw bytes in `format`; only the overlapping whole samples
/// are touched. A gain of zero leaves `dst` alone.
pub fn mix_audio(dst: &mut [u8], src: &[u8], format: SampleFormat, gain: f32) {
    if gain <= 0.0 {
        return;
    }

    match format {
        SampleFormat::U8 => mix_int::<1>(
            dst,
            src,
            gain,
            |b| b[0] as i64 - 128,
            |v| [(v + 128) as u8],
            -128,
            127,
        ),
        SampleFormat::S8 => mix_int::<1>(
            dst,
            src,
            gain,
            |b| b[0] as i8 as i64,
            |v| [v as i8 as u8],
            -128,
            127,
        ),
        SampleFormat::S16LE => mix_int::<2>(
            dst,
            src,
            gain,
            |b| i16::from_le_bytes(b) as i64,
            |v| (v as i16).to_le_bytes(),
            i16::MIN as i64,
            i16::MAX as i64,
        ),
        SampleFormat::S16BE => mix_int::<2>(
            dst,
            src,
            gain,
            |b| i16::from_be_bytes(b) as i64,
            |v| (v as i16).to_be_bytes(),
            i16::MIN as i64,
            i16::MAX as i64,
        ),
        SampleFormat::S32LE => mix_int::<4>(
            dst,
            src,
            gain,
            |b| i32::from_le_bytes(b) as i64,
            |v| (v as i32).to_le_bytes(),
            i32::MIN as i64,
            i32::MAX as i64,
        ),
        SampleFormat::S32BE => mix_int::<4>(
            dst,
            src,
            gain,
            |b| i32::from_be_bytes(b) as i64,
            |v| (v as i32).to_be_bytes(),
            i32::MIN as i64,
            i32::MAX as i64,
        ),
        SampleFormat::F32LE => mix_float(dst, src, gain, f32::from_le_bytes, f32::to_le_bytes),
        SampleFormat::F32BE => mix_float(dst, src, gain, f32::from_be_bytes, f32::to_be_bytes),
    }
}

fn mix_int<const N: usize>(
    dst: &mut [u8],
    src: &[u8],
    gain: f32,
    read: impl Fn([u8; N]) -> i64,
    write: impl Fn(i64) -> [u8; N],
    min: i64,
    max: i64,
) {
    let gain = gain as f64;
    for (d, s) in dst.chunks_exact_mut(N).zip(src.chunks_exact(N)) {
        let scaled = (read(array(s)) as f64 * gain) as i64;
        let mixed = (read(array(d)) + scaled).clamp(min, max);
        d.copy_from_slice(&write(mixed));
    }
}

fn mix_float(
    dst: &mut [u8],
    src: &[u8],
    gain: f32,
    read: fn([u8; 4]) -> f32,
    write: fn(f32) -> [u8; 4],
) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let mixed = (read(array(d)) + read(array(s)) * gain).clamp(-1.0, 1.0);
        d.copy_from_slice(&write(mixed));
    }
}
