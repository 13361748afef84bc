//! Sample format, channel layout and rate conversion.

use dasp_interpolate::linear::Linear;
use dasp_signal::Signal;

use crate::error::{MixerError, Result};
use crate::format::AudioSpec;

/// Rewrites PCM from one spec into another.
pub trait FormatConverter: Send + Sync + 'static {
    fn convert(&self, src: &AudioSpec, data: &[u8], dst: &AudioSpec) -> Result<Vec<u8>>;
}

/// Linear-interpolating converter.
///
/// Channels are remapped first: a mono target gets the average of every
/// source channel; otherwise each target channel copies the source channel at
/// the same position, repeating the last one when the target is wider.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearConverter;

impl FormatConverter for LinearConverter {
    fn convert(&self, src: &AudioSpec, data: &[u8], dst: &AudioSpec) -> Result<Vec<u8>> {
        if !src.is_playable() || !dst.is_playable() {
            return Err(MixerError::UnsupportedFormat(format!("{src:?} -> {dst:?}")));
        }

        let planes = remap(&deinterleave(src, data), dst.channels as usize);
        let frames_in = planes.first().map_or(0, Vec::len);
        let frames_out = if src.freq == dst.freq {
            frames_in
        } else {
            (frames_in as u64 * dst.freq as u64 / src.freq as u64) as usize
        };
        let planes: Vec<Vec<f32>> = planes
            .into_iter()
            .map(|plane| resample(plane, src.freq, dst.freq, frames_out))
            .collect();

        let width = dst.format.bytes();
        let mut out = vec![0u8; frames_out * dst.frame_size()];
        for (frame, bytes) in out.chunks_exact_mut(dst.frame_size()).enumerate() {
            for (plane, sample) in planes.iter().zip(bytes.chunks_exact_mut(width)) {
                dst.format.write_f32(plane[frame], sample);
            }
        }
        Ok(out)
    }
}

fn deinterleave(spec: &AudioSpec, data: &[u8]) -> Vec<Vec<f32>> {
    let channels = spec.channels as usize;
    let width = spec.format.bytes();
    let frames = data.len() / spec.frame_size();
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in data.chunks_exact(spec.frame_size()) {
        for (plane, sample) in planes.iter_mut().zip(frame.chunks_exact(width)) {
            plane.push(spec.format.read_f32(sample));
        }
    }
    planes
}

fn remap(planes: &[Vec<f32>], channels: usize) -> Vec<Vec<f32>> {
    if planes.len() == channels {
        return planes.to_vec();
    }
    if channels == 1 {
        let frames = planes.first().map_or(0, Vec::len);
        let scale = 1.0 / planes.len() as f32;
        let mixed = (0..frames)
            .map(|i| planes.iter().map(|p| p[i]).sum::<f32>() * scale)
            .collect();
        return vec![mixed];
    }
    let last = planes.len().saturating_sub(1);
    (0..channels).map(|ch| planes[ch.min(last)].clone()).collect()
}

fn resample(plane: Vec<f32>, from_hz: u32, to_hz: u32, frames_out: usize) -> Vec<f32> {
    if from_hz == to_hz {
        return plane;
    }
    let mut source = dasp_signal::from_iter(plane);
    let interp = Linear::new(source.next(), source.next());
    source
        .from_hz_to_hz(interp, from_hz as f64, to_hz as f64)
        .take(frames_out)
        .collect()
}
