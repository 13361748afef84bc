//! The mixing pass: one call per device buffer request.
//!
//! Order of work inside a pass:
//!
//! 1. the output is filled with silence and the music hook writes into it
//! 2. each unpaused channel has its expiry and fade timers applied, then is
//!    mixed in, wrapping through loop iterations as needed
//! 3. post effects, then the post-mix hook, run over the summed buffer
//!
//! Everything happens with the engine lock held and nothing allocates once
//! the scratch buffers have grown to the device's buffer size.

use std::mem;

use tracing::warn;

use crate::channel::Fading;
use crate::format::mix_audio;
use crate::state::MixerState;
use crate::MAX_VOLUME;

impl MixerState {
    /// Render one buffer of output into `out`.
    ///
    /// If the internal scratch buffer cannot grow to `out.len()`, the pass is
    /// skipped and `out` is left untouched.
    pub(crate) fn mix_into(&mut self, out: &mut [u8], master: u8) {
        let len = out.len();
        if self.scratch.len() < len {
            let extra = len - self.scratch.len();
            if self.scratch.try_reserve_exact(extra).is_err() {
                warn!(len, "unable to grow mix buffer, skipping pass");
                return;
            }
            self.scratch.resize(len, 0);
        }

        let spec = self.spec();
        let mut scratch = mem::take(&mut self.scratch);
        let stream = &mut scratch[..len];
        stream.fill(spec.format.silence());

        self.music.mix(stream, &spec);

        let now = self.now();
        let mut which = 0;
        // a finished callback may resize the registry mid-pass
        while which < self.channels.len() {
            self.advance_channel(which, now, master, stream);
            which += 1;
        }

        self.post_effects.apply(stream, &spec);
        self.post_mix.mix(stream, &spec);

        out.copy_from_slice(stream);
        self.scratch = scratch;
    }

    /// Apply timers to one channel and mix it if it is still playing.
    fn advance_channel(&mut self, which: usize, now: u64, master: u8, stream: &mut [u8]) {
        let channel = &mut self.channels[which];
        if channel.paused.is_some() {
            return;
        }

        if channel.expire.map_or(false, |expire| expire < now) {
            channel.stop();
            self.channel_done_playing(which);
            return;
        }

        if channel.fading != Fading::None {
            let elapsed = now.saturating_sub(channel.ticks_fade);
            if elapsed >= channel.fade_length {
                channel.volume = channel.fade_volume_reset;
                let fading_out = channel.fading == Fading::Out;
                channel.fading = Fading::None;
                if fading_out {
                    channel.stop();
                    self.channel_done_playing(which);
                    return;
                }
            } else {
                let base = channel.fade_volume as u64;
                let length = channel.fade_length;
                let volume = match channel.fading {
                    Fading::Out => base * (length - elapsed) / length,
                    _ => base * elapsed / length,
                };
                channel.volume = volume.min(MAX_VOLUME as u64) as u8;
            }
        }

        self.render_channel(which, master, stream);
    }

    /// Mix as much of one channel as fits, wrapping through loop iterations.
    fn render_channel(&mut self, which: usize, master: u8, stream: &mut [u8]) {
        let spec = self.spec();
        let len = stream.len();
        let mut gain = self.channels[which].gain(master);
        let mut index = 0;

        while index < len {
            let Some(channel) = self.channels.get_mut(which) else {
                return;
            };
            if channel.remaining == 0 {
                let can_wrap = channel.chunk.as_ref().map_or(false, |c| !c.is_empty());
                if channel.looping.is_active() && can_wrap {
                    channel.rewind();
                    continue;
                }
                break;
            }
            let Some(chunk) = channel.chunk.clone() else {
                break;
            };

            let mixable = channel.remaining.min(len - index);
            let start = channel.position;
            let source = &chunk.data()[start..start + mixable];
            let input: &[u8] = if channel.effects.is_empty() {
                source
            } else {
                self.effect_scratch.clear();
                self.effect_scratch.extend_from_slice(source);
                channel.effects.apply(&mut self.effect_scratch, &spec);
                &self.effect_scratch
            };
            mix_audio(&mut stream[index..index + mixable], input, spec.format, gain);

            channel.position += mixable;
            channel.remaining -= mixable;
            index += mixable;

            if channel.remaining == 0 && !channel.looping.is_active() {
                channel.stop();
                self.channel_done_playing(which);
                // the callback may have put something new on this channel
                match self.channels.get(which) {
                    Some(channel) => gain = channel.gain(master),
                    None => return,
                }
            }
        }

        // ended exactly on the buffer boundary with repeats left: wrap now so
        // the channel still reports as playing between passes
        if let Some(channel) = self.channels.get_mut(which) {
            if channel.remaining == 0 && channel.looping.is_active() && channel.chunk.is_some() {
                channel.rewind();
            }
        }
    }
}
