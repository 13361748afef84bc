//! Callbacks the mixing pass invokes: music source, post-mix and channel-finished.
//!
//! All of them run with the engine lock held. The default for every slot is
//! [`NoHook`], so the mixing pass never has to ask whether one is installed.

use crate::format::AudioSpec;
use crate::state::MixerState;

/// A stage that writes into the whole output buffer once per pass.
///
/// Installed as the music source (runs first, on silence, so music sits
/// behind every channel) or as the post-mix hook (runs last, after post
/// effects).
pub trait MixHook: Send + 'static {
    fn mix(&mut self, stream: &mut [u8], spec: &AudioSpec);
}

impl<F> MixHook for F
where
    F: FnMut(&mut [u8], &AudioSpec) + Send + 'static,
{
    #[inline]
    fn mix(&mut self, stream: &mut [u8], spec: &AudioSpec) {
        self(stream, spec)
    }
}

/// Told when a channel stops: natural end, halt, expiry, fade-out, or being
/// reassigned to a new chunk.
///
/// The callback receives the already-locked mixer state, so it may start new
/// playback (including on the same channel) without deadlocking. A channel
/// restarted from here keeps rendering in the same pass.
pub trait ChannelFinished: Send + 'static {
    fn channel_finished(&mut self, channel: usize, mixer: &mut MixerState);
}

impl<F> ChannelFinished for F
where
    F: FnMut(usize, &mut MixerState) + Send + 'static,
{
    #[inline]
    fn channel_finished(&mut self, channel: usize, mixer: &mut MixerState) {
        self(channel, mixer)
    }
}

/// The do-nothing hook.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHook;

impl MixHook for NoHook {
    #[inline]
    fn mix(&mut self, _stream: &mut [u8], _spec: &AudioSpec) {}
}

impl ChannelFinished for NoHook {
    #[inline]
    fn channel_finished(&mut self, _channel: usize, _mixer: &mut MixerState) {}
}
