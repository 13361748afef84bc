//! The lock-protected heart of the mixer.
//!
//! [`MixerState`] is everything the engine mutex guards: the channel registry,
//! the effect chains, the hooks and the scratch buffers. Every method here
//! assumes the lock is already held, which is what makes it safe to use from
//! inside a [`ChannelFinished`] callback or through a
//! [`MixerGuard`](crate::MixerGuard) without re-locking.

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::channel::{Channel, Fading, Loops, Target, NO_GROUP};
use crate::chunk::Chunk;
use crate::clock::Clock;
use crate::effect::{Effect, EffectChain, EffectId, EffectTarget};
use crate::error::{MixerError, Result};
use crate::format::AudioSpec;
use crate::hooks::{ChannelFinished, MixHook, NoHook};
use crate::MAX_VOLUME;

/// Channel registry, effect chains and hooks of an open mixer.
pub struct MixerState {
    spec: AudioSpec,
    clock: Arc<dyn Clock>,
    pub(crate) channels: Vec<Channel>,
    reserved: usize,
    pub(crate) post_effects: EffectChain,
    next_effect_id: u64,
    pub(crate) music: Box<dyn MixHook>,
    pub(crate) post_mix: Box<dyn MixHook>,
    finished: Box<dyn ChannelFinished>,
    /// Bumped whenever the finished callback is replaced.
    finished_generation: u64,
    pub(crate) scratch: Vec<u8>,
    pub(crate) effect_scratch: Vec<u8>,
}

impl MixerState {
    pub(crate) fn new(spec: AudioSpec, clock: Arc<dyn Clock>, channels: usize) -> Self {
        Self {
            spec,
            clock,
            channels: (0..channels).map(Channel::new).collect(),
            reserved: 0,
            post_effects: EffectChain::new(EffectTarget::Post),
            next_effect_id: 0,
            music: Box::new(NoHook),
            post_mix: Box::new(NoHook),
            finished: Box::new(NoHook),
            finished_generation: 0,
            scratch: Vec::new(),
            effect_scratch: Vec::new(),
        }
    }

    /// The negotiated device format.
    #[inline]
    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub(crate) fn now(&self) -> u64 {
        self.clock.ticks()
    }

    // ---- registry ----

    /// Grow or shrink the registry to `count` channels.
    ///
    /// Channels cut off by a shrink release their effects and are halted
    /// (firing the finished callback) before they are dropped. Returns the
    /// resulting channel count, which is unchanged if growing failed.
    pub fn allocate_channels(&mut self, count: usize) -> usize {
        let current = self.channels.len();
        if count < current {
            for which in count..current {
                if let Some(channel) = self.channels.get_mut(which) {
                    channel.effects.clear();
                }
                if which < self.channels.len() {
                    self.halt_one(which);
                }
            }
            self.channels.truncate(count);
        } else if count > current {
            if self.channels.try_reserve_exact(count - current).is_err() {
                error!(requested = count, "{}", MixerError::ChannelAllocation(count));
                return current;
            }
            self.channels.extend((current..count).map(Channel::new));
        }
        self.reserved = self.reserved.min(self.channels.len());
        debug!(channels = self.channels.len(), "allocated channels");
        self.channels.len()
    }

    /// Keep channels `0..count` out of automatic assignment.
    ///
    /// Clamped to the registry size; returns the number actually reserved.
    pub fn reserve_channels(&mut self, count: usize) -> usize {
        self.reserved = count.min(self.channels.len());
        self.reserved
    }

    // ---- playback ----

    /// Start `chunk` on `which` (or the first free unreserved channel for `None`).
    ///
    /// `limit` caps the playing time; `None` or zero plays to the end. If the
    /// channel was busy, its previous sound is finished first, exactly as if it
    /// had ended on its own.
    pub fn play_channel(
        &mut self,
        which: Option<usize>,
        chunk: &Arc<Chunk>,
        loops: Loops,
        limit: Option<Duration>,
    ) -> Result<usize> {
        self.check_chunk(chunk)?;
        let which = self.claim_channel(which)?;
        let now = self.now();
        self.channels[which].bind(Arc::clone(chunk), loops, now, deadline(now, limit));
        Ok(which)
    }

    /// Like [`play_channel`](Self::play_channel), ramping the volume up from
    /// silence to the channel's current volume over `fade`.
    pub fn fade_in_channel(
        &mut self,
        which: Option<usize>,
        chunk: &Arc<Chunk>,
        loops: Loops,
        fade: Duration,
        limit: Option<Duration>,
    ) -> Result<usize> {
        self.check_chunk(chunk)?;
        let which = self.claim_channel(which)?;
        let now = self.now();

        let channel = &mut self.channels[which];
        let was_fading = channel.fading != Fading::None;
        channel.bind(Arc::clone(chunk), loops, now, deadline(now, limit));
        if !was_fading {
            channel.fade_volume_reset = channel.volume;
        }
        channel.fading = Fading::In;
        channel.fade_volume = channel.volume;
        channel.volume = 0;
        channel.fade_length = duration_ms(fade);
        channel.ticks_fade = now;
        Ok(which)
    }

    fn check_chunk(&self, chunk: &Chunk) -> Result<()> {
        let frame = self.spec.frame_size();
        if chunk.is_empty() || self.spec.align_to_frame(chunk.len()) != chunk.len() {
            debug!(len = chunk.len(), frame, "rejecting chunk");
            return Err(MixerError::BadFrame { len: chunk.len(), frame });
        }
        Ok(())
    }

    fn claim_channel(&mut self, which: Option<usize>) -> Result<usize> {
        match which {
            None => (self.reserved..self.channels.len())
                .find(|&i| !self.channels[i].is_playing())
                .ok_or(MixerError::NoFreeChannel),
            Some(i) if i >= self.channels.len() => Err(MixerError::InvalidChannel(i)),
            Some(i) => {
                let channel = &mut self.channels[i];
                if channel.is_playing() {
                    channel.remaining = 0;
                    channel.looping = Loops::NONE;
                    self.channel_done_playing(i);
                }
                // the callback may have shrunk the registry
                if i >= self.channels.len() {
                    return Err(MixerError::InvalidChannel(i));
                }
                Ok(i)
            }
        }
    }

    /// Change when playing channels are cut off, counting from now. A paused
    /// channel counts from the moment it was paused.
    ///
    /// `None` or zero removes the limit. Returns how many channels were updated.
    pub fn expire_channel(&mut self, target: Target, limit: Option<Duration>) -> usize {
        let now = self.now();
        self.for_each_target(target, |channel| {
            // a paused channel's clock stopped when it was paused
            channel.expire = deadline(channel.paused.unwrap_or(now), limit);
            true
        })
    }

    /// Set a channel's volume, or every channel's with [`Target::All`].
    ///
    /// `None` only queries. Values clamp to [`MAX_VOLUME`]. Returns the
    /// previous volume; for `All`, the integer mean of the previous volumes.
    pub fn volume(&mut self, target: Target, volume: Option<u8>) -> u8 {
        match target {
            Target::All => {
                let count = self.channels.len();
                if count == 0 {
                    return 0;
                }
                let total: u32 = (0..count)
                    .map(|i| self.volume(Target::Channel(i), volume) as u32)
                    .sum();
                (total / count as u32) as u8
            }
            Target::Channel(i) => match self.channels.get_mut(i) {
                Some(channel) => {
                    let previous = channel.volume;
                    if let Some(v) = volume {
                        channel.volume = v.min(MAX_VOLUME);
                    }
                    previous
                }
                None => 0,
            },
        }
    }

    /// Stop playback immediately. Returns how many channels were playing.
    pub fn halt_channel(&mut self, target: Target) -> usize {
        match target {
            Target::All => (0..self.channels.len())
                .filter(|&i| i < self.channels.len() && self.halt_one(i))
                .count(),
            Target::Channel(i) if i < self.channels.len() => self.halt_one(i) as usize,
            Target::Channel(i) => {
                debug!(channel = i, "halt on invalid channel");
                0
            }
        }
    }

    /// Halt every channel tagged `tag`.
    pub fn halt_group(&mut self, tag: i32) -> usize {
        self.group_members(tag)
            .into_iter()
            .filter(|&i| i < self.channels.len() && self.halt_one(i))
            .count()
    }

    /// Halt every channel currently bound to `chunk`.
    pub(crate) fn halt_chunk(&mut self, chunk: &Arc<Chunk>) -> usize {
        let bound: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.chunk.as_ref().map_or(false, |b| Arc::ptr_eq(b, chunk)))
            .map(|(i, _)| i)
            .collect();
        let mut halted = 0;
        for i in bound {
            if i < self.channels.len() && self.halt_one(i) {
                halted += 1;
            }
            if let Some(channel) = self.channels.get_mut(i) {
                if channel.chunk.as_ref().map_or(false, |b| Arc::ptr_eq(b, chunk)) {
                    channel.chunk = None;
                }
            }
        }
        halted
    }

    fn halt_one(&mut self, which: usize) -> bool {
        let channel = &mut self.channels[which];
        let was_playing = channel.is_playing();
        if was_playing {
            channel.remaining = 0;
            channel.looping = Loops::NONE;
            self.channel_done_playing(which);
        }
        if let Some(channel) = self.channels.get_mut(which) {
            channel.expire = None;
            if channel.fading != Fading::None {
                channel.volume = channel.fade_volume_reset;
            }
            channel.fading = Fading::None;
        }
        was_playing
    }

    /// Ramp playing channels down to silence over `fade`, then halt them.
    ///
    /// A channel already fading restarts its ramp from where its volume is
    /// now. Silent or idle channels are skipped. Returns how many channels
    /// started fading.
    pub fn fade_out_channel(&mut self, target: Target, fade: Duration) -> usize {
        let now = self.now();
        let length = duration_ms(fade);
        self.for_each_target(target, |channel| fade_out(channel, now, length))
    }

    /// Fade out every channel tagged `tag`.
    pub fn fade_out_group(&mut self, tag: i32, fade: Duration) -> usize {
        let now = self.now();
        let length = duration_ms(fade);
        let mut fading = 0;
        for channel in self.channels.iter_mut().filter(|c| c.tag == tag) {
            fading += fade_out(channel, now, length) as usize;
        }
        fading
    }

    /// Fade state of one channel; [`Fading::None`] for bad indices.
    pub fn fading(&self, which: usize) -> Fading {
        self.channels.get(which).map_or(Fading::None, |c| c.fading)
    }

    /// How many of the targeted channels are playing (paused ones included).
    pub fn playing(&self, target: Target) -> usize {
        match target {
            Target::All => self.channels.iter().filter(|c| c.is_playing()).count(),
            Target::Channel(i) => self.channels.get(i).map_or(0, |c| c.is_playing() as usize),
        }
    }

    /// How many of the targeted channels are paused.
    pub fn paused(&self, target: Target) -> usize {
        match target {
            Target::All => self.channels.iter().filter(|c| c.is_paused()).count(),
            Target::Channel(i) => self.channels.get(i).map_or(0, |c| c.is_paused() as usize),
        }
    }

    /// The chunk most recently bound to a channel.
    pub fn chunk(&self, which: usize) -> Option<Arc<Chunk>> {
        self.channels.get(which).and_then(|c| c.chunk.clone())
    }

    /// Pause playing channels. Paused channels are skipped by the mixing pass
    /// and their expiry and fade timers stand still.
    pub fn pause(&mut self, target: Target) {
        let now = self.now();
        self.for_each_target(target, |channel| pause(channel, now));
    }

    pub fn pause_group(&mut self, tag: i32) {
        let now = self.now();
        for channel in self.channels.iter_mut().filter(|c| c.tag == tag) {
            pause(channel, now);
        }
    }

    /// Resume paused channels, pushing their timers back by the paused time.
    pub fn resume(&mut self, target: Target) {
        let now = self.now();
        self.for_each_target(target, |channel| resume(channel, now));
    }

    pub fn resume_group(&mut self, tag: i32) {
        let now = self.now();
        for channel in self.channels.iter_mut().filter(|c| c.tag == tag) {
            resume(channel, now);
        }
    }

    fn for_each_target(&mut self, target: Target, mut f: impl FnMut(&mut Channel) -> bool) -> usize {
        match target {
            Target::All => self.channels.iter_mut().map(|c| f(c)).filter(|&hit| hit).count(),
            Target::Channel(i) => match self.channels.get_mut(i) {
                Some(channel) => f(channel) as usize,
                None => {
                    debug!(channel = i, "ignoring invalid channel");
                    0
                }
            },
        }
    }

    // ---- groups ----

    /// Tag one channel. `NO_GROUP` ungroups it.
    pub fn group_channel(&mut self, which: usize, tag: i32) -> bool {
        match self.channels.get_mut(which) {
            Some(channel) => {
                channel.tag = tag;
                true
            }
            None => false,
        }
    }

    /// Tag channels `from..=to`. False if any index was out of range; the
    /// ones in range are still tagged.
    pub fn group_channels(&mut self, from: usize, to: usize, tag: i32) -> bool {
        let len = self.channels.len();
        let end = to.saturating_add(1).min(len);
        for channel in self.channels.iter_mut().take(end).skip(from) {
            channel.tag = tag;
        }
        from > to || to < len
    }

    fn group_members(&self, tag: i32) -> Vec<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.tag == tag)
            .map(|(i, _)| i)
            .collect()
    }

    /// First idle channel with `tag` (any tag for `NO_GROUP`).
    pub fn group_available(&self, tag: i32) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| in_group(c, tag) && !c.is_playing())
    }

    /// Channels tagged `tag`; the whole registry for `NO_GROUP`.
    pub fn group_count(&self, tag: i32) -> usize {
        if tag == NO_GROUP {
            return self.channels.len();
        }
        self.channels.iter().filter(|c| c.tag == tag).count()
    }

    /// The playing channel in `tag` that started first. Ties go to the lowest index.
    pub fn group_oldest(&self, tag: i32) -> Option<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| in_group(c, tag) && c.is_playing())
            .min_by_key(|(_, c)| c.start_time)
            .map(|(i, _)| i)
    }

    /// The playing channel in `tag` that started last. Ties go to the highest index.
    pub fn group_newest(&self, tag: i32) -> Option<usize> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| in_group(c, tag) && c.is_playing())
            .max_by_key(|(_, c)| c.start_time)
            .map(|(i, _)| i)
    }

    // ---- effects ----

    /// Append an effect to a channel's chain or to the post-mix chain.
    pub fn register_effect<E: Effect>(&mut self, target: EffectTarget, effect: E) -> Result<EffectId> {
        self.register_effect_boxed(target, Box::new(effect))
    }

    pub fn register_effect_boxed(&mut self, target: EffectTarget, effect: Box<dyn Effect>) -> Result<EffectId> {
        let id = EffectId(self.next_effect_id);
        self.chain_mut(target)?.push(id, effect);
        self.next_effect_id += 1;
        Ok(id)
    }

    /// Remove one effect, running its release hook.
    pub fn unregister_effect(&mut self, target: EffectTarget, id: EffectId) -> Result<()> {
        self.chain_mut(target)?.remove(id)
    }

    /// Remove every effect on `target`, releasing them in registration order.
    pub fn unregister_all_effects(&mut self, target: EffectTarget) -> Result<()> {
        self.chain_mut(target)?.clear();
        Ok(())
    }

    /// Number of effects attached to `target`.
    pub fn effect_count(&self, target: EffectTarget) -> usize {
        match target {
            EffectTarget::Post => self.post_effects.len(),
            EffectTarget::Channel(i) => self.channels.get(i).map_or(0, |c| c.effects.len()),
        }
    }

    fn chain_mut(&mut self, target: EffectTarget) -> Result<&mut EffectChain> {
        match target {
            EffectTarget::Post => Ok(&mut self.post_effects),
            EffectTarget::Channel(i) => self
                .channels
                .get_mut(i)
                .map(|c| &mut c.effects)
                .ok_or(MixerError::InvalidChannel(i)),
        }
    }

    // ---- hooks ----

    /// Run `hook` over the output after all channels and post effects.
    pub fn set_post_mix<H: MixHook>(&mut self, hook: H) {
        self.post_mix = Box::new(hook);
    }

    pub fn clear_post_mix(&mut self) {
        self.post_mix = Box::new(NoHook);
    }

    /// Replace the music source, which mixes into silence before any channel.
    pub fn hook_music<H: MixHook>(&mut self, hook: H) {
        self.music = Box::new(hook);
    }

    pub fn unhook_music(&mut self) {
        self.music = Box::new(NoHook);
    }

    pub fn set_channel_finished<C: ChannelFinished>(&mut self, callback: C) {
        self.finished = Box::new(callback);
        self.finished_generation += 1;
    }

    pub fn clear_channel_finished(&mut self) {
        self.finished = Box::new(NoHook);
        self.finished_generation += 1;
    }

    /// A channel's playback ended: release its effects, then tell the callback.
    ///
    /// The callback is lifted out of `self` while it runs so it can be handed
    /// the state mutably. If it installs a replacement, the replacement wins.
    pub(crate) fn channel_done_playing(&mut self, which: usize) {
        if let Some(channel) = self.channels.get_mut(which) {
            channel.effects.clear();
        }
        let generation = self.finished_generation;
        let mut finished = mem::replace(&mut self.finished, Box::new(NoHook));
        finished.channel_finished(which, self);
        if self.finished_generation == generation {
            self.finished = finished;
        }
    }

    /// Tear everything down ahead of close.
    pub(crate) fn shutdown(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.effects.clear();
        }
        self.post_effects.clear();
        self.halt_channel(Target::All);
    }
}

fn in_group(channel: &Channel, tag: i32) -> bool {
    tag == NO_GROUP || channel.tag == tag
}

fn fade_out(channel: &mut Channel, now: u64, length: u64) -> bool {
    if !channel.is_playing() || channel.volume == 0 {
        return false;
    }
    if channel.fading == Fading::None {
        channel.fade_volume_reset = channel.volume;
    }
    channel.fade_volume = channel.volume;
    channel.fade_length = length;
    channel.ticks_fade = channel.paused.unwrap_or(now);
    channel.fading = Fading::Out;
    true
}

fn pause(channel: &mut Channel, now: u64) -> bool {
    if channel.is_playing() && channel.paused.is_none() {
        channel.paused = Some(now);
        return true;
    }
    false
}

fn resume(channel: &mut Channel, now: u64) -> bool {
    if !channel.is_playing() {
        return false;
    }
    match channel.paused.take() {
        Some(since) => {
            let stood_still = now.saturating_sub(since);
            if let Some(expire) = channel.expire.as_mut() {
                *expire += stood_still;
            }
            if channel.fading != Fading::None {
                channel.ticks_fade += stood_still;
            }
            true
        }
        None => false,
    }
}

#[inline]
fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}

/// Absolute expiry tick for a play limit; `None` or zero means no limit.
#[inline]
fn deadline(now: u64, limit: Option<Duration>) -> Option<u64> {
    limit
        .map(duration_ms)
        .filter(|&ms| ms > 0)
        .map(|ms| now.saturating_add(ms))
}
