//! One playback slot and the small types used to address and drive it.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::effect::{EffectChain, EffectTarget};
use crate::MAX_VOLUME;

/// Tag carried by channels that belong to no group.
///
/// Group queries also accept it as "any tag".
pub const NO_GROUP: i32 = -1;

/// Addresses one channel or every channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    All,
    Channel(usize),
}

impl From<usize> for Target {
    fn from(channel: usize) -> Self {
        Target::Channel(channel)
    }
}

/// How many extra times a chunk repeats after the first pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Loops {
    Infinite,
    Times(u32),
}

impl Loops {
    /// Play once, no repeats.
    pub const NONE: Loops = Loops::Times(0);

    #[inline]
    pub fn is_active(self) -> bool {
        self != Loops::NONE
    }

    /// Use up one repeat. Infinite stays infinite.
    #[inline]
    pub(crate) fn consume(&mut self) {
        if let Loops::Times(n) = self {
            *n = n.saturating_sub(1);
        }
    }
}

impl Default for Loops {
    fn default() -> Self {
        Loops::NONE
    }
}

/// Current fade ramp of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Fading {
    #[default]
    None,
    In,
    Out,
}

pub(crate) struct Channel {
    pub chunk: Option<Arc<Chunk>>,
    /// Cursor into the chunk buffer.
    pub position: usize,
    /// Bytes left before the end of the current pass.
    pub remaining: usize,
    pub looping: Loops,
    pub volume: u8,
    pub tag: i32,
    pub expire: Option<u64>,
    pub start_time: u64,
    pub paused: Option<u64>,
    pub fading: Fading,
    /// Volume the ramp is computed from.
    pub fade_volume: u8,
    /// Volume restored when the fade ends or is cut short.
    pub fade_volume_reset: u8,
    pub fade_length: u64,
    pub ticks_fade: u64,
    pub effects: EffectChain,
}

impl Channel {
    pub fn new(index: usize) -> Self {
        Self {
            chunk: None,
            position: 0,
            remaining: 0,
            looping: Loops::NONE,
            volume: MAX_VOLUME,
            tag: NO_GROUP,
            expire: None,
            start_time: 0,
            paused: None,
            fading: Fading::None,
            fade_volume: MAX_VOLUME,
            fade_volume_reset: MAX_VOLUME,
            fade_length: 0,
            ticks_fade: 0,
            effects: EffectChain::new(EffectTarget::Channel(index)),
        }
    }

    /// Still has bytes to play or repeats pending.
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.remaining > 0 || self.looping.is_active()
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.is_playing() && self.paused.is_some()
    }

    /// Point the cursor at the start of `chunk` for a fresh pass.
    pub fn bind(&mut self, chunk: Arc<Chunk>, loops: Loops, now: u64, expire: Option<u64>) {
        self.position = 0;
        self.remaining = chunk.len();
        self.chunk = Some(chunk);
        self.looping = loops;
        self.paused = None;
        self.fading = Fading::None;
        self.start_time = now;
        self.expire = expire;
    }

    /// Rewind for the next loop iteration.
    #[inline]
    pub fn rewind(&mut self) {
        self.looping.consume();
        self.position = 0;
        self.remaining = self.chunk.as_ref().map_or(0, |c| c.len());
    }

    /// Playback reached a stop: no bytes, no repeats, no timers.
    #[inline]
    pub fn stop(&mut self) {
        self.remaining = 0;
        self.looping = Loops::NONE;
        self.fading = Fading::None;
        self.expire = None;
    }

    /// Gain for this pass: master × channel × chunk, normalised to 0.0..=1.0.
    pub fn gain(&self, master: u8) -> f32 {
        let chunk_volume = self.chunk.as_ref().map_or(0, |c| c.volume()) as u32;
        let max = MAX_VOLUME as u32;
        let volume = master as u32 * self.volume as u32 * chunk_volume / (max * max);
        volume as f32 / MAX_VOLUME as f32
    }
}
