//! Per-channel and post-mix effect chains.
//!
//! An effect is a transform over a block of raw samples in the device format.
//! Channel effects see a private copy of the chunk slice about to be mixed, so
//! they may rewrite it freely; post effects run in place over the fully mixed
//! output.
//!
//! # Example
//!
//! ```
//! use klangmix::{EffectFn, EffectTarget, AudioSpec};
//!
//! // Silence the left channel of 16-bit stereo.
//! let mute_left = EffectFn::new(|_target: EffectTarget, samples: &mut [u8], _spec: &AudioSpec| {
//!     for frame in samples.chunks_exact_mut(4) {
//!         frame[0] = 0;
//!         frame[1] = 0;
//!     }
//! })
//! .on_remove(|target| println!("effect on {:?} released", target));
//! # let _ = mute_left;
//! ```

use crate::error::{MixerError, Result};
use crate::format::AudioSpec;

/// Where an effect is attached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EffectTarget {
    /// One channel; runs on that channel's samples before they're mixed.
    Channel(usize),
    /// The post-mix stage; runs on the summed output buffer.
    Post,
}

/// Identifies one registered effect, returned by `register_effect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(pub(crate) u64);

/// A sample transform in an effect chain.
///
/// `process` runs on the mixing thread with the engine lock held: it must not
/// block and must not call back into the mixer.
pub trait Effect: Send + 'static {
    /// Transform `samples` in place.
    fn process(&mut self, target: EffectTarget, samples: &mut [u8], spec: &AudioSpec);

    /// Called exactly once when the effect leaves its chain: on unregister,
    /// when the owning channel stops playing, or when the chain is torn down.
    fn on_remove(&mut self, _target: EffectTarget) {}
}

impl<F> Effect for F
where
    F: FnMut(EffectTarget, &mut [u8], &AudioSpec) + Send + 'static,
{
    #[inline]
    fn process(&mut self, target: EffectTarget, samples: &mut [u8], spec: &AudioSpec) {
        self(target, samples, spec)
    }
}

/// A closure-built effect with an optional release hook.
pub struct EffectFn<P, R = fn(EffectTarget)> {
    process: P,
    release: Option<R>,
}

impl<P> EffectFn<P>
where
    P: FnMut(EffectTarget, &mut [u8], &AudioSpec) + Send + 'static,
{
    pub fn new(process: P) -> Self {
        Self { process, release: None }
    }
}

impl<P, R> EffectFn<P, R> {
    /// Attach a release hook (builder pattern).
    pub fn on_remove<R2>(self, release: R2) -> EffectFn<P, R2>
    where
        R2: FnMut(EffectTarget) + Send + 'static,
    {
        EffectFn {
            process: self.process,
            release: Some(release),
        }
    }
}

impl<P, R> Effect for EffectFn<P, R>
where
    P: FnMut(EffectTarget, &mut [u8], &AudioSpec) + Send + 'static,
    R: FnMut(EffectTarget) + Send + 'static,
{
    #[inline]
    fn process(&mut self, target: EffectTarget, samples: &mut [u8], spec: &AudioSpec) {
        (self.process)(target, samples, spec)
    }

    fn on_remove(&mut self, target: EffectTarget) {
        if let Some(release) = self.release.as_mut() {
            release(target);
        }
    }
}

struct Slot {
    id: EffectId,
    effect: Box<dyn Effect>,
}

/// Ordered effects for one target. Insertion order is invocation order.
///
/// Dropping a chain releases whatever is still in it.
pub(crate) struct EffectChain {
    target: EffectTarget,
    slots: Vec<Slot>,
}

impl EffectChain {
    pub fn new(target: EffectTarget) -> Self {
        Self { target, slots: Vec::new() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn push(&mut self, id: EffectId, effect: Box<dyn Effect>) {
        self.slots.push(Slot { id, effect });
    }

    /// Remove one effect, running its release hook. Order of the rest is kept.
    pub fn remove(&mut self, id: EffectId) -> Result<()> {
        let pos = self
            .slots
            .iter()
            .position(|slot| slot.id == id)
            .ok_or(MixerError::NoSuchEffect(id))?;
        let mut slot = self.slots.remove(pos);
        slot.effect.on_remove(self.target);
        Ok(())
    }

    /// Release every effect in registration order and leave the chain empty.
    pub fn clear(&mut self) {
        let target = self.target;
        for mut slot in self.slots.drain(..) {
            slot.effect.on_remove(target);
        }
    }

    /// Run the chain over `samples`.
    pub fn apply(&mut self, samples: &mut [u8], spec: &AudioSpec) {
        let target = self.target;
        for slot in self.slots.iter_mut() {
            slot.effect.process(target, samples, spec);
        }
    }
}

impl Drop for EffectChain {
    fn drop(&mut self) {
        self.clear();
    }
}
