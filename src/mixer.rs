//! The public mixer handle.

use std::io::Read;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::backend::OutputBackend;
use crate::channel::{Fading, Loops, Target};
use crate::chunk::Chunk;
use crate::clock::{Clock, SystemClock};
use crate::effect::{Effect, EffectId, EffectTarget};
use crate::error::{MixerError, Result};
use crate::format::AudioSpec;
use crate::hooks::{ChannelFinished, MixHook};
use crate::load::ChunkLoader;
use crate::state::MixerState;
use crate::{DEFAULT_MIX_CHANNELS, MAX_VOLUME};

/// Exclusive access to an open mixer's state. The mixing pass waits while
/// this is held.
pub type MixerGuard<'a> = MappedMutexGuard<'a, MixerState>;

struct DeviceSlot {
    backend: Option<Box<dyn OutputBackend>>,
    open_count: usize,
}

/// The part of the mixer the pull callback holds on to. Teardown always
/// happens on the side of the last `Mixer` handle.
struct Engine {
    state: Mutex<Option<MixerState>>,
    master_volume: AtomicU8,
}

struct Shared {
    /// Always taken before `engine.state`.
    device: Mutex<DeviceSlot>,
    engine: Arc<Engine>,
    clock: Arc<dyn Clock>,
    loader: ChunkLoader,
    initial_channels: usize,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = {
            let mut guard = self.engine.state.lock();
            if let Some(state) = guard.as_mut() {
                state.shutdown();
            }
            guard.take()
        };
        if let Some(mut backend) = self.device.get_mut().backend.take() {
            backend.close();
        }
        drop(state);
    }
}

/// Configures a [`Mixer`] before it exists.
pub struct MixerBuilder {
    clock: Arc<dyn Clock>,
    channels: usize,
    loader: ChunkLoader,
}

impl Default for MixerBuilder {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock::new()),
            channels: DEFAULT_MIX_CHANNELS,
            loader: ChunkLoader::default(),
        }
    }
}

impl MixerBuilder {
    /// Millisecond time source for expiry, fades and pause bookkeeping.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Channels allocated on open. Defaults to [`DEFAULT_MIX_CHANNELS`].
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Decoder and converter setup used by [`Mixer::load_chunk`].
    pub fn with_loader(mut self, loader: ChunkLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn build(self) -> Mixer {
        Mixer {
            shared: Arc::new(Shared {
                device: Mutex::new(DeviceSlot {
                    backend: None,
                    open_count: 0,
                }),
                engine: Arc::new(Engine {
                    state: Mutex::new(None),
                    master_volume: AtomicU8::new(MAX_VOLUME),
                }),
                clock: self.clock,
                loader: self.loader,
                initial_channels: self.channels,
            }),
        }
    }
}

/// A multichannel sample mixer.
///
/// `Mixer` is a cheap, cloneable handle; all clones drive the same engine.
/// Every method locks the engine for its duration, so they may be called
/// from any thread. Methods that need an open mixer return
/// [`MixerError::NotOpen`] otherwise.
///
/// # Example
///
/// ```no_run
/// use std::fs::File;
/// use klangmix::{Loops, Mixer, ManualBackend};
///
/// let mixer = Mixer::new();
/// let backend = ManualBackend::new();
/// let output = backend.handle();
/// mixer.open(backend, None)?;
///
/// let chunk = mixer.load_chunk(File::open("boom.wav")?)?;
/// let channel = mixer.play_channel(None, &chunk, Loops::NONE, None)?;
///
/// // 1024 bytes of mixed audio
/// let block = output.pull(1024);
/// # let _ = (channel, block);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// # Callbacks and locking
///
/// Effects, hooks and the channel-finished callback all run with the engine
/// lock held. They must not call methods on a `Mixer` handle; the
/// channel-finished callback gets the locked [`MixerState`] instead, which
/// offers the same operations.
#[derive(Clone)]
pub struct Mixer {
    shared: Arc<Shared>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    /// A closed mixer on the system clock.
    pub fn new() -> Self {
        MixerBuilder::default().build()
    }

    pub fn builder() -> MixerBuilder {
        MixerBuilder::default()
    }

    /// Open the mixer on `backend`.
    ///
    /// Opening an already open mixer with no spec, or one matching the current
    /// format and channel count, just counts the extra open (and drops
    /// `backend`); it takes as many [`close`](Self::close) calls to shut down.
    /// A mismatched spec closes the mixer completely and reopens it.
    ///
    /// Returns the spec the device actually runs at.
    pub fn open<B: OutputBackend>(&self, backend: B, requested: Option<AudioSpec>) -> Result<AudioSpec> {
        let mut device = self.shared.device.lock();

        if device.open_count > 0 {
            let current = self.shared.engine.state.lock().as_ref().map(|state| state.spec());
            match (current, requested) {
                (Some(current), Some(requested)) if !current.is_compatible(&requested) => {
                    debug!(?current, ?requested, "reopening with a new spec");
                    self.teardown(&mut device);
                }
                (Some(current), _) => {
                    device.open_count += 1;
                    debug!(open_count = device.open_count, "mixer already open");
                    return Ok(current);
                }
                (None, _) => self.teardown(&mut device),
            }
        }

        let mut backend: Box<dyn OutputBackend> = Box::new(backend);
        let spec = backend.open(requested.as_ref())?;
        if !spec.is_playable() {
            backend.close();
            return Err(MixerError::UnsupportedFormat(format!(
                "{} channels at {} Hz",
                spec.channels, spec.freq
            )));
        }
        *self.shared.engine.state.lock() = Some(MixerState::new(
            spec,
            Arc::clone(&self.shared.clock),
            self.shared.initial_channels,
        ));

        let engine = Arc::clone(&self.shared.engine);
        if let Err(err) = backend.start(Box::new(move |out: &mut [u8]| pull(&engine, out))) {
            *self.shared.engine.state.lock() = None;
            backend.close();
            return Err(err);
        }

        device.backend = Some(backend);
        device.open_count = 1;
        info!(?spec, channels = self.shared.initial_channels, "mixer opened");
        Ok(spec)
    }

    /// Undo one [`open`](Self::open). The last close halts every channel
    /// (finished callbacks fire), releases all effects and stops the device.
    pub fn close(&self) {
        let mut device = self.shared.device.lock();
        match device.open_count {
            0 => debug!("close on a closed mixer"),
            1 => self.teardown(&mut device),
            _ => device.open_count -= 1,
        }
    }

    fn teardown(&self, device: &mut DeviceSlot) {
        let state = {
            let mut guard = self.shared.engine.state.lock();
            if let Some(state) = guard.as_mut() {
                state.shutdown();
            }
            guard.take()
        };
        if let Some(mut backend) = device.backend.take() {
            backend.close();
        }
        drop(state);
        device.open_count = 0;
        info!("mixer closed");
    }

    /// The negotiated spec, or `None` while closed.
    pub fn query_spec(&self) -> Option<AudioSpec> {
        self.shared.engine.state.lock().as_ref().map(|state| state.spec())
    }

    /// How many [`open`](Self::open) calls are outstanding.
    pub fn open_count(&self) -> usize {
        self.shared.device.lock().open_count
    }

    /// Lock the engine for a batch of operations.
    ///
    /// The mixing pass waits until the guard is dropped, so keep it short.
    pub fn lock(&self) -> Result<MixerGuard<'_>> {
        MutexGuard::try_map(self.shared.engine.state.lock(), |state| state.as_mut()).map_err(|_| MixerError::NotOpen)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MixerState) -> T) -> Result<T> {
        let mut guard = self.shared.engine.state.lock();
        let state = guard.as_mut().ok_or(MixerError::NotOpen)?;
        Ok(f(state))
    }

    /// Pause or resume the output device itself. Channel state is untouched.
    pub fn pause_audio(&self, paused: bool) -> Result<()> {
        let mut device = self.shared.device.lock();
        let backend = device.backend.as_mut().ok_or(MixerError::NotOpen)?;
        backend.set_paused(paused);
        Ok(())
    }

    /// Scale everything the mixer outputs. `None` only queries.
    ///
    /// Works open or closed; returns the previous value.
    pub fn master_volume(&self, volume: Option<u8>) -> u8 {
        match volume {
            Some(v) => self.shared.engine.master_volume.swap(v.min(MAX_VOLUME), Ordering::Relaxed),
            None => self.shared.engine.master_volume.load(Ordering::Relaxed),
        }
    }

    // ---- chunks ----

    /// Decode and convert audio from `reader` into the device format.
    pub fn load_chunk<R: Read>(&self, reader: R) -> Result<Arc<Chunk>> {
        let spec = self.spec()?;
        self.shared.loader.load(reader, &spec)
    }

    /// Wrap an in-memory WAV whose samples already match the device format.
    pub fn quick_load_wav(&self, mem: &[u8]) -> Result<Arc<Chunk>> {
        let spec = self.spec()?;
        Chunk::from_wav_bytes(mem, &spec)
    }

    /// Wrap raw samples already in the device format.
    pub fn quick_load_raw(&self, data: Vec<u8>) -> Result<Arc<Chunk>> {
        let spec = self.spec()?;
        Ok(Chunk::from_pcm(data, &spec))
    }

    /// Halt every channel playing `chunk`, then drop this reference to it.
    pub fn free_chunk(&self, chunk: Arc<Chunk>) {
        if let Some(state) = self.shared.engine.state.lock().as_mut() {
            let halted = state.halt_chunk(&chunk);
            debug!(halted, "freed chunk");
        }
    }

    // ---- everything below forwards to the locked state ----

    pub fn spec(&self) -> Result<AudioSpec> {
        self.with_state(|s| s.spec())
    }

    pub fn num_channels(&self) -> Result<usize> {
        self.with_state(|s| s.num_channels())
    }

    /// See [`MixerState::allocate_channels`].
    pub fn allocate_channels(&self, count: usize) -> Result<usize> {
        self.with_state(|s| s.allocate_channels(count))
    }

    /// See [`MixerState::reserve_channels`].
    pub fn reserve_channels(&self, count: usize) -> Result<usize> {
        self.with_state(|s| s.reserve_channels(count))
    }

    /// Play `chunk` once on the first free channel.
    pub fn play(&self, chunk: &Arc<Chunk>) -> Result<usize> {
        self.play_channel(None, chunk, Loops::NONE, None)
    }

    /// See [`MixerState::play_channel`].
    pub fn play_channel(
        &self,
        which: Option<usize>,
        chunk: &Arc<Chunk>,
        loops: Loops,
        limit: Option<Duration>,
    ) -> Result<usize> {
        self.with_state(|s| s.play_channel(which, chunk, loops, limit))?
    }

    /// See [`MixerState::fade_in_channel`].
    pub fn fade_in_channel(
        &self,
        which: Option<usize>,
        chunk: &Arc<Chunk>,
        loops: Loops,
        fade: Duration,
        limit: Option<Duration>,
    ) -> Result<usize> {
        self.with_state(|s| s.fade_in_channel(which, chunk, loops, fade, limit))?
    }

    pub fn expire_channel(&self, target: impl Into<Target>, limit: Option<Duration>) -> Result<usize> {
        self.with_state(|s| s.expire_channel(target.into(), limit))
    }

    /// See [`MixerState::volume`].
    pub fn volume(&self, target: impl Into<Target>, volume: Option<u8>) -> Result<u8> {
        self.with_state(|s| s.volume(target.into(), volume))
    }

    pub fn halt_channel(&self, target: impl Into<Target>) -> Result<usize> {
        self.with_state(|s| s.halt_channel(target.into()))
    }

    pub fn halt_group(&self, tag: i32) -> Result<usize> {
        self.with_state(|s| s.halt_group(tag))
    }

    pub fn fade_out_channel(&self, target: impl Into<Target>, fade: Duration) -> Result<usize> {
        self.with_state(|s| s.fade_out_channel(target.into(), fade))
    }

    pub fn fade_out_group(&self, tag: i32, fade: Duration) -> Result<usize> {
        self.with_state(|s| s.fade_out_group(tag, fade))
    }

    pub fn fading(&self, which: usize) -> Result<Fading> {
        self.with_state(|s| s.fading(which))
    }

    pub fn playing(&self, target: impl Into<Target>) -> Result<usize> {
        self.with_state(|s| s.playing(target.into()))
    }

    pub fn paused(&self, target: impl Into<Target>) -> Result<usize> {
        self.with_state(|s| s.paused(target.into()))
    }

    pub fn chunk(&self, which: usize) -> Result<Option<Arc<Chunk>>> {
        self.with_state(|s| s.chunk(which))
    }

    pub fn pause(&self, target: impl Into<Target>) -> Result<()> {
        self.with_state(|s| s.pause(target.into()))
    }

    pub fn pause_group(&self, tag: i32) -> Result<()> {
        self.with_state(|s| s.pause_group(tag))
    }

    pub fn resume(&self, target: impl Into<Target>) -> Result<()> {
        self.with_state(|s| s.resume(target.into()))
    }

    pub fn resume_group(&self, tag: i32) -> Result<()> {
        self.with_state(|s| s.resume_group(tag))
    }

    pub fn group_channel(&self, which: usize, tag: i32) -> Result<bool> {
        self.with_state(|s| s.group_channel(which, tag))
    }

    pub fn group_channels(&self, from: usize, to: usize, tag: i32) -> Result<bool> {
        self.with_state(|s| s.group_channels(from, to, tag))
    }

    pub fn group_available(&self, tag: i32) -> Result<Option<usize>> {
        self.with_state(|s| s.group_available(tag))
    }

    pub fn group_count(&self, tag: i32) -> Result<usize> {
        self.with_state(|s| s.group_count(tag))
    }

    pub fn group_oldest(&self, tag: i32) -> Result<Option<usize>> {
        self.with_state(|s| s.group_oldest(tag))
    }

    pub fn group_newest(&self, tag: i32) -> Result<Option<usize>> {
        self.with_state(|s| s.group_newest(tag))
    }

    /// See [`MixerState::register_effect`].
    pub fn register_effect<E: Effect>(&self, target: EffectTarget, effect: E) -> Result<EffectId> {
        self.with_state(|s| s.register_effect(target, effect))?
    }

    pub fn unregister_effect(&self, target: EffectTarget, id: EffectId) -> Result<()> {
        self.with_state(|s| s.unregister_effect(target, id))?
    }

    pub fn unregister_all_effects(&self, target: EffectTarget) -> Result<()> {
        self.with_state(|s| s.unregister_all_effects(target))?
    }

    pub fn set_post_mix<H: MixHook>(&self, hook: H) -> Result<()> {
        self.with_state(|s| s.set_post_mix(hook))
    }

    pub fn clear_post_mix(&self) -> Result<()> {
        self.with_state(|s| s.clear_post_mix())
    }

    pub fn hook_music<H: MixHook>(&self, hook: H) -> Result<()> {
        self.with_state(|s| s.hook_music(hook))
    }

    pub fn unhook_music(&self) -> Result<()> {
        self.with_state(|s| s.unhook_music())
    }

    pub fn set_channel_finished<C: ChannelFinished>(&self, callback: C) -> Result<()> {
        self.with_state(|s| s.set_channel_finished(callback))
    }

    pub fn clear_channel_finished(&self) -> Result<()> {
        self.with_state(|s| s.clear_channel_finished())
    }
}

/// The device pull: render one buffer while the mixer is open.
fn pull(engine: &Engine, out: &mut [u8]) {
    let master = engine.master_volume.load(Ordering::Relaxed);
    if let Some(state) = engine.state.lock().as_mut() {
        state.mix_into(out, master);
    }
}
