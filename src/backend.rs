//! The seam between the mixer and whatever actually plays the audio.
//!
//! An [`OutputBackend`] negotiates a format and then repeatedly asks the mixer
//! for bytes through a [`PullCallback`]. The cpal-backed implementation lives
//! in [`device`](crate::device); [`ManualBackend`] lets the caller pull
//! buffers by hand, which is what tests and offline rendering use.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{MixerError, Result};
use crate::format::AudioSpec;

/// Fills a device buffer with the next block of mixed audio.
pub type PullCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// An audio output the mixer can drive.
pub trait OutputBackend: Send + 'static {
    /// Negotiate a format. `requested` is a preference; the returned spec is
    /// what the device will actually consume.
    fn open(&mut self, requested: Option<&AudioSpec>) -> Result<AudioSpec>;

    /// Hand over the pull callback. Output starts unpaused.
    fn start(&mut self, pull: PullCallback) -> Result<()>;

    /// Pause or resume the device as a whole.
    fn set_paused(&mut self, paused: bool);

    /// Stop output and drop the pull callback.
    fn close(&mut self);
}

type SharedPull = Arc<Mutex<Option<PullCallback>>>;

/// A backend with no device behind it.
///
/// The negotiated spec is whatever was requested (or the default). Audio is
/// produced only when [`ManualPull::pull`] is called.
#[derive(Default)]
pub struct ManualBackend {
    pull: SharedPull,
    paused: Arc<Mutex<bool>>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for pulling mixed buffers, usable after the backend has been
    /// moved into the mixer.
    pub fn handle(&self) -> ManualPull {
        ManualPull {
            pull: Arc::clone(&self.pull),
            paused: Arc::clone(&self.paused),
        }
    }
}

impl OutputBackend for ManualBackend {
    fn open(&mut self, requested: Option<&AudioSpec>) -> Result<AudioSpec> {
        let spec = requested.copied().unwrap_or_default();
        if spec.freq == 0 {
            return Err(MixerError::UnsupportedFormat(format!("{} Hz", spec.freq)));
        }
        Ok(spec)
    }

    fn start(&mut self, pull: PullCallback) -> Result<()> {
        *self.pull.lock() = Some(pull);
        *self.paused.lock() = false;
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        *self.paused.lock() = paused;
    }

    fn close(&mut self) {
        debug!("manual backend closed");
        self.pull.lock().take();
    }
}

/// Pulls audio out of a mixer running on a [`ManualBackend`].
#[derive(Clone)]
pub struct ManualPull {
    pull: SharedPull,
    paused: Arc<Mutex<bool>>,
}

impl ManualPull {
    /// Request `len` bytes of mixed output.
    ///
    /// Returns `None` while the backend is closed or paused.
    pub fn pull(&self, len: usize) -> Option<Vec<u8>> {
        let mut out = vec![0; len];
        self.pull_into(&mut out).then_some(out)
    }

    /// Fill `out` with mixed output. False if nothing was rendered.
    pub fn pull_into(&self, out: &mut [u8]) -> bool {
        if *self.paused.lock() {
            return false;
        }
        match self.pull.lock().as_mut() {
            Some(pull) => {
                pull(out);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.pull.lock().is_some()
    }
}
