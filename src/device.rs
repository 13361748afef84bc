//! CPAL device discovery and the cpal-backed [`OutputBackend`].
//!
//! # Example: List and Select a Device
//!
//! ```no_run
//! use klangmix::{CpalDevice, Mixer};
//!
//! for (i, device) in CpalDevice::list_outputs().iter().enumerate() {
//!     println!("[{}] {} ({} Hz, {} ch)",
//!         i, device.name(), device.sample_rate(), device.channels());
//! }
//!
//! let device = CpalDevice::default_output().expect("no output device");
//! let mixer = Mixer::new();
//! mixer.open(device.backend(), None).unwrap();
//! ```

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use dasp_sample::Sample;
use tracing::{debug, error, info};

use crate::backend::{OutputBackend, PullCallback};
use crate::error::{MixerError, Result};
use crate::format::{AudioSpec, SampleFormat};

/// A discovered audio output device.
///
/// Use [`CpalDevice::default_output`] to get the system default, or
/// [`CpalDevice::list_outputs`] to enumerate all available devices.
#[derive(Clone)]
pub struct CpalDevice {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    name: String,
}

impl CpalDevice {
    /// Get the system's default output device.
    ///
    /// Returns `None` if no audio device is available.
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;
        Self::from_device(device)
    }

    /// List all available audio output devices.
    ///
    /// Returns an empty list if no devices are found or if enumeration fails.
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self { device, config, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The device's default sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate().0
    }

    /// The device's default number of output channels.
    pub fn channels(&self) -> u16 {
        self.config.channels()
    }

    /// A backend that plays a mixer through this device.
    pub fn backend(&self) -> CpalBackend {
        CpalBackend::new(self.clone())
    }
}

enum Command {
    Play,
    Pause,
    Close,
}

/// Plays the mixer through a cpal output stream.
///
/// cpal streams aren't `Send` on every platform, so the stream lives on its
/// own thread and is driven by commands.
pub struct CpalBackend {
    device: CpalDevice,
    buffer_frames: Option<u32>,
    config: Option<cpal::SupportedStreamConfig>,
    control: Option<mpsc::Sender<Command>>,
}

impl CpalBackend {
    pub fn new(device: CpalDevice) -> Self {
        Self {
            device,
            buffer_frames: None,
            config: None,
            control: None,
        }
    }

    /// The system default device, if there is one.
    pub fn default_output() -> Option<Self> {
        CpalDevice::default_output().map(Self::new)
    }

    /// Ask for a fixed device buffer of `frames` frames (builder pattern).
    ///
    /// Smaller buffers mean lower latency and more frequent mixing passes.
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = Some(frames);
        self
    }

    /// Closest supported config to `requested`, preferring an exact sample format.
    fn pick_config(&self, requested: &AudioSpec) -> Option<cpal::SupportedStreamConfig> {
        let ranges = self.device.device.supported_output_configs().ok()?;
        ranges
            .filter(|range| range.channels() == requested.channels)
            .filter(|range| device_format(range.sample_format()).is_some())
            .filter(|range| {
                range.min_sample_rate().0 <= requested.freq && requested.freq <= range.max_sample_rate().0
            })
            .max_by_key(|range| device_format(range.sample_format()) == Some(requested.format))
            .map(|range| range.with_sample_rate(cpal::SampleRate(requested.freq)))
    }
}

/// The mixer-side format a cpal sample format is rendered in.
///
/// Unsigned 16-bit devices are mixed as signed and shifted on the way out.
fn device_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    match format {
        cpal::SampleFormat::U8 => Some(SampleFormat::U8),
        cpal::SampleFormat::I8 => Some(SampleFormat::S8),
        cpal::SampleFormat::I16 | cpal::SampleFormat::U16 => Some(SampleFormat::S16LE),
        cpal::SampleFormat::I32 => Some(SampleFormat::S32LE),
        cpal::SampleFormat::F32 => Some(SampleFormat::F32LE),
        _ => None,
    }
}

impl OutputBackend for CpalBackend {
    fn open(&mut self, requested: Option<&AudioSpec>) -> Result<AudioSpec> {
        let config = requested
            .and_then(|spec| self.pick_config(spec))
            .unwrap_or_else(|| self.device.config.clone());
        let format = device_format(config.sample_format())
            .ok_or_else(|| MixerError::UnsupportedFormat(format!("{:?}", config.sample_format())))?;
        let spec = AudioSpec::new(format, config.channels(), config.sample_rate().0);
        info!(device = %self.device.name, ?spec, "opened output device");
        self.config = Some(config);
        Ok(spec)
    }

    fn start(&mut self, pull: PullCallback) -> Result<()> {
        let supported = self
            .config
            .clone()
            .ok_or_else(|| MixerError::Device("backend started before open".into()))?;
        let sample_format = supported.sample_format();
        let mut config = supported.config();
        if let Some(frames) = self.buffer_frames {
            config.buffer_size = cpal::BufferSize::Fixed(frames);
        }

        let device = self.device.device.clone();
        let (control, commands) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        thread::Builder::new()
            .name("klangmix-output".into())
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, pull) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                if let Err(err) = stream.play() {
                    let _ = ready_tx.send(Err(err.to_string()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                for command in commands {
                    let result = match command {
                        Command::Play => stream.play(),
                        Command::Pause => stream.pause(),
                        Command::Close => break,
                    };
                    if let Err(err) = result {
                        error!(%err, "output stream control failed");
                    }
                }
                debug!("output thread exiting");
            })?;

        ready_rx
            .recv()
            .map_err(|_| MixerError::Device("output thread exited during startup".into()))?
            .map_err(MixerError::Device)?;
        self.control = Some(control);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        if let Some(control) = &self.control {
            let command = if paused { Command::Pause } else { Command::Play };
            let _ = control.send(command);
        }
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Command::Close);
            info!(device = %self.device.name, "closed output device");
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    pull: PullCallback,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError> {
    match format {
        cpal::SampleFormat::U8 => stream_of::<u8>(device, config, pull, 1, |b| b[0]),
        cpal::SampleFormat::I8 => stream_of::<i8>(device, config, pull, 1, |b| b[0] as i8),
        cpal::SampleFormat::I16 => stream_of::<i16>(device, config, pull, 2, |b| i16::from_le_bytes([b[0], b[1]])),
        cpal::SampleFormat::U16 => stream_of::<u16>(device, config, pull, 2, |b| {
            i16::from_le_bytes([b[0], b[1]]).to_sample::<u16>()
        }),
        cpal::SampleFormat::I32 => stream_of::<i32>(device, config, pull, 4, |b| {
            i32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }),
        cpal::SampleFormat::F32 => stream_of::<f32>(device, config, pull, 4, |b| {
            f32::from_le_bytes([b[0], b[1], b[2], b[3]])
        }),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}

/// An output stream that pulls bytes from the mixer and decodes them into `T`.
fn stream_of<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut pull: PullCallback,
    width: usize,
    decode: fn(&[u8]) -> T,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let mut bytes: Vec<u8> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            bytes.resize(data.len() * width, 0);
            pull(&mut bytes);
            for (out, raw) in data.iter_mut().zip(bytes.chunks_exact(width)) {
                *out = decode(raw);
            }
        },
        |err| error!(%err, "output stream error"),
        None,
    )
}
