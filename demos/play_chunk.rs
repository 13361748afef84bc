//! Plays a WAV (or Ogg with `vorbis_src`) file on the default output device.
//!
//! cargo run --example play_chunk --features cpal_sink -- path/to/sound.wav

use std::fs::File;
use std::thread::sleep;
use std::time::Duration;

use klangmix::{CpalBackend, Loops, Mixer, MixerState};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let path = std::env::args().nth(1).ok_or("usage: play_chunk <file>")?;
    let backend = CpalBackend::default_output().ok_or("no output device")?;

    let mixer = Mixer::new();
    let spec = mixer.open(backend, None)?;
    println!("device running at {} Hz, {} channels, {:?}", spec.freq, spec.channels, spec.format);

    let chunk = mixer.load_chunk(File::open(&path)?)?;
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    mixer.set_channel_finished(move |channel: usize, _: &mut MixerState| {
        let _ = done_tx.send(channel);
    })?;

    let channel = mixer.fade_in_channel(None, &chunk, Loops::Times(1), Duration::from_millis(500), None)?;
    println!("playing on channel {channel}");

    let channel = done_rx.recv()?;
    println!("channel {channel} finished");
    sleep(Duration::from_millis(100));

    mixer.close();
    Ok(())
}
