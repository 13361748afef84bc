use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klangmix::{AudioSpec, EffectTarget, Loops, ManualBackend, ManualClock, Mixer, SampleFormat};

const BUFFER_FRAMES: usize = 512;

fn open_stereo(channels: usize) -> (Mixer, klangmix::ManualPull) {
    let mixer = Mixer::builder()
        .with_clock(Arc::new(ManualClock::new(0)))
        .with_channels(channels)
        .build();
    let backend = ManualBackend::new();
    let output = backend.handle();
    mixer
        .open(backend, Some(AudioSpec::new(SampleFormat::S16LE, 2, 48000)))
        .unwrap();
    (mixer, output)
}

fn saw(frames: usize) -> Vec<u8> {
    (0..frames)
        .flat_map(|i| {
            let v = ((i % 200) as i16 - 100) * 100;
            [v.to_le_bytes(), v.to_le_bytes()].concat()
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("mix 8 looping channels", |b| {
        let (mixer, output) = open_stereo(8);
        let chunk = mixer.quick_load_raw(saw(3000)).unwrap();
        for channel in 0..8 {
            mixer.play_channel(Some(channel), &chunk, Loops::Infinite, None).unwrap();
        }
        let mut buffer = vec![0u8; BUFFER_FRAMES * 4];

        b.iter(|| {
            output.pull_into(&mut buffer);
            black_box(&buffer);
        })
    });

    c.bench_function("mix 32 channels with effects", |b| {
        let (mixer, output) = open_stereo(32);
        let chunk = mixer.quick_load_raw(saw(3000)).unwrap();
        for channel in 0..32 {
            mixer.play_channel(Some(channel), &chunk, Loops::Infinite, None).unwrap();
            mixer
                .register_effect(EffectTarget::Channel(channel), |_: EffectTarget, s: &mut [u8], _: &AudioSpec| {
                    for byte in s.iter_mut().step_by(4) {
                        *byte = byte.wrapping_add(1);
                    }
                })
                .unwrap();
        }
        let mut buffer = vec![0u8; BUFFER_FRAMES * 4];

        b.iter(|| {
            output.pull_into(&mut buffer);
            black_box(&buffer);
        })
    });

    c.bench_function("mix_audio s16 block", |b| {
        let src = saw(BUFFER_FRAMES);
        let mut dst = vec![0u8; src.len()];
        b.iter(|| klangmix::mix_audio(black_box(&mut dst), black_box(&src), SampleFormat::S16LE, 0.75))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
