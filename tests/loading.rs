use std::sync::Arc;

use klangmix::*;

fn s16(channels: u16, freq: u32) -> AudioSpec {
    AudioSpec::new(SampleFormat::S16LE, channels, freq)
}

/// A minimal RIFF/WAVE file around `data`.
fn wav(tag: u16, channels: u16, freq: u32, bits: u16, data: &[u8]) -> Vec<u8> {
    let block = channels * bits / 8;
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&freq.to_le_bytes());
    out.extend_from_slice(&(freq * block as u32).to_le_bytes());
    out.extend_from_slice(&block.to_le_bytes());
    out.extend_from_slice(&bits.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    out
}

fn samples(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect()
}

/// Float round trips may land one step off depending on the scaling used.
fn assert_close(actual: &[i16], expected: &[i16]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((*a as i32 - *e as i32).abs() <= 1, "{actual:?} vs {expected:?}");
    }
}

fn pcm(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn wav_in_the_target_format_loads_verbatim() {
    let data = pcm(&[1, -2, 300, -4000]);
    let file = wav(1, 1, 44100, 16, &data);

    let chunk = ChunkLoader::default().load(&file[..], &s16(1, 44100)).unwrap();
    assert_eq!(chunk.data(), &data[..]);
    assert_eq!(chunk.volume(), MAX_VOLUME);
}

#[test]
fn eight_bit_wav_is_widened() {
    let file = wav(1, 1, 44100, 8, &[0x80, 0xFF, 0x00]);

    let chunk = ChunkLoader::default().load(&file[..], &s16(1, 44100)).unwrap();
    let out = samples(chunk.data());
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], 0);
    assert!(out[1] > 32000);
    assert!(out[2] <= -32767);
}

#[test]
fn float_wav_is_converted() {
    let data: Vec<u8> = [0.5f32, -0.5].iter().flat_map(|v| v.to_le_bytes()).collect();
    let file = wav(3, 1, 44100, 32, &data);

    let chunk = ChunkLoader::default().load(&file[..], &s16(1, 44100)).unwrap();
    assert_close(&samples(chunk.data()), &[16384, -16384]);
}

#[test]
fn stereo_downmixes_to_mono_by_averaging() {
    let file = wav(1, 2, 44100, 16, &pcm(&[1000, 3000, -1000, -3000]));

    let chunk = ChunkLoader::default().load(&file[..], &s16(1, 44100)).unwrap();
    assert_close(&samples(chunk.data()), &[2000, -2000]);
}

#[test]
fn mono_fans_out_to_stereo() {
    let file = wav(1, 1, 44100, 16, &pcm(&[1000, -1000]));

    let chunk = ChunkLoader::default().load(&file[..], &s16(2, 44100)).unwrap();
    assert_close(&samples(chunk.data()), &[1000, 1000, -1000, -1000]);
}

#[test]
fn rate_conversion_scales_the_length() {
    let file = wav(1, 1, 22050, 16, &pcm(&[0; 100]));

    let chunk = ChunkLoader::default().load(&file[..], &s16(1, 44100)).unwrap();
    assert_eq!(chunk.len(), 200 * 2);
}

#[test]
fn load_fails_cleanly() {
    let loader = ChunkLoader::default();
    let target = s16(1, 44100);

    assert!(matches!(loader.load(&b"RI"[..], &target), Err(MixerError::Decode(_))));
    assert!(matches!(
        loader.load(&b"not audio at all"[..], &target),
        Err(MixerError::UnrecognizedFormat)
    ));
    assert!(matches!(
        loader.load(&wav(1, 1, 44100, 16, &[])[..], &target),
        Err(MixerError::NoAudioData)
    ));
    assert!(matches!(
        loader.load(&wav(2, 1, 44100, 4, &[1, 2])[..], &target),
        Err(MixerError::UnsupportedFormat(_))
    ));
}

struct Tagged;

impl ChunkDecoder for Tagged {
    fn name(&self) -> &str {
        "TEST"
    }

    fn decode(&self, data: &[u8]) -> Result<Decoded> {
        // everything after the magic is already-native PCM, odd tail included
        Ok(Decoded {
            spec: s16(1, 44100),
            data: data[4..].to_vec(),
        })
    }
}

#[test]
fn custom_container_decoder_by_magic() {
    let loader = ChunkLoader::empty().with_decoder(*b"TEST", Arc::new(Tagged));
    let mut file = b"TEST".to_vec();
    file.extend_from_slice(&pcm(&[7, 8, 9]));
    file.push(0xAA);

    let chunk = loader.load(&file[..], &s16(1, 44100)).unwrap();
    assert_eq!(samples(chunk.data()), vec![7, 8, 9]);

    // only exact magic matches pick a container decoder
    assert!(matches!(
        loader.load(&b"ESTING"[..], &s16(1, 44100)),
        Err(MixerError::UnrecognizedFormat)
    ));
}

/// Streams a counting sequence a few bytes at a time.
struct Counting {
    spec: AudioSpec,
    total: usize,
    per_read: usize,
    sent: usize,
}

impl StreamDecoder for Counting {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let count = buf.len().min(self.per_read).min(self.total - self.sent);
        for (i, byte) in buf[..count].iter_mut().enumerate() {
            *byte = ((self.sent + i) % 251) as u8;
        }
        self.sent += count;
        Ok(count)
    }
}

struct CountingFactory {
    total: usize,
    per_read: usize,
}

impl StreamDecoderFactory for CountingFactory {
    fn name(&self) -> &str {
        "counting"
    }

    fn open(&self, data: &[u8]) -> Option<Box<dyn StreamDecoder>> {
        if !data.starts_with(b"CNT") {
            return None;
        }
        Some(Box::new(Counting {
            spec: AudioSpec::new(SampleFormat::U8, 1, 8000),
            total: self.total,
            per_read: self.per_read,
            sent: 0,
        }))
    }
}

#[test]
fn stream_decoder_is_drained_in_fragments() {
    let loader = ChunkLoader::empty()
        .with_fragment_frames(16)
        .with_stream_decoder(Arc::new(CountingFactory {
            total: 1000,
            per_read: usize::MAX,
        }));
    let target = AudioSpec::new(SampleFormat::U8, 1, 8000);

    let chunk = loader.load(&b"CNT!"[..], &target).unwrap();
    assert_eq!(chunk.len(), 1000);
    assert!(chunk.data().iter().enumerate().all(|(i, &b)| b == (i % 251) as u8));
}

#[test]
fn short_read_ends_the_stream() {
    let loader = ChunkLoader::empty()
        .with_fragment_frames(16)
        .with_stream_decoder(Arc::new(CountingFactory {
            total: 1000,
            per_read: 10,
        }));
    let target = AudioSpec::new(SampleFormat::U8, 1, 8000);

    let chunk = loader.load(&b"CNT!"[..], &target).unwrap();
    assert_eq!(chunk.len(), 10);
}

#[test]
fn stream_factories_are_tried_in_order() {
    let loader = ChunkLoader::empty()
        .with_stream_decoder(Arc::new(CountingFactory {
            total: 4,
            per_read: usize::MAX,
        }))
        .with_stream_decoder(Arc::new(CountingFactory {
            total: 8,
            per_read: usize::MAX,
        }));
    let target = AudioSpec::new(SampleFormat::U8, 1, 8000);

    assert_eq!(loader.load(&b"CNT!"[..], &target).unwrap().len(), 4);
}

#[test]
fn empty_stream_has_no_audio() {
    let loader = ChunkLoader::empty().with_stream_decoder(Arc::new(CountingFactory {
        total: 0,
        per_read: 1,
    }));
    let target = AudioSpec::new(SampleFormat::U8, 1, 8000);

    assert!(matches!(loader.load(&b"CNT!"[..], &target), Err(MixerError::NoAudioData)));
}

#[test]
fn mixer_loads_in_its_own_format() {
    let mixer = Mixer::new();
    mixer.open(ManualBackend::new(), Some(s16(2, 48000))).unwrap();

    let file = wav(1, 1, 48000, 16, &pcm(&[5, 6]));
    let chunk = mixer.load_chunk(&file[..]).unwrap();
    assert_close(&samples(chunk.data()), &[5, 5, 6, 6]);

    let quick = mixer.quick_load_wav(&wav(1, 2, 48000, 16, &pcm(&[1, 2, 3]))).unwrap();
    assert_eq!(samples(quick.data()), vec![1, 2]);
}

#[test]
fn quick_wav_needs_a_data_chunk() {
    let mut file = wav(1, 1, 44100, 16, &pcm(&[1]));
    file.truncate(36);
    assert!(matches!(
        Chunk::from_wav_bytes(&file, &s16(1, 44100)),
        Err(MixerError::Decode(_))
    ));
}

#[test]
fn zero_width_target_is_an_error() {
    let target = AudioSpec {
        format: SampleFormat::S16LE,
        channels: 0,
        freq: 44100,
    };
    let file = wav(1, 1, 44100, 16, &pcm(&[1, 2]));

    assert!(matches!(
        ChunkLoader::default().load(&file[..], &target),
        Err(MixerError::UnsupportedFormat(_))
    ));
}
