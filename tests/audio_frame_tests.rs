//! Audio chunking and playback-queue scenarios, device-free.

use voicepay_agent::audio::codec;
use voicepay_agent::audio::{FRAME_BYTES, FrameBuffer, PlaybackQueue};

#[test]
fn test_capture_chunking_scenario() {
    // 10 capture buffers of 400 samples each at 16 kHz mono: 8000 bytes of
    // PCM total. The pipeline emits exactly two complete 3200-byte chunks
    // and retains 1600 bytes pending.
    let mut frames = FrameBuffer::new();
    let mut emitted = Vec::new();

    for _ in 0..10 {
        let samples = vec![0.25f32; 400];
        let bytes = codec::f32_to_i16_bytes(&samples);
        assert_eq!(bytes.len(), 800);
        emitted.extend(frames.push(&bytes));
    }

    assert_eq!(emitted.len(), 2);
    assert!(emitted.iter().all(|chunk| chunk.len() == FRAME_BYTES));
    assert_eq!(frames.pending(), 1600);

    // Session stop discards the remainder instead of emitting it.
    frames.reset();
    assert_eq!(frames.pending(), 0);
}

#[test]
fn test_interruption_stops_playback_with_buffers_still_queued() {
    let queue = PlaybackQueue::new();

    // Model audio arrives; playback begins.
    queue.enqueue(codec::i16_bytes_to_f32(&vec![1u8; 4800]));
    queue.enqueue(codec::i16_bytes_to_f32(&vec![2u8; 4800]));
    assert!(queue.is_speaking());
    assert_eq!(queue.pending(), 2);

    // Partially drain the first buffer, then interrupt.
    let mut out = vec![0.0f32; 100];
    queue.fill(&mut out, 1);
    assert!(queue.is_speaking());

    queue.clear();
    assert!(!queue.is_speaking(), "interruption must stop speech immediately");
    assert_eq!(queue.pending(), 0);

    // Whatever the output stream asks for next is silence.
    let mut out = vec![0.7f32; 32];
    queue.fill(&mut out, 2);
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn test_playback_roundtrip_preserves_sample_values() {
    let samples: Vec<f32> = (0..FRAME_BYTES / 2).map(|i| ((i % 100) as f32) / 128.0).collect();
    let bytes = codec::f32_to_i16_bytes(&samples);
    let queue = PlaybackQueue::new();
    queue.enqueue(codec::i16_bytes_to_f32(&bytes));

    let mut out = vec![0.0f32; samples.len()];
    queue.fill(&mut out, 1);
    for (a, b) in samples.iter().zip(out.iter()) {
        assert!((a - b).abs() < 0.001);
    }
}

#[test]
fn test_wav_fixture_roundtrip() {
    // The debug dump uses the same 16 kHz mono 16-bit spec.
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in &samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    cursor.set_position(0);
    let mut reader = hound::WavReader::new(cursor).unwrap();
    let back: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    assert_eq!(back, samples);
}
