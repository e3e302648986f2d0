//! Outbound audio frame accumulator.

use bytes::Bytes;

/// Bytes per outbound chunk: 100 ms of 16 kHz mono 16-bit PCM.
pub const FRAME_BYTES: usize = 3200;

/// Append-only accumulator of outbound PCM bytes.
///
/// Bytes accumulate until [`FRAME_BYTES`] is reached, at which point a full
/// frame is sliced off and the remainder retained. Mutated only on the
/// pipeline's convert worker so the capture callback stays non-blocking.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_BYTES * 2),
        }
    }

    /// Append bytes and slice off every complete frame.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while self.buf.len() >= FRAME_BYTES {
            let rest = self.buf.split_off(FRAME_BYTES);
            frames.push(Bytes::from(std::mem::replace(&mut self.buf, rest)));
        }
        frames
    }

    /// Bytes currently retained below the frame threshold.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard the partial remainder. Used on session stop: partial frames
    /// are never emitted.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_below_threshold() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&[0u8; 3000]).is_empty());
        assert_eq!(buffer.pending(), 3000);
    }

    #[test]
    fn test_emits_exactly_at_threshold() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&[0u8; FRAME_BYTES]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_BYTES);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_ten_buffers_totaling_8000_bytes() {
        // 10 × 800 bytes => exactly 2 complete frames, 1600 bytes pending.
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for _ in 0..10 {
            frames.extend(buffer.push(&[0u8; 800]));
        }
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == FRAME_BYTES));
        assert_eq!(buffer.pending(), 1600);
    }

    #[test]
    fn test_large_push_yields_multiple_frames() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&[0u8; FRAME_BYTES * 3 + 5]);
        assert_eq!(frames.len(), 3);
        assert_eq!(buffer.pending(), 5);
    }

    #[test]
    fn test_reset_discards_remainder() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0u8; 1600]);
        buffer.reset();
        assert_eq!(buffer.pending(), 0);
        // Nothing partial survives a reset.
        assert!(buffer.push(&[0u8; 100]).is_empty());
        assert_eq!(buffer.pending(), 100);
    }

    #[test]
    fn test_frame_content_preserved_in_order() {
        let mut buffer = FrameBuffer::new();
        let first: Vec<u8> = (0..FRAME_BYTES).map(|i| (i % 251) as u8).collect();
        let frames = buffer.push(&first);
        assert_eq!(frames[0].as_ref(), first.as_slice());
    }
}
