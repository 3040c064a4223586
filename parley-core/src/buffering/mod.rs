//! Capture-side buffering.
//!
//! Microphone samples travel through a `ringbuf::HeapRb<f32>`, whose
//! `push_slice` is wait-free and safe to call from the real-time input
//! callback. The host drains the consumer and wraps the samples in
//! [`chunk::AudioChunk`]s for the session.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Type alias for the producer half, held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half, held by whoever forwards audio upstream.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^20 = 1 048 576 f32 samples ≈ 21.8 s at 48 kHz.
/// Plenty for a forwarder that drains every ~100 ms.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_preserves_order() {
        let (mut producer, mut consumer) = create_audio_ring();
        producer.push_slice(&[0.1, 0.2, 0.3]);
        let mut out = [0f32; 4];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(n, 3);
        assert_eq!(&out[..3], &[0.1, 0.2, 0.3]);
        assert_eq!(consumer.occupied_len(), 0);
    }
}
