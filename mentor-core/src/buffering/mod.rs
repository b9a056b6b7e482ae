//! Lock-free SPSC ring buffer between the capture callback and the session
//! controller, plus the fixed-size framing tap that sits behind it.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod chunk;
pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half — held by the microphone callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the live session controller.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Buffer capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
/// The controller drains on every poll (≤ 100 ms), so this only has to
/// absorb a stalled event loop, not a whole utterance.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_moves_samples_in_order() {
        let (mut producer, mut consumer) = create_capture_ring();
        assert_eq!(producer.push_slice(&[0.1, 0.2, 0.3]), 3);

        let mut out = [0f32; 8];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(&out[..n], &[0.1f32, 0.2, 0.3]);
        assert!(consumer.is_empty());
    }
}
