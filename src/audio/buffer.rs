//! Shared sample ring buffer
//!
//! Single-producer/single-consumer circular buffer of signed 16-bit audio
//! samples. The producer runs on the sampling peripheral's cadence and must
//! never block: pushing into a full ring drops the sample and counts an
//! overrun instead. The lock is held only for the index check and the
//! sample copy, never across I/O.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct RingState {
    samples: Box<[i16]>,
    /// Next write index, modulo capacity
    head: usize,
    /// Next read index, modulo capacity
    tail: usize,
}

/// Thread-safe SPSC ring buffer for audio samples
///
/// Cloning the handle shares the underlying ring; one clone lives with the
/// producer, one with the consumer. Full when `(head + 1) & mask == tail`,
/// empty when `head == tail`.
pub struct SampleRing {
    state: Arc<Mutex<RingState>>,
    overruns: Arc<AtomicU32>,
    mask: usize,
}

impl SampleRing {
    /// Create a ring with the given capacity
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            state: Arc::new(Mutex::new(RingState {
                samples: vec![0i16; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
            })),
            overruns: Arc::new(AtomicU32::new(0)),
            mask: capacity - 1,
        }
    }

    /// Push one sample (producer side only)
    ///
    /// Returns `false` if the ring was full; the sample is dropped and the
    /// overrun counter incremented. Never blocks beyond the index update.
    #[inline]
    pub fn push(&self, sample: i16) -> bool {
        let mut state = self.state.lock();
        let next = (state.head + 1) & self.mask;
        if next == state.tail {
            drop(state);
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let head = state.head;
        state.samples[head] = sample;
        state.head = next;
        true
    }

    /// Pop one sample (consumer side only)
    #[inline]
    pub fn pop(&self) -> Option<i16> {
        let mut state = self.state.lock();
        if state.head == state.tail {
            return None;
        }
        let sample = state.samples[state.tail];
        state.tail = (state.tail + 1) & self.mask;
        Some(sample)
    }

    /// Pop up to `out.len()` samples, returning how many were copied
    ///
    /// Holds the lock for one contiguous drain; the copy is O(out.len())
    /// with no I/O, so the producer is stalled at most briefly.
    pub fn pop_chunk(&self, out: &mut [i16]) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        while count < out.len() && state.head != state.tail {
            out[count] = state.samples[state.tail];
            state.tail = (state.tail + 1) & self.mask;
            count += 1;
        }
        count
    }

    /// Number of samples currently buffered
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        (state.head.wrapping_sub(state.tail)) & self.mask
    }

    /// Check if the ring is empty
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        state.head == state.tail
    }

    /// Ring capacity in samples (one slot is kept free to mark fullness)
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Samples dropped by the producer since the last counter reset
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Read and clear the overrun counter (at recording finalize)
    pub fn take_overruns(&self) -> u32 {
        self.overruns.swap(0, Ordering::Relaxed)
    }

    /// Reset head and tail to zero
    ///
    /// Only valid when no recording is active; the lock protects the reset
    /// against a racing push or pop.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.head = 0;
        state.tail = 0;
        self.overruns.store(0, Ordering::Relaxed);
    }
}

impl Clone for SampleRing {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            overruns: Arc::clone(&self.overruns),
            mask: self.mask,
        }
    }
}
