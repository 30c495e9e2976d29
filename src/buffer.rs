//! Sample buffer between the capture callback and the frame reader.
//!
//! The audio backend's real-time callback pushes samples in, the pipeline
//! side pulls exactly one frame's worth out at a time. Built on a ring buffer
//! with separate producer and consumer halves so neither side contends on
//! the other's lock.

use crate::config::OverflowBehavior;
use crate::frame::AudioSample;
use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Shared sample buffer with a configurable overflow policy.
///
/// When a write outruns the reader the oldest samples are discarded so that
/// capture continues either way; `OverflowBehavior::Report` additionally arms
/// a flag that the reader can pick up and surface as a transient error.
pub struct SampleBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    overflow: OverflowBehavior,
    dropped_total: AtomicU64,
    overflowed: AtomicBool,
}

impl SampleBuffer {
    pub fn new(capacity: usize, overflow: OverflowBehavior) -> Self {
        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            overflow,
            dropped_total: AtomicU64::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Append samples, discarding the oldest data if there is no room.
    /// Returns the number of samples dropped to make room.
    ///
    /// Drop-oldest holds unconditionally: a write larger than the whole
    /// buffer keeps only the newest `capacity` samples of the input, and
    /// everything older than them counts as dropped.
    pub fn write(&self, samples: &[AudioSample]) -> usize {
        let mut producer = self.producer.lock().unwrap();
        let capacity = producer.capacity().get();

        let (truncated, newest) = if samples.len() > capacity {
            (samples.len() - capacity, &samples[samples.len() - capacity..])
        } else {
            (0, samples)
        };

        let vacant = producer.vacant_len();
        let mut dropped = truncated;

        if newest.len() > vacant {
            let to_skip = newest.len() - vacant;
            let mut consumer = self.consumer.lock().unwrap();
            consumer.skip(to_skip);
            drop(consumer);
            dropped += to_skip;
        }

        if dropped > 0 {
            self.dropped_total.fetch_add(dropped as u64, Ordering::Relaxed);
            if self.overflow == OverflowBehavior::Report {
                self.overflowed.store(true, Ordering::Release);
            }

            warn!("capture buffer full, dropped {} oldest samples", dropped);
        }

        producer.push_slice(newest);
        dropped
    }

    /// Pop exactly `count` samples, or `None` if that many are not buffered
    /// yet.
    pub fn read_exact(&self, count: usize) -> Option<Vec<AudioSample>> {
        let mut consumer = self.consumer.lock().unwrap();

        if consumer.occupied_len() < count {
            return None;
        }

        let mut samples = vec![0; count];
        let read = consumer.pop_slice(&mut samples);
        debug_assert_eq!(read, count);
        Some(samples)
    }

    /// Take the pending overflow report, if the policy is `Report` and an
    /// overflow happened since the last call. Returns the total number of
    /// samples dropped so far.
    pub fn take_overflow(&self) -> Option<u64> {
        if self.overflowed.swap(false, Ordering::AcqRel) {
            Some(self.dropped_total.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Total samples discarded over the buffer's lifetime.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        let consumer = self.consumer.lock().unwrap();
        consumer.capacity().get()
    }

    pub fn clear(&self) {
        let mut consumer = self.consumer.lock().unwrap();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_exact() {
        let buffer = SampleBuffer::new(1000, OverflowBehavior::DropOldest);
        let samples: Vec<i16> = (0..100).collect();

        assert_eq!(buffer.write(&samples), 0);
        assert_eq!(buffer.len(), 100);

        let frame = buffer.read_exact(50).unwrap();
        assert_eq!(frame.len(), 50);
        assert_eq!(frame[0], 0);
        assert_eq!(frame[49], 49);
        assert_eq!(buffer.len(), 50);
    }

    #[test]
    fn test_read_exact_requires_full_frame() {
        let buffer = SampleBuffer::new(1000, OverflowBehavior::DropOldest);
        buffer.write(&[1; 30]);

        assert!(buffer.read_exact(31).is_none());
        // Partial reads must not consume anything
        assert_eq!(buffer.len(), 30);
        assert!(buffer.read_exact(30).is_some());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let buffer = SampleBuffer::new(100, OverflowBehavior::DropOldest);
        buffer.write(&[1; 100]);

        let dropped = buffer.write(&[2; 40]);
        assert_eq!(dropped, 40);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.dropped_samples(), 40);

        // The oldest samples went away; the head of the buffer is still 1s,
        // the tail is the new 2s
        let data = buffer.read_exact(100).unwrap();
        assert_eq!(data[0], 1);
        assert_eq!(data[99], 2);
    }

    #[test]
    fn test_oversized_write_keeps_newest_samples() {
        let buffer = SampleBuffer::new(10, OverflowBehavior::DropOldest);
        buffer.write(&[1; 5]);

        // 25 incoming samples into a 10-slot buffer: the 5 buffered samples
        // and the oldest 15 of the input go away, the newest 10 survive
        let incoming: Vec<i16> = (100..125).collect();
        let dropped = buffer.write(&incoming);

        assert_eq!(dropped, 20);
        assert_eq!(buffer.dropped_samples(), 20);
        assert_eq!(buffer.len(), 10);

        let data = buffer.read_exact(10).unwrap();
        assert_eq!(data, (115..125).collect::<Vec<i16>>());
    }

    #[test]
    fn test_drop_oldest_does_not_report() {
        let buffer = SampleBuffer::new(10, OverflowBehavior::DropOldest);
        buffer.write(&[1; 20]);

        assert_eq!(buffer.dropped_samples(), 10);
        assert!(buffer.take_overflow().is_none());
    }

    #[test]
    fn test_report_policy_arms_flag_once() {
        let buffer = SampleBuffer::new(10, OverflowBehavior::Report);
        buffer.write(&[1; 25]);

        assert_eq!(buffer.take_overflow(), Some(15));
        // Flag is consumed by the first take
        assert!(buffer.take_overflow().is_none());
    }

    #[test]
    fn test_clear() {
        let buffer = SampleBuffer::new(100, OverflowBehavior::DropOldest);
        buffer.write(&[1; 60]);
        assert_eq!(buffer.len(), 60);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 100);
    }
}
