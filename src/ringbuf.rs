//! Lock-free single-producer/single-consumer ring buffer (C1).
//!
//! Joins exactly one producer thread to exactly one consumer thread. Unlike
//! the teacher's byte-oriented, mmap-backed ring (built for cross-process
//! live-tap streaming), this is a typed slot queue: each slot holds one
//! `Item` constructed once at buffer creation and reused in place across the
//! buffer's lifetime, which is the shape this component's callers need (a
//! fixed-size `RecordBuffer` per slot, a `Frame` struct, etc).
//!
//! Rather than tracking slot indices directly (which needs a sentinel value
//! to tell "freshly reset" apart from "one item present"), cursors here are
//! monotonically increasing sequence counters; the slot index is always
//! `sequence % capacity`. Two counters that never wrap back on themselves
//! make full/empty a single subtraction, and the sentinel collapses to the
//! ordinary initial state `write_seq == read_seq == 0`. Atomic ordering
//! still follows the teacher's discipline: the write cursor is stored with
//! `Release` and loaded with `Acquire` (and vice versa for the read cursor),
//! so that by the time a consumer observes an advanced write cursor, all
//! writes to the slot it now owns are visible. Cursors are padded to a cache
//! line apart to avoid false sharing between the two threads.
//!
//! The write cursor publishes one slot late: `maybe_advance_write` hands back
//! `&mut Item` before the caller has written into it, so incrementing
//! `write_seq` at that point would make the (still-empty or stale) slot
//! observable to the reader before the caller's write lands (§4.1). Instead
//! each write call first publishes whichever slot it *previously* handed out
//! (by then the caller has had a full call's worth of time to finish writing
//! it), then hands out a fresh one. A producer that is done for good calls
//! [`RingBuffer::flush_write`] once to publish its last slot without needing
//! one more (otherwise pointless) write.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CoreResult, DaqCoreError};

#[repr(align(64))]
struct CachePadded<T>(T);

/// A lock-free SPSC ring of `capacity` fixed slots holding `Item`.
///
/// Construction requires at least 3 slots: with only 2, a writer that has
/// written and a reader that has not yet advanced can never distinguish
/// "full" from "empty" without an extra flag, which in turn reintroduces a
/// race between the two threads. Three or more slots resolve this with pure
/// sequence-counter comparison.
pub struct RingBuffer<Item> {
    slots: Box<[UnsafeCell<Item>]>,
    capacity: u64,
    write_seq: CachePadded<AtomicU64>,
    read_seq: CachePadded<AtomicU64>,
    /// Sequence number of the write slot most recently handed out but not
    /// yet published via `write_seq`, or `None` once it has been. Touched
    /// only by the producer thread, so it needs no atomic of its own.
    pending_write: UnsafeCell<Option<u64>>,
}

// SAFETY: `slots` is only ever mutated through the slot currently owned by
// the producer (between `maybe_advance_write`/`advance_write` calls) or read
// through the slot currently owned by the consumer (between `advance_read`
// calls); the sequence-counter protocol below ensures the two threads never
// access the same slot concurrently. `pending_write` is only ever touched
// from inside `maybe_advance_write`/`flush_write`/`reset`, i.e. only by the
// producer thread (or, for `reset`, before either thread is running).
unsafe impl<Item: Send> Sync for RingBuffer<Item> {}
unsafe impl<Item: Send> Send for RingBuffer<Item> {}

impl<Item> RingBuffer<Item> {
    /// Build a ring with `capacity` slots, each initialized by calling
    /// `make_item()` once per slot. `capacity` must be at least 3.
    pub fn new(capacity: usize, mut make_item: impl FnMut() -> Item) -> Self {
        assert!(capacity >= 3, "SPSC ring requires at least 3 slots (N=2 deadlocks)");
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(make_item()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        RingBuffer {
            slots,
            capacity: capacity as u64,
            write_seq: CachePadded(AtomicU64::new(0)),
            read_seq: CachePadded(AtomicU64::new(0)),
            pending_write: UnsafeCell::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Publish whichever slot is currently pending, if any. Producer-thread
    /// only.
    fn publish_pending(&self) {
        // SAFETY: only the producer thread ever touches `pending_write`.
        let pending = unsafe { &mut *self.pending_write.get() };
        if let Some(seq) = pending.take() {
            self.write_seq.0.store(seq.wrapping_add(1), Ordering::Release);
        }
    }

    /// Commit the previously handed-out write slot (if any) and hand back
    /// the next one to write into, or `None` if the ring is full (every
    /// slot is currently outstanding, not yet read).
    ///
    /// The slot returned here is not yet visible to the reader: publishing
    /// it is deferred to the next call to this method, [`Self::advance_write`],
    /// or [`Self::flush_write`], so that the caller has a chance to finish
    /// writing into it first.
    pub fn maybe_advance_write(&self) -> Option<&mut Item> {
        self.publish_pending();

        let write = self.write_seq.0.load(Ordering::Relaxed);
        let read = self.read_seq.0.load(Ordering::Acquire);
        if write.wrapping_sub(read) >= self.capacity {
            return None;
        }
        let idx = (write % self.capacity) as usize;
        // SAFETY: only the producer thread ever touches `pending_write`.
        unsafe { *self.pending_write.get() = Some(write) };
        // SAFETY: this slot is not owned by the reader: the capacity check
        // above guarantees fewer than `capacity` outstanding writes, so slot
        // `idx` was last read at least one full lap ago (or never).
        Some(unsafe { &mut *self.slots[idx].get() })
    }

    /// Same as [`Self::maybe_advance_write`], but reports overrun as an
    /// error instead of `None`.
    pub fn advance_write(&self) -> CoreResult<&mut Item> {
        self.maybe_advance_write()
            .ok_or_else(|| DaqCoreError::ResourceExhaustion("ring buffer overrun".into()))
    }

    /// Publish the most recently handed-out write slot without claiming a
    /// new one. A producer that is done writing for good calls this once so
    /// its last slot becomes readable; otherwise it would stay pending
    /// forever, since there is no further write call to piggyback the
    /// publish on.
    pub fn flush_write(&self) {
        self.publish_pending();
    }

    /// Release the previously handed-out read slot (if any) and hand back
    /// the next readable one, or `None` if the writer has not produced
    /// anything new (underflow).
    pub fn advance_read(&self) -> Option<&Item> {
        let read = self.read_seq.0.load(Ordering::Relaxed);
        let write = self.write_seq.0.load(Ordering::Acquire);
        if read == write {
            return None;
        }
        let idx = (read % self.capacity) as usize;
        self.read_seq.0.store(read.wrapping_add(1), Ordering::Release);
        // SAFETY: `idx` has already been published by the writer (the
        // Acquire load of `write` above observed it), and the writer cannot
        // reuse it until it wraps back around past our new `read` cursor.
        Some(unsafe { &*self.slots[idx].get() })
    }

    /// Reset both cursors to the empty state. Not safe to call concurrently
    /// with an in-progress write or read from another thread; intended for
    /// use before a producer/consumer pair starts, or after both have been
    /// joined.
    pub fn reset(&self) {
        self.write_seq.0.store(0, Ordering::Release);
        self.read_seq.0.store(0, Ordering::Release);
        // SAFETY: reset is documented as not concurrent with either thread.
        unsafe { *self.pending_write.get() = None };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "at least 3 slots")]
    fn rejects_two_slots() {
        RingBuffer::new(2, || 0u32);
    }

    #[test]
    fn fifo_order_with_three_slots() {
        // Scenario S4: three writes, two reads, rotation, final underflow.
        // The 4th write is only ever handed out, never flushed, so it must
        // not become readable: the next read after draining 3 is None.
        let ring: RingBuffer<u32> = RingBuffer::new(3, || 0);

        *ring.maybe_advance_write().unwrap() = 1;
        *ring.maybe_advance_write().unwrap() = 2;
        *ring.maybe_advance_write().unwrap() = 3;

        assert_eq!(*ring.advance_read().unwrap(), 1);
        assert_eq!(*ring.advance_read().unwrap(), 2);

        // Rotation: a fourth write succeeds now that slot 0 (value 1) has
        // been read and is free again.
        *ring.maybe_advance_write().unwrap() = 4;

        assert_eq!(*ring.advance_read().unwrap(), 3);
        assert!(ring.advance_read().is_none());
    }

    #[test]
    fn overrun_after_n_writes_without_reads() {
        // Universal invariant 1: after exactly N successful writes with no
        // reads, the next write overflows; after one read, exactly one more
        // write becomes available.
        let ring: RingBuffer<u32> = RingBuffer::new(4, || 0);
        for i in 0..4 {
            assert!(ring.maybe_advance_write().is_some(), "write {i} should succeed");
        }
        assert!(ring.maybe_advance_write().is_none(), "5th write must overrun");

        assert!(ring.advance_read().is_some());
        assert!(ring.maybe_advance_write().is_some(), "one write frees up after one read");
        assert!(ring.maybe_advance_write().is_none());
    }

    #[test]
    fn advance_write_reports_overrun_error() {
        let ring: RingBuffer<u32> = RingBuffer::new(3, || 0);
        ring.advance_write().unwrap();
        ring.advance_write().unwrap();
        ring.advance_write().unwrap();
        assert!(matches!(ring.advance_write(), Err(DaqCoreError::ResourceExhaustion(_))));
    }

    #[test]
    fn reset_returns_to_empty_state() {
        let ring: RingBuffer<u32> = RingBuffer::new(3, || 0);
        ring.maybe_advance_write();
        ring.advance_read();
        ring.reset();
        assert!(ring.advance_read().is_none());
    }

    #[test]
    fn producer_consumer_threads_preserve_order() {
        use std::sync::Arc;
        let ring: Arc<RingBuffer<u64>> = Arc::new(RingBuffer::new(8, || 0));
        let producer_ring = ring.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..10_000u64 {
                loop {
                    if let Some(slot) = producer_ring.maybe_advance_write() {
                        *slot = i;
                        break;
                    }
                    std::thread::yield_now();
                }
            }
            producer_ring.flush_write();
        });

        let mut seen = Vec::with_capacity(10_000);
        while seen.len() < 10_000 {
            if let Some(v) = ring.advance_read() {
                seen.push(*v);
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..10_000u64).collect::<Vec<_>>());
    }
}
