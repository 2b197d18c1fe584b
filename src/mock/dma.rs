//! In-process stand-in for the FPGA sample box's DMA controller.
//!
//! Implements [`DmaBackend`] over plain heap buffers instead of a `/dev/uio*`
//! mapping, so the rest of the pipeline (C2-C3) can be exercised without
//! hardware. Grounded in the teacher's `hardware::mock` capability-trait
//! implementations: a small, rate-configurable synthetic source standing in
//! for the vendor SDK the core treats as an external collaborator.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::dma::{DescriptorStatus, DmaBackend};
use crate::error::CoreResult;
use crate::wire::{magic, SampleRecord};

pub struct MockDmaBackend {
    descriptor_count: usize,
    payloads: Box<[UnsafeCell<[u8; SampleRecord::WIRE_SIZE]>]>,
    complete: Box<[AtomicBool]>,
    write_cursor: AtomicUsize,
    sg_error: AtomicBool,
    pending_interrupts: AtomicU32,
}

// SAFETY: payload slots are written by `push_sample` (test/demo driver code,
// single logical writer) and read back only after their `complete` flag is
// observed true, mirroring the real descriptor ring's single-writer /
// single-reader discipline.
unsafe impl Sync for MockDmaBackend {}

impl MockDmaBackend {
    pub fn new(descriptor_count: usize) -> Self {
        let payloads = (0..descriptor_count)
            .map(|_| UnsafeCell::new([0u8; SampleRecord::WIRE_SIZE]))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let complete = (0..descriptor_count)
            .map(|_| AtomicBool::new(false))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        MockDmaBackend {
            descriptor_count,
            payloads,
            complete,
            write_cursor: AtomicUsize::new(0),
            sg_error: AtomicBool::new(false),
            pending_interrupts: AtomicU32::new(0),
        }
    }

    /// Push one raw 28-byte sample record into the next descriptor. Fails
    /// to advance (sets the sticky SG-internal-error bit) if the tail
    /// descriptor is still marked complete, i.e. the consumer hasn't kept
    /// up — mirroring the real controller's non-cyclic-mode overrun.
    pub fn push_sample(&self, bytes: [u8; SampleRecord::WIRE_SIZE]) {
        let idx = self.write_cursor.load(Ordering::Relaxed);
        if self.complete[idx].load(Ordering::Acquire) {
            self.sg_error.store(true, Ordering::Relaxed);
            return;
        }
        // SAFETY: this descriptor's `complete` flag is false, so the
        // consumer is not currently reading it.
        unsafe { *self.payloads[idx].get() = bytes };
        self.complete[idx].store(true, Ordering::Release);
        self.write_cursor
            .store((idx + 1) % self.descriptor_count, Ordering::Relaxed);
        self.pending_interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_traffic_gen_samples(&self, count: usize, timestamp_step_ticks: u64) {
        for i in 0..count {
            self.push_sample(encode_traffic_gen(i as u64 * timestamp_step_ticks));
        }
    }

    pub fn force_sg_internal_error(&self) {
        self.sg_error.store(true, Ordering::Relaxed);
    }
}

fn encode_traffic_gen(timestamp_ticks: u64) -> [u8; SampleRecord::WIRE_SIZE] {
    let mut bytes = [0u8; SampleRecord::WIRE_SIZE];
    bytes[0..4].copy_from_slice(&magic::TRAFFIC_GEN.to_le_bytes());
    bytes[4..8].copy_from_slice(&(SampleRecord::WIRE_SIZE as u32).to_le_bytes());
    bytes[8..16].copy_from_slice(&timestamp_ticks.to_le_bytes());
    bytes[16..18].copy_from_slice(&0u16.to_le_bytes());
    bytes
}

impl DmaBackend for MockDmaBackend {
    fn init(&mut self, descriptor_count: usize) -> CoreResult<()> {
        self.descriptor_count = descriptor_count.min(self.descriptor_count);
        for flag in self.complete.iter() {
            flag.store(false, Ordering::Relaxed);
        }
        self.write_cursor.store(0, Ordering::Relaxed);
        self.sg_error.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn start(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn wait_for_interrupt(&self, timeout: Duration) -> u32 {
        let pending = self.pending_interrupts.swap(0, Ordering::Relaxed);
        if pending == 0 {
            std::thread::sleep(timeout.min(Duration::from_millis(5)));
        }
        pending
    }

    fn sg_internal_error(&self) -> bool {
        self.sg_error.load(Ordering::Relaxed)
    }

    fn descriptor_status(&self, idx: usize) -> DescriptorStatus {
        DescriptorStatus {
            complete: self.complete[idx].load(Ordering::Acquire),
            decode_error: false,
            slave_error: false,
            internal_error: false,
            transferred_bytes: SampleRecord::WIRE_SIZE as u32,
        }
    }

    fn descriptor_payload(&self, idx: usize) -> &[u8] {
        // SAFETY: only called by the engine after observing `complete` for
        // this index, matching the single-reader window documented above.
        unsafe { &*self.payloads[idx].get() }
    }

    fn reset_descriptor(&mut self, idx: usize) {
        self.complete[idx].store(false, Ordering::Release);
    }
}
