//! Criterion benchmarks for the SPSC ring buffer's hot paths (C1).
//!
//! Grounded on the teacher's `benches/ring_buffer.rs` shape (throughput
//! groups over data sizes, a dedicated concurrent-writer group, a
//! position-query micro-benchmark), adapted from the teacher's
//! memory-mapped byte ring to this crate's typed slot queue.
//!
//! Run with: cargo bench --bench ring_buffer

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use daqcore::ringbuf::RingBuffer;

/// One fixed-size slot, standing in for the pipeline's actual payload types
/// (`RecordBuffer`, `CameraFrame`, ...) without pulling in their
/// construction cost.
struct Slot {
    data: Vec<u8>,
}

fn single_threaded_write_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_write");

    for (name, size) in [("64B", 64usize), ("1KB", 1024), ("16KB", 16 * 1024), ("64KB", 64 * 1024)] {
        let ring: RingBuffer<Slot> = RingBuffer::new(64, || Slot { data: vec![0u8; size] });
        let source = vec![0xAAu8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("write", name), &size, |b, _| {
            b.iter(|| {
                let slot = ring.advance_write().unwrap();
                slot.data.copy_from_slice(black_box(&source));
                // Drain immediately so a 64-slot ring never overruns across
                // however many iterations criterion decides to run.
                ring.advance_read();
            });
        });
    }

    group.finish();
}

fn single_threaded_read_latency(c: &mut Criterion) {
    let ring: RingBuffer<Slot> = RingBuffer::new(64, || Slot { data: vec![0u8; 4096] });

    c.bench_function("ring_buffer_advance_read_empty", |b| {
        b.iter(|| {
            black_box(ring.advance_read());
        });
    });

    c.bench_function("ring_buffer_advance_read_populated", |b| {
        b.iter_batched(
            || {
                ring.advance_write().unwrap();
            },
            |()| black_box(ring.advance_read()),
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark producer/consumer throughput with one writer thread and one
/// reader thread contending on the same ring, the shape the ring is
/// actually used in (C2 producer thread, C5 window-driver consumer thread).
fn producer_consumer_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_concurrent");

    for item_count in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("produce_consume", item_count), &item_count, |b, &item_count| {
            b.iter(|| {
                let ring: Arc<RingBuffer<u64>> = Arc::new(RingBuffer::new(256, || 0u64));
                let producer_ring = ring.clone();
                let producer = thread::spawn(move || {
                    for i in 0..item_count as u64 {
                        loop {
                            if let Some(slot) = producer_ring.maybe_advance_write() {
                                *slot = i;
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                    producer_ring.flush_write();
                });

                let mut seen = 0usize;
                while seen < item_count {
                    if ring.advance_read().is_some() {
                        seen += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                producer.join().unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark rotation through a small (near-minimum) ring, the steady-state
/// access pattern once the ring has wrapped at least once.
fn wrap_around_rotation(c: &mut Criterion) {
    let ring: RingBuffer<u64> = RingBuffer::new(3, || 0);
    c.bench_function("ring_buffer_wrap_rotation", |b| {
        b.iter(|| {
            *ring.advance_write().unwrap() = black_box(1);
            black_box(ring.advance_read());
        });
    });
}

criterion_group!(
    benches,
    single_threaded_write_throughput,
    single_threaded_read_latency,
    producer_consumer_throughput,
    wrap_around_rotation
);
criterion_main!(benches);
