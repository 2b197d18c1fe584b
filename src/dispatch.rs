//! Sample dispatcher (C3).
//!
//! A consumer thread repeatedly drains the DMA engine in small batches and
//! tag-dispatches each decoded [`SampleRecord`] by its magic word onto one of
//! a fixed set of per-peripheral `crossbeam_channel` queues; one worker
//! thread per peripheral converts ticks to nanoseconds, builds a packet, and
//! hands it to a [`Publisher`]. Grounded in the teacher's worker-thread +
//! bounded-queue idiom (one dedicated thread per logical consumer rather
//! than a shared thread pool, matching `supervised_spawn`'s per-purpose
//! naming convention) and in `crossbeam_channel` for the queues themselves.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::dma::{DmaBackend, DmaEngine};
use crate::error::CoreResult;
use crate::sync::{supervised_spawn, StopSignal};
use crate::wire::{magic, topics, AnalogChannel, SamplePayload, SampleRecord};

/// The seven fixed peripheral destinations a sample can tag-dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peripheral {
    DigitalIn,
    Imu,
    PulseOx,
    Hrm,
    RespBelt,
    PowerMeter,
    TrafficGen,
}

impl Peripheral {
    fn topic(self) -> &'static str {
        match self {
            Peripheral::DigitalIn => topics::DIGITAL_IN,
            Peripheral::Imu => topics::IMU,
            Peripheral::PulseOx => topics::PULSE_OX,
            Peripheral::Hrm => topics::HRM,
            Peripheral::RespBelt => topics::RESP_BELT,
            Peripheral::PowerMeter => topics::POWER_METER,
            Peripheral::TrafficGen => topics::TRAFFIC_GEN,
        }
    }

    fn all() -> [Peripheral; 7] {
        [
            Peripheral::DigitalIn,
            Peripheral::Imu,
            Peripheral::PulseOx,
            Peripheral::Hrm,
            Peripheral::RespBelt,
            Peripheral::PowerMeter,
            Peripheral::TrafficGen,
        ]
    }
}

/// Sink a dispatched, packetized sample is handed to. Implemented by the
/// live pub/sub transport (a Non-goal here — only this trait boundary is
/// part of the crate) and by a recording mock in tests.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, bytes: &[u8]) -> CoreResult<()>;
}

/// `{header: {experiment_id, sequence_number, timestamp_ns}, payload}`
/// packet built by a peripheral worker before publication (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePacket {
    pub experiment_id: u64,
    pub sequence_number: u64,
    pub timestamp_ns: u64,
    pub payload: SamplePayload,
}

impl SamplePacket {
    /// Flat, fixed-width little-endian encoding used for publication: not a
    /// compound-schema row (that's C8/C9's job), just enough bytes for a
    /// transport to move the packet.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&self.experiment_id.to_le_bytes());
        out.extend_from_slice(&self.sequence_number.to_le_bytes());
        out.extend_from_slice(&self.timestamp_ns.to_le_bytes());
        match self.payload {
            SamplePayload::Digital { direction } => out.extend_from_slice(&direction.to_le_bytes()),
            SamplePayload::Imu { fsync, gyro, accel } => {
                out.extend_from_slice(&fsync.to_le_bytes());
                for g in gyro {
                    out.extend_from_slice(&g.to_le_bytes());
                }
                for a in accel {
                    out.extend_from_slice(&a.to_le_bytes());
                }
            }
            SamplePayload::Analog { value } => out.extend_from_slice(&value.to_le_bytes()),
            SamplePayload::TrafficGen => {}
        }
        out
    }
}

fn peripheral_for(record: &SampleRecord) -> Option<Peripheral> {
    match record.kind {
        magic::DIGITAL => Some(Peripheral::DigitalIn),
        magic::IMU => Some(Peripheral::Imu),
        magic::ANALOG => match AnalogChannel::from_device_id(record.device_id) {
            Some(AnalogChannel::PulseOx) => Some(Peripheral::PulseOx),
            Some(AnalogChannel::Hrm) => Some(Peripheral::Hrm),
            Some(AnalogChannel::RespBelt) => Some(Peripheral::RespBelt),
            Some(AnalogChannel::PowerMeter) => Some(Peripheral::PowerMeter),
            None => None,
        },
        magic::TRAFFIC_GEN => Some(Peripheral::TrafficGen),
        _ => None,
    }
}

const PERIPHERAL_QUEUE_DEPTH: usize = 4096;
const BATCH_SIZE: usize = 64;
const BATCH_TIMEOUT: Duration = Duration::from_millis(1);
const WORKER_WAIT: Duration = Duration::from_millis(1);

/// Owns the per-peripheral queues and the worker threads draining them;
/// constructed once per acquisition session.
pub struct SampleDispatcher {
    senders: Vec<(Peripheral, Sender<SampleRecord>)>,
    worker_handles: Vec<std::thread::JoinHandle<()>>,
}

impl SampleDispatcher {
    /// Spawn one worker thread per [`Peripheral`], each publishing to
    /// `publisher` under its fixed topic, and counting up `experiment_id`'s
    /// packets with its own monotonic sequence number.
    pub fn start(experiment_id: u64, publisher: std::sync::Arc<dyn Publisher>, stop: StopSignal) -> Self {
        let mut senders = Vec::new();
        let mut worker_handles = Vec::new();

        for peripheral in Peripheral::all() {
            let (tx, rx): (Sender<SampleRecord>, Receiver<SampleRecord>) = bounded(PERIPHERAL_QUEUE_DEPTH);
            let publisher = publisher.clone();
            let stop = stop.clone();
            let thread_name = format!("dispatch-worker-{}", peripheral.topic());
            let handle = supervised_spawn(thread_name, move || {
                peripheral_worker(peripheral, rx, publisher.as_ref(), experiment_id, stop)
            });
            senders.push((peripheral, tx));
            worker_handles.push(handle);
        }

        SampleDispatcher { senders, worker_handles }
    }

    /// Run the dispatcher's consumer loop over `engine`, tag-dispatching
    /// every drained sample to its peripheral queue, until `stop` is
    /// requested and the last batch drained was empty.
    pub fn run<B: DmaBackend>(&self, engine: &mut DmaEngine<B>, stop: &StopSignal) -> CoreResult<()> {
        loop {
            let stopping = stop.is_stopped();
            let mut drained = 0usize;
            engine.consume_samples(
                |batch| {
                    drained = batch.len();
                    for record in batch {
                        if let Some(peripheral) = peripheral_for(record) {
                            if let Some((_, tx)) = self.senders.iter().find(|(p, _)| *p == peripheral) {
                                let _ = tx.send(*record);
                            }
                        }
                    }
                },
                BATCH_SIZE,
                BATCH_TIMEOUT,
            )?;

            if stopping && drained == 0 {
                return Ok(());
            }
        }
    }

    /// Drop every sender (signalling workers to drain and exit once their
    /// queues empty) and join all worker threads.
    pub fn shutdown(self) {
        drop(self.senders);
        for handle in self.worker_handles {
            let _ = handle.join();
        }
    }
}

fn peripheral_worker(
    peripheral: Peripheral,
    rx: Receiver<SampleRecord>,
    publisher: &dyn Publisher,
    experiment_id: u64,
    stop: StopSignal,
) -> CoreResult<()> {
    let mut sequence_number = 0u64;
    loop {
        match rx.recv_timeout(WORKER_WAIT) {
            Ok(record) => {
                let packet = SamplePacket {
                    experiment_id,
                    sequence_number,
                    timestamp_ns: record.timestamp_ns(),
                    payload: record.payload,
                };
                sequence_number += 1;
                publisher.publish(peripheral.topic(), &packet.to_bytes())?;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if stop.is_stopped() {
                    return Ok(());
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::dma::MockDmaBackend;
    use std::sync::{Arc, Mutex};

    struct RecordingPublisher {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, bytes: &[u8]) -> CoreResult<()> {
            self.published.lock().unwrap().push((topic.to_string(), bytes.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn dispatches_traffic_gen_to_its_topic_and_stops_on_empty_batch() {
        let backend = MockDmaBackend::new(16);
        let mut engine = DmaEngine::new(backend);
        engine.init().unwrap();
        engine.start().unwrap();
        engine.backend_mut().push_traffic_gen_samples(5, 100);

        let publisher = Arc::new(RecordingPublisher { published: Mutex::new(Vec::new()) });
        let stop = StopSignal::new();
        let dispatcher = SampleDispatcher::start(1, publisher.clone(), stop.clone());

        stop.notify_stop();
        dispatcher.run(&mut engine, &stop).unwrap();
        dispatcher.shutdown();

        std::thread::sleep(Duration::from_millis(20));
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 5);
        assert!(published.iter().all(|(topic, _)| topic == topics::TRAFFIC_GEN));
    }

    #[test]
    fn analog_device_id_selects_peripheral() {
        let record = SampleRecord {
            kind: magic::ANALOG,
            size: SampleRecord::WIRE_SIZE as u32,
            timestamp_ticks: 0,
            device_id: 2,
            payload: SamplePayload::Analog { value: 123 },
        };
        assert_eq!(peripheral_for(&record), Some(Peripheral::RespBelt));
    }

    #[test]
    fn unknown_magic_has_no_peripheral() {
        let record = SampleRecord {
            kind: 0xDEAD_BEEF,
            size: 0,
            timestamp_ticks: 0,
            device_id: 0,
            payload: SamplePayload::TrafficGen,
        };
        assert_eq!(peripheral_for(&record), None);
    }
}
