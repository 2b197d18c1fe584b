//! # pandobox-daq-core
//!
//! The acquisition, buffering, and archival core for a mixed time-tagged
//! photon-counting / externally-triggered camera / FPGA sample-box
//! instrument. This crate is deliberately scoped to the data-path pipeline
//! described in its design document; the pub/sub transport, the reporting
//! façade, device-vendor SDKs, the top-level CLI/config loader, and the
//! rendering UI are all external collaborators reached only through the
//! narrow trait boundaries defined here ([`dispatch::Publisher`],
//! [`frame::FrameSource`], [`frame::FrameArchiveSink`]).
//!
//! ## Crate structure
//!
//! - [`ringbuf`] — the lock-free SPSC ring (C1) joining every
//!   producer/consumer thread pair in the pipeline.
//! - [`dma`] — the scatter-gather DMA engine (C2) over the FPGA sample box,
//!   behind the [`dma::DmaBackend`] abstraction.
//! - [`dispatch`] — the sample dispatcher (C3): tag-dispatch to per-peripheral
//!   queues and publication.
//! - [`tagdecode`] — the time-tag decoder state machine (C4) for the P/H/M
//!   device families in T2/T3 mode.
//! - [`window`] — the binned time-window driver (C5) invoking the decoder and
//!   assembling per-channel timestamp streams.
//! - [`rollavg`] — the rolling per-pixel image averager (C6).
//! - [`frame`] — the frame handler (C7): dual-sink camera frame fan-out and
//!   the externally-triggered grab-loop timing invariants.
//! - [`archive`] — the archive writer (C8): chunked hierarchical-binary
//!   tables and the three packet-logger layouts built on them.
//! - [`schema`] — the schema transcoder (C9): payload-to-compound-row field
//!   mapping.
//! - [`wire`] — wire-stable constants and types shared across the above: the
//!   sample frame layout, the DMA memory map, UIO device resolution, and
//!   publisher topic strings.
//! - [`sync`] — shared concurrency primitives: [`sync::StopSignal`],
//!   [`sync::ThreadMonitor`], [`sync::supervised_spawn`], and the
//!   [`sync::LockAdapter`] over the non-reentrant archive backend.
//! - [`error`] — the crate-wide [`error::DaqCoreError`] kind enum and
//!   [`error::CoreResult`] alias.
//! - [`config`] — the engine configuration surface loaded via `figment`.
//! - [`telemetry`] — `tracing`/`tracing-subscriber` initialization.
//! - [`mock`] — in-process stand-ins for the real hardware (DMA controller,
//!   time-tag FIFO, camera frame source), used by this crate's own tests and
//!   by the `replay_session` example binary; not a substitute for a real
//!   vendor SDK integration.

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod dma;
pub mod error;
pub mod frame;
pub mod mock;
pub mod ringbuf;
pub mod rollavg;
pub mod schema;
pub mod sync;
pub mod tagdecode;
pub mod telemetry;
pub mod window;
pub mod wire;

pub use error::{CoreResult, DaqCoreError};
