//! Error kinds shared across the acquisition, decoding, and archival pipeline.
//!
//! `DaqCoreError` is deliberately a small, closed enum of *kinds* rather than a
//! type per failure site: every fallible operation in this crate ultimately
//! fails in one of a handful of ways (a piece of hardware misbehaved, a wire
//! record didn't parse, two timestamps disagreed, a wait exceeded its budget,
//! a value was out of range, persisted state disagrees with configuration or
//! schema, a sequence number was skipped, or a bounded resource ran out). Code
//! that needs richer context layers `anyhow` on top at the application
//! boundary, matching how the rest of the pipeline separates library errors
//! from glue-level ones.

use thiserror::Error;

/// Convenience alias for results using [`DaqCoreError`].
pub type CoreResult<T> = std::result::Result<T, DaqCoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqCoreError {
    /// FIFO full, descriptor SG-internal-error, decode error, slave error,
    /// missing trigger, dropped frame, framegrabber overflow, or a trigger
    /// already running. Fatal to the current acquisition.
    #[error("hardware fault: {0}")]
    HardwareFault(String),

    /// Magic mismatch, bad record type, unknown `special` channel, or PTU
    /// header parse failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A normal tag or marker arrived with a macro time less than the last
    /// one observed on its channel or marker stream.
    #[error("monotonicity violation on channel {channel}: {message}")]
    Monotonicity { channel: u32, message: String },

    /// A bounded wait (window driver, first-frame, per-frame grab) exceeded
    /// its budget.
    #[error("stall: {0}")]
    Stall(String),

    /// A control value fell outside the hardware's accepted range.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Persisted archive state disagrees with the running configuration
    /// (mock file bin size, missing expected channel, ...).
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),

    /// A packet's shape disagrees with the schema captured from the first
    /// packet of its kind (repeated field length, extra channel, ...).
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A logger observed a non-sequential packet sequence number.
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    /// A bounded resource (SPSC ring, software framebuffer) ran out of room.
    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),
}

impl DaqCoreError {
    /// Short, stable name for the error kind, used in structured log events
    /// and in the `ThreadMonitor` crash report (see [`crate::sync::ThreadMonitor`]).
    pub fn kind_name(&self) -> &'static str {
        match self {
            DaqCoreError::HardwareFault(_) => "HardwareFault",
            DaqCoreError::Protocol(_) => "Protocol",
            DaqCoreError::Monotonicity { .. } => "Monotonicity",
            DaqCoreError::Stall(_) => "Stall",
            DaqCoreError::OutOfRange(_) => "OutOfRange",
            DaqCoreError::ConfigMismatch(_) => "ConfigMismatch",
            DaqCoreError::SchemaMismatch(_) => "SchemaMismatch",
            DaqCoreError::SequenceGap { .. } => "SequenceGap",
            DaqCoreError::ResourceExhaustion(_) => "ResourceExhaustion",
        }
    }
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for DaqCoreError {
    fn from(err: hdf5::Error) -> Self {
        DaqCoreError::HardwareFault(format!("hdf5: {err}"))
    }
}

impl From<std::io::Error> for DaqCoreError {
    fn from(err: std::io::Error) -> Self {
        DaqCoreError::HardwareFault(format!("io: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_matches_variant() {
        let err = DaqCoreError::SequenceGap { expected: 4, got: 6 };
        assert_eq!(err.kind_name(), "SequenceGap");
        assert_eq!(err.to_string(), "sequence gap: expected 4, got 6");
    }

    #[test]
    fn io_error_becomes_hardware_fault() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DaqCoreError = io.into();
        assert_eq!(err.kind_name(), "HardwareFault");
    }
}
