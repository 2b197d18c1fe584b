//! Engine configuration surface.
//!
//! Mirrors the teacher's V4 configuration system: a TOML file overlaid with
//! environment variables via `figment`, deserialized into a typed,
//! `serde`-derived tree, then validated once at load time so that downstream
//! code can treat an `EngineConfig` as already-correct. Validation failures
//! surface as [`DaqCoreError::OutOfRange`] or [`DaqCoreError::ConfigMismatch`]
//! rather than panics.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreResult, DaqCoreError};

/// Device family selection (§6.7 of the configuration surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    HydraT2,
    HydraT3,
    MultiT2,
    MultiT3,
    PicoT2,
    PicoT3,
    Histogrammer,
    Camera,
    MockCamera,
}

/// Per-channel trigger / constant-fraction-discriminator table entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: u8,
    /// CFD level in millivolts; hardware-accepted range is 0..=1000.
    pub cfd_level_mv: i32,
    /// Sync divider; must be one of {1, 2, 4, 8, 16}.
    pub sync_divider: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub exposure_us: u32,
    pub frame_trigger_period_10ns: u64,
    pub roi_x: u32,
    pub roi_y: u32,
    pub roi_w: u32,
    pub roi_h: u32,
    #[serde(default)]
    pub test_pattern: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub log_raw_data: bool,
    #[serde(default = "default_true")]
    pub log_analyzed_data: bool,
    #[serde(default = "default_true")]
    pub log_peripheral_data: bool,
    #[serde(default = "default_true")]
    pub publish_raw_data: bool,
    pub output_dir: String,
    #[serde(default)]
    pub mock_file: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub device: DeviceKind,
    pub bin_size_ns: u64,
    pub enabled_channels: Vec<u8>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    pub laser_sync_period_ps: u64,
    #[serde(default)]
    pub camera: Option<CameraConfig>,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file, overlaid with `DAQ_`-prefixed
    /// environment variables, then validate it.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let config: EngineConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DAQ_").split("__"))
            .extract()
            .map_err(|err| DaqCoreError::ConfigMismatch(format!("loading {path:?}: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Construct directly from an in-memory TOML string (used by tests and
    /// the mock-file replay path).
    pub fn from_toml_str(toml: &str) -> CoreResult<Self> {
        let config: EngineConfig = Figment::new()
            .merge(Toml::string(toml))
            .extract()
            .map_err(|err| DaqCoreError::ConfigMismatch(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.enabled_channels.len() > 16 {
            return Err(DaqCoreError::ConfigMismatch(
                "enabled_channels: at most 16 channels supported".into(),
            ));
        }
        for ch in &self.channels {
            if !(0..=1000).contains(&ch.cfd_level_mv) {
                return Err(DaqCoreError::OutOfRange(format!(
                    "channel {}: cfd_level_mv {} outside 0..=1000",
                    ch.channel, ch.cfd_level_mv
                )));
            }
            if ![1, 2, 4, 8, 16].contains(&ch.sync_divider) {
                return Err(DaqCoreError::OutOfRange(format!(
                    "channel {}: sync_divider {} not in {{1,2,4,8,16}}",
                    ch.channel, ch.sync_divider
                )));
            }
        }
        if self.bin_size_ns == 0 {
            return Err(DaqCoreError::OutOfRange("bin_size_ns must be nonzero".into()));
        }
        Ok(())
    }
}
