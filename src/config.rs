//! Configuration surface for the recorder core
//!
//! All tunables are consumed, not produced, by this crate. Defaults mirror
//! the shipped firmware constants; deployments override them at boot,
//! either programmatically or from a JSON blob.

use crate::{FastrecError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How captured samples are persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Uncompressed 16-bit little-endian PCM
    #[default]
    Pcm16,
    /// IMA ADPCM, 4 bits per sample, two codes per byte
    ImaAdpcm,
}

impl Encoding {
    /// Bytes of payload produced per second of audio at the given rate
    pub fn byte_rate(&self, sample_rate: u32) -> u32 {
        match self {
            Encoding::Pcm16 => sample_rate * 2,
            Encoding::ImaAdpcm => sample_rate / 2,
        }
    }
}

/// Battery measurement parameters
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Below this (post-divider) voltage the battery is critically low
    pub min_volts: f32,
    /// Linear scale factor for the resistive divider
    pub divider_mult: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            min_volts: 3.0,
            divider_mult: 2.1,
        }
    }
}

/// Configuration for the recorder runtime
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Recordings shorter than this are discarded
    pub rec_min: Duration,

    /// Recordings are auto-stopped at this duration
    pub rec_max: Duration,

    /// Input edges closer together than this coalesce into one trigger
    pub debounce: Duration,

    /// Software gain applied to each captured sample (saturating)
    pub audio_gain: f32,

    /// Ring buffer capacity in samples; must be a power of two
    pub ring_capacity: usize,

    /// Minimum free space required on storage before a recording may start
    pub min_free_space: u64,

    /// Battery thresholds
    pub battery: BatteryConfig,

    /// Inactivity in IDLE beyond this enters deep sleep
    pub sleep_timeout: Duration,

    /// Optional scheduled wake/sleep cycle length (None = no schedule)
    pub sleep_cycle: Option<Duration>,

    /// Delay between upload retries
    pub upload_retry_delay: Duration,

    /// Attempts before an upload is given up and the recording kept local
    pub upload_max_attempts: u32,

    /// Payload encoding for persisted recordings
    pub encoding: Encoding,

    /// Dropped samples beyond this flag the recording as degraded
    pub overrun_degraded_threshold: u32,

    /// Whether the UPLOAD state is part of this build's state set
    pub upload_enabled: bool,

    /// Whether the SETUP state is part of this build's state set
    pub setup_enabled: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            rec_min: Duration::from_secs(1),
            rec_max: Duration::from_secs(20),
            debounce: Duration::from_millis(200),
            audio_gain: 8.0,
            ring_capacity: 8192,
            min_free_space: 1024 * 1024,
            battery: BatteryConfig::default(),
            sleep_timeout: Duration::from_secs(15),
            sleep_cycle: None,
            upload_retry_delay: Duration::from_secs(60),
            upload_max_attempts: 3,
            encoding: Encoding::Pcm16,
            overrun_degraded_threshold: 64,
            upload_enabled: true,
            setup_enabled: false,
        }
    }
}

impl RecorderConfig {
    /// Parse a configuration from a JSON blob
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FastrecError::ConfigError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(FastrecError::ConfigError("sample_rate must be non-zero".into()));
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(FastrecError::ConfigError(format!(
                "ring_capacity must be a power of two, got {}",
                self.ring_capacity
            )));
        }
        if self.rec_min >= self.rec_max {
            return Err(FastrecError::ConfigError(format!(
                "rec_min ({:?}) must be below rec_max ({:?})",
                self.rec_min, self.rec_max
            )));
        }
        if self.audio_gain <= 0.0 {
            return Err(FastrecError::ConfigError("audio_gain must be positive".into()));
        }
        Ok(())
    }

    /// Minimum recording payload size in bytes under the configured encoding
    pub fn min_payload_bytes(&self) -> u64 {
        self.encoding.byte_rate(self.sample_rate) as u64 * self.rec_min.as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RecorderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sample_rate, 8000);
        assert_eq!(config.rec_max, Duration::from_secs(20));
    }

    #[test]
    fn test_ring_capacity_must_be_power_of_two() {
        let config = RecorderConfig {
            ring_capacity: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rec_min_below_rec_max() {
        let config = RecorderConfig {
            rec_min: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_encoding_byte_rate() {
        assert_eq!(Encoding::Pcm16.byte_rate(8000), 16000);
        assert_eq!(Encoding::ImaAdpcm.byte_rate(8000), 4000);
    }

    #[test]
    fn test_min_payload_bytes() {
        let config = RecorderConfig::default();
        // 1 second of 16-bit PCM at 8 kHz
        assert_eq!(config.min_payload_bytes(), 16000);
    }

    #[test]
    fn test_config_from_json_roundtrip() {
        let config = RecorderConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = RecorderConfig::from_json(&json).unwrap();
        assert_eq!(parsed.sample_rate, config.sample_rate);
        assert_eq!(parsed.encoding, config.encoding);
    }
}
