//! Power and retention management
//!
//! Battery voltage is sampled through a resistive divider and scaled by a
//! linear factor; deep-sleep eligibility combines the inactivity timeout,
//! low battery and the optional scheduled wake/sleep cycle — whichever
//! condition fires first wins. A minimal [`RetainedState`] record survives
//! the power cycle; everything else is rebuilt at the next boot.

use crate::config::BatteryConfig;
use crate::{FastrecError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Why the device entered deep sleep
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SleepReason {
    /// No activity in IDLE beyond the configured timeout
    Inactivity,
    /// Battery below the critical threshold
    CriticalBattery,
    /// Scheduled wake/sleep cycle boundary reached
    ScheduledCycle,
}

/// Boundary to the battery ADC: reads the divided-down voltage in volts
pub trait BatterySensor: Send {
    fn read_divided_volts(&mut self) -> Result<f32>;
}

/// Applies the divider scale factor and the critical threshold
pub struct BatteryMonitor {
    sensor: Box<dyn BatterySensor>,
    config: BatteryConfig,
    last_volts: Option<f32>,
}

impl BatteryMonitor {
    pub fn new(sensor: Box<dyn BatterySensor>, config: BatteryConfig) -> Self {
        Self {
            sensor,
            config,
            last_volts: None,
        }
    }

    /// Sample the battery and return the actual pack voltage
    pub fn sample(&mut self) -> Result<f32> {
        let volts = self.sensor.read_divided_volts()? * self.config.divider_mult;
        self.last_volts = Some(volts);
        Ok(volts)
    }

    /// Most recent sample, if any
    pub fn last_volts(&self) -> Option<f32> {
        self.last_volts
    }

    /// Sample and compare against the critical threshold
    pub fn is_critical(&mut self) -> Result<bool> {
        let volts = self.sample()?;
        let critical = volts < self.config.min_volts;
        if critical {
            warn!(volts, threshold = self.config.min_volts, "battery critically low");
        }
        Ok(critical)
    }
}

/// Combines battery and scheduled-cycle sleep conditions
///
/// Inactivity is the lifecycle controller's own business since it tracks
/// the last input edge; this policy covers the externally measurable
/// conditions.
pub struct SleepPolicy {
    boot_time: Instant,
    cycle: Option<Duration>,
}

impl SleepPolicy {
    pub fn new(boot_time: Instant, cycle: Option<Duration>) -> Self {
        Self { boot_time, cycle }
    }

    pub fn check(&self, battery_critical: bool, now: Instant) -> Option<SleepReason> {
        if battery_critical {
            return Some(SleepReason::CriticalBattery);
        }
        if let Some(cycle) = self.cycle {
            if now.duration_since(self.boot_time) >= cycle {
                return Some(SleepReason::ScheduledCycle);
            }
        }
        None
    }
}

/// Fields preserved across a deep-sleep power cycle
///
/// Loaded once at boot and updated only at checkpoints: a successful time
/// sync, a successful network association, or the decision to suppress this
/// cycle's logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedState {
    /// Wall clock has been synchronized since first power-on
    pub time_synced: bool,
    /// Index of the last successfully associated network, -1 for none
    pub last_network_index: i8,
    /// Suppress log output for this boot
    pub suppress_boot_log: bool,
}

impl Default for RetainedState {
    fn default() -> Self {
        Self {
            time_synced: false,
            last_network_index: -1,
            suppress_boot_log: false,
        }
    }
}

/// Power-preserved memory region for [`RetainedState`]
pub trait RetainedStore: Send {
    /// Load the record persisted before the last power-off, if any
    fn load(&self) -> Result<Option<RetainedState>>;

    /// Persist the record; called immediately before shutdown and at
    /// checkpoint updates
    fn store(&mut self, state: &RetainedState) -> Result<()>;
}

/// File-backed retained store
///
/// On the device this region lives in RTC retained memory; hosted builds
/// use a small JSON file with the same load/store semantics.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RetainedStore for JsonFileStore {
    fn load(&self) -> Result<Option<RetainedState>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FastrecError::RetentionError(e.to_string())),
        };
        let state = serde_json::from_str(&data)
            .map_err(|e| FastrecError::RetentionError(format!("corrupt retained record: {}", e)))?;
        debug!(?state, "retained state loaded");
        Ok(Some(state))
    }

    fn store(&mut self, state: &RetainedState) -> Result<()> {
        let data = serde_json::to_string(state)
            .map_err(|e| FastrecError::RetentionError(e.to_string()))?;
        std::fs::write(&self.path, data).map_err(|e| FastrecError::RetentionError(e.to_string()))?;
        info!(?state, "retained state persisted");
        Ok(())
    }
}

/// In-memory retained store for tests
#[derive(Default)]
pub struct MemoryStore {
    state: Option<RetainedState>,
}

impl RetainedStore for MemoryStore {
    fn load(&self) -> Result<Option<RetainedState>> {
        Ok(self.state)
    }

    fn store(&mut self, state: &RetainedState) -> Result<()> {
        self.state = Some(*state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSensor(f32);

    impl BatterySensor for FixedSensor {
        fn read_divided_volts(&mut self) -> Result<f32> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_divider_scaling() {
        let config = BatteryConfig {
            min_volts: 3.0,
            divider_mult: 2.1,
        };
        let mut monitor = BatteryMonitor::new(Box::new(FixedSensor(1.8)), config);
        let volts = monitor.sample().unwrap();
        assert!((volts - 3.78).abs() < 1e-5);
        assert!(!monitor.is_critical().unwrap());
        assert!(monitor.last_volts().is_some());
    }

    #[test]
    fn test_critical_threshold() {
        let config = BatteryConfig {
            min_volts: 3.0,
            divider_mult: 2.1,
        };
        let mut monitor = BatteryMonitor::new(Box::new(FixedSensor(1.2)), config);
        assert!(monitor.is_critical().unwrap());
    }

    #[test]
    fn test_sleep_policy_battery_wins() {
        let now = Instant::now();
        let policy = SleepPolicy::new(now, Some(Duration::from_secs(3600)));
        assert_eq!(policy.check(true, now), Some(SleepReason::CriticalBattery));
        assert_eq!(policy.check(false, now), None);
    }

    #[test]
    fn test_sleep_policy_cycle_boundary() {
        let now = Instant::now();
        let policy = SleepPolicy::new(now, Some(Duration::from_secs(60)));
        assert_eq!(policy.check(false, now + Duration::from_secs(30)), None);
        assert_eq!(
            policy.check(false, now + Duration::from_secs(61)),
            Some(SleepReason::ScheduledCycle)
        );
    }

    #[test]
    fn test_sleep_policy_without_cycle() {
        let now = Instant::now();
        let policy = SleepPolicy::new(now, None);
        assert_eq!(policy.check(false, now + Duration::from_secs(86400)), None);
    }

    #[test]
    fn test_retained_defaults() {
        let state = RetainedState::default();
        assert!(!state.time_synced);
        assert_eq!(state.last_network_index, -1);
        assert!(!state.suppress_boot_log);
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::new(dir.path().join("retained.json"));

        assert_eq!(store.load().unwrap(), None);

        let state = RetainedState {
            time_synced: true,
            last_network_index: 2,
            suppress_boot_log: true,
        };
        store.store(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_file_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retained.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::default();
        assert_eq!(store.load().unwrap(), None);
        store
            .store(&RetainedState {
                time_synced: true,
                ..Default::default()
            })
            .unwrap();
        assert!(store.load().unwrap().unwrap().time_synced);
    }
}
