//! Hosted demo of the recorder core
//!
//! Stands in the platform layer: a synthetic tone source instead of the
//! sampling peripheral, a fixed battery reading, a logging-only uplink, and
//! keyboard-free scripted button presses. Runs one short record/stop cycle
//! and then asks the loop to shut down.

use anyhow::Result;
use fastrec::audio::SampleSource;
use fastrec::config::RecorderConfig;
use fastrec::power::{BatteryMonitor, BatterySensor, JsonFileStore, RetainedStore};
use fastrec::recorder::{Command, Event, Recorder};
use fastrec::storage::RecordingStore;
use fastrec::uplink::Uplink;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// 440 Hz test tone, paced like a real peripheral
struct ToneSource {
    sample_rate: u32,
    phase: f32,
}

impl SampleSource for ToneSource {
    fn read(&mut self, buf: &mut [i16]) -> fastrec::Result<usize> {
        let step = 2.0 * std::f32::consts::PI * 440.0 / self.sample_rate as f32;
        for slot in buf.iter_mut() {
            *slot = (self.phase.sin() * 3000.0) as i16;
            self.phase += step;
        }
        let elapsed = Duration::from_secs_f64(buf.len() as f64 / self.sample_rate as f64);
        std::thread::sleep(elapsed);
        Ok(buf.len())
    }
}

struct FixedBattery(f32);

impl BatterySensor for FixedBattery {
    fn read_divided_volts(&mut self) -> fastrec::Result<f32> {
        Ok(self.0)
    }
}

/// Uplink that logs instead of transmitting
struct LoggingUplink;

impl Uplink for LoggingUplink {
    fn reachable(&mut self) -> bool {
        true
    }

    fn send(&mut self, path: &Path) -> fastrec::Result<()> {
        info!(path = %path.display(), "would upload");
        Ok(())
    }
}

fn main() -> Result<()> {
    let data_dir = std::env::temp_dir().join("fastrec-demo");
    std::fs::create_dir_all(&data_dir)?;

    let retained_store = JsonFileStore::new(data_dir.join("retained.json"));
    let suppress_log = retained_store
        .load()
        .ok()
        .flatten()
        .map(|s| s.suppress_boot_log)
        .unwrap_or(false);
    if !suppress_log {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "fastrec=debug,info".into()))
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = RecorderConfig {
        rec_min: Duration::from_millis(500),
        sleep_timeout: Duration::from_secs(10),
        ..Default::default()
    };
    let sample_rate = config.sample_rate;
    let battery = BatteryMonitor::new(Box::new(FixedBattery(1.9)), config.battery);
    let store = RecordingStore::open(&data_dir, 64 << 20)?;

    let recorder = Recorder::new(
        config,
        store,
        Box::new(move || {
            Ok(Box::new(ToneSource {
                sample_rate,
                phase: 0.0,
            }) as Box<dyn SampleSource>)
        }),
        Box::new(LoggingUplink),
        battery,
        Box::new(retained_store),
    )?;
    let (handle, join) = recorder.start();

    info!(dir = %data_dir.display(), "demo started, recording 2 s of tone");
    handle.send(Command::RecordButton)?;
    std::thread::sleep(Duration::from_secs(2));
    handle.send(Command::RecordButton)?;

    // Collect the session outcome before shutting down
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        match handle.recv_event_timeout(Duration::from_millis(200)) {
            Some(Event::RecordingFinished(meta)) => {
                info!(
                    name = %meta.name,
                    bytes = meta.payload_bytes,
                    duration = ?meta.duration,
                    "recording finished"
                );
            }
            Some(Event::UploadFinished { uploaded }) => {
                info!(uploaded, "upload settled");
                break;
            }
            Some(Event::DeepSleep(reason)) => {
                info!(?reason, "device would power down");
                break;
            }
            Some(event) => info!(?event, "event"),
            None => {}
        }
    }

    let _ = handle.send(Command::Shutdown);
    join.join().ok();
    info!(state = %handle.state(), "demo done");
    Ok(())
}
