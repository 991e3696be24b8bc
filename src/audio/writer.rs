//! Recording writer
//!
//! Consumes drained samples, applies software gain, optionally compresses
//! through the ADPCM codec, and appends to the open recording file. Tracks
//! the running duration against the configured minimum (below which the
//! recording is discarded, file removed) and maximum (which forces an
//! automatic stop). Finalize patches the container header with the
//! now-known payload size.

use crate::audio::adpcm::AdpcmState;
use crate::audio::wav::WavHeader;
use crate::config::{Encoding, RecorderConfig};
use crate::storage::{BoundedName, RecordingStore};
use crate::Result;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of feeding samples to the writer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// Keep recording
    Continue,
    /// Maximum duration reached; the caller must stop and finalize
    ReachedMax,
}

/// A finished recording
#[derive(Clone, Debug)]
pub struct RecordingMeta {
    pub name: BoundedName,
    pub path: PathBuf,
    pub payload_bytes: u64,
    pub samples: u64,
    pub duration: Duration,
    /// Producer overruns crossed the configured threshold
    pub degraded: bool,
    /// Set by the upload scheduler once the file has been transferred
    pub uploaded: bool,
}

/// Outcome of finalizing a recording
#[derive(Clone, Debug)]
pub enum FinalizeOutcome {
    Completed(RecordingMeta),
    /// Under the minimum duration; the file has been removed
    Discarded { duration: Duration },
}

/// Streaming writer for one recording
pub struct RecordingWriter {
    file: BufWriter<File>,
    name: BoundedName,
    path: PathBuf,
    encoding: Encoding,
    sample_rate: u32,
    gain: f32,
    adpcm: AdpcmState,
    /// Odd trailing 4-bit code awaiting its pair
    pending_nibble: Option<u8>,
    samples_written: u64,
    payload_bytes: u64,
    min_samples: u64,
    max_samples: u64,
}

impl RecordingWriter {
    /// Open a new recording in the store
    ///
    /// Fails with `InsufficientSpace` before any file is created if storage
    /// is below the configured free-space floor.
    pub fn open(
        store: &mut RecordingStore,
        config: &RecorderConfig,
        synced_time: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        store.check_free_space(config.min_free_space)?;

        let name = store.next_recording_name(synced_time);
        let path = store.path_for(&name);
        let mut file = BufWriter::new(File::create(&path)?);
        WavHeader::write_placeholder(&mut file)?;

        info!(name = %name, encoding = ?config.encoding, "recording opened");

        Ok(Self {
            file,
            name,
            path,
            encoding: config.encoding,
            sample_rate: config.sample_rate,
            gain: config.audio_gain,
            adpcm: AdpcmState::new(),
            pending_nibble: None,
            samples_written: 0,
            min_samples: config.rec_min.as_millis() as u64 * config.sample_rate as u64 / 1000,
            max_samples: config.rec_max.as_millis() as u64 * config.sample_rate as u64 / 1000,
            payload_bytes: 0,
        })
    }

    /// Append drained samples, returning whether the maximum duration has
    /// been reached. Samples beyond the limit are not written.
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<WriteStatus> {
        let remaining = (self.max_samples - self.samples_written) as usize;
        let take = samples.len().min(remaining);

        for &raw in &samples[..take] {
            let amplified = apply_gain(raw, self.gain);
            match self.encoding {
                Encoding::Pcm16 => {
                    self.file.write_all(&amplified.to_le_bytes())?;
                    self.payload_bytes += 2;
                }
                Encoding::ImaAdpcm => {
                    let code = self.adpcm.encode_sample(amplified);
                    match self.pending_nibble.take() {
                        Some(low) => {
                            self.file.write_all(&[low | (code << 4)])?;
                            self.payload_bytes += 1;
                        }
                        None => self.pending_nibble = Some(code),
                    }
                }
            }
        }
        self.samples_written += take as u64;

        if self.samples_written >= self.max_samples {
            debug!(samples = self.samples_written, "maximum recording duration reached");
            Ok(WriteStatus::ReachedMax)
        } else {
            Ok(WriteStatus::Continue)
        }
    }

    /// Elapsed recorded time, derived from the sample count
    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.samples_written * 1_000_000 / self.sample_rate as u64)
    }

    /// Samples accepted so far
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Finalize the recording
    ///
    /// A recording under the minimum duration is discarded and its file
    /// removed. Otherwise the header is patched with the payload size and
    /// the file closed. `overruns` is the producer drop count for this
    /// session; past `degraded_threshold` the recording is kept but flagged.
    pub fn finalize(
        mut self,
        store: &RecordingStore,
        overruns: u32,
        degraded_threshold: u32,
    ) -> Result<FinalizeOutcome> {
        let duration = self.duration();

        if self.samples_written < self.min_samples {
            drop(self.file);
            store.remove(&self.path)?;
            info!(name = %self.name, ?duration, "recording below minimum duration, discarded");
            return Ok(FinalizeOutcome::Discarded { duration });
        }

        if let Some(low) = self.pending_nibble.take() {
            self.file.write_all(&[low])?;
            self.payload_bytes += 1;
        }
        self.file.flush()?;

        let header = WavHeader::mono(self.encoding, self.sample_rate, self.payload_bytes as u32);
        let mut file = self
            .file
            .into_inner()
            .map_err(|e| crate::FastrecError::StorageWriteError(e.to_string()))?;
        header.patch(&mut file)?;
        file.sync_all()?;

        let degraded = overruns > degraded_threshold;
        if degraded {
            warn!(name = %self.name, overruns, "recording degraded by buffer overruns");
        }
        info!(
            name = %self.name,
            bytes = self.payload_bytes,
            ?duration,
            "recording finalized"
        );

        Ok(FinalizeOutcome::Completed(RecordingMeta {
            name: self.name,
            path: self.path,
            payload_bytes: self.payload_bytes,
            samples: self.samples_written,
            duration,
            degraded,
            uploaded: false,
        }))
    }

    /// Abandon the recording after a storage failure, removing the file
    pub fn abandon(self, store: &RecordingStore) {
        let path = self.path;
        drop(self.file);
        warn!(path = %path.display(), "recording abandoned");
        if let Err(e) = store.remove(&path) {
            warn!("cleanup after abandon failed: {}", e);
        }
    }
}

/// Apply software gain with saturation
#[inline]
fn apply_gain(sample: i16, gain: f32) -> i16 {
    (sample as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
