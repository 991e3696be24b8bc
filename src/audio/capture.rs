//! Capture session
//!
//! Two execution contexts share the sample ring: a producer thread reading
//! chunks from the sampling peripheral on its fixed cadence, and a consumer
//! thread draining the ring into the recording writer at its own pace.
//! Stopping is graceful: the producer is halted first, the ring drained
//! fully, and only then is the recording finalized.

use crate::audio::buffer::SampleRing;
use crate::audio::writer::{FinalizeOutcome, RecordingWriter, WriteStatus};
use crate::storage::RecordingStore;
use crate::{FastrecError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

/// Peripheral transfer chunk size in samples
pub const CHUNK_SAMPLES: usize = 512;

/// How long the consumer sleeps when the ring is empty
const DRAIN_IDLE: Duration = Duration::from_millis(5);

/// Boundary to the digital audio sampling peripheral
///
/// Implementations block until a chunk is available. Returning `Ok(0)`
/// signals end of stream (the session then stops as if requested).
pub trait SampleSource: Send + 'static {
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Why the consumer thread stopped
#[derive(Debug)]
enum StopCause {
    /// Stop was requested (or the source ended) and the ring fully drained
    Drained,
    /// The writer hit the maximum recording duration
    MaxDuration,
    /// Appending to storage failed
    Storage(FastrecError),
}

/// One in-flight recording: producer + consumer threads around the ring
pub struct CaptureSession {
    run: Arc<AtomicBool>,
    producer_done: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    ring: SampleRing,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<(RecordingWriter, StopCause)>>,
}

impl CaptureSession {
    /// Start capturing into `writer`
    ///
    /// The ring is reset before the producer starts; its overrun counter is
    /// consumed at finalize to decide the degraded flag.
    pub fn start(mut source: Box<dyn SampleSource>, ring: SampleRing, writer: RecordingWriter) -> Self {
        ring.reset();

        let run = Arc::new(AtomicBool::new(true));
        let producer_done = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));

        let producer = {
            let run = Arc::clone(&run);
            let producer_done = Arc::clone(&producer_done);
            let ring = ring.clone();
            thread::spawn(move || {
                let mut chunk = [0i16; CHUNK_SAMPLES];
                while run.load(Ordering::Acquire) {
                    match source.read(&mut chunk) {
                        Ok(0) => {
                            debug!("sample source ended");
                            break;
                        }
                        Ok(n) => {
                            for &sample in &chunk[..n] {
                                // Drops on full; never stalls the cadence
                                ring.push(sample);
                            }
                        }
                        Err(e) => {
                            error!("sample source failed: {}", e);
                            break;
                        }
                    }
                }
                producer_done.store(true, Ordering::Release);
            })
        };

        let consumer = {
            let producer_done = Arc::clone(&producer_done);
            let ended = Arc::clone(&ended);
            let run = Arc::clone(&run);
            let ring = ring.clone();
            let mut writer = writer;
            thread::spawn(move || {
                let mut chunk = [0i16; CHUNK_SAMPLES];
                let cause = loop {
                    let n = ring.pop_chunk(&mut chunk);
                    if n == 0 {
                        if producer_done.load(Ordering::Acquire) {
                            break StopCause::Drained;
                        }
                        thread::sleep(DRAIN_IDLE);
                        continue;
                    }
                    match writer.write_samples(&chunk[..n]) {
                        Ok(WriteStatus::Continue) => {}
                        Ok(WriteStatus::ReachedMax) => {
                            run.store(false, Ordering::Release);
                            break StopCause::MaxDuration;
                        }
                        Err(e) => {
                            run.store(false, Ordering::Release);
                            break StopCause::Storage(e);
                        }
                    }
                };
                ended.store(true, Ordering::Release);
                (writer, cause)
            })
        };

        info!("capture session started");
        Self {
            run,
            producer_done,
            ended,
            ring,
            producer: Some(producer),
            consumer: Some(consumer),
        }
    }

    /// Whether the consumer stopped on its own (max duration or storage
    /// failure); the controller should then call [`CaptureSession::finish`].
    pub fn ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Samples currently buffered but not yet persisted
    pub fn backlog(&self) -> usize {
        self.ring.len()
    }

    /// Stop capturing, drain the ring, and finalize the recording
    ///
    /// On storage failure the recording is abandoned and the error returned;
    /// otherwise the writer decides between completion and the
    /// minimum-duration discard.
    pub fn finish(
        mut self,
        store: &RecordingStore,
        degraded_threshold: u32,
    ) -> Result<FinalizeOutcome> {
        // Halt the producer first so the drain below is exhaustive
        self.run.store(false, Ordering::Release);
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
        self.producer_done.store(true, Ordering::Release);

        let (writer, cause) = match self.consumer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| FastrecError::AudioSourceError("consumer thread panicked".into()))?,
            None => unreachable!("finish called once"),
        };

        let overruns = self.ring.take_overruns();
        match cause {
            StopCause::Drained | StopCause::MaxDuration => {
                writer.finalize(store, overruns, degraded_threshold)
            }
            StopCause::Storage(e) => {
                writer.abandon(store);
                Err(e)
            }
        }
    }
}
