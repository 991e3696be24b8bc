//! Wide-area uplink transfer scheduling
//!
//! The transport itself (association, authentication, framing) is an
//! external collaborator behind the [`Uplink`] trait. This module owns the
//! retry policy: a failed transfer schedules another attempt after a fixed
//! delay, and a bounded number of attempts before the recording is given up
//! and kept locally. An upload never fails the state machine.

use crate::audio::writer::RecordingMeta;
use crate::Result;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Boundary to the wide-area wireless transport
pub trait Uplink: Send {
    /// Whether the network is currently reachable
    fn reachable(&mut self) -> bool;

    /// Transfer one recording; blocking, returns when the server has
    /// acknowledged the payload
    fn send(&mut self, path: &Path) -> Result<()>;
}

/// Progress of an in-flight upload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    /// Waiting for the next attempt
    Pending,
    /// Transferred and acknowledged
    Sent,
    /// Attempts exhausted; the recording stays on local storage
    GaveUp,
}

/// Fixed-delay, bounded-attempt upload scheduler
pub struct UploadScheduler {
    retry_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    next_attempt_at: Option<Instant>,
}

impl UploadScheduler {
    pub fn new(retry_delay: Duration, max_attempts: u32) -> Self {
        Self {
            retry_delay,
            max_attempts,
            attempts: 0,
            next_attempt_at: None,
        }
    }

    /// Arm the scheduler for a new recording; the first attempt runs on the
    /// next [`UploadScheduler::poll`].
    pub fn begin(&mut self, now: Instant) {
        self.attempts = 0;
        self.next_attempt_at = Some(now);
    }

    /// Drive the transfer forward
    ///
    /// Call periodically from the controller loop. On success the recording
    /// is marked uploaded; on exhaustion it stays pending locally. Either
    /// way the caller gets a terminal status exactly once.
    pub fn poll(
        &mut self,
        uplink: &mut dyn Uplink,
        meta: &mut RecordingMeta,
        now: Instant,
    ) -> UploadStatus {
        let due = match self.next_attempt_at {
            Some(at) if now >= at => true,
            Some(_) => false,
            None => return UploadStatus::Pending,
        };
        if !due {
            return UploadStatus::Pending;
        }

        self.attempts += 1;
        let result = if uplink.reachable() {
            uplink.send(&meta.path)
        } else {
            Err(crate::FastrecError::TransferError("network unreachable".into()))
        };

        match result {
            Ok(()) => {
                meta.uploaded = true;
                self.next_attempt_at = None;
                info!(name = %meta.name, attempts = self.attempts, "recording uploaded");
                UploadStatus::Sent
            }
            Err(e) if self.attempts >= self.max_attempts => {
                self.next_attempt_at = None;
                warn!(
                    name = %meta.name,
                    attempts = self.attempts,
                    "upload given up, recording retained locally: {}",
                    e
                );
                UploadStatus::GaveUp
            }
            Err(e) => {
                self.next_attempt_at = Some(now + self.retry_delay);
                debug!(
                    name = %meta.name,
                    attempt = self.attempts,
                    retry_in = ?self.retry_delay,
                    "upload attempt failed: {}",
                    e
                );
                UploadStatus::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BoundedName;
    use std::path::PathBuf;

    struct MockUplink {
        reachable: bool,
        fail_first: u32,
        sent: Vec<PathBuf>,
    }

    impl MockUplink {
        fn new(reachable: bool, fail_first: u32) -> Self {
            Self {
                reachable,
                fail_first,
                sent: Vec::new(),
            }
        }
    }

    impl Uplink for MockUplink {
        fn reachable(&mut self) -> bool {
            self.reachable
        }

        fn send(&mut self, path: &Path) -> Result<()> {
            if self.fail_first > 0 {
                self.fail_first -= 1;
                return Err(crate::FastrecError::TransferError("server busy".into()));
            }
            self.sent.push(path.to_path_buf());
            Ok(())
        }
    }

    fn meta() -> RecordingMeta {
        RecordingMeta {
            name: BoundedName::new("rec_0001.wav").unwrap(),
            path: PathBuf::from("/tmp/rec_0001.wav"),
            payload_bytes: 16000,
            samples: 8000,
            duration: Duration::from_secs(1),
            degraded: false,
            uploaded: false,
        }
    }

    #[test]
    fn test_first_attempt_succeeds() {
        let mut uplink = MockUplink::new(true, 0);
        let mut scheduler = UploadScheduler::new(Duration::from_secs(60), 3);
        let mut meta = meta();
        let now = Instant::now();

        scheduler.begin(now);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::Sent);
        assert!(meta.uploaded);
        assert_eq!(uplink.sent.len(), 1);
    }

    #[test]
    fn test_retry_after_fixed_delay() {
        let mut uplink = MockUplink::new(true, 1);
        let mut scheduler = UploadScheduler::new(Duration::from_secs(60), 3);
        let mut meta = meta();
        let now = Instant::now();

        scheduler.begin(now);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::Pending);

        // Not due yet
        let early = now + Duration::from_secs(30);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, early), UploadStatus::Pending);
        assert_eq!(uplink.sent.len(), 0);

        let due = now + Duration::from_secs(61);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, due), UploadStatus::Sent);
        assert!(meta.uploaded);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let mut uplink = MockUplink::new(true, 10);
        let mut scheduler = UploadScheduler::new(Duration::from_secs(1), 3);
        let mut meta = meta();
        let mut now = Instant::now();

        scheduler.begin(now);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::Pending);
        now += Duration::from_secs(2);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::Pending);
        now += Duration::from_secs(2);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::GaveUp);

        // Recording stays local, not marked uploaded
        assert!(!meta.uploaded);
    }

    #[test]
    fn test_unreachable_network_counts_as_failure() {
        let mut uplink = MockUplink::new(false, 0);
        let mut scheduler = UploadScheduler::new(Duration::from_secs(1), 2);
        let mut meta = meta();
        let mut now = Instant::now();

        scheduler.begin(now);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::Pending);
        now += Duration::from_secs(2);
        assert_eq!(scheduler.poll(&mut uplink, &mut meta, now), UploadStatus::GaveUp);
    }

    #[test]
    fn test_poll_without_begin_is_inert() {
        let mut uplink = MockUplink::new(true, 0);
        let mut scheduler = UploadScheduler::new(Duration::from_secs(1), 2);
        let mut meta = meta();
        assert_eq!(
            scheduler.poll(&mut uplink, &mut meta, Instant::now()),
            UploadStatus::Pending
        );
        assert_eq!(uplink.sent.len(), 0);
    }
}
