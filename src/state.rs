//! Device lifecycle state machine
//!
//! A single controller owns the application state; every other component
//! reads it but never assigns it. Input edges are debounced: triggers
//! closer together than the configured window coalesce into one logical
//! trigger. Side effects (starting capture, uploads, deep sleep) are
//! returned as [`Effect`] values and executed by the recorder loop, never
//! inside the transition function.

use crate::power::SleepReason;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Application lifecycle states
///
/// `Init`, `Idle` and `Rec` are always present; `Upload` and `Setup` depend
/// on the build's [`StateSet`]. `Dsleep` is the only state that powers the
/// device down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    Init,
    Idle,
    Rec,
    Upload,
    Setup,
    Dsleep,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppState::Init => "INIT",
            AppState::Idle => "IDLE",
            AppState::Rec => "REC",
            AppState::Upload => "UPLOAD",
            AppState::Setup => "SETUP",
            AppState::Dsleep => "DSLEEP",
        };
        f.write_str(s)
    }
}

/// Which optional states this configuration carries
#[derive(Clone, Copy, Debug, Default)]
pub struct StateSet {
    pub upload: bool,
    pub setup: bool,
}

/// Inputs to the state machine
///
/// Button edges are debounced; internal notifications (init done, recording
/// ended, upload finished) are not, since they are not physical edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Peripheral/storage/network initialization finished
    InitComplete,
    /// Debounced record button edge: starts or stops a recording
    RecordButton,
    /// Debounced upload button edge: force-upload pending recordings
    UploadButton,
    /// Distinguished long press: enter setup
    LongPress,
    /// The capture session has been finalized; `completed` is false for a
    /// discarded or abandoned recording
    RecordingEnded { completed: bool },
    /// The upload scheduler gave its verdict (success or retries exhausted)
    UploadFinished,
    /// Setup configuration committed
    SetupCommitted,
}

impl Trigger {
    /// Physical input edges subject to the debounce window
    fn is_input_edge(&self) -> bool {
        matches!(
            self,
            Trigger::RecordButton | Trigger::UploadButton | Trigger::LongPress
        )
    }
}

/// Environment snapshot consulted by transition guards
///
/// Network reachability is deliberately absent: an unreachable network is
/// the upload scheduler's business (it counts as a failed attempt and
/// schedules a retry), never a reason to skip the UPLOAD state.
#[derive(Clone, Copy, Debug, Default)]
pub struct Guards {
    /// Storage has at least the configured minimum free space
    pub storage_ok: bool,
    /// A completed recording is waiting to be transferred
    pub pending_recording: bool,
}

/// Side effects requested by a transition, executed by the recorder loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    StartCapture,
    StopCapture,
    StartUpload,
    EnterDeepSleep(SleepReason),
}

/// The single writer of [`AppState`]
pub struct LifecycleController {
    state: AppState,
    set: StateSet,
    debounce: Duration,
    sleep_timeout: Duration,
    last_edge: Option<Instant>,
    last_activity: Instant,
}

impl LifecycleController {
    pub fn new(set: StateSet, debounce: Duration, sleep_timeout: Duration, now: Instant) -> Self {
        Self {
            state: AppState::Init,
            set,
            debounce,
            sleep_timeout,
            last_edge: None,
            last_activity: now,
        }
    }

    /// Current state (read-only to the rest of the system)
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Feed one trigger through the transition function
    ///
    /// Returns the effect the caller must execute, if any. Input edges
    /// inside the debounce window are coalesced into the preceding trigger
    /// and produce no transition.
    pub fn handle(&mut self, trigger: Trigger, guards: Guards, now: Instant) -> Option<Effect> {
        if trigger.is_input_edge() {
            if let Some(last) = self.last_edge {
                if now.duration_since(last) < self.debounce {
                    debug!(?trigger, "input edge inside debounce window, coalesced");
                    return None;
                }
            }
            self.last_edge = Some(now);
            self.last_activity = now;
        }

        let (next, effect) = match (self.state, trigger) {
            (AppState::Init, Trigger::InitComplete) => (AppState::Idle, None),

            (AppState::Idle, Trigger::RecordButton) => {
                if guards.storage_ok {
                    (AppState::Rec, Some(Effect::StartCapture))
                } else {
                    warn!("record trigger ignored: insufficient free space");
                    return None;
                }
            }

            (AppState::Rec, Trigger::RecordButton) => {
                // Stay in REC until the session reports its outcome
                return Some(Effect::StopCapture);
            }

            (AppState::Rec, Trigger::RecordingEnded { completed }) => {
                // Unconditional when the variant carries UPLOAD: an
                // unreachable network counts as a failed attempt and the
                // scheduler retries after its fixed delay.
                if completed && self.set.upload {
                    (AppState::Upload, Some(Effect::StartUpload))
                } else {
                    (AppState::Idle, None)
                }
            }

            (AppState::Upload, Trigger::UploadFinished) => (AppState::Idle, None),

            (AppState::Idle, Trigger::UploadButton) => {
                if self.set.upload && guards.pending_recording {
                    (AppState::Upload, Some(Effect::StartUpload))
                } else {
                    debug!("upload trigger ignored: nothing pending");
                    return None;
                }
            }

            (AppState::Idle, Trigger::LongPress) => {
                if self.set.setup {
                    (AppState::Setup, None)
                } else {
                    return None;
                }
            }

            (AppState::Setup, Trigger::SetupCommitted) => (AppState::Idle, None),

            // Deep sleep is terminal for this process
            (AppState::Dsleep, _) => return None,

            (state, trigger) => {
                debug!(%state, ?trigger, "trigger not applicable in this state");
                return None;
            }
        };

        self.transition(next, now);
        effect
    }

    /// Time-driven transitions
    ///
    /// `external` is the power manager's verdict (critical battery or a
    /// scheduled cycle boundary); the controller adds its own inactivity
    /// tracking. While idle, whichever condition fires first enters deep
    /// sleep. A critical battery mid-recording forces a stop first so the
    /// recording can be finalized best-effort; mid-upload it abandons the
    /// transfer (the recording stays on local storage) and sleeps
    /// immediately.
    pub fn poll(&mut self, external: Option<SleepReason>, now: Instant) -> Option<Effect> {
        match self.state {
            AppState::Idle => {
                let reason = external.or_else(|| {
                    (now.duration_since(self.last_activity) >= self.sleep_timeout)
                        .then_some(SleepReason::Inactivity)
                });
                reason.map(|reason| {
                    self.transition(AppState::Dsleep, now);
                    Effect::EnterDeepSleep(reason)
                })
            }
            AppState::Rec if external == Some(SleepReason::CriticalBattery) => {
                warn!("critical battery during recording, stopping");
                Some(Effect::StopCapture)
            }
            AppState::Upload if external == Some(SleepReason::CriticalBattery) => {
                warn!("critical battery during upload, abandoning transfer");
                self.transition(AppState::Dsleep, now);
                Some(Effect::EnterDeepSleep(SleepReason::CriticalBattery))
            }
            _ => None,
        }
    }

    /// Record activity that should hold off the inactivity timeout
    pub fn touch_activity(&mut self, now: Instant) {
        self.last_activity = now;
    }

    fn transition(&mut self, next: AppState, now: Instant) {
        if next != self.state {
            info!(from = %self.state, to = %next, "state transition");
            self.state = next;
            self.last_activity = now;
        }
    }
}
