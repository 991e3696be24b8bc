//! Recorder runtime loop
//!
//! Connects the lifecycle controller to the capture pipeline, storage,
//! power manager and uplink. Commands arrive on a channel from the
//! platform layer (button ISRs, console, BLE); events flow back out. The
//! loop thread is the only writer of the application state; a read-only
//! mirror is exposed through the handle.

use crate::audio::buffer::SampleRing;
use crate::audio::capture::{CaptureSession, SampleSource};
use crate::audio::writer::{FinalizeOutcome, RecordingMeta, RecordingWriter};
use crate::config::RecorderConfig;
use crate::power::{
    BatteryMonitor, RetainedState, RetainedStore, SleepPolicy, SleepReason,
};
use crate::state::{AppState, Effect, Guards, LifecycleController, StateSet, Trigger};
use crate::storage::RecordingStore;
use crate::uplink::{Uplink, UploadScheduler, UploadStatus};
use crate::{FastrecError, Result};
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Loop tick while waiting for commands
const TICK: Duration = Duration::from_millis(10);

/// Factory for the sampling peripheral; a fresh source is opened for every
/// recording, mirroring the start/stop of the hardware transfer stream.
pub type SourceFactory = Box<dyn FnMut() -> Result<Box<dyn SampleSource>> + Send>;

/// Commands from the platform layer
#[derive(Clone, Copy, Debug)]
pub enum Command {
    /// Record button edge (already hardware-debounced at the GPIO level;
    /// the state-change debounce window still applies here)
    RecordButton,
    /// Upload button edge: force-upload pending recordings
    UploadButton,
    /// Distinguished long press
    LongPress,
    /// Setup configuration committed (from console/BLE)
    SetupCommitted,
    /// Wall clock synchronized; checkpoint the retained record
    TimeSynced,
    /// Network association succeeded for the given credential index
    NetworkAssociated(i8),
    /// Suppress log output from the next boot on
    SuppressBootLog(bool),
    /// Stop the loop without entering deep sleep (tests, console)
    Shutdown,
}

/// Events emitted by the recorder loop
#[derive(Clone, Debug)]
pub enum Event {
    StateChanged(AppState),
    RecordingFinished(RecordingMeta),
    RecordingDiscarded,
    UploadFinished { uploaded: bool },
    /// Retained state has been persisted; the process is about to stop.
    /// On hardware this is where the wake source is armed and power cut.
    DeepSleep(SleepReason),
    Error(String),
}

/// Handle for controlling a running recorder
pub struct RecorderHandle {
    command_tx: Sender<Command>,
    event_rx: Receiver<Event>,
    state: Arc<RwLock<AppState>>,
}

impl RecorderHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| FastrecError::ChannelError(format!("command channel closed: {}", e)))
    }

    pub fn try_recv_event(&self) -> Option<Event> {
        self.event_rx.try_recv().ok()
    }

    /// Blocking event receive with timeout
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<Event> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Read-only view of the current lifecycle state
    pub fn state(&self) -> AppState {
        *self.state.read()
    }
}

/// The device runtime core
pub struct Recorder {
    config: RecorderConfig,
    source_factory: SourceFactory,
    uplink: Box<dyn Uplink>,
    battery: BatteryMonitor,
    retained_store: Box<dyn RetainedStore>,
    store: RecordingStore,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        store: RecordingStore,
        source_factory: SourceFactory,
        uplink: Box<dyn Uplink>,
        battery: BatteryMonitor,
        retained_store: Box<dyn RetainedStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source_factory,
            uplink,
            battery,
            retained_store,
            store,
        })
    }

    /// Start the runtime loop; returns the control handle and the join
    /// handle of the loop thread.
    pub fn start(self) -> (RecorderHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = bounded(32);
        let (event_tx, event_rx) = bounded(64);
        let state_mirror = Arc::new(RwLock::new(AppState::Init));

        let handle = RecorderHandle {
            command_tx,
            event_rx,
            state: Arc::clone(&state_mirror),
        };

        let join = thread::spawn(move || {
            let mut worker = Worker::boot(self, command_rx, event_tx, state_mirror);
            worker.run();
        });

        (handle, join)
    }
}

/// Loop-thread state
struct Worker {
    config: RecorderConfig,
    controller: LifecycleController,
    store: RecordingStore,
    ring: SampleRing,
    source_factory: SourceFactory,
    uplink: Box<dyn Uplink>,
    battery: BatteryMonitor,
    sleep_policy: SleepPolicy,
    retained: RetainedState,
    retained_store: Box<dyn RetainedStore>,
    capture: Option<CaptureSession>,
    upload: Option<(UploadScheduler, RecordingMeta)>,
    /// Completed recordings awaiting transfer
    pending: VecDeque<RecordingMeta>,
    command_rx: Receiver<Command>,
    event_tx: Sender<Event>,
    state_mirror: Arc<RwLock<AppState>>,
}

impl Worker {
    fn boot(
        recorder: Recorder,
        command_rx: Receiver<Command>,
        event_tx: Sender<Event>,
        state_mirror: Arc<RwLock<AppState>>,
    ) -> Self {
        let now = Instant::now();
        let retained = match recorder.retained_store.load() {
            Ok(Some(state)) => {
                info!(?state, "retained state restored");
                state
            }
            Ok(None) => RetainedState::default(),
            Err(e) => {
                warn!("retained state unreadable, using defaults: {}", e);
                RetainedState::default()
            }
        };

        let set = StateSet {
            upload: recorder.config.upload_enabled,
            setup: recorder.config.setup_enabled,
        };
        let controller = LifecycleController::new(
            set,
            recorder.config.debounce,
            recorder.config.sleep_timeout,
            now,
        );
        let sleep_policy = SleepPolicy::new(now, recorder.config.sleep_cycle);
        let ring = SampleRing::new(recorder.config.ring_capacity);

        Self {
            config: recorder.config,
            controller,
            store: recorder.store,
            ring,
            source_factory: recorder.source_factory,
            uplink: recorder.uplink,
            battery: recorder.battery,
            sleep_policy,
            retained,
            retained_store: recorder.retained_store,
            capture: None,
            upload: None,
            pending: VecDeque::new(),
            command_rx,
            event_tx,
            state_mirror,
        }
    }

    fn run(&mut self) {
        info!("recorder loop started");
        // Peripheral/storage initialization happened in the constructors
        self.apply_trigger(Trigger::InitComplete);

        loop {
            let now = Instant::now();

            match self.command_rx.try_recv() {
                Ok(Command::Shutdown) => {
                    info!("shutdown requested");
                    self.stop_capture_if_any();
                    break;
                }
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    warn!("command channel disconnected");
                    self.stop_capture_if_any();
                    break;
                }
            }

            // A session that stopped itself (max duration or storage
            // failure) is finalized from here, keeping all transitions on
            // this thread.
            if self.capture.as_ref().is_some_and(|c| c.ended()) {
                self.finish_capture();
            }

            if let Some(effect) = self.poll_upload(now) {
                self.execute(effect);
            }

            let battery_critical = match self.battery.is_critical() {
                Ok(critical) => critical,
                Err(e) => {
                    debug!("battery sample failed: {}", e);
                    false
                }
            };
            let external = self.sleep_policy.check(battery_critical, now);
            if let Some(effect) = self.controller.poll(external, now) {
                self.execute(effect);
            }
            self.mirror_state();

            if self.controller.state() == AppState::Dsleep {
                break;
            }

            thread::sleep(TICK);
        }

        self.mirror_state();
        info!("recorder loop stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RecordButton => self.apply_trigger(Trigger::RecordButton),
            Command::UploadButton => self.apply_trigger(Trigger::UploadButton),
            Command::LongPress => self.apply_trigger(Trigger::LongPress),
            Command::SetupCommitted => self.apply_trigger(Trigger::SetupCommitted),
            Command::TimeSynced => {
                self.retained.time_synced = true;
                self.checkpoint_retained();
            }
            Command::NetworkAssociated(index) => {
                self.retained.last_network_index = index;
                self.checkpoint_retained();
            }
            Command::SuppressBootLog(suppress) => {
                self.retained.suppress_boot_log = suppress;
                self.checkpoint_retained();
            }
            Command::Shutdown => unreachable!("handled in run"),
        }
    }

    fn apply_trigger(&mut self, trigger: Trigger) {
        let guards = Guards {
            storage_ok: self.store.check_free_space(self.config.min_free_space).is_ok(),
            pending_recording: !self.pending.is_empty(),
        };
        if let Some(effect) = self.controller.handle(trigger, guards, Instant::now()) {
            self.execute(effect);
        }
        self.mirror_state();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartCapture => self.start_capture(),
            Effect::StopCapture => self.finish_capture(),
            Effect::StartUpload => self.start_upload(),
            Effect::EnterDeepSleep(reason) => self.enter_deep_sleep(reason),
        }
    }

    fn start_capture(&mut self) {
        let synced_time = self.retained.time_synced.then(Utc::now);
        let writer = match RecordingWriter::open(&mut self.store, &self.config, synced_time) {
            Ok(writer) => writer,
            Err(e) => {
                error!("failed to open recording: {}", e);
                self.emit(Event::Error(e.to_string()));
                self.apply_trigger(Trigger::RecordingEnded { completed: false });
                return;
            }
        };
        let source = match (self.source_factory)() {
            Ok(source) => source,
            Err(e) => {
                error!("failed to open sample source: {}", e);
                writer.abandon(&self.store);
                self.emit(Event::Error(e.to_string()));
                self.apply_trigger(Trigger::RecordingEnded { completed: false });
                return;
            }
        };
        self.capture = Some(CaptureSession::start(source, self.ring.clone(), writer));
    }

    fn stop_capture_if_any(&mut self) {
        if self.capture.is_some() {
            self.finish_capture();
        }
    }

    fn finish_capture(&mut self) {
        let Some(session) = self.capture.take() else {
            return;
        };
        debug!(backlog = session.backlog(), "finishing capture session");

        let (completed, event) =
            match session.finish(&self.store, self.config.overrun_degraded_threshold) {
                Ok(FinalizeOutcome::Completed(meta)) => {
                    self.pending.push_back(meta.clone());
                    (true, Event::RecordingFinished(meta))
                }
                Ok(FinalizeOutcome::Discarded { duration }) => {
                    debug!(?duration, "recording discarded");
                    (false, Event::RecordingDiscarded)
                }
                Err(e) => {
                    error!("recording failed: {}", e);
                    (false, Event::Error(e.to_string()))
                }
            };
        // Transition before announcing, so observers of the event see the
        // settled state
        self.apply_trigger(Trigger::RecordingEnded { completed });
        self.emit(event);
    }

    fn start_upload(&mut self) {
        let Some(meta) = self.pending.pop_front() else {
            warn!("upload requested with nothing pending");
            self.apply_trigger(Trigger::UploadFinished);
            return;
        };
        let mut scheduler = UploadScheduler::new(
            self.config.upload_retry_delay,
            self.config.upload_max_attempts,
        );
        scheduler.begin(Instant::now());
        self.upload = Some((scheduler, meta));
    }

    fn poll_upload(&mut self, now: Instant) -> Option<Effect> {
        let (scheduler, meta) = self.upload.as_mut()?;
        match scheduler.poll(self.uplink.as_mut(), meta, now) {
            UploadStatus::Pending => None,
            UploadStatus::Sent => {
                let (_, meta) = self.upload.take()?;
                debug!(name = %meta.name, "upload complete");
                let effect = self.trigger_after_upload();
                self.emit(Event::UploadFinished { uploaded: true });
                effect
            }
            UploadStatus::GaveUp => {
                let (_, meta) = self.upload.take()?;
                // Retained locally, still pending for a later force-upload
                self.pending.push_front(meta);
                let effect = self.trigger_after_upload();
                self.emit(Event::UploadFinished { uploaded: false });
                effect
            }
        }
    }

    fn trigger_after_upload(&mut self) -> Option<Effect> {
        let guards = Guards {
            storage_ok: true,
            pending_recording: !self.pending.is_empty(),
        };
        let effect = self
            .controller
            .handle(Trigger::UploadFinished, guards, Instant::now());
        self.mirror_state();
        effect
    }

    fn enter_deep_sleep(&mut self, reason: SleepReason) {
        // Any in-flight recording was stopped by the controller before it
        // allowed this transition; belt and braces here.
        self.stop_capture_if_any();

        // An in-flight upload is abandoned; the recording stays on local
        // storage for the next boot.
        if let Some((_, meta)) = self.upload.take() {
            warn!(name = %meta.name, "upload abandoned for deep sleep");
            self.pending.push_front(meta);
        }

        if let Err(e) = self.retained_store.store(&self.retained) {
            warn!("failed to persist retained state: {}", e);
        }
        info!(?reason, "entering deep sleep");
        self.mirror_state();
        self.emit(Event::DeepSleep(reason));
    }

    fn checkpoint_retained(&mut self) {
        if let Err(e) = self.retained_store.store(&self.retained) {
            warn!("retained checkpoint failed: {}", e);
        }
    }

    fn emit(&self, event: Event) {
        if self.event_tx.try_send(event).is_err() {
            debug!("event receiver not keeping up, event dropped");
        }
    }

    fn mirror_state(&self) {
        *self.state_mirror.write() = self.controller.state();
    }
}
