//! Operating-mode flags shared between the input handler, the frame source and
//! the pipeline.
//!
//! `ControlState` only changes through whole-state transitions, and
//! `SharedControl` applies each transition under a single mutex, so readers
//! never see `mode` disagree with the boolean flags.

use crate::worker::Worker;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMode {
    Auto,
    Manual,
    Paused,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlState {
    mode: SystemMode,
    manual_override: bool,
    emergency_stop: bool,
    request_quit: bool,
    paused: bool,
    enable_llm: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: SystemMode::Auto,
            manual_override: false,
            emergency_stop: false,
            request_quit: false,
            paused: false,
            enable_llm: true,
        }
    }
}

impl ControlState {
    pub fn mode(&self) -> SystemMode {
        self.mode
    }

    pub fn manual_override(&self) -> bool {
        self.manual_override
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop
    }

    pub fn request_quit(&self) -> bool {
        self.request_quit
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn enable_llm(&self) -> bool {
        self.enable_llm
    }

    /// Frames should be processed: neither paused nor emergency-stopped
    pub fn is_active(&self) -> bool {
        !self.emergency_stop && !self.paused && self.mode != SystemMode::Paused
    }

    pub fn is_auto_mode(&self) -> bool {
        self.mode == SystemMode::Auto && !self.manual_override
    }

    /// Enabling forces `Manual`; disabling returns to `Auto` only from `Manual`
    pub fn set_manual_override(&mut self, enabled: bool) {
        self.manual_override = enabled;
        if enabled {
            self.mode = SystemMode::Manual;
        } else if self.mode == SystemMode::Manual {
            self.mode = SystemMode::Auto;
        }
    }

    pub fn toggle_manual_override(&mut self) {
        self.set_manual_override(!self.manual_override);
    }

    /// Mode to return to when leaving `Paused` or `Degraded`
    fn resting_mode(&self) -> SystemMode {
        if self.manual_override {
            SystemMode::Manual
        } else {
            SystemMode::Auto
        }
    }

    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
        if self.paused {
            self.mode = SystemMode::Paused;
        } else if self.mode == SystemMode::Paused {
            self.mode = self.resting_mode();
        }
    }

    pub fn toggle_emergency_stop(&mut self) {
        self.emergency_stop = !self.emergency_stop;
    }

    pub fn toggle_llm(&mut self) {
        self.enable_llm = !self.enable_llm;
    }

    pub fn set_quit(&mut self) {
        self.request_quit = true;
    }

    pub fn set_degraded_mode(&mut self, enabled: bool) {
        if enabled {
            self.mode = SystemMode::Degraded;
        } else if self.mode == SystemMode::Degraded {
            self.mode = self.resting_mode();
        }
    }
}

/// Thread-safe handle to the process-wide `ControlState`
#[derive(Debug, Clone, Default)]
pub struct SharedControl {
    inner: Arc<Mutex<ControlState>>,
}

impl SharedControl {
    pub fn new(state: ControlState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> ControlState {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply<F: FnOnce(&mut ControlState)>(&self, transition: F) -> ControlState {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        transition(&mut state);
        *state
    }

    pub fn set_manual_override(&self, enabled: bool) -> ControlState {
        self.apply(|s| s.set_manual_override(enabled))
    }

    pub fn toggle_manual_override(&self) -> ControlState {
        self.apply(ControlState::toggle_manual_override)
    }

    pub fn toggle_pause(&self) -> ControlState {
        self.apply(ControlState::toggle_pause)
    }

    pub fn toggle_emergency_stop(&self) -> ControlState {
        self.apply(ControlState::toggle_emergency_stop)
    }

    pub fn toggle_llm(&self) -> ControlState {
        self.apply(ControlState::toggle_llm)
    }

    pub fn request_quit(&self) -> ControlState {
        self.apply(ControlState::set_quit)
    }

    pub fn set_degraded_mode(&self, enabled: bool) -> ControlState {
        self.apply(|s| s.set_degraded_mode(enabled))
    }

    pub fn quit_requested(&self) -> bool {
        self.snapshot().request_quit
    }
}

/// Operator inputs understood by the control listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    Pause,
    ManualOverride,
    EmergencyStop,
    ToggleLlm,
    Quit,
}

impl ControlKey {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'p' => Some(ControlKey::Pause),
            'm' => Some(ControlKey::ManualOverride),
            'e' => Some(ControlKey::EmergencyStop),
            'l' => Some(ControlKey::ToggleLlm),
            'q' => Some(ControlKey::Quit),
            _ => None,
        }
    }

    /// Apply the transition bound to this key
    pub fn apply(self, control: &SharedControl) -> ControlState {
        match self {
            ControlKey::Pause => control.toggle_pause(),
            ControlKey::ManualOverride => control.toggle_manual_override(),
            ControlKey::EmergencyStop => control.toggle_emergency_stop(),
            ControlKey::ToggleLlm => control.toggle_llm(),
            ControlKey::Quit => control.request_quit(),
        }
    }
}

pub type KeyCallback = Box<dyn Fn(&ControlState) + Send>;

/// Background thread turning `ControlKey` events into control transitions
pub struct ControlListener {
    key_tx: Sender<ControlKey>,
    running: Arc<AtomicBool>,
    worker: Option<Worker>,
    join_timeout: Duration,
}

impl ControlListener {
    const POLL: Duration = Duration::from_millis(100);

    pub fn spawn(control: SharedControl) -> std::io::Result<Self> {
        Self::with_callbacks(control, HashMap::new())
    }

    /// Start listening; each callback runs after its key's transition
    pub fn with_callbacks(
        control: SharedControl,
        callbacks: HashMap<ControlKey, KeyCallback>,
    ) -> std::io::Result<Self> {
        let (key_tx, key_rx) = unbounded::<ControlKey>();
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();

        let worker = Worker::spawn("control-listener", move || {
            Self::listen_loop(control, key_rx, worker_running, callbacks);
        })?;

        Ok(Self {
            key_tx,
            running,
            worker: Some(worker),
            join_timeout: Duration::from_secs(1),
        })
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Handle for input sources to push keys into
    pub fn sender(&self) -> Sender<ControlKey> {
        self.key_tx.clone()
    }

    pub fn send(&self, key: ControlKey) -> bool {
        self.key_tx.send(key).is_ok()
    }

    fn listen_loop(
        control: SharedControl,
        key_rx: Receiver<ControlKey>,
        running: Arc<AtomicBool>,
        callbacks: HashMap<ControlKey, KeyCallback>,
    ) {
        log::info!("Control listener started");
        while running.load(Ordering::SeqCst) {
            match key_rx.recv_timeout(Self::POLL) {
                Ok(key) => {
                    let state = key.apply(&control);
                    log::info!("Control key {:?} -> mode {:?}", key, state.mode());
                    if let Some(callback) = callbacks.get(&key) {
                        callback(&state);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!("Control listener stopped");
    }

    /// Idempotent; waits at most the join timeout
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut worker) = self.worker.take() {
            worker.join_timeout(self.join_timeout);
        }
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.stop();
    }
}
