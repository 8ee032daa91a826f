use std::sync::{Arc, Mutex, mpsc};

use seatwatch_core::clock::RunGate;
use seatwatch_core::trigger::{InputTrigger, TriggerCommand};
use seatwatch_core::types::ScanStatus;

use crate::confirm::ConfirmDialog;

pub struct App {
    pub status: Arc<Mutex<ScanStatus>>,
    pub trigger: Arc<InputTrigger>,
    pub gate: Arc<RunGate>,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        status: Arc<Mutex<ScanStatus>>,
        trigger: Arc<InputTrigger>,
        gate: Arc<RunGate>,
        log_rx: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            status,
            trigger,
            gate,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
    }

    /// Snapshot of the controller status.
    pub fn snapshot(&self) -> ScanStatus {
        self.status.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Route a key name through the configured hotkeys. Returns true if
    /// it was a start/stop key.
    pub fn hotkey(&mut self, key: &str) -> bool {
        let keys = self.trigger.hotkeys();
        if keys.resolve(key).is_none() {
            return false;
        }
        self.trigger.on_key(key);
        true
    }

    pub fn toggle_run(&mut self) {
        let cmd = if self.gate.is_running() { TriggerCommand::Stop } else { TriggerCommand::Start };
        self.trigger.fire(cmd);
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quitting during a run asks first.
    pub fn request_quit(&mut self) {
        if self.gate.is_running() {
            self.confirm = Some(ConfirmDialog::new("A run is active. Quit anyway?"));
        } else {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.gate.disarm();
        self.gate.request_shutdown();
        self.should_quit = true;
    }
}
