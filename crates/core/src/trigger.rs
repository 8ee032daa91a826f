//! Start/stop input handling: hotkey resolution and debouncing in front
//! of the shared run gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::clock::{Clock, RunGate};
use crate::logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerCommand {
    Start,
    Stop,
}

/// Configured key names (lowercase, e.g. `f9`, `esc`).
#[derive(Debug, Clone)]
pub struct HotkeyMap {
    pub start: String,
    pub stop: String,
}

impl HotkeyMap {
    pub fn new(start: &str, stop: &str) -> Self {
        Self { start: start.trim().to_lowercase(), stop: stop.trim().to_lowercase() }
    }

    pub fn resolve(&self, key: &str) -> Option<TriggerCommand> {
        let key = key.trim().to_lowercase();
        if key == self.start {
            Some(TriggerCommand::Start)
        } else if key == self.stop {
            Some(TriggerCommand::Stop)
        } else {
            None
        }
    }

    pub fn keys(&self) -> [&str; 2] {
        [&self.start, &self.stop]
    }
}

/// Drops repeats of the same command inside `window`.
pub struct Debouncer {
    window: Duration,
    last_fired: HashMap<TriggerCommand, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last_fired: HashMap::new() }
    }

    pub fn admit(&mut self, cmd: TriggerCommand, now: Instant) -> bool {
        if let Some(last) = self.last_fired.get(&cmd) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_fired.insert(cmd, now);
        true
    }
}

/// Turns key presses into run-gate transitions. Called from the hotkey
/// thread and the TUI thread alike.
pub struct InputTrigger {
    gate: Arc<RunGate>,
    keys: HotkeyMap,
    debouncer: Mutex<Debouncer>,
    clock: Arc<dyn Clock>,
}

impl InputTrigger {
    pub fn new(gate: Arc<RunGate>, keys: HotkeyMap, debounce: Duration, clock: Arc<dyn Clock>) -> Self {
        logger::register_prefix("trigger", logger::COLOR_MAGENTA);
        Self { gate, keys, debouncer: Mutex::new(Debouncer::new(debounce)), clock }
    }

    pub fn hotkeys(&self) -> &HotkeyMap {
        &self.keys
    }

    /// Returns the command the key mapped to, if it was acted on.
    pub fn on_key(&self, key: &str) -> Option<TriggerCommand> {
        let cmd = self.keys.resolve(key)?;
        let admitted = self
            .debouncer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .admit(cmd, self.clock.now());
        if !admitted {
            return None;
        }
        self.fire(cmd);
        Some(cmd)
    }

    /// Apply `cmd` without debouncing.
    pub fn fire(&self, cmd: TriggerCommand) {
        match cmd {
            TriggerCommand::Start => {
                if self.gate.is_running() {
                    logger::info_p("trigger", "already running");
                    return;
                }
                let generation = self.gate.arm();
                logger::info_p("trigger", &format!("started (run #{})", generation));
            }
            TriggerCommand::Stop => {
                if !self.gate.is_running() {
                    return;
                }
                self.gate.disarm();
                logger::info_p("trigger", "stopped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn trigger() -> (InputTrigger, Arc<RunGate>, Arc<ManualClock>) {
        let gate = Arc::new(RunGate::new());
        let clock = Arc::new(ManualClock::new());
        let t = InputTrigger::new(gate.clone(), HotkeyMap::new("F9", "esc"), Duration::from_millis(300), clock.clone());
        (t, gate, clock)
    }

    #[test]
    fn resolves_case_insensitively() {
        let keys = HotkeyMap::new("F9", "Esc");
        assert_eq!(keys.resolve("f9"), Some(TriggerCommand::Start));
        assert_eq!(keys.resolve("ESC"), Some(TriggerCommand::Stop));
        assert_eq!(keys.resolve("f10"), None);
    }

    #[test]
    fn double_start_inside_window_arms_once() {
        let (t, gate, clock) = trigger();
        assert_eq!(t.on_key("f9"), Some(TriggerCommand::Start));
        clock.advance(Duration::from_millis(100));
        assert_eq!(t.on_key("f9"), None);
        assert!(gate.is_running());
        assert_eq!(gate.generation(), 1);
    }

    #[test]
    fn start_while_running_keeps_generation() {
        let (t, gate, clock) = trigger();
        t.on_key("f9");
        clock.advance(Duration::from_secs(2));
        assert_eq!(t.on_key("f9"), Some(TriggerCommand::Start));
        assert_eq!(gate.generation(), 1);
    }

    #[test]
    fn stop_then_start_rearms() {
        let (t, gate, clock) = trigger();
        t.on_key("f9");
        t.on_key("esc");
        assert!(!gate.is_running());
        clock.advance(Duration::from_millis(400));
        t.on_key("f9");
        assert!(gate.is_running());
        assert_eq!(gate.generation(), 2);
    }

    #[test]
    fn stop_is_idempotent() {
        let (t, gate, clock) = trigger();
        t.on_key("esc");
        clock.advance(Duration::from_secs(1));
        t.on_key("esc");
        assert!(!gate.is_running());
        assert_eq!(gate.generation(), 0);
    }
}
