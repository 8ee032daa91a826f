//! Fixtures shared by the scenario harness: a runtime wired to a scripted
//! surface, a manual clock and a recording notification transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use seatwatch_core::backend::stub::{StubBackend, StubScript};
use seatwatch_core::clock::ManualClock;
use seatwatch_core::config::{BackendKind, RunConfig};
use seatwatch_core::controller::ScanController;
use seatwatch_core::error::NotifyError;
use seatwatch_core::notify::{Incoming, LocalAlert, Notifier, Transport};
use seatwatch_core::runtime::Runtime;
use seatwatch_core::targets::TargetSet;
use seatwatch_core::types::{Bounds, SearchRegion, Size};

pub const CHAT: &str = "42";

pub const REFRESH: Bounds = Bounds { x: 600, y: 40, w: 80, h: 30 };
pub const BOOKING: Bounds = Bounds { x: 900, y: 500, w: 60, h: 24 };
pub const WAITLIST: Bounds = Bounds { x: 1000, y: 500, w: 60, h: 24 };

/// What the fake remote side saw and will answer.
#[derive(Default)]
pub struct Remote {
    pub sent: Mutex<Vec<String>>,
    polls: Mutex<VecDeque<Vec<Incoming>>>,
}

impl Remote {
    /// Queue the answer for the next `poll_incoming`.
    pub fn answer(&self, batch: Vec<Incoming>) {
        lock(&self.polls).push_back(batch);
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct RecordingTransport(pub Arc<Remote>);

impl Transport for RecordingTransport {
    fn send(&self, _chat: &str, text: &str) -> Result<(), NotifyError> {
        lock(&self.0.sent).push(text.to_string());
        Ok(())
    }

    fn poll_incoming(&self, after: Option<i64>, _timeout: Duration) -> Result<Vec<Incoming>, NotifyError> {
        let batch = lock(&self.0.polls).pop_front().unwrap_or_default();
        Ok(batch.into_iter().filter(|u| after.map_or(true, |a| u.cursor > a)).collect())
    }
}

#[derive(Clone, Default)]
pub struct Bell(pub Arc<Mutex<Vec<String>>>);

impl LocalAlert for Bell {
    fn alert(&self, text: &str) {
        lock(&self.0).push(text.to_string());
    }
}

pub fn stop_from(cursor: i64, chat: &str) -> Incoming {
    Incoming { cursor, chat: chat.to_string(), text: "/stop".to_string() }
}

/// Notifier over a recording transport. `max_duration` of zero means a
/// single message per alert.
pub fn notifier(remote: &Arc<Remote>, clock: Arc<ManualClock>, max_duration: Duration) -> Notifier {
    Notifier::new(
        Box::new(RecordingTransport(remote.clone())),
        CHAT,
        Box::new(Bell::default()),
        clock,
        Duration::from_secs(5),
        max_duration,
    )
}

/// Defaults with the stub backend, which resolves targets from selectors.
pub fn stub_config() -> RunConfig {
    RunConfig { backend: BackendKind::Stub, ..RunConfig::default() }
}

/// A fully wired runtime whose controller is ticked by hand.
pub struct Rig {
    pub runtime: Runtime,
    pub controller: ScanController,
    pub script: StubScript,
    pub clock: Arc<ManualClock>,
    pub remote: Arc<Remote>,
}

impl Rig {
    pub fn new(config: RunConfig, result_region: Option<SearchRegion>) -> Result<Self, String> {
        let targets = TargetSet::for_config(&config).map_err(|e| e.to_string())?;
        let (backend, script) = StubBackend::scripted(Size::new(1280, 800), Size::new(1280, 800));
        let clock = Arc::new(ManualClock::new());
        let remote = Arc::new(Remote::default());
        let notifier = notifier(&remote, clock.clone(), Duration::ZERO);
        let mut runtime = Runtime::assemble(
            config,
            targets,
            Box::new(backend),
            notifier,
            clock.clone(),
            result_region,
        )
        .map_err(|e| format!("{:#}", e))?;
        let controller = runtime.take_controller().ok_or("controller already taken")?;
        Ok(Self { runtime, controller, script, clock, remote })
    }

    /// Press a key the way the hotkey listener would.
    pub fn press(&self, key: &str) {
        self.runtime.trigger.on_key(key);
    }

    /// Wait for background alerts to finish and return what was sent.
    pub fn finish(self) -> Vec<String> {
        let remote = self.remote.clone();
        self.runtime.shutdown();
        remote.sent()
    }
}
