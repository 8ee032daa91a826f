//! Startup wiring and bounded shutdown.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::backend::{self, SurfaceBackend};
use crate::clock::{Clock, Pacer, RunGate, SystemClock};
use crate::config::{BackendKind, RunConfig};
use crate::controller::ScanController;
use crate::dispatch::ActionDispatcher;
use crate::logger;
use crate::notify::Notifier;
use crate::platform::hotkey;
use crate::probe::SignalProbe;
use crate::region;
use crate::targets::TargetSet;
use crate::trigger::{HotkeyMap, InputTrigger};
use crate::types::{ScanStatus, SearchRegion};

pub struct Runtime {
    pub config: Arc<RunConfig>,
    pub gate: Arc<RunGate>,
    pub trigger: Arc<InputTrigger>,
    pub notifier: Notifier,
    pub status: Arc<Mutex<ScanStatus>>,
    controller: Option<ScanController>,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

impl Runtime {
    /// Build everything from configuration. Fails on any startup fault;
    /// nothing runs yet.
    pub fn from_config(mut config: RunConfig, force_stub: bool) -> Result<Self> {
        if force_stub {
            config.backend = BackendKind::Stub;
        }
        let targets = TargetSet::for_config(&config).context("resolving targets")?;
        let backend = backend::create_backend(&config).context("creating backend")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = Notifier::from_config(&config, clock.clone());
        let region = if config.roi_enabled { region::load(&config.region_file) } else { None };
        Self::assemble(config, targets, backend, notifier, clock, region)
    }

    pub fn assemble(
        config: RunConfig,
        targets: TargetSet,
        backend: Box<dyn SurfaceBackend>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        result_region: Option<SearchRegion>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let gate = Arc::new(RunGate::new());
        let pacer = Pacer::new(gate.clone(), clock.clone());
        let probe = SignalProbe::new(backend, pacer, config.probe_retry_delay()).context("measuring surface")?;
        let dispatcher = ActionDispatcher::new(probe, config.image_match_confidence);

        let trigger = Arc::new(InputTrigger::new(
            gate.clone(),
            HotkeyMap::new(&config.start_hotkey, &config.stop_hotkey),
            config.debounce(),
            clock.clone(),
        ));
        let status = Arc::new(Mutex::new(ScanStatus::default()));
        let controller = ScanController::new(
            config.clone(),
            targets,
            dispatcher,
            Arc::new(notifier.clone()),
            gate.clone(),
            clock,
        )
        .with_result_region(result_region)
        .with_status(status.clone());

        Ok(Self { config, gate, trigger, notifier, status, controller: Some(controller), threads: Vec::new() })
    }

    /// Log the effective configuration and send the startup summary.
    pub fn announce(&self) {
        let summary = self.config.summary();
        for line in summary.lines() {
            logger::info(line);
        }
        self.notifier.announce(&summary);
    }

    /// Hand the controller to the caller instead of spawning it.
    pub fn take_controller(&mut self) -> Option<ScanController> {
        self.controller.take()
    }

    pub fn spawn_controller(&mut self) {
        let Some(mut controller) = self.controller.take() else { return };
        let handle = std::thread::spawn(move || controller.run());
        self.threads.push(("controller", handle));
    }

    pub fn start_hotkeys(&mut self) {
        if let Some(handle) = hotkey::start_hotkey_listener(self.trigger.clone(), self.gate.clone()) {
            self.threads.push(("hotkey listener", handle));
        }
    }

    /// Stop everything, waiting at most `shutdown_grace` for each part.
    pub fn shutdown(mut self) {
        logger::info("shutting down");
        self.gate.disarm();
        self.gate.request_shutdown();
        let grace = self.config.shutdown_grace();
        let deadline = Instant::now() + grace;
        for (name, handle) in self.threads.drain(..) {
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            if handle.is_finished() {
                handle.join().ok();
            } else {
                logger::warn(&format!("{} did not stop within {:?}", name, grace));
            }
        }
        self.notifier.shutdown(grace);
    }
}
