//! The scan-phase state machine.
//!
//! One `ScanController` runs on its own thread. Each tick evaluates the
//! exit conditions of the current phase through the dispatcher, then
//! sleeps through a `Pacer` so a stop is observed within one slice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::clock::{Clock, Pacer, RunGate, SLICE};
use crate::config::RunConfig;
use crate::dispatch::{ActionDispatcher, Activation};
use crate::error::ScanFault;
use crate::logger;
use crate::probe::ProbeResult;
use crate::targets::{TargetName, TargetSet};
use crate::types::{Phase, ScanStatus, SearchRegion, SuccessKind};

const TOP_BAND_RETRIES: u32 = 3;
const FULL_SURFACE_RETRIES: u32 = 2;

/// Receives the terminal success of a cycle. Must not block.
pub trait SuccessSink: Send + Sync {
    fn notify_success(&self, kind: SuccessKind);
}

/// Per-cycle record, created fresh on every arm.
#[derive(Debug, Clone)]
pub struct ScanCycleState {
    pub generation: u64,
    pub phase: Phase,
    pub refresh_count: u64,
    pub reservation_deadline: Option<Instant>,
    pub total_attempts: u64,
    pub booking_attempts: u64,
    pub waitlist_attempts: u64,
    pub dispatch_failures: u32,
    last_log: HashMap<Phase, Instant>,
}

impl ScanCycleState {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            phase: Phase::Refreshing,
            refresh_count: 0,
            reservation_deadline: None,
            total_attempts: 0,
            booking_attempts: 0,
            waitlist_attempts: 0,
            dispatch_failures: 0,
            last_log: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running, or interrupted by stop/shutdown.
    Idle,
    Progress,
    Success(SuccessKind),
    /// The cycle hit a fault and the run flag was cleared.
    Faulted,
}

fn lock(status: &Mutex<ScanStatus>) -> MutexGuard<'_, ScanStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ScanController {
    config: Arc<RunConfig>,
    targets: TargetSet,
    dispatcher: ActionDispatcher,
    sink: Arc<dyn SuccessSink>,
    gate: Arc<RunGate>,
    clock: Arc<dyn Clock>,
    pacer: Pacer,
    result_region: Option<SearchRegion>,
    status: Arc<Mutex<ScanStatus>>,
    cycle: Option<ScanCycleState>,
}

impl ScanController {
    pub fn new(
        config: Arc<RunConfig>,
        targets: TargetSet,
        dispatcher: ActionDispatcher,
        sink: Arc<dyn SuccessSink>,
        gate: Arc<RunGate>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        logger::register_prefix("scan", logger::COLOR_BLUE);
        let pacer = Pacer::new(gate.clone(), clock.clone());
        Self {
            config,
            targets,
            dispatcher,
            sink,
            gate,
            clock,
            pacer,
            result_region: None,
            status: Arc::new(Mutex::new(ScanStatus::default())),
            cycle: None,
        }
    }

    /// Restrict offer probes to `region` (logical coordinates).
    pub fn with_result_region(mut self, region: Option<SearchRegion>) -> Self {
        self.result_region = region;
        self
    }

    pub fn with_status(mut self, status: Arc<Mutex<ScanStatus>>) -> Self {
        self.status = status;
        self
    }

    pub fn status_handle(&self) -> Arc<Mutex<ScanStatus>> {
        self.status.clone()
    }

    pub fn cycle(&self) -> Option<&ScanCycleState> {
        self.cycle.as_ref()
    }

    /// Loop until shutdown. Faults stop the current run, never the loop.
    pub fn run(&mut self) {
        logger::info_p("scan", "controller ready");
        while !self.gate.is_shutdown() {
            if self.tick() == TickOutcome::Idle && !self.gate.is_running() {
                self.clock.sleep(SLICE);
            }
        }
        self.cycle = None;
        self.publish();
        logger::info_p("scan", "controller stopped");
    }

    /// Evaluate the current phase once.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.gate.should_continue() {
            if self.cycle.take().is_some() {
                logger::info_p("scan", "run stopped, cycle discarded");
            }
            self.publish();
            return TickOutcome::Idle;
        }
        self.ensure_cycle();
        let outcome = match self.advance() {
            Ok(outcome) => outcome,
            Err(fault) => {
                logger::error_p("scan", &format!("{}; run stopped, press start to re-arm", fault));
                self.gate.disarm();
                self.cycle = None;
                lock(&self.status).last_fault = Some(fault.to_string());
                TickOutcome::Faulted
            }
        };
        self.publish();
        outcome
    }

    fn ensure_cycle(&mut self) {
        let generation = self.gate.generation();
        if self.cycle.as_ref().map(|c| c.generation) == Some(generation) {
            return;
        }
        self.cycle = Some(ScanCycleState::new(generation));
        let mut status = lock(&self.status);
        status.last_fault = None;
        status.last_success = None;
        drop(status);
        logger::info_p("scan", &format!("run #{} armed, refreshing", generation));
    }

    fn publish(&self) {
        let mut status = lock(&self.status);
        status.running = self.gate.is_running();
        match &self.cycle {
            Some(c) => {
                status.phase = Some(c.phase);
                status.refresh_count = c.refresh_count;
                status.total_attempts = c.total_attempts;
                status.booking_attempts = c.booking_attempts;
                status.waitlist_attempts = c.waitlist_attempts;
            }
            None => status.phase = None,
        }
    }

    fn state(&mut self) -> &mut ScanCycleState {
        self.cycle.get_or_insert_with(|| ScanCycleState::new(0))
    }

    fn halted(&self) -> bool {
        !self.gate.should_continue()
    }

    fn advance(&mut self) -> Result<TickOutcome, ScanFault> {
        match self.state().phase {
            Phase::Refreshing => self.refreshing(),
            Phase::WaitingConnection => self.waiting_connection(),
            Phase::SearchingReservation => self.searching_reservation(),
        }
    }

    fn refreshing(&mut self) -> Result<TickOutcome, ScanFault> {
        let band = SearchRegion::top_band(self.dispatcher.surface());
        let mut outcome = Activation::NotFound;
        for (region, retries) in [(band, TOP_BAND_RETRIES), (None, FULL_SURFACE_RETRIES)] {
            outcome = self.activate(TargetName::RefreshControl, region, retries)?;
            if !matches!(outcome, Activation::NotFound) {
                break;
            }
            if self.halted() {
                return Ok(TickOutcome::Idle);
            }
        }

        match outcome {
            Activation::Activated(_) => {}
            Activation::Failed(_) => return Ok(self.idle()),
            Activation::NotFound => {
                self.dispatcher.reset_view();
                self.log_throttled(Phase::Refreshing, "refresh control not found, retrying");
                return Ok(self.idle());
            }
        }

        self.state().refresh_count += 1;
        let count = self.state().refresh_count;
        logger::info_p("scan", &format!("refresh #{}", count));
        if !self.pacer.sleep(self.config.settle_delay()) {
            return Ok(TickOutcome::Idle);
        }
        if self.probe(TargetName::ConnectionQueueBanner, None, 1)? {
            logger::info_p("scan", "connection queue shown, waiting");
            self.state().phase = Phase::WaitingConnection;
        } else {
            self.enter_search();
        }
        Ok(TickOutcome::Progress)
    }

    fn waiting_connection(&mut self) -> Result<TickOutcome, ScanFault> {
        if self.probe(TargetName::ConnectionQueueBanner, None, 1)? {
            self.log_throttled(Phase::WaitingConnection, "still queued");
            let idle = self.config.refresh_idle();
            return Ok(if self.pacer.sleep(idle) { TickOutcome::Progress } else { TickOutcome::Idle });
        }
        if self.halted() {
            return Ok(TickOutcome::Idle);
        }
        logger::info_p("scan", "connection queue cleared");
        self.enter_search();
        Ok(TickOutcome::Progress)
    }

    fn searching_reservation(&mut self) -> Result<TickOutcome, ScanFault> {
        let region = self.result_region;

        match self.activate(TargetName::BookingOffer, region, 1)? {
            Activation::Activated(_) => {
                self.count_attempt(SuccessKind::Booking);
                return Ok(self.succeed(SuccessKind::Booking));
            }
            Activation::Failed(_) => {
                self.count_attempt(SuccessKind::Booking);
                return Ok(self.poll());
            }
            Activation::NotFound => {}
        }
        if self.halted() {
            return Ok(TickOutcome::Idle);
        }

        if self.config.enable_waiting_list {
            match self.activate(TargetName::WaitlistOffer, region, 1)? {
                Activation::Activated(_) => {
                    self.count_attempt(SuccessKind::Waitlist);
                    return Ok(self.succeed(SuccessKind::Waitlist));
                }
                Activation::Failed(_) => {
                    self.count_attempt(SuccessKind::Waitlist);
                    return Ok(self.poll());
                }
                Activation::NotFound => {}
            }
            if self.halted() {
                return Ok(TickOutcome::Idle);
            }
        }

        if self.probe(TargetName::ConnectionQueueBanner, None, 1)? {
            logger::info_p("scan", "connection queue shown again, waiting");
            let state = self.state();
            state.phase = Phase::WaitingConnection;
            state.reservation_deadline = None;
            return Ok(TickOutcome::Progress);
        }
        if self.halted() {
            return Ok(TickOutcome::Idle);
        }

        if self.probe(TargetName::SoldOutBanner, None, 1)? {
            logger::info_p("scan", "sold out, refreshing");
            self.back_to_refresh();
            return Ok(TickOutcome::Progress);
        }
        if self.halted() {
            return Ok(TickOutcome::Idle);
        }

        let now = self.clock.now();
        if self.state().reservation_deadline.is_some_and(|deadline| now >= deadline) {
            logger::info_p(
                "scan",
                &format!("no offer within {:.1}s, refreshing", self.config.reservation_scan_timeout_sec),
            );
            self.back_to_refresh();
            return Ok(TickOutcome::Progress);
        }

        self.log_throttled(Phase::SearchingReservation, "still searching");
        Ok(self.poll())
    }

    fn idle(&mut self) -> TickOutcome {
        if self.pacer.sleep_jitter(self.config.refresh_idle()) {
            TickOutcome::Progress
        } else {
            TickOutcome::Idle
        }
    }

    fn poll(&mut self) -> TickOutcome {
        if self.pacer.sleep(self.config.search_poll()) {
            TickOutcome::Progress
        } else {
            TickOutcome::Idle
        }
    }

    fn enter_search(&mut self) {
        let deadline = self.clock.now() + self.config.reservation_timeout();
        let state = self.state();
        state.phase = Phase::SearchingReservation;
        state.reservation_deadline = Some(deadline);
    }

    fn back_to_refresh(&mut self) {
        let state = self.state();
        state.phase = Phase::Refreshing;
        state.reservation_deadline = None;
    }

    fn count_attempt(&mut self, kind: SuccessKind) {
        let state = self.state();
        state.total_attempts += 1;
        match kind {
            SuccessKind::Booking => state.booking_attempts += 1,
            SuccessKind::Waitlist => state.waitlist_attempts += 1,
        }
    }

    fn succeed(&mut self, kind: SuccessKind) -> TickOutcome {
        self.gate.disarm();
        logger::info_p("scan", &format!("{} offer clicked, run complete", kind.label()));
        lock(&self.status).last_success = Some(kind);
        self.sink.notify_success(kind);
        TickOutcome::Success(kind)
    }

    /// Unresolved optional targets always read as absent.
    fn probe(&mut self, name: TargetName, region: Option<SearchRegion>, retries: u32) -> Result<bool, ScanFault> {
        let Some(spec) = self.targets.get(name) else {
            return Ok(false);
        };
        match self.dispatcher.probe(spec, region, retries) {
            Ok(ProbeResult::Found(_)) => Ok(true),
            Ok(ProbeResult::NotFound) => Ok(false),
            Err(source) => Err(ScanFault::Probe { target: name.as_str(), source }),
        }
    }

    fn activate(
        &mut self,
        name: TargetName,
        region: Option<SearchRegion>,
        retries: u32,
    ) -> Result<Activation, ScanFault> {
        let Some(spec) = self.targets.get(name) else {
            return Ok(Activation::NotFound);
        };
        let activation = self
            .dispatcher
            .locate_and_activate(spec, region, retries)
            .map_err(|source| ScanFault::Probe { target: name.as_str(), source })?;
        let max = self.config.max_dispatch_failures;
        match activation {
            Activation::Activated(hit) => {
                self.state().dispatch_failures = 0;
                logger::info_p("scan", &format!("clicked {} at ({}, {})", name, hit.at.x, hit.at.y));
                Ok(Activation::Activated(hit))
            }
            Activation::Failed(err) => {
                let state = self.state();
                state.dispatch_failures += 1;
                let failures = state.dispatch_failures;
                if failures > max {
                    return Err(ScanFault::DispatchExhausted { target: name.as_str(), failures, last: err });
                }
                logger::warn_p("scan", &format!("activating {} failed ({}/{}): {}", name, failures, max, err));
                Ok(Activation::Failed(err))
            }
            Activation::NotFound => Ok(Activation::NotFound),
        }
    }

    fn log_throttled(&mut self, key: Phase, msg: &str) {
        let now = self.clock.now();
        let window = self.config.log_throttle();
        let state = self.state();
        let due = state.last_log.get(&key).map_or(true, |last| now.saturating_duration_since(*last) >= window);
        if due {
            state.last_log.insert(key, now);
            logger::info_p("scan", msg);
        }
    }
}
