//! Time source and interruptible sleeping for the scan loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

/// Longest uninterrupted sleep slice; bounds stop latency.
pub const SLICE: Duration = Duration::from_millis(50);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Clock that only moves when slept on or advanced. For tests.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now: Mutex::new(Instant::now()) }
    }

    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += d;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// The run flag shared between the trigger and the controller, plus the
/// process-wide shutdown flag.
///
/// `arm` bumps a generation counter before raising the flag so the
/// controller can tell a re-arm apart from a flag that never dropped.
#[derive(Default)]
pub struct RunGate {
    running: AtomicBool,
    shutdown: AtomicBool,
    generation: AtomicU64,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.running.store(true, Ordering::Release);
        generation
    }

    pub fn disarm(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// True while the cycle may keep probing and clicking.
    pub fn should_continue(&self) -> bool {
        self.is_running() && !self.is_shutdown()
    }
}

/// Sleeps in `SLICE` steps and gives up as soon as the gate closes.
#[derive(Clone)]
pub struct Pacer {
    gate: Arc<RunGate>,
    clock: Arc<dyn Clock>,
}

impl Pacer {
    pub fn new(gate: Arc<RunGate>, clock: Arc<dyn Clock>) -> Self {
        Self { gate, clock }
    }

    /// Returns false if interrupted by stop or shutdown.
    pub fn sleep(&self, d: Duration) -> bool {
        let deadline = self.clock.now() + d;
        loop {
            if !self.gate.should_continue() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(SLICE));
        }
    }

    /// Sleep for `d` with +/-30% random jitter.
    pub fn sleep_jitter(&self, d: Duration) -> bool {
        let secs = d.as_secs_f64();
        let jitter = secs * 0.3;
        let actual = if jitter > 0.0 {
            secs + rand::thread_rng().gen_range(-jitter..jitter)
        } else {
            secs
        };
        self.sleep(Duration::from_secs_f64(actual.max(0.01)))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_bumps_generation() {
        let gate = RunGate::new();
        assert!(!gate.is_running());
        assert_eq!(gate.arm(), 1);
        assert!(gate.is_running());
        gate.disarm();
        assert_eq!(gate.arm(), 2);
        gate.request_shutdown();
        assert!(!gate.should_continue());
    }

    #[test]
    fn pacer_sleeps_full_duration_while_running() {
        let gate = Arc::new(RunGate::new());
        gate.arm();
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        let pacer = Pacer::new(gate, clock.clone());
        assert!(pacer.sleep(Duration::from_millis(180)));
        assert_eq!(clock.now() - start, Duration::from_millis(180));
    }

    #[test]
    fn pacer_returns_immediately_when_stopped() {
        let gate = Arc::new(RunGate::new());
        let clock = Arc::new(ManualClock::new());
        let start = clock.now();
        let pacer = Pacer::new(gate, clock.clone());
        assert!(!pacer.sleep(Duration::from_secs(5)));
        assert_eq!(clock.now(), start);
    }
}
