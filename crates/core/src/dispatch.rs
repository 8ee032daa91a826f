use crate::backend::Hit;
use crate::error::{DispatchError, ProbeError};
use crate::logger;
use crate::probe::{ProbeResult, SignalProbe};
use crate::targets::TargetSpec;
use crate::types::{SearchRegion, Size};

#[derive(Debug)]
pub enum Activation {
    Activated(Hit),
    NotFound,
    Failed(DispatchError),
}

/// Locate-then-activate on top of `SignalProbe`, applying per-target
/// confidence floors.
pub struct ActionDispatcher {
    probe: SignalProbe,
    base_confidence: f64,
}

impl ActionDispatcher {
    pub fn new(probe: SignalProbe, base_confidence: f64) -> Self {
        Self { probe, base_confidence }
    }

    /// Effective threshold: the configured confidence, raised to the
    /// target's floor if it has one.
    pub fn confidence_for(&self, target: &TargetSpec) -> f64 {
        target.min_confidence.map_or(self.base_confidence, |floor| self.base_confidence.max(floor))
    }

    pub fn probe(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        retries: u32,
    ) -> Result<ProbeResult, ProbeError> {
        let confidence = self.confidence_for(target);
        self.probe.locate(target, region, confidence, retries)
    }

    /// A `Blocked` activation gets exactly one forced retry.
    pub fn locate_and_activate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        retries: u32,
    ) -> Result<Activation, ProbeError> {
        let hit = match self.probe(target, region, retries)? {
            ProbeResult::Found(hit) => hit,
            ProbeResult::NotFound => return Ok(Activation::NotFound),
        };
        let backend = self.probe.backend_mut();
        let outcome = match backend.activate(&hit) {
            Err(DispatchError::Blocked(reason)) => {
                logger::warn_p("scan", &format!("{} blocked ({}), forcing activation", target.name, reason));
                backend.force_activate(&hit)
            }
            other => other,
        };
        Ok(match outcome {
            Ok(()) => Activation::Activated(hit),
            Err(e) => Activation::Failed(e),
        })
    }

    pub fn reset_view(&mut self) {
        self.probe.backend_mut().reset_view();
    }

    pub fn surface(&self) -> Size {
        self.probe.surface()
    }
}
