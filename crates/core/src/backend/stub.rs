use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{DispatchError, ProbeError};
use crate::logger;
use crate::targets::{TargetName, TargetSpec};
use crate::types::{Bounds, Point, SearchRegion, Size};
use super::{Hit, SurfaceBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activated {
    Normal(Point),
    Forced(Point),
}

#[derive(Default)]
struct ScriptState {
    present: HashMap<TargetName, Bounds>,
    locate_calls: Vec<TargetName>,
    activations: Vec<Activated>,
    locate_faults: VecDeque<String>,
    activate_faults: VecDeque<DispatchError>,
    force_faults: VecDeque<DispatchError>,
    resets: u32,
}

/// Shared handle that decides what the stub surface shows. Cloning it
/// keeps pointing at the same backend.
#[derive(Clone, Default)]
pub struct StubScript {
    inner: Arc<Mutex<ScriptState>>,
}

impl StubScript {
    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn show(&self, name: TargetName, bounds: Bounds) {
        self.state().present.insert(name, bounds);
    }

    pub fn hide(&self, name: TargetName) {
        self.state().present.remove(&name);
    }

    /// Next `locate` call fails with a backend fault.
    pub fn fail_next_locate(&self, msg: &str) {
        self.state().locate_faults.push_back(msg.to_string());
    }

    pub fn fail_next_activate(&self, err: DispatchError) {
        self.state().activate_faults.push_back(err);
    }

    pub fn fail_next_force(&self, err: DispatchError) {
        self.state().force_faults.push_back(err);
    }

    pub fn locate_calls(&self) -> Vec<TargetName> {
        self.state().locate_calls.clone()
    }

    pub fn activations(&self) -> Vec<Activated> {
        self.state().activations.clone()
    }

    pub fn resets(&self) -> u32 {
        self.state().resets
    }

    pub fn clear_calls(&self) {
        let mut s = self.state();
        s.locate_calls.clear();
        s.activations.clear();
    }
}

/// Backend that answers from a `StubScript`. With an empty script nothing
/// is ever found, which makes it a safe dry-run surface.
pub struct StubBackend {
    script: StubScript,
    logical: Size,
    physical: Size,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::scripted(Size::new(1920, 1080), Size::new(1920, 1080)).0
    }

    /// `logical != physical` simulates a high-density display.
    pub fn scripted(logical: Size, physical: Size) -> (Self, StubScript) {
        let script = StubScript::default();
        (Self { script: script.clone(), logical, physical }, script)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn logical_size(&mut self) -> Result<Size, ProbeError> {
        Ok(self.logical)
    }

    fn probe_size(&mut self) -> Result<Size, ProbeError> {
        Ok(self.physical)
    }

    fn locate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        confidence: f64,
    ) -> Result<Option<Hit>, ProbeError> {
        let mut s = self.script.state();
        s.locate_calls.push(target.name);
        if let Some(msg) = s.locate_faults.pop_front() {
            return Err(ProbeError::Backend(msg));
        }
        let hit = s
            .present
            .get(&target.name)
            .filter(|b| region.map_or(true, |r| r.contains(b.center())))
            .map(|b| Hit::new(*b, 1.0));
        logger::info_p(
            "stub",
            &format!("locate(\"{}\", {:?}, {:.2}) -> {}", target.name, region, confidence, hit.is_some()),
        );
        Ok(hit)
    }

    fn activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        let mut s = self.script.state();
        if let Some(err) = s.activate_faults.pop_front() {
            return Err(err);
        }
        logger::info_p("stub", &format!("activate({}, {})", hit.at.x, hit.at.y));
        s.activations.push(Activated::Normal(hit.at));
        Ok(())
    }

    fn force_activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        let mut s = self.script.state();
        if let Some(err) = s.force_faults.pop_front() {
            return Err(err);
        }
        logger::info_p("stub", &format!("force_activate({}, {})", hit.at.x, hit.at.y));
        s.activations.push(Activated::Forced(hit.at));
        Ok(())
    }

    fn reset_view(&mut self) {
        self.script.state().resets += 1;
    }
}
