//! Scale-aware wrapper around a detection backend.

use std::time::Duration;

use crate::backend::{Hit, SurfaceBackend};
use crate::clock::Pacer;
use crate::error::ProbeError;
use crate::logger;
use crate::targets::TargetSpec;
use crate::types::{Point, SearchRegion, Size};

/// Logical (input) units per probe unit on each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

const IDENTITY_TOLERANCE: f64 = 0.02;

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    /// Ratios within 2% of 1.0 snap to identity.
    pub fn detect(logical: Size, probe: Size) -> Scale {
        if logical.width == 0 || logical.height == 0 || probe.width == 0 || probe.height == 0 {
            return Scale::IDENTITY;
        }
        let x = logical.width as f64 / probe.width as f64;
        let y = logical.height as f64 / probe.height as f64;
        if (x - 1.0).abs() <= IDENTITY_TOLERANCE && (y - 1.0).abs() <= IDENTITY_TOLERANCE {
            Scale::IDENTITY
        } else {
            Scale { x, y }
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Scale::IDENTITY
    }

    /// Logical region to probe space; extents never collapse below 1.
    pub fn region_to_probe(&self, r: SearchRegion) -> SearchRegion {
        if self.is_identity() {
            return r;
        }
        let map = |v: u32, s: f64| (v as f64 / s).round().max(0.0) as u32;
        SearchRegion {
            x: map(r.x, self.x),
            y: map(r.y, self.y),
            width: map(r.width, self.x).max(1),
            height: map(r.height, self.y).max(1),
        }
    }

    /// Probe-space point to an input point clamped onto the surface.
    pub fn point_to_action(&self, p: Point, logical: Size) -> Point {
        let clamp = |v: f64, size: u32| {
            let max = size.saturating_sub(1) as f64;
            v.round().clamp(0.0, max) as i32
        };
        Point::new(clamp(p.x as f64 * self.x, logical.width), clamp(p.y as f64 * self.y, logical.height))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeResult {
    /// `hit.at` is already in action space.
    Found(Hit),
    NotFound,
}

/// Answers "is target T visible, and where" for the controller.
pub struct SignalProbe {
    backend: Box<dyn SurfaceBackend>,
    scale: Scale,
    logical: Size,
    pacer: Pacer,
    retry_delay: Duration,
}

impl SignalProbe {
    /// Measures both coordinate spaces once and fixes the scale for the
    /// lifetime of the probe.
    pub fn new(mut backend: Box<dyn SurfaceBackend>, pacer: Pacer, retry_delay: Duration) -> Result<Self, ProbeError> {
        let logical = backend.logical_size()?;
        let probe = backend.probe_size()?;
        let scale = Scale::detect(logical, probe);
        logger::info_p(
            "scan",
            &format!(
                "{} surface: logical {}x{}, probe {}x{}, scale {:.3}x{:.3}",
                backend.name(),
                logical.width,
                logical.height,
                probe.width,
                probe.height,
                scale.x,
                scale.y
            ),
        );
        Ok(Self { backend, scale, logical, pacer, retry_delay })
    }

    pub fn scale(&self) -> Scale {
        self.scale
    }

    pub fn surface(&self) -> Size {
        self.logical
    }

    pub fn backend_mut(&mut self) -> &mut dyn SurfaceBackend {
        self.backend.as_mut()
    }

    /// Up to `retries` attempts, `retry_delay` apart. Stops early when the
    /// run gate closes and reports `NotFound`.
    pub fn locate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        confidence: f64,
        retries: u32,
    ) -> Result<ProbeResult, ProbeError> {
        let probe_region = region.map(|r| self.scale.region_to_probe(r));
        for attempt in 0..retries.max(1) {
            if attempt > 0 && !self.pacer.sleep(self.retry_delay) {
                break;
            }
            if let Some(mut hit) = self.backend.locate(target, probe_region, confidence)? {
                hit.at = self.scale.point_to_action(hit.at, self.logical);
                return Ok(ProbeResult::Found(hit));
            }
        }
        Ok(ProbeResult::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::stub::StubBackend;
    use crate::clock::{ManualClock, RunGate};
    use crate::targets::{Locator, TargetName};
    use crate::types::Bounds;
    use std::sync::Arc;

    #[test]
    fn near_equal_sizes_are_identity() {
        let s = Scale::detect(Size::new(1920, 1080), Size::new(1940, 1090));
        assert!(s.is_identity());
        let r = SearchRegion::new(100, 200, 300, 50).unwrap();
        assert_eq!(s.region_to_probe(r), r);
        assert_eq!(s.point_to_action(Point::new(10, 20), Size::new(1920, 1080)), Point::new(10, 20));
    }

    #[test]
    fn retina_halves_points_and_clamps() {
        let s = Scale::detect(Size::new(1440, 900), Size::new(2880, 1800));
        assert_eq!(s, Scale { x: 0.5, y: 0.5 });
        assert_eq!(s.point_to_action(Point::new(1000, 601), Size::new(1440, 900)), Point::new(500, 301));
        assert_eq!(s.point_to_action(Point::new(5000, -40), Size::new(1440, 900)), Point::new(1439, 0));
    }

    #[test]
    fn region_maps_into_probe_space() {
        let s = Scale { x: 0.5, y: 0.5 };
        let r = SearchRegion::new(100, 200, 300, 50).unwrap();
        assert_eq!(s.region_to_probe(r), SearchRegion::new(200, 400, 600, 100).unwrap());

        let shrink = Scale { x: 4.0, y: 4.0 };
        let tiny = SearchRegion::new(1, 1, 1, 1).unwrap();
        let mapped = shrink.region_to_probe(tiny);
        assert_eq!((mapped.width, mapped.height), (1, 1));
    }

    #[test]
    fn probe_maps_hits_and_retries() {
        let (backend, script) = StubBackend::scripted(Size::new(1440, 900), Size::new(2880, 1800));
        let gate = Arc::new(RunGate::new());
        gate.arm();
        let pacer = Pacer::new(gate, Arc::new(ManualClock::new()));
        let mut probe = SignalProbe::new(Box::new(backend), pacer, Duration::from_millis(120)).unwrap();
        let spec = TargetSpec {
            name: TargetName::BookingOffer,
            locator: Locator::Css("a".into()),
            min_confidence: None,
        };

        assert_eq!(probe.locate(&spec, None, 0.9, 3).unwrap(), ProbeResult::NotFound);
        assert_eq!(script.locate_calls().len(), 3);

        script.show(TargetName::BookingOffer, Bounds::new(990, 590, 20, 20));
        match probe.locate(&spec, None, 0.9, 3).unwrap() {
            ProbeResult::Found(hit) => assert_eq!(hit.at, Point::new(500, 300)),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn backend_fault_propagates() {
        let (backend, script) = StubBackend::scripted(Size::new(800, 600), Size::new(800, 600));
        let gate = Arc::new(RunGate::new());
        gate.arm();
        let pacer = Pacer::new(gate, Arc::new(ManualClock::new()));
        let mut probe = SignalProbe::new(Box::new(backend), pacer, Duration::from_millis(120)).unwrap();
        let spec = TargetSpec {
            name: TargetName::RefreshControl,
            locator: Locator::Css("a".into()),
            min_confidence: None,
        };
        script.fail_next_locate("capture denied");
        assert!(probe.locate(&spec, None, 0.9, 2).is_err());
    }
}
