pub mod matcher;
pub mod screen;
pub mod stub;
pub mod webdriver;

use crate::config::{BackendKind, RunConfig};
use crate::error::{ConfigError, DispatchError, ProbeError};
use crate::logger;
use crate::platform;
use crate::targets::TargetSpec;
use crate::types::{Bounds, Point, SearchRegion, Size};

/// A located target.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Bounding box in probe space.
    pub bounds: Bounds,
    /// Activation point. Backends fill in the probe-space center;
    /// `SignalProbe` rewrites it into action space.
    pub at: Point,
    pub score: f64,
    /// Backend handle for element-based surfaces.
    pub element: Option<String>,
}

impl Hit {
    pub fn new(bounds: Bounds, score: f64) -> Self {
        Self { bounds, at: bounds.center(), score, element: None }
    }

    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }
}

/// The {locate, activate} capability set over one booking surface.
///
/// `locate` must return `Ok(None)` for "not there"; `Err` is reserved for
/// I/O failures of the backend itself.
pub trait SurfaceBackend: Send {
    fn name(&self) -> &'static str;

    /// Size of the surface in input (click) coordinates.
    fn logical_size(&mut self) -> Result<Size, ProbeError>;

    /// Size of the surface as the detector sees it.
    fn probe_size(&mut self) -> Result<Size, ProbeError>;

    /// `region` is already in probe space.
    fn locate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        confidence: f64,
    ) -> Result<Option<Hit>, ProbeError>;

    fn activate(&mut self, hit: &Hit) -> Result<(), DispatchError>;

    /// Last-resort activation after `activate` reported `Blocked`.
    fn force_activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        self.activate(hit)
    }

    /// Bring the surface back to its initial scroll position.
    fn reset_view(&mut self) {}
}

/// Build the backend selected in `config`.
pub fn create_backend(config: &RunConfig) -> Result<Box<dyn SurfaceBackend>, ConfigError> {
    match config.backend {
        BackendKind::Stub => {
            logger::register_prefix("stub", logger::COLOR_GRAY);
            Ok(Box::new(stub::StubBackend::new()))
        }
        BackendKind::Webdriver => {
            logger::register_prefix("webdriver", logger::COLOR_GRAY);
            Ok(Box::new(webdriver::WebDriverBackend::connect(
                &config.webdriver_url,
                config.webdriver_session.as_deref(),
                config.request_timeout(),
            )?))
        }
        BackendKind::Screen => {
            logger::register_prefix("screen", logger::COLOR_GRAY);
            match platform::create_desktop() {
                Some(desktop) => Ok(Box::new(screen::ScreenBackend::new(desktop))),
                None => {
                    logger::register_prefix("stub", logger::COLOR_GRAY);
                    logger::warn("screen capture is not supported on this platform; using stub backend");
                    Ok(Box::new(stub::StubBackend::new()))
                }
            }
        }
    }
}
