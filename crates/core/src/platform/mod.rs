pub mod hotkey;

#[cfg(target_os = "macos")]
pub mod darwin;

use crate::error::{DispatchError, ProbeError};
use crate::types::{Capture, Point, Size};

/// The desktop the screen backend captures and clicks on.
pub trait Desktop: Send {
    /// Display size in input (point) coordinates.
    fn logical_size(&self) -> Result<Size, ProbeError>;

    /// Full-display capture at native resolution.
    fn capture(&mut self) -> Result<Capture, ProbeError>;

    /// Left click at `at`, in input coordinates.
    fn click(&mut self, at: Point) -> Result<(), DispatchError>;

    fn scroll_to_top(&mut self) {}
}

/// Native desktop for the current OS, if screen automation is supported.
pub fn create_desktop() -> Option<Box<dyn Desktop>> {
    #[cfg(target_os = "macos")]
    {
        return darwin::DarwinDesktop::new().map(|d| Box::new(d) as Box<dyn Desktop>);
    }
    #[cfg(not(target_os = "macos"))]
    {
        None
    }
}
