use std::time::Duration;

use core_graphics::display::CGDisplay;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::CGPoint;

use crate::error::{DispatchError, ProbeError};
use crate::logger;
use crate::types::{Capture, Point, Size};
use super::Desktop;

const KEYCODE_UP: CGKeyCode = 126;
/// How far the cursor may land from the requested point before we warn.
const CURSOR_TOLERANCE: f64 = 16.0;

pub struct DarwinDesktop {
    display: CGDisplay,
}

impl DarwinDesktop {
    pub fn new() -> Option<Self> {
        let display = CGDisplay::main();
        if display.pixels_wide() == 0 {
            logger::error_p("screen", "no main display found");
            return None;
        }
        Some(Self { display })
    }

    fn source() -> Result<CGEventSource, DispatchError> {
        CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| DispatchError::Failed("cannot create event source".into()))
    }

    fn post_mouse(source: &CGEventSource, kind: CGEventType, point: CGPoint) -> Result<(), DispatchError> {
        let event = CGEvent::new_mouse_event(source.clone(), kind, point, CGMouseButton::Left)
            .map_err(|_| DispatchError::Failed(format!("cannot create {:?} event", kind)))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    fn cursor(source: &CGEventSource) -> Option<CGPoint> {
        CGEvent::new(source.clone()).ok().map(|e| e.location())
    }
}

impl Desktop for DarwinDesktop {
    fn logical_size(&self) -> Result<Size, ProbeError> {
        let bounds = self.display.bounds();
        Ok(Size::new(bounds.size.width as u32, bounds.size.height as u32))
    }

    fn capture(&mut self) -> Result<Capture, ProbeError> {
        let image = self.display.image().ok_or_else(|| {
            ProbeError::Capture("display capture failed; grant Screen Recording permission".into())
        })?;
        let data = image.data();
        Ok(Capture {
            data: data.bytes().to_vec(),
            width: image.width() as u32,
            height: image.height() as u32,
            bytes_per_row: image.bytes_per_row() as u32,
        })
    }

    fn click(&mut self, at: Point) -> Result<(), DispatchError> {
        let source = Self::source()?;
        let point = CGPoint::new(at.x as f64, at.y as f64);

        Self::post_mouse(&source, CGEventType::MouseMoved, point)?;
        std::thread::sleep(Duration::from_millis(15));
        if let Some(now) = Self::cursor(&source) {
            if (now.x - point.x).abs() > CURSOR_TOLERANCE || (now.y - point.y).abs() > CURSOR_TOLERANCE {
                logger::warn_p(
                    "screen",
                    &format!(
                        "cursor at ({:.0}, {:.0}) instead of ({}, {}); check Accessibility permission",
                        now.x, now.y, at.x, at.y
                    ),
                );
            }
        }
        Self::post_mouse(&source, CGEventType::LeftMouseDown, point)?;
        std::thread::sleep(Duration::from_millis(15));
        Self::post_mouse(&source, CGEventType::LeftMouseUp, point)?;
        Ok(())
    }

    fn scroll_to_top(&mut self) {
        let Ok(source) = Self::source() else { return };
        if let Ok(scroll) = CGEvent::new_scroll_event(source.clone(), ScrollEventUnit::PIXEL, 1, 10_000, 0, 0) {
            scroll.post(CGEventTapLocation::HID);
        }
        for down in [true, false] {
            if let Ok(key) = CGEvent::new_keyboard_event(source.clone(), KEYCODE_UP, down) {
                key.set_flags(CGEventFlags::CGEventFlagCommand);
                key.post(CGEventTapLocation::HID);
            }
        }
    }
}
