use serde::{Deserialize, Serialize};

/// Pixel point on a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Width/height of a surface, in that surface's own units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Bounding box of a located target (probe-space coordinates).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + (self.w / 2) as i32, self.y + (self.h / 2) as i32)
    }
}

/// Rectangle constraining where a probe looks. Width and height are
/// always positive and the far edges fit in a `u32`; construct through
/// `SearchRegion::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SearchRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        x.checked_add(width)?;
        y.checked_add(height)?;
        Some(Self { x, y, width, height })
    }

    /// Upper band of the surface where the refresh control normally sits.
    pub fn top_band(surface: Size) -> Option<Self> {
        let band = ((surface.height as f64) * 0.45) as u32;
        Self::new(0, 0, surface.width, band.max(220).min(surface.height.max(1)))
    }

    pub fn contains(&self, p: Point) -> bool {
        let (px, py) = (p.x as i64, p.y as i64);
        let (x, y) = (self.x as i64, self.y as i64);
        px >= x && py >= y && px < x + self.width as i64 && py < y + self.height as i64
    }
}

/// One state of the scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Refreshing,
    WaitingConnection,
    SearchingReservation,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Refreshing => "refreshing",
            Phase::WaitingConnection => "waiting for connection",
            Phase::SearchingReservation => "searching reservation",
        }
    }
}

/// Which offer ended a cycle successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessKind {
    Booking,
    Waitlist,
}

impl SuccessKind {
    pub fn label(&self) -> &'static str {
        match self {
            SuccessKind::Booking => "booking",
            SuccessKind::Waitlist => "waitlist",
        }
    }
}

/// Snapshot of the controller published for the TUI.
#[derive(Debug, Clone, Default)]
pub struct ScanStatus {
    pub running: bool,
    pub phase: Option<Phase>,
    pub refresh_count: u64,
    pub total_attempts: u64,
    pub booking_attempts: u64,
    pub waitlist_attempts: u64,
    pub last_success: Option<SuccessKind>,
    pub last_fault: Option<String>,
}

/// Raw screenshot pixel data (BGRA)
#[derive(Debug)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_rejects_empty_extent() {
        assert!(SearchRegion::new(100, 200, 0, 50).is_none());
        assert!(SearchRegion::new(100, 200, 300, 0).is_none());
        assert!(SearchRegion::new(100, 200, 300, 50).is_some());
    }

    #[test]
    fn region_edges_must_fit() {
        assert!(SearchRegion::new(u32::MAX - 10, 0, 20, 5).is_none());
        assert!(SearchRegion::new(0, u32::MAX, 5, 1).is_none());
        assert!(SearchRegion::new(u32::MAX - 20, 0, 20, 5).is_some());
    }

    #[test]
    fn contains_far_from_origin() {
        // Far edge past i32::MAX, near edge well past any screen.
        let r = SearchRegion::new(4_294_967_000, 0, 200, 50).unwrap();
        assert!(!r.contains(Point::new(10, 10)));
        assert!(!r.contains(Point::new(i32::MAX, 10)));

        let r = SearchRegion::new(100, 200, 300, 50).unwrap();
        assert!(r.contains(Point::new(100, 200)));
        assert!(!r.contains(Point::new(400, 220)));
        assert!(!r.contains(Point::new(-5, 220)));
    }

    #[test]
    fn top_band_has_floor_of_220() {
        let r = SearchRegion::top_band(Size::new(1280, 400)).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 1280, 220));

        let r = SearchRegion::top_band(Size::new(1920, 1080)).unwrap();
        assert_eq!(r.height, 486);
    }

    #[test]
    fn bounds_center() {
        assert_eq!(Bounds::new(10, 20, 30, 40).center(), Point::new(25, 40));
    }
}
