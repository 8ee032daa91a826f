use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops;
use image::GrayImage;

use crate::error::{DispatchError, ProbeError};
use crate::logger;
use crate::platform::Desktop;
use crate::targets::{Locator, TargetSpec};
use crate::types::{Bounds, SearchRegion, Size};
use super::{matcher, Hit, SurfaceBackend};

/// Image-matching backend over a captured desktop.
pub struct ScreenBackend {
    desktop: Box<dyn Desktop>,
    templates: HashMap<PathBuf, GrayImage>,
    probe_size: Option<Size>,
}

impl ScreenBackend {
    pub fn new(desktop: Box<dyn Desktop>) -> Self {
        Self { desktop, templates: HashMap::new(), probe_size: None }
    }

    fn template(&mut self, path: &Path) -> Result<&GrayImage, ProbeError> {
        if !self.templates.contains_key(path) {
            let img = image::open(path)
                .map_err(|e| ProbeError::Template { path: path.to_path_buf(), detail: e.to_string() })?
                .to_luma8();
            logger::info_p(
                "screen",
                &format!("loaded template {} ({}x{})", path.display(), img.width(), img.height()),
            );
            self.templates.insert(path.to_path_buf(), img);
        }
        self.templates
            .get(path)
            .ok_or_else(|| ProbeError::Template { path: path.to_path_buf(), detail: "not cached".into() })
    }
}

/// Clip `region` to the capture; `None` means the whole capture.
fn clip(region: Option<SearchRegion>, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let Some(r) = region else {
        return Some((0, 0, width, height));
    };
    if r.x >= width || r.y >= height {
        return None;
    }
    let w = r.width.min(width - r.x);
    let h = r.height.min(height - r.y);
    Some((r.x, r.y, w, h))
}

impl SurfaceBackend for ScreenBackend {
    fn name(&self) -> &'static str {
        "screen"
    }

    fn logical_size(&mut self) -> Result<Size, ProbeError> {
        self.desktop.logical_size()
    }

    fn probe_size(&mut self) -> Result<Size, ProbeError> {
        if let Some(size) = self.probe_size {
            return Ok(size);
        }
        let capture = self.desktop.capture()?;
        let size = Size::new(capture.width, capture.height);
        self.probe_size = Some(size);
        Ok(size)
    }

    fn locate(
        &mut self,
        target: &TargetSpec,
        region: Option<SearchRegion>,
        confidence: f64,
    ) -> Result<Option<Hit>, ProbeError> {
        let Locator::Template(path) = &target.locator else {
            return Err(ProbeError::Backend(format!(
                "screen backend cannot use {} for {}",
                target.locator, target.name
            )));
        };
        let path = path.clone();
        let capture = self.desktop.capture()?;
        let Some((ox, oy, w, h)) = clip(region, capture.width, capture.height) else {
            return Ok(None);
        };
        let gray = matcher::to_gray(&capture);
        let hay = imageops::crop_imm(&gray, ox, oy, w, h).to_image();
        let needle = self.template(&path)?;

        let found = matcher::find(&hay, needle, confidence).map(|m| {
            let bounds = Bounds::new((ox + m.x) as i32, (oy + m.y) as i32, needle.width(), needle.height());
            Hit::new(bounds, m.score)
        });
        Ok(found)
    }

    fn activate(&mut self, hit: &Hit) -> Result<(), DispatchError> {
        self.desktop.click(hit.at)
    }

    fn reset_view(&mut self) {
        self.desktop.scroll_to_top();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::TargetName;
    use crate::types::{Capture, Point};
    use std::sync::{Arc, Mutex};

    struct FakeDesktop {
        frame: GrayImage,
        clicks: Arc<Mutex<Vec<Point>>>,
    }

    impl Desktop for FakeDesktop {
        fn logical_size(&self) -> Result<Size, ProbeError> {
            Ok(Size::new(self.frame.width() / 2, self.frame.height() / 2))
        }

        fn capture(&mut self) -> Result<Capture, ProbeError> {
            let mut data = Vec::new();
            for p in self.frame.pixels() {
                data.extend_from_slice(&[p[0], p[0], p[0], 255]);
            }
            Ok(Capture {
                data,
                width: self.frame.width(),
                height: self.frame.height(),
                bytes_per_row: self.frame.width() * 4,
            })
        }

        fn click(&mut self, at: Point) -> Result<(), DispatchError> {
            self.clicks.lock().unwrap().push(at);
            Ok(())
        }
    }

    fn checker(side: u32) -> GrayImage {
        GrayImage::from_fn(side, side, |x, y| {
            image::Luma([if (x / 3 + y / 3) % 2 == 0 { 240 } else { 20 }])
        })
    }

    fn setup() -> (ScreenBackend, TargetSpec, Arc<Mutex<Vec<Point>>>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booking-offer.png");
        let needle = checker(9);
        needle.save(&path).unwrap();

        let mut frame = GrayImage::from_pixel(200, 120, image::Luma([128]));
        imageops::replace(&mut frame, &needle, 150, 80);
        let clicks = Arc::new(Mutex::new(Vec::new()));
        let backend = ScreenBackend::new(Box::new(FakeDesktop { frame, clicks: clicks.clone() }));
        let spec = TargetSpec { name: TargetName::BookingOffer, locator: Locator::Template(path), min_confidence: None };
        (backend, spec, clicks, dir)
    }

    #[test]
    fn locates_template_in_whole_capture() {
        let (mut backend, spec, _, _dir) = setup();
        let hit = backend.locate(&spec, None, 0.9).unwrap().unwrap();
        assert_eq!(hit.bounds, Bounds::new(150, 80, 9, 9));
        assert_eq!(backend.probe_size().unwrap(), Size::new(200, 120));
        assert_eq!(backend.logical_size().unwrap(), Size::new(100, 60));
    }

    #[test]
    fn region_offsets_are_restored() {
        let (mut backend, spec, _, _dir) = setup();
        let region = SearchRegion::new(100, 50, 100, 70);
        let hit = backend.locate(&spec, region, 0.9).unwrap().unwrap();
        assert_eq!((hit.bounds.x, hit.bounds.y), (150, 80));

        let elsewhere = SearchRegion::new(0, 0, 100, 60);
        assert!(backend.locate(&spec, elsewhere, 0.9).unwrap().is_none());
        let outside = SearchRegion::new(500, 500, 10, 10);
        assert!(backend.locate(&spec, outside, 0.9).unwrap().is_none());
    }

    #[test]
    fn missing_template_is_probe_error() {
        let (mut backend, mut spec, _, dir) = setup();
        spec.locator = Locator::Template(dir.path().join("nope.png"));
        assert!(matches!(backend.locate(&spec, None, 0.9), Err(ProbeError::Template { .. })));
    }

    #[test]
    fn activate_clicks_hit_point() {
        let (mut backend, _, clicks, _dir) = setup();
        let hit = Hit::new(Bounds::new(10, 10, 4, 4), 1.0);
        backend.activate(&hit).unwrap();
        assert_eq!(clicks.lock().unwrap().as_slice(), &[Point::new(12, 12)]);
    }
}
