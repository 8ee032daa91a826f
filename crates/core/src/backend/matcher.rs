//! Grayscale template matching by normalized cross-correlation.
//!
//! Large templates are searched on a downscaled copy first, then refined
//! at full resolution around the best coarse candidates.

use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::types::Capture;

const EPS: f64 = 1e-6;
const COARSE_MIN_SIDE: u32 = 12;
const MAX_FACTOR: u32 = 4;
const COARSE_CANDIDATES: usize = 5;
const COARSE_SLACK: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub score: f64,
}

/// Convert a BGRA capture to luma.
pub fn to_gray(capture: &Capture) -> GrayImage {
    GrayImage::from_fn(capture.width, capture.height, |x, y| {
        let idx = (y * capture.bytes_per_row + x * 4) as usize;
        match capture.data.get(idx..idx + 3) {
            Some(&[b, g, r]) => {
                let l = (29 * b as u32 + 150 * g as u32 + 77 * r as u32) >> 8;
                image::Luma([l as u8])
            }
            _ => image::Luma([0]),
        }
    })
}

struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let v = img.get_pixel(x as u32, y as u32)[0] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let s = self.stride;
        let at = |t: &[f64], xx: usize, yy: usize| t[yy * s + xx];
        let sum = at(&self.sum, x + w, y + h) - at(&self.sum, x, y + h) - at(&self.sum, x + w, y)
            + at(&self.sum, x, y);
        let sq = at(&self.sq, x + w, y + h) - at(&self.sq, x, y + h) - at(&self.sq, x + w, y)
            + at(&self.sq, x, y);
        (sum, sq)
    }
}

struct Needle {
    w: usize,
    h: usize,
    centered: Vec<f64>,
    norm: f64,
}

impl Needle {
    fn new(img: &GrayImage) -> Option<Self> {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let n = (w * h) as f64;
        if n == 0.0 {
            return None;
        }
        let mean = img.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        let centered: Vec<f64> = img.pixels().map(|p| p[0] as f64 - mean).collect();
        let var = centered.iter().map(|v| v * v).sum::<f64>();
        // A flat template correlates with nothing.
        if var < EPS {
            return None;
        }
        Some(Self { w, h, centered, norm: var.sqrt() })
    }
}

fn score_at(hay: &GrayImage, integral: &Integral, needle: &Needle, x: usize, y: usize) -> f64 {
    let n = (needle.w * needle.h) as f64;
    let (sum, sq) = integral.window(x, y, needle.w, needle.h);
    let var = sq - sum * sum / n;
    if var < EPS {
        return 0.0;
    }
    let mut cross = 0.0;
    for ny in 0..needle.h {
        let row = &needle.centered[ny * needle.w..(ny + 1) * needle.w];
        for (nx, t) in row.iter().enumerate() {
            cross += hay.get_pixel((x + nx) as u32, (y + ny) as u32)[0] as f64 * t;
        }
    }
    cross / (var.sqrt() * needle.norm)
}

/// Best `limit` positions scoring at least `min_score` inside the
/// inclusive ranges.
fn scan(
    hay: &GrayImage,
    needle: &Needle,
    xs: (usize, usize),
    ys: (usize, usize),
    min_score: f64,
    limit: usize,
) -> Vec<Match> {
    let integral = Integral::new(hay);
    let mut best: Vec<Match> = Vec::new();
    for y in ys.0..=ys.1 {
        for x in xs.0..=xs.1 {
            let score = score_at(hay, &integral, needle, x, y);
            if score < min_score {
                continue;
            }
            best.push(Match { x: x as u32, y: y as u32, score });
            if best.len() > limit * 4 {
                best.sort_by(|a, b| b.score.total_cmp(&a.score));
                best.truncate(limit);
            }
        }
    }
    best.sort_by(|a, b| b.score.total_cmp(&a.score));
    best.truncate(limit);
    best
}

fn coarse_factor(needle: &GrayImage) -> u32 {
    (needle.width().min(needle.height()) / COARSE_MIN_SIDE).clamp(1, MAX_FACTOR)
}

/// Locate `needle` in `hay`; returns the top-left corner of the best
/// match if it reaches `threshold`.
pub fn find(hay: &GrayImage, needle: &GrayImage, threshold: f64) -> Option<Match> {
    if needle.width() > hay.width() || needle.height() > hay.height() {
        return None;
    }
    let full = Needle::new(needle)?;
    let max_x = (hay.width() - needle.width()) as usize;
    let max_y = (hay.height() - needle.height()) as usize;

    let factor = coarse_factor(needle);
    if factor == 1 {
        return scan(hay, &full, (0, max_x), (0, max_y), threshold, 1).into_iter().next();
    }

    let small = |img: &GrayImage| {
        imageops::resize(img, (img.width() / factor).max(1), (img.height() / factor).max(1), FilterType::Triangle)
    };
    let hay_small = small(hay);
    let needle_small = small(needle);
    if needle_small.width() > hay_small.width() || needle_small.height() > hay_small.height() {
        return None;
    }
    let coarse_needle = Needle::new(&needle_small)?;
    let candidates = scan(
        &hay_small,
        &coarse_needle,
        (0, (hay_small.width() - needle_small.width()) as usize),
        (0, (hay_small.height() - needle_small.height()) as usize),
        threshold - COARSE_SLACK,
        COARSE_CANDIDATES,
    );

    let f = factor as usize;
    let reach = 2 * f;
    candidates
        .iter()
        .filter_map(|c| {
            let cx = c.x as usize * f;
            let cy = c.y as usize * f;
            let xs = (cx.saturating_sub(reach), (cx + reach).min(max_x));
            let ys = (cy.saturating_sub(reach), (cy + reach).min(max_y));
            scan(hay, &full, xs, ys, threshold, 1).into_iter().next()
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}
