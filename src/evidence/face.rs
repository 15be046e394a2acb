//! Face localization and cropping.
//!
//! Localization is a trait seam: the shipped [`SkinRegionLocalizer`] is a
//! pure-Rust skin-probability scan (mask → connected components → bounding
//! boxes), good enough to find the dominant talking head in upload footage.
//! A heavier detector can replace it without touching the extractor.

use image::imageops::FilterType;
use image::RgbImage;

use super::{FACE_CROP_MARGIN, FACE_CROP_SIZE};

/// Minimum accepted face box edge, in full-frame pixels.
const MIN_FACE_SIZE: u32 = 30;

/// Longest edge of the downscaled working copy used for the mask scan.
const SCAN_MAX_DIM: u32 = 320;

/// Axis-aligned face bounding box in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Finds candidate face regions in a frame.
///
/// Regions are returned in scan order (top-left first), which makes the
/// largest-box tie-break deterministic.
pub trait FaceLocalizer: Send + Sync {
    fn localize(&self, frame: &RgbImage) -> Vec<FaceRegion>;
}

/// Pick the dominant face: largest area, first detected on (rare) ties.
pub fn largest_region(regions: &[FaceRegion]) -> Option<FaceRegion> {
    let mut best: Option<FaceRegion> = None;
    for region in regions {
        match best {
            Some(b) if region.area() <= b.area() => {}
            _ => best = Some(*region),
        }
    }
    best
}

/// Crop a face region with a fixed margin clamped to the frame bounds and
/// resize to the canonical crop size.
pub fn crop_face(frame: &RgbImage, region: &FaceRegion) -> RgbImage {
    let x_start = region.x.saturating_sub(FACE_CROP_MARGIN);
    let y_start = region.y.saturating_sub(FACE_CROP_MARGIN);
    let x_end = (region.x + region.width + FACE_CROP_MARGIN).min(frame.width());
    let y_end = (region.y + region.height + FACE_CROP_MARGIN).min(frame.height());

    let roi = image::imageops::crop_imm(
        frame,
        x_start,
        y_start,
        (x_end - x_start).max(1),
        (y_end - y_start).max(1),
    )
    .to_image();

    image::imageops::resize(&roi, FACE_CROP_SIZE, FACE_CROP_SIZE, FilterType::CatmullRom)
}

// ═══════════════════════════════════════════════════════════
// SkinRegionLocalizer
// ═══════════════════════════════════════════════════════════

/// Skin-probability region localizer.
///
/// Pipeline: downscale the frame (mask cost stays constant) → per-pixel
/// skin classification with the classic RGB rule → 4-connected component
/// labeling → bounding boxes scaled back to full-frame coordinates, filtered
/// by [`MIN_FACE_SIZE`].
pub struct SkinRegionLocalizer {
    min_face_size: u32,
}

impl SkinRegionLocalizer {
    pub fn new() -> Self {
        Self {
            min_face_size: MIN_FACE_SIZE,
        }
    }

    /// Override the minimum accepted box edge (full-frame pixels).
    pub fn with_min_face_size(min_face_size: u32) -> Self {
        Self { min_face_size }
    }
}

impl Default for SkinRegionLocalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceLocalizer for SkinRegionLocalizer {
    fn localize(&self, frame: &RgbImage) -> Vec<FaceRegion> {
        let (full_w, full_h) = (frame.width(), frame.height());
        if full_w == 0 || full_h == 0 {
            return Vec::new();
        }

        // Downscale so the component scan runs on a bounded grid.
        let largest = full_w.max(full_h);
        let scale = if largest > SCAN_MAX_DIM {
            SCAN_MAX_DIM as f32 / largest as f32
        } else {
            1.0
        };
        let scan_w = ((full_w as f32 * scale).round() as u32).max(1);
        let scan_h = ((full_h as f32 * scale).round() as u32).max(1);
        let working = if scale < 1.0 {
            image::imageops::resize(frame, scan_w, scan_h, FilterType::Triangle)
        } else {
            frame.clone()
        };

        let mask = skin_mask(&working);
        let boxes = connected_component_boxes(&mask, scan_w as usize, scan_h as usize);

        let inv = 1.0 / scale;
        let mut regions = Vec::new();
        for (min_x, min_y, max_x, max_y) in boxes {
            let x = ((min_x as f32 * inv) as u32).min(full_w.saturating_sub(1));
            let y = ((min_y as f32 * inv) as u32).min(full_h.saturating_sub(1));
            let w = ((((max_x - min_x + 1) as f32) * inv) as u32).min(full_w - x);
            let h = ((((max_y - min_y + 1) as f32) * inv) as u32).min(full_h - y);
            if w < self.min_face_size || h < self.min_face_size {
                continue;
            }
            regions.push(FaceRegion { x, y, width: w, height: h });
        }
        regions
    }
}

/// Per-pixel skin classification (Peer et al. RGB rule):
/// R>95, G>40, B>20, max−min>15, |R−G|>15, R>G, R>B.
fn skin_mask(img: &RgbImage) -> Vec<bool> {
    img.pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            r > 95
                && g > 40
                && b > 20
                && max - min > 15
                && (r as i16 - g as i16).abs() > 15
                && r > g
                && r > b
        })
        .collect()
}

/// 4-connected component bounding boxes over a boolean mask, in scan order
/// of each component's first-seen pixel. Returns (min_x, min_y, max_x, max_y).
fn connected_component_boxes(
    mask: &[bool],
    width: usize,
    height: usize,
) -> Vec<(usize, usize, usize, usize)> {
    let mut visited = vec![false; mask.len()];
    let mut boxes = Vec::new();
    let mut queue = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let (mut min_x, mut min_y) = (start % width, start / width);
        let (mut max_x, mut max_y) = (min_x, min_y);

        visited[start] = true;
        queue.push(start);
        while let Some(idx) = queue.pop() {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            let mut push = |nidx: usize| {
                if mask[nidx] && !visited[nidx] {
                    visited[nidx] = true;
                    queue.push(nidx);
                }
            };
            if x > 0 {
                push(idx - 1);
            }
            if x + 1 < width {
                push(idx + 1);
            }
            if y > 0 {
                push(idx - width);
            }
            if y + 1 < height {
                push(idx + width);
            }
        }
        boxes.push((min_x, min_y, max_x, max_y));
    }
    boxes
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SKIN: Rgb<u8> = Rgb([205, 140, 110]);
    const BACKDROP: Rgb<u8> = Rgb([20, 40, 180]);

    /// Frame with one skin-colored rectangle on a non-skin backdrop.
    fn frame_with_face(w: u32, h: u32, fx: u32, fy: u32, fw: u32, fh: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(w, h, BACKDROP);
        for y in fy..(fy + fh).min(h) {
            for x in fx..(fx + fw).min(w) {
                img.put_pixel(x, y, SKIN);
            }
        }
        img
    }

    #[test]
    fn localizer_finds_single_face() {
        let frame = frame_with_face(320, 240, 100, 60, 80, 100);
        let regions = SkinRegionLocalizer::new().localize(&frame);
        assert_eq!(regions.len(), 1);
        let r = regions[0];
        assert!(r.x >= 95 && r.x <= 105, "x = {}", r.x);
        assert!(r.width >= 70 && r.width <= 90, "width = {}", r.width);
    }

    #[test]
    fn localizer_ignores_frames_without_skin() {
        let frame = RgbImage::from_pixel(320, 240, BACKDROP);
        assert!(SkinRegionLocalizer::new().localize(&frame).is_empty());
    }

    #[test]
    fn localizer_filters_tiny_regions() {
        // 10x10 region is below the 30px minimum.
        let frame = frame_with_face(320, 240, 50, 50, 10, 10);
        assert!(SkinRegionLocalizer::new().localize(&frame).is_empty());
    }

    #[test]
    fn localizer_separates_disjoint_regions() {
        let mut frame = frame_with_face(320, 240, 20, 20, 60, 60);
        for y in 150..230 {
            for x in 200..300 {
                frame.put_pixel(x, y, SKIN);
            }
        }
        let regions = SkinRegionLocalizer::new().localize(&frame);
        assert_eq!(regions.len(), 2);
        // Scan order: top-left region first.
        assert!(regions[0].y < regions[1].y);
    }

    #[test]
    fn localizer_scales_boxes_from_downscaled_frames() {
        // 1280x720 downscales 4x for the scan; the box must come back in
        // full-frame coordinates.
        let frame = frame_with_face(1280, 720, 400, 200, 320, 360);
        let regions = SkinRegionLocalizer::new().localize(&frame);
        assert_eq!(regions.len(), 1);
        let r = regions[0];
        assert!((r.x as i64 - 400).abs() < 16, "x = {}", r.x);
        assert!((r.width as i64 - 320).abs() < 24, "width = {}", r.width);
    }

    #[test]
    fn largest_region_prefers_first_on_tie() {
        let a = FaceRegion { x: 0, y: 0, width: 40, height: 40 };
        let b = FaceRegion { x: 100, y: 0, width: 40, height: 40 };
        let c = FaceRegion { x: 0, y: 100, width: 50, height: 50 };
        assert_eq!(largest_region(&[a, b]), Some(a));
        assert_eq!(largest_region(&[a, c, b]), Some(c));
        assert_eq!(largest_region(&[]), None);
    }

    #[test]
    fn crop_face_is_canonical_size() {
        let frame = frame_with_face(320, 240, 100, 60, 80, 100);
        let region = FaceRegion { x: 100, y: 60, width: 80, height: 100 };
        let crop = crop_face(&frame, &region);
        assert_eq!(crop.width(), FACE_CROP_SIZE);
        assert_eq!(crop.height(), FACE_CROP_SIZE);
    }

    #[test]
    fn crop_face_clamps_margin_at_frame_edge() {
        let frame = frame_with_face(100, 100, 0, 0, 60, 60);
        let region = FaceRegion { x: 0, y: 0, width: 60, height: 60 };
        // Margin would extend past (0,0); must not panic and must stay canonical.
        let crop = crop_face(&frame, &region);
        assert_eq!(crop.width(), FACE_CROP_SIZE);
        assert_eq!(crop.height(), FACE_CROP_SIZE);
    }
}
