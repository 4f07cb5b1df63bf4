// THEORY:
// The `roi` module is the gatekeeper of the pipeline. Every frame passes through
// it before any classification happens, and it answers two questions:
//
// 1.  **Where to look**: The `RoiGate` owns the single, immutable rectangle that is
//     inspected. The rectangle is validated against the frame dimensions exactly
//     once, when the gate is built. After that, cropping cannot fail because of the
//     rectangle itself, only because a frame arrived with the wrong size.
// 2.  **Is anything there**: `match_score` measures how much the ROI still looks
//     like the stored baseline. A low score means the product is missing from the
//     line, which is a different answer from "normal" and must not be reported as
//     one.
//
// The similarity measure is the mean-subtracted, energy-normalized cross
// correlation. It is insensitive to uniform brightness shifts, so a change in
// ambient light does not make a present product look absent.

use std::fmt;

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, ConfigurationError};

const FLAT_ENERGY_EPSILON: f64 = 1e-9;

/// A fixed rectangle inside every frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// True when the rectangle is non-empty and lies inside a frame of the given size.
    pub fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        self.width > 0
            && self.height > 0
            && matches!(right, Some(r) if r <= frame_width)
            && matches!(bottom, Some(b) if b <= frame_height)
    }

    /// Inclusive containment, so a box centered on the ROI border still counts.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        let x0 = self.x as f32;
        let y0 = self.y as f32;
        px >= x0 && px <= x0 + self.width as f32 && py >= y0 && py <= y0 + self.height as f32
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.width, self.height)
    }
}

/// One frame paired with its ROI crop, handed to a classifier.
pub struct RoiSample<'a> {
    /// The full frame, for strategies that look beyond the ROI.
    pub frame: &'a RgbImage,
    /// The rectangle `image` was cut from.
    pub roi: Roi,
    /// The cropped sub-image; always exactly `roi.width` x `roi.height`.
    pub image: RgbImage,
}

/// Validates the ROI once and crops every frame to it.
#[derive(Debug, Clone)]
pub struct RoiGate {
    roi: Roi,
    frame_width: u32,
    frame_height: u32,
}

impl RoiGate {
    pub fn new(roi: Roi, frame_width: u32, frame_height: u32) -> Result<Self, ConfigurationError> {
        if !roi.fits(frame_width, frame_height) {
            return Err(ConfigurationError::InvalidRegion {
                roi,
                frame_width,
                frame_height,
            });
        }
        Ok(Self {
            roi,
            frame_width,
            frame_height,
        })
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn crop(&self, frame: &RgbImage) -> Result<RgbImage, AcquisitionError> {
        let (width, height) = frame.dimensions();
        if width != self.frame_width || height != self.frame_height {
            return Err(AcquisitionError::FrameSize {
                expected_width: self.frame_width,
                expected_height: self.frame_height,
                actual_width: width,
                actual_height: height,
            });
        }
        let Roi { x, y, width, height } = self.roi;
        Ok(imageops::crop_imm(frame, x, y, width, height).to_image())
    }

    pub fn sample<'a>(&self, frame: &'a RgbImage) -> Result<RoiSample<'a>, AcquisitionError> {
        let image = self.crop(frame)?;
        Ok(RoiSample {
            frame,
            roi: self.roi,
            image,
        })
    }
}

/// Best normalized cross-correlation of `template` over every placement inside
/// `image`, in [-1, 1]. A template larger than the image is first resized to it.
pub fn match_score(image: &RgbImage, template: &RgbImage) -> f64 {
    let (iw, ih) = image.dimensions();
    if iw == 0 || ih == 0 || template.width() == 0 || template.height() == 0 {
        return 0.0;
    }

    let resized;
    let template = if template.width() > iw || template.height() > ih {
        resized = imageops::resize(template, iw, ih, imageops::FilterType::Triangle);
        &resized
    } else {
        template
    };

    let (tw, th) = template.dimensions();
    let area = (tw * th) as f64;

    let mut template_mean = [0.0f64; 3];
    for pixel in template.pixels() {
        for c in 0..3 {
            template_mean[c] += pixel[c] as f64;
        }
    }
    template_mean.iter_mut().for_each(|m| *m /= area);

    let template_energy: f64 = template
        .pixels()
        .map(|p| (0..3).map(|c| (p[c] as f64 - template_mean[c]).powi(2)).sum::<f64>())
        .sum();

    let mut best = f64::NEG_INFINITY;
    for oy in 0..=(ih - th) {
        for ox in 0..=(iw - tw) {
            let score = placement_score(image, template, ox, oy, &template_mean, template_energy);
            if score > best {
                best = score;
            }
        }
    }
    best
}

fn placement_score(
    image: &RgbImage,
    template: &RgbImage,
    ox: u32,
    oy: u32,
    template_mean: &[f64; 3],
    template_energy: f64,
) -> f64 {
    let (tw, th) = template.dimensions();
    let area = (tw * th) as f64;

    let mut patch_mean = [0.0f64; 3];
    for ty in 0..th {
        for tx in 0..tw {
            let p = image.get_pixel(ox + tx, oy + ty);
            for c in 0..3 {
                patch_mean[c] += p[c] as f64;
            }
        }
    }
    patch_mean.iter_mut().for_each(|m| *m /= area);

    let mut cross = 0.0;
    let mut patch_energy = 0.0;
    for ty in 0..th {
        for tx in 0..tw {
            let p = image.get_pixel(ox + tx, oy + ty);
            let t = template.get_pixel(tx, ty);
            for c in 0..3 {
                let pc = p[c] as f64 - patch_mean[c];
                let tc = t[c] as f64 - template_mean[c];
                cross += pc * tc;
                patch_energy += pc * pc;
            }
        }
    }

    let template_flat = template_energy < FLAT_ENERGY_EPSILON;
    let patch_flat = patch_energy < FLAT_ENERGY_EPSILON;
    match (template_flat, patch_flat) {
        (true, true) => {
            let same = (0..3).all(|c| (patch_mean[c] - template_mean[c]).abs() < 0.5);
            if same { 1.0 } else { 0.0 }
        }
        (true, false) | (false, true) => 0.0,
        (false, false) => cross / (template_energy * patch_energy).sqrt(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn textured(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) * 5 % 256) as u8])
        })
    }

    fn inverted(image: &RgbImage) -> RgbImage {
        let mut out = image.clone();
        imageops::invert(&mut out);
        out
    }

    #[test]
    fn crop_matches_configured_size_for_every_valid_roi() {
        let frame = textured(64, 48);
        for (x, y, w, h) in [(0, 0, 64, 48), (10, 5, 20, 30), (63, 47, 1, 1), (0, 40, 64, 8)] {
            let gate = RoiGate::new(Roi::new(x, y, w, h), 64, 48).expect("roi fits");
            let crop = gate.crop(&frame).expect("frame has configured size");
            assert_eq!(crop.dimensions(), (w, h));
            assert_eq!(crop.get_pixel(0, 0), frame.get_pixel(x, y));
        }
    }

    #[test]
    fn rejects_roi_outside_frame() {
        let err = RoiGate::new(Roi::new(200, 150, 250, 150), 400, 300).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRegion { .. }));
        assert!(RoiGate::new(Roi::new(0, 0, 0, 10), 400, 300).is_err());
        assert!(RoiGate::new(Roi::new(u32::MAX, 0, 2, 2), 400, 300).is_err());
    }

    #[test]
    fn wrong_frame_size_is_an_acquisition_error() {
        let gate = RoiGate::new(Roi::new(0, 0, 10, 10), 32, 32).unwrap();
        let err = gate.crop(&textured(16, 16)).unwrap_err();
        assert!(matches!(err, AcquisitionError::FrameSize { actual_width: 16, .. }));
    }

    #[test]
    fn roi_containment_is_inclusive() {
        let roi = Roi::new(10, 10, 20, 20);
        assert!(roi.contains(10.0, 30.0));
        assert!(roi.contains(20.5, 15.0));
        assert!(!roi.contains(9.9, 15.0));
        assert!(!roi.contains(15.0, 30.1));
    }

    #[test]
    fn identical_images_score_one() {
        let image = textured(24, 16);
        let score = match_score(&image, &image);
        assert!((score - 1.0).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn inverted_image_scores_below_presence_threshold() {
        let image = textured(24, 16);
        let score = match_score(&inverted(&image), &image);
        assert!(score < 0.4, "score was {score}");
    }

    #[test]
    fn brightness_shift_keeps_high_score() {
        let image = RgbImage::from_fn(20, 20, |x, y| Rgb([(x * 5) as u8, (y * 5) as u8, 100]));
        let brighter = RgbImage::from_fn(20, 20, |x, y| Rgb([(x * 5 + 30) as u8, (y * 5 + 30) as u8, 130]));
        assert!(match_score(&brighter, &image) > 0.99);
    }

    #[test]
    fn flat_patches_compare_by_value() {
        let gray = RgbImage::from_pixel(8, 8, Rgb([90, 90, 90]));
        let white = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        assert_eq!(match_score(&gray, &gray), 1.0);
        assert_eq!(match_score(&white, &gray), 0.0);
        assert_eq!(match_score(&textured(8, 8), &gray), 0.0);
    }

    #[test]
    fn smaller_template_is_found_anywhere_in_the_roi() {
        let image = textured(30, 30);
        let template = imageops::crop_imm(&image, 12, 9, 10, 10).to_image();
        assert!((match_score(&image, &template) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn oversized_template_is_resized_before_matching() {
        let image = RgbImage::from_pixel(10, 10, Rgb([40, 40, 40]));
        let template = RgbImage::from_pixel(20, 12, Rgb([40, 40, 40]));
        assert_eq!(match_score(&image, &template), 1.0);
    }
}
