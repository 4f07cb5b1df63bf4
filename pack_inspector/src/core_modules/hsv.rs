// THEORY:
// The `hsv` module is the measuring stick of the difference strategy. It turns
// two images of the same inspection area into a single number that says how far
// apart they are.
//
// Key architectural principles:
// 1.  **Perceptual Space**: Comparisons happen in hue/saturation/value rather than
//     raw RGB. A misprinted label shifts hue and saturation strongly even when its
//     brightness barely moves, which RGB distance would underweight.
// 2.  **8-bit Convention**: Channels follow the common 8-bit HSV layout. Hue is
//     halved into [0, 180) so it fits a byte; saturation and value span [0, 255].
//     Thresholds tuned against camera tooling that uses this layout carry over
//     unchanged.
// 3.  **Single Scalar**: The per-channel difference is folded into one magnitude
//     per pixel with luma weights (H, S, V read as B, G, R) and then averaged.
//     The result, `mean_diff`, lives on the same [0, 255] scale as a pixel.

pub mod hsv {
    use image::{Rgb, RgbImage};

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;
    pub type MeanDiff = f64;

    /// Luma weights applied to the (H, S, V) difference, read as (B, G, R).
    const HUE_WEIGHT: f64 = 0.114;
    const SATURATION_WEIGHT: f64 = 0.587;
    const VALUE_WEIGHT: f64 = 0.299;

    /// A single pixel in 8-bit HSV.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HsvPixel {
        /// Hue in [0, 180); degrees halved.
        pub hue: Hue,
        /// Saturation in [0, 255].
        pub saturation: Saturation,
        /// Value (max channel) in [0, 255].
        pub value: Value,
    }

    impl HsvPixel {
        pub fn from_rgb(pixel: &Rgb<u8>) -> Self {
            let [r, g, b] = pixel.0;
            let (rf, gf, bf) = (r as f64, g as f64, b as f64);
            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            let chroma = (max - min) as f64;

            let saturation = if max == 0 {
                0.0
            } else {
                255.0 * chroma / max as f64
            };

            let degrees = if chroma == 0.0 {
                0.0
            } else if max == r {
                60.0 * (gf - bf) / chroma
            } else if max == g {
                120.0 + 60.0 * (bf - rf) / chroma
            } else {
                240.0 + 60.0 * (rf - gf) / chroma
            };
            let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
            let hue = (degrees / 2.0).round() as u16 % 180;

            Self {
                hue: hue as Hue,
                saturation: saturation.round() as Saturation,
                value: max,
            }
        }

        /// Weighted magnitude of the channel-wise absolute difference, rounded to a byte.
        pub fn difference(&self, other: &HsvPixel) -> u8 {
            let dh = self.hue.abs_diff(other.hue) as f64;
            let ds = self.saturation.abs_diff(other.saturation) as f64;
            let dv = self.value.abs_diff(other.value) as f64;
            (HUE_WEIGHT * dh + SATURATION_WEIGHT * ds + VALUE_WEIGHT * dv)
                .round()
                .min(255.0) as u8
        }
    }

    /// Mean HSV difference between two equally sized images.
    ///
    /// Returns `None` when the dimensions differ or the images are empty; callers
    /// are expected to resize first.
    pub fn mean_difference(current: &RgbImage, baseline: &RgbImage) -> Option<MeanDiff> {
        if current.dimensions() != baseline.dimensions() || current.width() == 0 || current.height() == 0 {
            return None;
        }
        let total: u64 = current
            .pixels()
            .zip(baseline.pixels())
            .map(|(a, b)| HsvPixel::from_rgb(a).difference(&HsvPixel::from_rgb(b)) as u64)
            .sum();
        let count = current.width() as u64 * current.height() as u64;
        Some(total as f64 / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::hsv::*;
    use image::{Rgb, RgbImage};

    fn hsv(r: u8, g: u8, b: u8) -> HsvPixel {
        HsvPixel::from_rgb(&Rgb([r, g, b]))
    }

    #[test]
    fn primary_colors_land_on_half_degree_hues() {
        assert_eq!(hsv(255, 0, 0), HsvPixel { hue: 0, saturation: 255, value: 255 });
        assert_eq!(hsv(0, 255, 0).hue, 60);
        assert_eq!(hsv(0, 0, 255).hue, 120);
        assert_eq!(hsv(0, 255, 255).hue, 90);
    }

    #[test]
    fn grays_have_no_hue_or_saturation() {
        assert_eq!(hsv(0, 0, 0), HsvPixel::default());
        assert_eq!(hsv(128, 128, 128), HsvPixel { hue: 0, saturation: 0, value: 128 });
    }

    #[test]
    fn hue_wraps_below_one_eighty() {
        // 359.x degrees rounds to 180 and must wrap to 0.
        let nearly_red = hsv(255, 0, 1);
        assert!(nearly_red.hue < 180);
    }

    #[test]
    fn black_to_white_difference_is_value_weighted() {
        assert_eq!(hsv(0, 0, 0).difference(&hsv(255, 255, 255)), 76);
    }

    #[test]
    fn mean_difference_of_identical_images_is_zero() {
        let image = RgbImage::from_fn(10, 6, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 77]));
        assert_eq!(mean_difference(&image, &image), Some(0.0));
    }

    #[test]
    fn mean_difference_requires_matching_dimensions() {
        let a = RgbImage::new(4, 4);
        let b = RgbImage::new(4, 5);
        assert_eq!(mean_difference(&a, &b), None);
    }
}
