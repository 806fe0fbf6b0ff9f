use image::RgbImage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Images differ in size: {0:?} vs {1:?}.")]
    SizeMismatch((u32, u32), (u32, u32)),

    #[error("A border of {border} leaves nothing of a {width}x{height} image.")]
    BorderTooLarge { border: u32, width: u32, height: u32 },
}

/// PSNR in dB between two 8-bit images, ignoring `border` pixels on every side.
///
/// Identical images give `f64::INFINITY`.
pub fn calculate_psnr(a: &RgbImage, b: &RgbImage, border: u32) -> Result<f64, MetricError> {
    if a.dimensions() != b.dimensions() {
        return Err(MetricError::SizeMismatch(a.dimensions(), b.dimensions()));
    }
    let (width, height) = a.dimensions();
    if 2 * border >= width || 2 * border >= height {
        return Err(MetricError::BorderTooLarge {
            border,
            width,
            height,
        });
    }

    let mut sum = 0.0f64;
    let mut count = 0u64;
    for y in border..height - border {
        for x in border..width - border {
            let (pa, pb) = (a.get_pixel(x, y), b.get_pixel(x, y));
            for c in 0..3 {
                let d = f64::from(pa[c]) - f64::from(pb[c]);
                sum += d * d;
            }
            count += 3;
        }
    }

    let mse = sum / count as f64;
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(20.0 * (255.0 / mse.sqrt()).log10())
}

/// Mean over every value pushed so far.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Zero when nothing was pushed.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MetricError, RunningAverage, calculate_psnr};
    use assert_approx_eq::assert_approx_eq;
    use image::{Rgb, RgbImage};

    fn noisy(w: u32, h: u32, offset: u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 31 + y * 17) % 200) as u8;
            Rgb([v + offset * ((x + y) % 2) as u8, v, v])
        })
    }

    #[test]
    fn identical_images_are_infinite() {
        let img = noisy(8, 8, 0);
        let psnr = calculate_psnr(&img, &img, 0).expect("same size");
        assert!(psnr.is_infinite() && psnr > 0.0, "got {psnr}");
    }

    #[test]
    fn psnr_is_symmetric() {
        let (a, b) = (noisy(10, 9, 0), noisy(10, 9, 5));
        let ab = calculate_psnr(&a, &b, 1).expect("same size");
        let ba = calculate_psnr(&b, &a, 1).expect("same size");
        assert_approx_eq!(ab, ba, 1e-12);
    }

    #[test]
    fn uniform_error_matches_closed_form() {
        let a = RgbImage::from_pixel(4, 4, Rgb([100, 100, 100]));
        let b = RgbImage::from_pixel(4, 4, Rgb([110, 110, 110]));
        let expected = 20.0 * (255.0f64 / 10.0).log10();
        assert_approx_eq!(calculate_psnr(&a, &b, 0).expect("same size"), expected, 1e-9);
    }

    #[test]
    fn border_pixels_are_ignored() {
        let a = RgbImage::from_pixel(8, 8, Rgb([50, 50, 50]));
        let mut b = a.clone();
        // Only touch the outer two-pixel frame.
        for i in 0..8 {
            b.put_pixel(i, 0, Rgb([0, 0, 0]));
            b.put_pixel(0, i, Rgb([0, 0, 0]));
            b.put_pixel(i, 7, Rgb([255, 255, 255]));
            b.put_pixel(6, i, Rgb([255, 255, 255]));
        }
        assert!(calculate_psnr(&a, &b, 2).expect("same size").is_infinite(), "frame cropped");
        assert!(calculate_psnr(&a, &b, 0).expect("same size").is_finite(), "frame counted");
    }

    #[test]
    fn mismatched_sizes_fail() {
        let err = calculate_psnr(&noisy(4, 4, 0), &noisy(4, 5, 0), 0).expect_err("sizes differ");
        assert!(matches!(err, MetricError::SizeMismatch(..)), "got {err:?}");
        let err = calculate_psnr(&noisy(4, 4, 0), &noisy(4, 4, 0), 2).expect_err("border");
        assert!(matches!(err, MetricError::BorderTooLarge { .. }), "got {err:?}");
    }

    #[test]
    fn single_sample_average_is_the_sample() {
        let mut avg = RunningAverage::default();
        assert_eq!(avg.average(), 0.0);
        avg.push(27.5);
        assert_eq!(avg.count(), 1);
        assert_approx_eq!(avg.average(), 27.5, 1e-12);
        avg.push(30.5);
        assert_approx_eq!(avg.average(), 29.0, 1e-12);
    }
}
