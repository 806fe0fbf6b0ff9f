//! Synthetic degradation `y = (x ⊛ k)↓s + n` used to build low resolution inputs.
use image::Rgb32FImage;
use rand::Rng;

use crate::kernel::BlurKernel;

/// Blur every channel with a circular (wrap around) boundary.
///
/// Matches the blur the network assumes, so a synthesized input is exactly
/// consistent with its data term.
pub fn blur_wrap(img: &Rgb32FImage, kernel: &BlurKernel) -> Rgb32FImage {
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let size = kernel.size();
    let anchor = size / 2;
    let src = img.as_raw();

    let mut out = vec![0.0f32; src.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0.0f32; 3];
            for ky in 0..size {
                let sy = (y + ky + h * size - anchor) % h;
                for kx in 0..size {
                    let weight = kernel.at(kx, ky);
                    if weight == 0.0 {
                        continue;
                    }
                    let sx = (x + kx + w * size - anchor) % w;
                    let idx = (sy * w + sx) * 3;
                    for (c, a) in acc.iter_mut().enumerate() {
                        *a += src[idx + c] * weight;
                    }
                }
            }
            let idx = (y * w + x) * 3;
            out[idx..idx + 3].copy_from_slice(&acc);
        }
    }
    Rgb32FImage::from_raw(w as u32, h as u32, out).expect("same dimensions")
}

/// Keep the top-left pixel of every `sf x sf` block.
pub fn downsample(img: &Rgb32FImage, sf: u32) -> Rgb32FImage {
    let sf = sf.max(1);
    let (w, h) = (img.width() / sf, img.height() / sf);
    Rgb32FImage::from_fn(w, h, |x, y| *img.get_pixel(x * sf, y * sf))
}

/// Standard normal sample (Box–Muller).
fn standard_normal(rng: &mut impl Rng) -> f32 {
    // 1 - u keeps the log argument in (0, 1].
    let u1: f32 = 1.0 - rng.random::<f32>();
    let u2: f32 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
}

/// Add white Gaussian noise with standard deviation `sigma` (on the [0, 1] scale).
pub fn add_noise(img: &mut Rgb32FImage, sigma: f32, rng: &mut impl Rng) {
    if sigma <= 0.0 {
        return;
    }
    for v in img.iter_mut() {
        *v += sigma * standard_normal(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use image::Rgb;
    use rand::{SeedableRng, rngs::StdRng};

    fn checker(w: u32, h: u32) -> Rgb32FImage {
        Rgb32FImage::from_fn(w, h, |x, y| {
            let v = ((x + y) % 2) as f32;
            Rgb([v, 0.5, 1.0 - v])
        })
    }

    #[test]
    fn delta_blur_is_identity() {
        let img = checker(6, 5);
        assert_eq!(blur_wrap(&img, &BlurKernel::delta(3)), img);
    }

    #[test]
    fn blur_wraps_around_edges() {
        // A single bright pixel in the corner spreads to the opposite edges.
        let mut img = Rgb32FImage::new(5, 5);
        img.put_pixel(0, 0, Rgb([1.0, 1.0, 1.0]));
        let kernel = BlurKernel::isotropic_gaussian(3, 1.0);

        let blurred = blur_wrap(&img, &kernel);
        assert!(blurred.get_pixel(4, 4)[0] > 0.0, "wrapped corner");
        let total: f32 = blurred.pixels().map(|p| p[0]).sum();
        assert_approx_eq!(total, 1.0, 1e-5);
    }

    #[test]
    fn downsample_picks_block_origin() {
        let img = Rgb32FImage::from_fn(4, 4, |x, y| Rgb([x as f32, y as f32, 0.0]));
        let down = downsample(&img, 2);
        assert_eq!(down.dimensions(), (2, 2));
        assert_eq!(down.get_pixel(1, 1), &Rgb([2.0, 2.0, 0.0]));
    }

    #[test]
    fn noise_is_seeded_and_roughly_calibrated() {
        let mut a = Rgb32FImage::new(64, 64);
        let mut b = Rgb32FImage::new(64, 64);
        add_noise(&mut a, 0.1, &mut StdRng::seed_from_u64(7));
        add_noise(&mut b, 0.1, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);

        let n = a.as_raw().len() as f32;
        let mean: f32 = a.as_raw().iter().sum::<f32>() / n;
        let var: f32 = a.as_raw().iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert_approx_eq!(mean, 0.0, 0.01);
        assert_approx_eq!(var.sqrt(), 0.1, 0.01);
    }
}
