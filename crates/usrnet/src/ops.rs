//! Resampling and blur operators of the degradation model, `y = (x ⊛ k)↓s`.
//!
//! Images are NCHW. Blur kernels are `[N, 1, kh, kw]`, one per batch item, and
//! are applied with a circular boundary as the degradation assumes a periodic image.

use burn::tensor::{
    Int, Tensor, TensorData,
    backend::Backend,
    module::conv2d,
    ops::ConvOptions,
};

fn index_tensor<B: Backend>(indices: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = indices.len();
    Tensor::from_data(TensorData::new(indices, [len]), device)
}

/// Pad along `dim` by gathering rows. `map` maps an output index (shifted by `before`) to a source index.
fn gather_pad<B: Backend>(
    x: Tensor<B, 4>,
    dim: usize,
    before: usize,
    after: usize,
    map: impl Fn(i64, i64) -> i64,
) -> Tensor<B, 4> {
    if before == 0 && after == 0 {
        return x;
    }
    let size = x.dims()[dim] as i64;
    let indices = (0..size + (before + after) as i64)
        .map(|i| map(i - before as i64, size))
        .collect();
    let indices = index_tensor::<B>(indices, &x.device());
    x.select(dim, indices)
}

/// Circular padding of the two spatial dims: `[top, bottom, left, right]`.
pub fn pad_circular<B: Backend>(x: Tensor<B, 4>, pad: [usize; 4]) -> Tensor<B, 4> {
    let [top, bottom, left, right] = pad;
    let x = gather_pad(x, 2, top, bottom, i64::rem_euclid);
    gather_pad(x, 3, left, right, i64::rem_euclid)
}

/// Replicate padding at the bottom and right edges.
pub fn pad_replicate<B: Backend>(x: Tensor<B, 4>, bottom: usize, right: usize) -> Tensor<B, 4> {
    let clamp = |i: i64, size: i64| i.clamp(0, size - 1);
    let x = gather_pad(x, 2, 0, bottom, clamp);
    gather_pad(x, 3, 0, right, clamp)
}

// Correlate every channel of a single image with a single kernel. Channels are
// folded into the batch dimension so one kernel serves all of them.
fn correlate_single<B: Backend>(
    x: Tensor<B, 4>,
    kernel: Tensor<B, 4>,
    pad: [usize; 4],
) -> Tensor<B, 4> {
    let [n, c, h, w] = x.dims();
    debug_assert_eq!(n, 1, "correlate_single expects a single image");
    let x = pad_circular(x.reshape([c, 1, h, w]), pad);
    let out = conv2d(x, kernel, None, ConvOptions::new([1, 1], [0, 0], [1, 1], 1));
    out.reshape([1, c, h, w])
}

fn correlate_batch<B: Backend>(
    x: Tensor<B, 4>,
    kernels: Tensor<B, 4>,
    pad: [usize; 4],
) -> Tensor<B, 4> {
    let [n, _, _, _] = x.dims();
    let out = (0..n)
        .map(|i| {
            correlate_single(
                x.clone().narrow(0, i, 1),
                kernels.clone().narrow(0, i, 1),
                pad,
            )
        })
        .collect();
    Tensor::cat(out, 0)
}

/// Circular blur `x ⊛ k`, anchored at the kernel center `(kh / 2, kw / 2)`.
pub fn blur<B: Backend>(x: Tensor<B, 4>, kernels: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, kh, kw] = kernels.dims();
    let (ch, cw) = (kh / 2, kw / 2);
    correlate_batch(x, kernels, [ch, kh - 1 - ch, cw, kw - 1 - cw])
}

/// Adjoint of [`blur`]: correlation with the flipped kernel and mirrored padding.
pub fn blur_adjoint<B: Backend>(x: Tensor<B, 4>, kernels: Tensor<B, 4>) -> Tensor<B, 4> {
    let [_, _, kh, kw] = kernels.dims();
    let (ch, cw) = (kh / 2, kw / 2);
    correlate_batch(x, kernels.flip([2, 3]), [kh - 1 - ch, ch, kw - 1 - cw, cw])
}

/// Keep the top-left pixel of every `sf x sf` block. Sizes must be multiples of `sf`.
pub fn downsample<B: Backend>(x: Tensor<B, 4>, sf: usize) -> Tensor<B, 4> {
    if sf == 1 {
        return x;
    }
    let [n, c, h, w] = x.dims();
    let (lh, lw) = (h / sf, w / sf);
    x.reshape([n, c, lh, sf, lw, sf])
        .narrow(3, 0, 1)
        .narrow(5, 0, 1)
        .reshape([n, c, lh, lw])
}

/// Adjoint of [`downsample`]: place each pixel at the top-left of an `sf x sf` block of zeros.
pub fn upsample_zeros<B: Backend>(x: Tensor<B, 4>, sf: usize) -> Tensor<B, 4> {
    if sf == 1 {
        return x;
    }
    let [n, c, h, w] = x.dims();
    let device = x.device();
    let x = x.reshape([n, c, h, 1, w, 1]);
    let x = Tensor::cat(vec![x, Tensor::zeros([n, c, h, sf - 1, w, 1], &device)], 3);
    let x = Tensor::cat(vec![x, Tensor::zeros([n, c, h, sf, w, sf - 1], &device)], 5);
    x.reshape([n, c, h * sf, w * sf])
}

/// Nearest neighbour upsampling by an integer factor.
pub fn upsample_nearest<B: Backend>(x: Tensor<B, 4>, sf: usize) -> Tensor<B, 4> {
    if sf == 1 {
        return x;
    }
    let [n, c, h, w] = x.dims();
    x.reshape([n, c, h, 1, w, 1])
        .repeat_dim(3, sf)
        .repeat_dim(5, sf)
        .reshape([n, c, h * sf, w * sf])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn values(x: Tensor<TestBackend, 4>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().expect("f32 tensor")
    }

    fn ramp(h: usize, w: usize) -> Tensor<TestBackend, 4> {
        let device = NdArrayDevice::default();
        let data: Vec<f32> = (0..h * w).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [1, 1, h, w]), &device)
    }

    #[test]
    fn circular_pad_wraps_rows_and_columns() {
        let padded = pad_circular(ramp(2, 3), [1, 0, 0, 1]);
        assert_eq!(padded.dims(), [1, 1, 3, 4]);
        assert_eq!(
            values(padded),
            vec![3.0, 4.0, 5.0, 3.0, 0.0, 1.0, 2.0, 0.0, 3.0, 4.0, 5.0, 3.0]
        );
    }

    #[test]
    fn replicate_pad_repeats_edges() {
        let padded = pad_replicate(ramp(2, 2), 1, 1);
        assert_eq!(
            values(padded),
            vec![0.0, 1.0, 1.0, 2.0, 3.0, 3.0, 2.0, 3.0, 3.0]
        );
    }

    #[test]
    fn downsample_keeps_top_left() {
        let down = downsample(ramp(4, 4), 2);
        assert_eq!(values(down), vec![0.0, 2.0, 8.0, 10.0]);
    }

    #[test]
    fn zero_upsample_is_inverted_by_downsample() {
        let x = ramp(3, 2);
        let up = upsample_zeros(x.clone(), 3);
        assert_eq!(up.dims(), [1, 1, 9, 6]);
        assert_eq!(values(downsample(up.clone(), 3)), values(x));
        // Everything but the block anchors is zero.
        let total: f32 = values(up).iter().sum();
        assert_approx_eq!(total, 15.0, 1e-6);
    }

    #[test]
    fn nearest_upsample_repeats_pixels() {
        let up = upsample_nearest(ramp(1, 2), 2);
        assert_eq!(values(up), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn delta_kernel_blur_is_identity() {
        let device = NdArrayDevice::default();
        let mut k = vec![0.0f32; 9];
        k[4] = 1.0;
        let k = Tensor::<TestBackend, 4>::from_data(TensorData::new(k, [1, 1, 3, 3]), &device);
        let x = Tensor::<TestBackend, 4>::random([1, 3, 5, 6], Distribution::Default, &device);

        let blurred = values(blur(x.clone(), k.clone()));
        let adjoint = values(blur_adjoint(x.clone(), k));
        for ((a, b), c) in blurred.iter().zip(&adjoint).zip(values(x)) {
            assert_approx_eq!(*a, c, 1e-6);
            assert_approx_eq!(*b, c, 1e-6);
        }
    }

    #[test]
    fn blur_adjoint_satisfies_inner_product_identity() {
        // <Kx, y> == <x, K^T y> for an asymmetric kernel.
        let device = NdArrayDevice::default();
        let k = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![0.1f32, 0.5, 0.0, 0.2, 0.0, 0.0, 0.0, 0.1, 0.1], [1, 1, 3, 3]),
            &device,
        );
        let x = Tensor::<TestBackend, 4>::random([1, 2, 6, 5], Distribution::Default, &device);
        let y = Tensor::<TestBackend, 4>::random([1, 2, 6, 5], Distribution::Default, &device);

        let lhs = (blur(x.clone(), k.clone()) * y.clone()).sum().into_scalar();
        let rhs = (x * blur_adjoint(y, k)).sum().into_scalar();
        assert_approx_eq!(lhs, rhs, 1e-4);
    }
}
