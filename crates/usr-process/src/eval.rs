use anyhow::Context;
use burn::tensor::{ElementConversion, Tensor, TensorData, backend::Backend};
use image::RgbImage;
use lpips::LpipsModel;
use tracing::trace_span;
use usr_dataset::{
    SrSample,
    image_utils::{image_to_tensor, tensor_to_rgb8, to_float},
};
use usrnet::UsrNet;

use crate::metrics::calculate_psnr;

/// The networks an evaluation runs with.
#[derive(Clone, Debug)]
pub struct EvalModels<B: Backend> {
    pub usrnet: UsrNet<B>,
    pub lpips: LpipsModel<B>,
}

pub struct SampleEval {
    /// Restored image, quantized to 8 bits.
    pub estimate: RgbImage,
    pub psnr: f64,
    pub lpips: f64,
}

/// Restore one sample and score it against its ground truth.
///
/// PSNR is taken on the clamped, quantized estimate. LPIPS sees the raw
/// estimate and both images in [0, 1], unless `lpips_normalize` is set, in
/// which case it sees the clamped estimate mapped to [-1, 1].
pub fn eval_sample<B: Backend>(
    models: &EvalModels<B>,
    sample: &SrSample,
    border: u32,
    lpips_normalize: bool,
    device: &B::Device,
) -> anyhow::Result<SampleEval> {
    let _span = trace_span!("Eval sample").entered();

    let img_l = image_to_tensor::<B>(&sample.img_l, device).unsqueeze::<4>();
    let kernel = sample.kernel.to_tensor::<B>(device);
    let sigma = Tensor::<B, 4>::from_data(TensorData::new(vec![sample.sigma], [1, 1, 1, 1]), device);

    let raw = models
        .usrnet
        .forward(img_l, kernel, sample.sf as usize, sigma);
    let estimate = raw.clone().clamp(0.0, 1.0);
    let [_, c, h, w] = estimate.dims();
    let img_e = tensor_to_rgb8(estimate.clone().reshape([c, h, w]))
        .map_err(|e| anyhow::anyhow!("{e:?}"))
        .context("Failed to read back the restored image")?;

    let psnr = calculate_psnr(&img_e, &sample.img_h, border)?;

    let img_h = image_to_tensor::<B>(&to_float(&sample.img_h), device).unsqueeze::<4>();
    let lpips_input = if lpips_normalize { estimate } else { raw };
    let lpips = models
        .lpips
        .lpips(lpips_input, img_h, lpips_normalize)
        .into_scalar()
        .elem::<f64>();

    Ok(SampleEval {
        estimate: img_e,
        psnr,
        lpips,
    })
}

#[cfg(test)]
mod tests {
    use super::{EvalModels, eval_sample};
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::{ElementConversion, Tensor, TensorData};
    use image::{Rgb, RgbImage};
    use lpips::LpipsModelConfig;
    use usr_dataset::{
        BlurKernel, SrSample,
        image_utils::{image_to_tensor, to_float},
    };
    use usrnet::UsrNetConfig;

    type TestBackend = NdArray;

    fn sample() -> SrSample {
        let img_h = RgbImage::from_fn(16, 16, |x, y| {
            Rgb([(x * 16) as u8, (y * 16) as u8, ((x + y) * 8) as u8])
        });
        let img_l = RgbImage::from_fn(8, 8, |x, y| *img_h.get_pixel(x * 2, y * 2));
        SrSample {
            l_path: "img_l.png".into(),
            h_path: "img_h.png".into(),
            img_l: to_float(&img_l),
            img_h,
            kernel: BlurKernel::isotropic_gaussian(5, 1.0),
            sigma: 0.01,
            sf: 2,
        }
    }

    fn models(device: &NdArrayDevice) -> EvalModels<TestBackend> {
        EvalModels {
            usrnet: UsrNetConfig::new()
                .with_n_iter(2)
                .with_h_nc(8)
                .with_nc([4, 8, 8, 8])
                .with_nb(1)
                .with_data_steps(1)
                .init(device),
            lpips: LpipsModelConfig::new().init(device),
        }
    }

    /// LPIPS computed directly from a fresh forward pass.
    fn reference_lpips(
        models: &EvalModels<TestBackend>,
        sample: &SrSample,
        normalize: bool,
        device: &NdArrayDevice,
    ) -> f64 {
        let img_l = image_to_tensor::<TestBackend>(&sample.img_l, device).unsqueeze::<4>();
        let sigma = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![sample.sigma], [1, 1, 1, 1]),
            device,
        );
        let mut estimate = models.usrnet.forward(
            img_l,
            sample.kernel.to_tensor::<TestBackend>(device),
            sample.sf as usize,
            sigma,
        );
        if normalize {
            estimate = estimate.clamp(0.0, 1.0);
        }
        let img_h = image_to_tensor::<TestBackend>(&to_float(&sample.img_h), device).unsqueeze::<4>();
        models
            .lpips
            .lpips(estimate, img_h, normalize)
            .into_scalar()
            .elem::<f64>()
    }

    #[test]
    fn lpips_defaults_to_raw_estimate_in_unit_range() {
        let device = NdArrayDevice::default();
        let models = models(&device);
        let sample = sample();

        let result = eval_sample(&models, &sample, 2, false, &device).expect("eval");
        let expected = reference_lpips(&models, &sample, false, &device);
        assert!(
            (result.lpips - expected).abs() < 1e-6,
            "{} != {expected}",
            result.lpips
        );
        assert_eq!(result.estimate.dimensions(), sample.img_h.dimensions());
    }

    #[test]
    fn lpips_normalize_uses_clamped_estimate() {
        let device = NdArrayDevice::default();
        let models = models(&device);
        let sample = sample();

        let result = eval_sample(&models, &sample, 2, true, &device).expect("eval");
        let expected = reference_lpips(&models, &sample, true, &device);
        assert!(
            (result.lpips - expected).abs() < 1e-6,
            "{} != {expected}",
            result.lpips
        );

        // PSNR does not depend on how LPIPS is fed.
        let plain = eval_sample(&models, &sample, 2, false, &device).expect("eval");
        assert_eq!(result.psnr, plain.psnr);
        assert_eq!(result.estimate, plain.estimate);
    }
}
