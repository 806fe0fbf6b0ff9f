#![recursion_limit = "256"]

//! Deep unfolding super-resolution network.
//!
//! The network alternates a data consistency step, which knows the blur kernel,
//! the scale factor and the noise level, with a learned ResUNet prior. A small
//! hyper-parameter network decides how strongly each of the two is weighted at
//! every iteration.

pub mod data;
pub mod hypa;
pub mod ops;
pub mod resunet;

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    record::{BinFileRecorder, HalfPrecisionSettings, RecorderError},
    tensor::{Tensor, backend::Backend},
};
use thiserror::Error;
use tracing::trace_span;

use crate::{
    data::DataStep,
    hypa::HyPaNet,
    resunet::{ResUNet, ResUNetConfig},
};

/// The only `net_type` this crate builds.
pub const NET_TYPE: &str = "usrnet";

#[derive(Debug, Error)]
pub enum UsrNetError {
    #[error("Unsupported network type '{0}', only '{NET_TYPE}' is available.")]
    UnsupportedNetType(String),

    #[error("Failed to load network weights.")]
    Record(#[from] RecorderError),
}

#[derive(Config, Debug)]
pub struct UsrNetConfig {
    /// Number of unfolded iterations.
    #[config(default = 8)]
    pub n_iter: usize,
    /// Hidden channels of the hyper-parameter network.
    #[config(default = 64)]
    pub h_nc: usize,
    #[config(default = 4)]
    pub in_nc: usize,
    #[config(default = 3)]
    pub out_nc: usize,
    #[config(default = "[64, 128, 256, 512]")]
    pub nc: [usize; 4],
    #[config(default = 2)]
    pub nb: usize,
    /// Gradient iterations per data step.
    #[config(default = 5)]
    pub data_steps: usize,
}

impl UsrNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UsrNet<B> {
        let prior = ResUNetConfig::new()
            .with_in_channels(self.in_nc)
            .with_out_channels(self.out_nc)
            .with_channels(self.nc)
            .with_num_blocks(self.nb)
            .init(device);

        UsrNet {
            hypa: HyPaNet::new(self.n_iter, self.h_nc, device),
            prior,
            n_iter: self.n_iter,
            data_steps: self.data_steps,
        }
    }
}

#[derive(Module, Debug)]
pub struct UsrNet<B: Backend> {
    hypa: HyPaNet<B>,
    prior: ResUNet<B>,
    n_iter: usize,
    data_steps: usize,
}

impl<B: Backend> UsrNet<B> {
    /// Restore a low resolution batch.
    ///
    /// `x` is `[N, C, h, w]` in [0, 1], `kernels` is `[N, 1, kh, kw]` and
    /// `sigma` is `[N, 1, 1, 1]`. Returns `[N, C, h * sf, w * sf]`.
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
        kernels: Tensor<B, 4>,
        sf: usize,
        sigma: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let _span = trace_span!("UsrNet forward").entered();

        let weights = self.hypa.forward(sigma, sf);
        let data = DataStep::new(x.clone(), kernels, sf);

        let mut estimate = ops::upsample_nearest(x, sf);
        for i in 0..self.n_iter {
            let alpha = weights.clone().narrow(1, i, 1);
            let beta = weights.clone().narrow(1, i + self.n_iter, 1);

            estimate = data.solve(estimate, alpha, self.data_steps);

            let [_, _, h, w] = estimate.dims();
            let beta_map = beta.repeat_dim(2, h).repeat_dim(3, w);
            estimate = self.prior.forward(Tensor::cat(vec![estimate, beta_map], 1));
        }
        estimate
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

/// Recorder used for converted USRNet weights.
pub type UsrNetRecorder = BinFileRecorder<HalfPrecisionSettings>;

/// Build the network and load weights converted with `weights-convert usrnet`.
pub fn load_usrnet<B: Backend>(
    path: &Path,
    config: &UsrNetConfig,
    device: &B::Device,
) -> Result<UsrNet<B>, UsrNetError> {
    Ok(config
        .init::<B>(device)
        .load_file(path, &UsrNetRecorder::new(), device)?)
}

/// Check a configured network type against what this crate builds.
pub fn check_net_type(net_type: &str) -> Result<(), UsrNetError> {
    if net_type.eq_ignore_ascii_case(NET_TYPE) {
        Ok(())
    } else {
        Err(UsrNetError::UnsupportedNetType(net_type.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::{UsrNetConfig, check_net_type};
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::{Distribution, Tensor, TensorData};

    fn small_config() -> UsrNetConfig {
        UsrNetConfig::new()
            .with_n_iter(2)
            .with_h_nc(8)
            .with_nc([4, 8, 8, 8])
            .with_nb(1)
            .with_data_steps(2)
    }

    #[test]
    fn upscales_by_scale_factor() {
        let device = NdArrayDevice::default();
        let net = small_config().init::<NdArray>(&device);
        let x = Tensor::random([1, 3, 6, 5], Distribution::Default, &device);
        let k = Tensor::from_data(TensorData::new(vec![1.0f32 / 9.0; 9], [1, 1, 3, 3]), &device);
        let sigma = Tensor::zeros([1, 1, 1, 1], &device);

        let out = net.forward(x, k, 3, sigma);
        assert_eq!(out.dims(), [1, 3, 18, 15]);
    }

    #[test]
    fn forward_is_deterministic() {
        let device = NdArrayDevice::default();
        let net = small_config().init::<NdArray>(&device);
        let x = Tensor::<NdArray, 4>::random([1, 3, 4, 4], Distribution::Default, &device);
        let k = Tensor::<NdArray, 4>::from_data(
            TensorData::new(vec![0.25f32; 4], [1, 1, 2, 2]),
            &device,
        );
        let sigma = Tensor::<NdArray, 4>::zeros([1, 1, 1, 1], &device);

        let a = net.forward(x.clone(), k.clone(), 2, sigma.clone());
        let b = net.forward(x, k, 2, sigma);
        a.into_data().assert_eq(&b.into_data(), true);
    }

    #[test]
    fn only_usrnet_is_supported() {
        assert!(check_net_type("usrnet").is_ok());
        assert!(check_net_type("USRNet").is_ok());
        assert!(check_net_type("dncnn").is_err());
    }
}
