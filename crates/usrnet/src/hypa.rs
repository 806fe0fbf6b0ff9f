use burn::{
    module::Module,
    nn::{
        Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    tensor::{Tensor, activation::softplus, backend::Backend},
};

/// Hyper-parameter network: maps the noise level and scale factor to the
/// per-iteration weights `alpha` (data step) and `beta` (prior strength).
#[derive(Module, Debug)]
pub struct HyPaNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> HyPaNet<B> {
    pub fn new(n_iter: usize, channels: usize, device: &B::Device) -> Self {
        let pointwise = |i, o| Conv2dConfig::new([i, o], [1, 1]).init(device);
        Self {
            conv1: pointwise(2, channels),
            conv2: pointwise(channels, channels),
            conv3: pointwise(channels, 2 * n_iter),
            relu: Relu::new(),
        }
    }

    /// `[N, 2, 1, 1]` network input: the noise level next to the raw scale factor.
    pub(crate) fn input(sigma: Tensor<B, 4>, sf: usize) -> Tensor<B, 4> {
        let [n, _, _, _] = sigma.dims();
        let scale = Tensor::full([n, 1, 1, 1], sf as f32, &sigma.device());
        Tensor::cat(vec![sigma, scale], 1)
    }

    /// `sigma` is `[N, 1, 1, 1]`. Returns `[N, 2 * n_iter, 1, 1]`, alphas first.
    pub fn forward(&self, sigma: Tensor<B, 4>, sf: usize) -> Tensor<B, 4> {
        let x = Self::input(sigma, sf);
        let x = self.relu.forward(self.conv1.forward(x));
        let x = self.relu.forward(self.conv2.forward(x));
        softplus(self.conv3.forward(x), 1.0) + 1e-6
    }
}
