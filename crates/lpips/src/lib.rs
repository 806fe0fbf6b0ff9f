#![recursion_limit = "256"]

use burn::nn::PaddingConfig2d;
use burn::nn::Relu;
use burn::nn::conv::Conv2d;
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::MaxPool2d;
use burn::nn::pool::MaxPool2dConfig;
use burn::record::{HalfPrecisionSettings, RecorderError};
use burn::tensor::Device;
use burn::{
    config::Config,
    module::Module,
    record::BinFileRecorder,
    tensor::{Tensor, backend::Backend},
};
use std::path::Path;

// Channel statistics the VGG features were trained with, in [-1, 1] space.
const SHIFT: [f32; 3] = [-0.030, -0.088, -0.188];
const SCALE: [f32; 3] = [0.458, 0.448, 0.450];

// Channels of each tapped VGG16 stage.
const TAP_CHANNELS: [usize; 5] = [64, 128, 256, 512, 512];

struct ConvReluConfig {
    conv: Conv2dConfig,
}

impl ConvReluConfig {
    fn new(in_channels: usize, out_channels: usize) -> Self {
        // VGG convs are all 3x3, stride 1, same padding.
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1));
        Self { conv }
    }

    fn init<B: Backend>(&self, device: &Device<B>) -> ConvRelu<B> {
        ConvRelu {
            conv: self.conv.init(device),
            relu: Relu::new(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvRelu<B: Backend> {
    conv: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> ConvRelu<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.relu.forward(out)
    }
}

/// One VGG stage: a run of conv + relu layers at the same resolution.
#[derive(Config, Debug)]
struct VggBlockConfig {
    num_convs: usize,
    in_channels: usize,
    out_channels: usize,
}

impl VggBlockConfig {
    fn init<B: Backend>(&self, device: &Device<B>) -> VggBlock<B> {
        let convs = (0..self.num_convs)
            .map(|b| {
                let in_channels = if b == 0 {
                    self.in_channels
                } else {
                    self.out_channels
                };
                ConvReluConfig::new(in_channels, self.out_channels).init(device)
            })
            .collect();

        VggBlock { convs }
    }
}

#[derive(Module, Debug)]
struct VggBlock<B: Backend> {
    convs: Vec<ConvRelu<B>>,
}

impl<B: Backend> VggBlock<B> {
    pub(crate) fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut cur = input;
        for conv in &self.convs {
            cur = conv.forward(cur);
        }
        cur
    }
}

/// Learned per-channel weighting of a feature difference, a 1x1 conv to a single channel.
#[derive(Module, Debug)]
struct NetLin<B: Backend> {
    lin: Conv2d<B>,
}

impl<B: Backend> NetLin<B> {
    fn new(channels: usize, device: &Device<B>) -> Self {
        Self {
            lin: Conv2dConfig::new([channels, 1], [1, 1])
                .with_bias(false)
                .init(device),
        }
    }

    fn forward(&self, diff: Tensor<B, 4>) -> Tensor<B, 4> {
        self.lin.forward(diff)
    }
}

#[derive(Module, Debug)]
pub struct LpipsModel<B: Backend> {
    blocks: Vec<VggBlock<B>>,
    lins: Vec<NetLin<B>>,
    max_pool: MaxPool2d,
}

fn scale_input<B: Backend>(imgs: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = imgs.device();
    let shift = Tensor::<B, 1>::from_floats(SHIFT, &device).reshape([1, 3, 1, 1]);
    let scale = Tensor::<B, 1>::from_floats(SCALE, &device).reshape([1, 3, 1, 1]);
    (imgs - shift) / scale
}

// Unit length along the channel dimension.
fn normalize_channels<B: Backend>(feats: Tensor<B, 4>) -> Tensor<B, 4> {
    let norm = feats.clone().powi_scalar(2).sum_dim(1).sqrt();
    feats / (norm + 1e-10)
}

impl<B: Backend> LpipsModel<B> {
    /// VGG features tapped at the end of every stage, before pooling.
    pub fn forward(&self, imgs: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut fold = scale_input(imgs);
        let mut res = Vec::with_capacity(self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                fold = self.max_pool.forward(fold);
            }
            fold = block.forward(fold);
            res.push(fold.clone());
        }
        res
    }

    /// Perceptual distance for each image pair. Images are NCHW, RGB.
    ///
    /// With `normalize` inputs are expected in [0, 1], otherwise in [-1, 1].
    /// Returns one distance per batch item.
    pub fn lpips(&self, imgs_a: Tensor<B, 4>, imgs_b: Tensor<B, 4>, normalize: bool) -> Tensor<B, 1> {
        let [batch, _, _, _] = imgs_a.dims();

        let (imgs_a, imgs_b) = if normalize {
            (imgs_a * 2.0 - 1.0, imgs_b * 2.0 - 1.0)
        } else {
            (imgs_a, imgs_b)
        };

        // Both sides go through VGG in one batch.
        let feats = self.forward(Tensor::cat(vec![imgs_a, imgs_b], 0));

        let per_layer = feats
            .into_iter()
            .zip(&self.lins)
            .map(|(feat, lin)| {
                let feat = normalize_channels(feat);
                let feat_a = feat.clone().narrow(0, 0, batch);
                let feat_b = feat.narrow(0, batch, batch);
                let diff = (feat_a - feat_b).powi_scalar(2);
                // Spatial average of the weighted difference.
                lin.forward(diff).mean_dim(2).mean_dim(3)
            })
            .collect();

        Tensor::cat(per_layer, 1).sum_dim(1).reshape([batch])
    }
}

#[derive(Config, Debug)]
pub struct LpipsModelConfig {}

impl LpipsModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> LpipsModel<B> {
        // Only the VGG16 variant for now.
        let block1 = VggBlockConfig::new(2, 3, 64).init(device);
        let block2 = VggBlockConfig::new(2, 64, 128).init(device);
        let block3 = VggBlockConfig::new(3, 128, 256).init(device);
        let block4 = VggBlockConfig::new(3, 256, 512).init(device);
        let block5 = VggBlockConfig::new(3, 512, 512).init(device);

        LpipsModel {
            blocks: vec![block1, block2, block3, block4, block5],
            lins: TAP_CHANNELS
                .iter()
                .map(|&c| NetLin::new(c, device))
                .collect(),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

/// Recorder used for converted LPIPS weights.
pub type LpipsRecorder = BinFileRecorder<HalfPrecisionSettings>;

/// Load LPIPS-VGG weights previously converted with `weights-convert lpips`.
pub fn load_vgg_lpips<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<LpipsModel<B>, RecorderError> {
    LpipsModelConfig::new()
        .init::<B>(device)
        .load_file(path, &LpipsRecorder::new(), device)
}

#[cfg(test)]
mod tests {
    use super::LpipsModelConfig;
    use assert_approx_eq::assert_approx_eq;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::{Distribution, Tensor};

    type TestBackend = NdArray;

    fn random_imgs() -> Tensor<TestBackend, 4> {
        let device = NdArrayDevice::default();
        Tensor::<TestBackend, 4>::random([1, 3, 32, 32], Distribution::Uniform(0.0, 1.0), &device)
    }

    #[test]
    fn identical_images_have_zero_distance() {
        let device = NdArrayDevice::default();
        let model = LpipsModelConfig::new().init::<TestBackend>(&device);
        let img = random_imgs();

        let dist = model.lpips(img.clone(), img, true).into_scalar();
        assert_approx_eq!(dist, 0.0, 1e-6);
    }

    #[test]
    fn distance_is_symmetric() {
        let device = NdArrayDevice::default();
        let model = LpipsModelConfig::new().init::<TestBackend>(&device);
        let a = random_imgs();
        let b = a.clone() * 0.5;

        let ab = model.lpips(a.clone(), b.clone(), true).into_scalar();
        let ba = model.lpips(b, a, true).into_scalar();
        assert_approx_eq!(ab, ba, 1e-5);
    }

    #[test]
    fn one_distance_per_batch_item() {
        let device = NdArrayDevice::default();
        let model = LpipsModelConfig::new().init::<TestBackend>(&device);
        let a = Tensor::<TestBackend, 4>::zeros([2, 3, 16, 16], &device);
        let b = Tensor::<TestBackend, 4>::ones([2, 3, 16, 16], &device);

        let dist = model.lpips(a, b, true);
        assert_eq!(dist.dims(), [2]);
    }

    #[test]
    fn taps_every_stage() {
        let device = NdArrayDevice::default();
        let model = LpipsModelConfig::new().init::<TestBackend>(&device);
        let feats = model.forward(Tensor::zeros([1, 3, 32, 32], &device));
        let shapes: Vec<_> = feats.iter().map(|f| f.dims()).collect();
        assert_eq!(
            shapes,
            vec![
                [1, 64, 32, 32],
                [1, 128, 16, 16],
                [1, 256, 8, 8],
                [1, 512, 4, 4],
                [1, 512, 2, 2],
            ]
        );
    }
}
