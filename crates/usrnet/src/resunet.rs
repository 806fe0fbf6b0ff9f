use burn::{
    config::Config,
    module::Module,
    nn::{
        PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    tensor::{Tensor, backend::Backend},
};

use crate::ops::pad_replicate;

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

#[derive(Module, Debug)]
pub struct ResBlock<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    relu: Relu,
}

impl<B: Backend> ResBlock<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: conv3x3(channels, channels, device),
            conv2: conv3x3(channels, channels, device),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let res = self.conv2.forward(self.relu.forward(self.conv1.forward(x.clone())));
        x + res
    }
}

fn res_blocks<B: Backend>(count: usize, channels: usize, device: &B::Device) -> Vec<ResBlock<B>> {
    (0..count).map(|_| ResBlock::new(channels, device)).collect()
}

fn run_blocks<B: Backend>(blocks: &[ResBlock<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    blocks.iter().fold(x, |x, block| block.forward(x))
}

#[derive(Module, Debug)]
pub struct DownStage<B: Backend> {
    blocks: Vec<ResBlock<B>>,
    down: Conv2d<B>,
}

impl<B: Backend> DownStage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.down.forward(run_blocks(&self.blocks, x))
    }
}

#[derive(Module, Debug)]
pub struct UpStage<B: Backend> {
    up: ConvTranspose2d<B>,
    blocks: Vec<ResBlock<B>>,
}

impl<B: Backend> UpStage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        run_blocks(&self.blocks, self.up.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct ResUNetConfig {
    #[config(default = 4)]
    pub in_channels: usize,
    #[config(default = 3)]
    pub out_channels: usize,
    /// Channels of the four resolution levels.
    #[config(default = "[64, 128, 256, 512]")]
    pub channels: [usize; 4],
    /// Residual blocks per level.
    #[config(default = 2)]
    pub num_blocks: usize,
}

impl ResUNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResUNet<B> {
        let nc = self.channels;
        let nb = self.num_blocks;

        let downs = (0..3)
            .map(|i| DownStage {
                blocks: res_blocks(nb, nc[i], device),
                down: Conv2dConfig::new([nc[i], nc[i + 1]], [2, 2])
                    .with_stride([2, 2])
                    .with_bias(false)
                    .init(device),
            })
            .collect();

        // Deepest level first, in the order they run.
        let ups = (0..3)
            .rev()
            .map(|i| UpStage {
                up: ConvTranspose2dConfig::new([nc[i + 1], nc[i]], [2, 2])
                    .with_stride([2, 2])
                    .with_bias(false)
                    .init(device),
                blocks: res_blocks(nb, nc[i], device),
            })
            .collect();

        ResUNet {
            head: conv3x3(self.in_channels, nc[0], device),
            downs,
            body: res_blocks(nb, nc[3], device),
            ups,
            tail: conv3x3(nc[0], self.out_channels, device),
        }
    }
}

/// Residual U-Net acting as the learned denoising prior.
#[derive(Module, Debug)]
pub struct ResUNet<B: Backend> {
    head: Conv2d<B>,
    downs: Vec<DownStage<B>>,
    body: Vec<ResBlock<B>>,
    ups: Vec<UpStage<B>>,
    tail: Conv2d<B>,
}

impl<B: Backend> ResUNet<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [n, _, h, w] = x.dims();
        // Three 2x downsamplings need sizes divisible by 8.
        let pad_h = h.next_multiple_of(8) - h;
        let pad_w = w.next_multiple_of(8) - w;
        let x = pad_replicate(x, pad_h, pad_w);

        let mut skips = vec![self.head.forward(x)];
        for stage in &self.downs {
            let next = stage.forward(skips.last().expect("head output").clone());
            skips.push(next);
        }

        let mut x = run_blocks(&self.body, skips.last().expect("deepest level").clone());
        for stage in &self.ups {
            let skip = skips.pop().expect("one skip per level");
            x = stage.forward(x + skip);
        }
        let skip = skips.pop().expect("head skip");
        let out = self.tail.forward(x + skip);

        let [_, c, _, _] = out.dims();
        out.slice([0..n, 0..c, 0..h, 0..w])
    }
}
