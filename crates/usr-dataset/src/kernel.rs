use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};

const DEFAULT_KSIZE: usize = 25;
const DEFAULT_SIGMA: f32 = 1.6;

fn default_ksize() -> usize {
    DEFAULT_KSIZE
}

fn default_sigma() -> f32 {
    DEFAULT_SIGMA
}

/// Blur kernel selection in the options file, e.g. `{"type": "gaussian", "sigma": 2.0}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelOptions {
    Gaussian {
        #[serde(default = "default_ksize")]
        ksize: usize,
        #[serde(default = "default_sigma")]
        sigma: f32,
    },
    Anisotropic {
        #[serde(default = "default_ksize")]
        ksize: usize,
        /// Rotation in radians.
        theta: f32,
        /// Variances along the two principal axes.
        l1: f32,
        l2: f32,
    },
    Delta {
        #[serde(default = "default_ksize")]
        ksize: usize,
    },
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self::Gaussian {
            ksize: DEFAULT_KSIZE,
            sigma: DEFAULT_SIGMA,
        }
    }
}

impl KernelOptions {
    pub fn build(&self) -> BlurKernel {
        match *self {
            Self::Gaussian { ksize, sigma } => BlurKernel::isotropic_gaussian(ksize, sigma),
            Self::Anisotropic {
                ksize,
                theta,
                l1,
                l2,
            } => BlurKernel::anisotropic_gaussian(ksize, theta, l1, l2),
            Self::Delta { ksize } => BlurKernel::delta(ksize),
        }
    }
}

/// A square blur kernel, row major, normalized to unit sum.
///
/// The kernel is anchored at `(size / 2, size / 2)`.
#[derive(Clone, Debug, PartialEq)]
pub struct BlurKernel {
    size: usize,
    data: Vec<f32>,
}

impl BlurKernel {
    fn from_fn(size: usize, f: impl Fn(f32, f32) -> f32) -> Self {
        let size = size.max(1);
        let center = (size as f32 - 1.0) / 2.0;
        let data = (0..size * size)
            .map(|i| {
                let x = (i % size) as f32 - center;
                let y = (i / size) as f32 - center;
                f(x, y)
            })
            .collect();
        Self { size, data }.normalized()
    }

    fn normalized(mut self) -> Self {
        let sum: f32 = self.data.iter().sum();
        if sum > 0.0 {
            self.data.iter_mut().for_each(|v| *v /= sum);
        }
        self
    }

    pub fn isotropic_gaussian(size: usize, sigma: f32) -> Self {
        let denom = 2.0 * sigma * sigma;
        Self::from_fn(size, |x, y| (-(x * x + y * y) / denom).exp())
    }

    /// Gaussian with covariance `V diag(l1, l2) V^T`, `V` the rotation by `theta`.
    pub fn anisotropic_gaussian(size: usize, theta: f32, l1: f32, l2: f32) -> Self {
        let (sin, cos) = theta.sin_cos();
        // Covariance entries.
        let a = l1 * cos * cos + l2 * sin * sin;
        let b = (l1 - l2) * cos * sin;
        let d = l1 * sin * sin + l2 * cos * cos;
        let det = a * d - b * b;
        let (ia, ib, id) = (d / det, -b / det, a / det);
        Self::from_fn(size, |x, y| {
            (-0.5 * (ia * x * x + 2.0 * ib * x * y + id * y * y)).exp()
        })
    }

    /// Identity kernel. Odd sizes keep the image unchanged.
    pub fn delta(size: usize) -> Self {
        let size = size.max(1);
        let mut data = vec![0.0; size * size];
        data[(size / 2) * size + size / 2] = 1.0;
        Self { size, data }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.size + x]
    }

    /// `[1, 1, size, size]` tensor, the layout the network expects.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        Tensor::from_data(
            TensorData::new(self.data.clone(), [1, 1, self.size, self.size]),
            device,
        )
    }
}
