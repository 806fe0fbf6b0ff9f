use burn::tensor::{Tensor, backend::Backend};

use crate::ops::{blur, blur_adjoint, downsample, upsample_zeros};

/// Data consistency step of the unfolded solver.
///
/// Minimizes `||(x ⊛ k)↓s − y||² + α||x − z||²` starting from `z`. The blur has
/// unit gain and the decimation is a selection, so the objective is
/// `(1 + α)`-smooth and gradient steps of size `1 / (1 + α)` always descend.
#[derive(Clone, Debug)]
pub struct DataStep<B: Backend> {
    kernels: Tensor<B, 4>,
    sf: usize,
    // H^T y, shared by every iteration.
    adjoint_y: Tensor<B, 4>,
    y: Tensor<B, 4>,
}

impl<B: Backend> DataStep<B> {
    pub fn new(y: Tensor<B, 4>, kernels: Tensor<B, 4>, sf: usize) -> Self {
        let adjoint_y = blur_adjoint(upsample_zeros(y.clone(), sf), kernels.clone());
        Self {
            kernels,
            sf,
            adjoint_y,
            y,
        }
    }

    fn degrade(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        downsample(blur(x, self.kernels.clone()), self.sf)
    }

    fn degrade_adjoint(&self, r: Tensor<B, 4>) -> Tensor<B, 4> {
        blur_adjoint(upsample_zeros(r, self.sf), self.kernels.clone())
    }

    /// Residual of the current estimate against the observation.
    pub fn residual(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.degrade(x) - self.y.clone()
    }

    /// Run `steps` gradient iterations from `z`. `alpha` is `[N, 1, 1, 1]`.
    pub fn solve(&self, z: Tensor<B, 4>, alpha: Tensor<B, 4>, steps: usize) -> Tensor<B, 4> {
        let step = (alpha.clone() + 1.0).recip();
        let mut x = z.clone();
        for _ in 0..steps {
            let data_grad = self.degrade_adjoint(self.degrade(x.clone())) - self.adjoint_y.clone();
            let prior_grad = (x.clone() - z.clone()) * alpha.clone();
            x = x - (data_grad + prior_grad) * step.clone();
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::DataStep;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::tensor::{Distribution, Tensor, TensorData};

    type TestBackend = NdArray;

    fn box_kernel(device: &NdArrayDevice) -> Tensor<TestBackend, 4> {
        Tensor::from_data(TensorData::new(vec![0.25f32; 4], [1, 1, 2, 2]), device)
    }

    #[test]
    fn solving_reduces_the_residual() {
        let device = NdArrayDevice::default();
        let truth =
            Tensor::<TestBackend, 4>::random([1, 3, 8, 8], Distribution::Default, &device);
        let kernel = box_kernel(&device);
        let y = crate::ops::downsample(crate::ops::blur(truth, kernel.clone()), 2);
        let step = DataStep::new(y, kernel, 2);

        let z = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);
        let alpha = Tensor::<TestBackend, 4>::full([1, 1, 1, 1], 0.01, &device);

        let before = step.residual(z.clone()).powi_scalar(2).sum().into_scalar();
        let x = step.solve(z, alpha, 10);
        let after = step.residual(x).powi_scalar(2).sum().into_scalar();
        assert!(after < before, "residual should shrink: {before} -> {after}");
    }

    #[test]
    fn zero_steps_returns_prior_estimate() {
        let device = NdArrayDevice::default();
        let y = Tensor::<TestBackend, 4>::ones([1, 3, 4, 4], &device);
        let step = DataStep::new(y, box_kernel(&device), 2);
        let z = Tensor::<TestBackend, 4>::full([1, 3, 8, 8], 0.3, &device);
        let alpha = Tensor::<TestBackend, 4>::ones([1, 1, 1, 1], &device);

        let x = step.solve(z.clone(), alpha, 0);
        x.into_data().assert_eq(&z.into_data(), true);
    }
}
