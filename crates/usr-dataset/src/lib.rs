pub mod dataset;
pub mod degrade;
pub mod image_utils;
pub mod kernel;
pub mod loader;
pub mod options;
pub mod timestamp;

pub use dataset::{DatasetError, DatasetKind, SrSample, TestDataset};
pub use kernel::{BlurKernel, KernelOptions};
pub use loader::SampleLoader;
pub use options::{Options, OptionsError};
pub use timestamp::Timestamp;
