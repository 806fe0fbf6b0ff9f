use std::path::PathBuf;

use usr_dataset::Options;

pub enum ProcessMessage {
    /// Options were parsed, output directories created and a copy saved.
    OptionsLoaded {
        options: Box<Options>,
        saved_to: PathBuf,
    },
    /// The seed every random number generator of this run starts from.
    Seed { seed: u64 },
    DatasetLoaded { name: String, len: usize },
    /// The network is ready. `pretrained` is unset when it runs with random weights.
    ModelLoaded {
        pretrained: Option<PathBuf>,
        n_iter: usize,
    },
    /// One sample was evaluated. `idx` counts from 1.
    SampleResult {
        idx: usize,
        name: String,
        psnr: f64,
        lpips: f64,
        saved_to: Option<PathBuf>,
    },
    /// Something went wrong that doesn't stop the run.
    Warning { error: anyhow::Error },
    /// Averages over every processed sample.
    Summary {
        count: usize,
        avg_psnr: f64,
        avg_lpips: f64,
    },
}
