use std::path::PathBuf;

use clap::{ArgAction, Args, Parser};
use usr_dataset::options::DEFAULT_OPTIONS_PATH;

#[derive(Clone, Debug, Args)]
pub struct EvalConfig {
    /// Path to the JSON options file.
    #[arg(long = "opt", help_heading = "Eval options", default_value = DEFAULT_OPTIONS_PATH)]
    pub options_path: PathBuf,

    /// Random seed. Overrides `train.manual_seed` from the options file.
    #[arg(long, help_heading = "Eval options")]
    pub seed: Option<u64>,

    /// Stop after this many samples. By default every test image is evaluated.
    #[arg(long, help_heading = "Eval options")]
    pub max_samples: Option<usize>,

    /// Save every restored image as `<stem>_E.png` in the image directory.
    #[arg(
        long,
        help_heading = "Eval options",
        default_value = "true",
        action = ArgAction::Set
    )]
    pub save_images: bool,

    /// Score LPIPS on the clamped estimate with inputs mapped to [-1, 1].
    /// By default both images are passed in [0, 1] and the estimate is not clamped.
    #[arg(long, help_heading = "Eval options", default_value = "false")]
    pub lpips_normalize: bool,

    /// Converted USRNet weights. Overrides `path.pretrained_netG`.
    #[arg(long, help_heading = "Model options")]
    pub usrnet_weights: Option<PathBuf>,

    /// Converted LPIPS (VGG) weights. Overrides `path.pretrained_lpips`.
    #[arg(long, help_heading = "Model options")]
    pub lpips_weights: Option<PathBuf>,

    /// Gradient iterations per data step. Overrides `netG.data_steps`.
    #[arg(long, help_heading = "Model options")]
    pub data_steps: Option<usize>,
}

#[derive(Clone, Debug, Args)]
pub struct TrackingConfig {
    /// Whether to record this run with rerun.io.
    #[arg(long, help_heading = "Tracking options", default_value = "false")]
    pub tracking_enabled: bool,
    /// Save the recording to this `.rrd` file instead of spawning a viewer.
    #[arg(long, help_heading = "Tracking options")]
    pub tracking_save: Option<PathBuf>,
}

#[derive(Parser, Clone, Debug)]
pub struct ProcessArgs {
    #[clap(flatten)]
    pub eval_config: EvalConfig,
    #[clap(flatten)]
    pub tracking_config: TrackingConfig,
}

impl Default for ProcessArgs {
    fn default() -> Self {
        Self::parse_from([""])
    }
}
