#![recursion_limit = "256"]

mod remap;

use std::path::{Path, PathBuf};

use anyhow::Context;
use burn::module::Module;
use burn::record::{FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use clap::{Parser, Subcommand};
use lpips::{LpipsModel, LpipsModelConfig, LpipsRecorder};
use usrnet::{UsrNet, UsrNetConfig, UsrNetRecorder};

/// Convert PyTorch checkpoints into burn records.
#[derive(Parser)]
#[command(author, version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full `lpips.LPIPS(net="vgg")` state dict.
    Lpips { input: PathBuf, output: PathBuf },
    /// USRNet generator state dict.
    Usrnet {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, default_value = "8")]
        n_iter: usize,
        #[arg(long, default_value = "64")]
        h_nc: usize,
        #[arg(long, default_value = "2")]
        nb: usize,
    },
}

fn load_args(input: &Path, remaps: Vec<(String, String)>) -> LoadArgs {
    remaps
        .into_iter()
        .fold(LoadArgs::new(input.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        })
}

fn convert_lpips<B: Backend>(input: &Path, output: &Path, device: &B::Device) -> anyhow::Result<()> {
    let record: <LpipsModel<B> as Module<B>>::Record =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args(input, remap::lpips_remaps()), device)
            .with_context(|| format!("Failed to decode {}", input.display()))?;
    LpipsModelConfig::new()
        .init::<B>(device)
        .load_record(record)
        .save_file(output, &LpipsRecorder::new())
        .context("Failed to save LPIPS record")?;
    Ok(())
}

fn convert_usrnet<B: Backend>(
    input: &Path,
    output: &Path,
    config: &UsrNetConfig,
    device: &B::Device,
) -> anyhow::Result<()> {
    let record: <UsrNet<B> as Module<B>>::Record =
        PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args(input, remap::usrnet_remaps(config.nb)), device)
            .with_context(|| format!("Failed to decode {}", input.display()))?;
    config
        .init::<B>(device)
        .load_record(record)
        .save_file(output, &UsrNetRecorder::new())
        .context("Failed to save USRNet record")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .target(env_logger::Target::Stdout)
        .filter_level(log::LevelFilter::Info)
        .init();

    type B = burn::backend::NdArray;
    let device = burn::backend::ndarray::NdArrayDevice::default();

    match Cli::parse().command {
        Command::Lpips { input, output } => {
            log::info!("Converting LPIPS {} to burn format...", input.display());
            convert_lpips::<B>(&input, &output, &device)?;
        }
        Command::Usrnet {
            input,
            output,
            n_iter,
            h_nc,
            nb,
        } => {
            log::info!("Converting USRNet {} to burn format...", input.display());
            let config = UsrNetConfig::new()
                .with_n_iter(n_iter)
                .with_h_nc(h_nc)
                .with_nb(nb);
            convert_usrnet::<B>(&input, &output, &config, &device)?;
        }
    }
    log::info!("Conversion completed successfully!");
    Ok(())
}
