#![recursion_limit = "256"]

use burn::{
    backend::{
        NdArray, Wgpu,
        ndarray::NdArrayDevice,
        wgpu::WgpuDevice,
    },
    tensor::backend::Backend,
};
use clap::Parser;
use usr_cli::{Cli, DeviceChoice, logging::init_logger, process_ui};
use usr_dataset::Options;
use usr_process::{config::ProcessArgs, process::eval_stream};

async fn run<B: Backend>(process: ProcessArgs, device: B::Device) -> anyhow::Result<()> {
    let stream = eval_stream::<B>(process.clone(), device);
    process_ui(stream, process).await
}

fn main() -> Result<(), anyhow::Error> {
    let args = Cli::parse();

    #[cfg(feature = "tracy")]
    {
        use tracing_subscriber::layer::SubscriberExt;

        tracing::subscriber::set_global_default(
            tracing_subscriber::registry().with(tracing_tracy::TracyLayer::default()),
        )
        .expect("Failed to set tracing subscriber");
    }

    // The log file lives in the run directory, so read where that is first.
    let options = Options::parse(&args.process.eval_config.options_path)?;
    init_logger(options.path.log.as_deref(), "train")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to initialize tokio runtime");

    runtime.block_on(async move {
        match args.device {
            DeviceChoice::Cpu => run::<NdArray>(args.process, NdArrayDevice::default()).await,
            DeviceChoice::Auto => run::<Wgpu>(args.process, WgpuDevice::default()).await,
            DeviceChoice::Gpu => {
                let gpu = options
                    .gpu_ids
                    .as_ref()
                    .and_then(|ids| ids.first().copied())
                    .unwrap_or(0);
                run::<Wgpu>(args.process, WgpuDevice::DiscreteGpu(gpu as usize)).await
            }
        }
    })
}
