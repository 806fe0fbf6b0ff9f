use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_fn_stream::{TryStreamEmitter, try_fn_stream};
use burn::{module::Module, tensor::backend::Backend};
use tokio_stream::Stream;
use usr_dataset::{
    Options, SampleLoader, TestDataset, Timestamp, image_utils::save_image, options::NetOptions,
};
use usrnet::{UsrNetConfig, check_net_type, load_usrnet};

use crate::{
    config::{EvalConfig, ProcessArgs},
    emit_warnings::WarningEmitter,
    eval::{EvalModels, eval_sample},
    message::ProcessMessage,
    metrics::RunningAverage,
    tracking::Tracker,
};

/// Layer modes the network is built with. Other values in `netG` are rejected.
const NET_MODES: [(&str, &str); 3] = [
    ("act_mode", "R"),
    ("upsample_mode", "convtranspose"),
    ("downsample_mode", "strideconv"),
];

/// Network configuration from the `netG` options, falling back to the defaults.
pub fn usrnet_config(net: &NetOptions, data_steps: Option<usize>) -> anyhow::Result<UsrNetConfig> {
    check_net_type(net.net_type.as_deref().unwrap_or(usrnet::NET_TYPE))?;
    let modes = [&net.act_mode, &net.upsample_mode, &net.downsample_mode];
    for ((key, supported), value) in NET_MODES.iter().zip(modes) {
        if let Some(value) = value
            .as_deref()
            .filter(|value| !value.eq_ignore_ascii_case(supported))
        {
            return Err(anyhow!(
                "netG.{key} '{value}' is not supported, only '{supported}' is"
            ));
        }
    }

    let mut config = UsrNetConfig::new();
    if let Some(n_iter) = net.n_iter {
        config = config.with_n_iter(n_iter);
    }
    if let Some(h_nc) = net.h_nc {
        config = config.with_h_nc(h_nc);
    }
    if let Some(in_nc) = net.in_nc {
        config = config.with_in_nc(in_nc);
    }
    if let Some(out_nc) = net.out_nc {
        config = config.with_out_nc(out_nc);
    }
    if let Some(nc) = &net.nc {
        let nc: [usize; 4] = nc
            .as_slice()
            .try_into()
            .map_err(|_err| anyhow!("netG.nc must list 4 channel counts, got {nc:?}"))?;
        config = config.with_nc(nc);
    }
    if let Some(nb) = net.nb {
        config = config.with_nb(nb);
    }
    if let Some(steps) = data_steps.or(net.data_steps) {
        config = config.with_data_steps(steps);
    }
    Ok(config)
}

/// Load the pretrained networks named by the options (or the command line overrides).
///
/// Without USRNet weights the network runs with random weights. LPIPS weights are required.
pub fn load_models<B: Backend>(
    options: &Options,
    eval: &EvalConfig,
    device: &B::Device,
) -> anyhow::Result<EvalModels<B>> {
    let config = usrnet_config(&options.net_g, eval.data_steps)?;

    let usrnet = match eval
        .usrnet_weights
        .as_ref()
        .or(options.path.pretrained_net_g.as_ref())
    {
        Some(path) => {
            log::info!("Loading model [{}]", path.display());
            load_usrnet(path, &config, device)
                .with_context(|| format!("Failed to load USRNet weights {}", path.display()))?
        }
        None => {
            log::warn!("No pretrained_netG set, the network runs with random weights.");
            config.init(device)
        }
    };

    let lpips_path = eval
        .lpips_weights
        .as_ref()
        .or(options.path.pretrained_lpips.as_ref())
        .context("No LPIPS weights, set path.pretrained_lpips or --lpips-weights")?;
    let lpips = lpips::load_vgg_lpips(lpips_path, device)
        .with_context(|| format!("Failed to load LPIPS weights {}", lpips_path.display()))?;

    // Inference only, nothing here is trained.
    Ok(EvalModels {
        usrnet: usrnet.no_grad(),
        lpips: lpips.no_grad(),
    })
}

/// Evaluate the pretrained network on the test dataset of the options file.
pub fn eval_stream<B: Backend>(
    args: ProcessArgs,
    device: B::Device,
) -> impl Stream<Item = Result<ProcessMessage, anyhow::Error>> + 'static {
    eval_stream_with(args, device, load_models::<B>)
}

/// [`eval_stream`] with a custom way to obtain the networks.
pub fn eval_stream_with<B, F>(
    args: ProcessArgs,
    device: B::Device,
    load: F,
) -> impl Stream<Item = Result<ProcessMessage, anyhow::Error>> + 'static
where
    B: Backend,
    F: FnOnce(&Options, &EvalConfig, &B::Device) -> anyhow::Result<EvalModels<B>> + 'static,
{
    try_fn_stream(|emitter| async move {
        run_eval(args, device, load, &emitter).await
    })
}

async fn run_eval<B, F>(
    args: ProcessArgs,
    device: B::Device,
    load: F,
    emitter: &TryStreamEmitter<ProcessMessage, anyhow::Error>,
) -> anyhow::Result<()>
where
    B: Backend,
    F: FnOnce(&Options, &EvalConfig, &B::Device) -> anyhow::Result<EvalModels<B>>,
{
    let warner = WarningEmitter::new(emitter);
    let eval_config = &args.eval_config;

    let options = Options::parse(&eval_config.options_path)?;
    options
        .path
        .mkdirs()
        .context("Failed to create output directories")?;
    let stamp = Timestamp::now();
    let saved_to = options.save(&stamp)?;
    emitter
        .emit(ProcessMessage::OptionsLoaded {
            options: Box::new(options.clone()),
            saved_to,
        })
        .await;

    let tracker = warner
        .warn_if_err(
            Tracker::new(&args.tracking_config, &options.run_name(&stamp))
                .context("Failed to start tracking"),
        )
        .await
        .unwrap_or_else(Tracker::disabled);
    if tracker.is_enabled() {
        let text = options.to_display_string()?;
        warner
            .warn_if_err(tracker.log_options(&text).context("Failed to track options"))
            .await;
    }

    let seed = eval_config
        .seed
        .or(options.train.manual_seed)
        .unwrap_or_else(|| rand::random_range(1..=10000));
    emitter.emit(ProcessMessage::Seed { seed }).await;
    B::seed(&device, seed);

    let dataset_opts = options
        .test_dataset()
        .context("Options have no 'test' dataset")?;
    let dataset = TestDataset::from_options(dataset_opts, seed)
        .await
        .context("Failed to load test dataset")?;
    emitter
        .emit(ProcessMessage::DatasetLoaded {
            name: dataset.name().to_owned(),
            len: dataset.len(),
        })
        .await;

    let models = load(&options, eval_config, &device)?;
    emitter
        .emit(ProcessMessage::ModelLoaded {
            pretrained: eval_config
                .usrnet_weights
                .clone()
                .or_else(|| options.path.pretrained_net_g.clone()),
            n_iter: models.usrnet.n_iter(),
        })
        .await;

    let images_root = options
        .path
        .images
        .clone()
        .context("Option 'path.images' is not set")?;
    let border = options.scale;
    let num_workers = dataset_opts.dataloader_num_workers.unwrap_or(0);
    let mut loader = SampleLoader::new(Arc::new(dataset), num_workers);
    let max_samples = eval_config.max_samples.unwrap_or(usize::MAX);

    let mut avg_psnr = RunningAverage::default();
    let mut avg_lpips = RunningAverage::default();

    while avg_psnr.count() < max_samples {
        let Some(sample) = loader.next().await else {
            break;
        };
        let sample = sample.context("Failed to load sample")?;
        let idx = avg_psnr.count() + 1;
        let stem = sample.stem();

        let img_dir = images_root.join(&stem);
        tokio::fs::create_dir_all(&img_dir)
            .await
            .with_context(|| format!("Failed to create {}", img_dir.display()))?;

        let result = eval_sample(
            &models,
            &sample,
            border,
            eval_config.lpips_normalize,
            &device,
        )
            .with_context(|| format!("Failed to evaluate {}", sample.name()))?;
        avg_psnr.push(result.psnr);
        avg_lpips.push(result.lpips);

        let saved_to = if eval_config.save_images {
            let path = img_dir.join(format!("{stem}_E.png"));
            let res = save_image(&result.estimate, &path)
                .with_context(|| format!("Failed to save {}", path.display()));
            warner.warn_if_err(res).await.map(|()| path)
        } else {
            None
        };

        warner
            .warn_if_err(
                tracker
                    .log_sample(
                        idx,
                        result.psnr,
                        result.lpips,
                        &sample.img_l,
                        &result.estimate,
                        &sample.img_h,
                    )
                    .context("Failed to track sample"),
            )
            .await;

        emitter
            .emit(ProcessMessage::SampleResult {
                idx,
                name: sample.name(),
                psnr: result.psnr,
                lpips: result.lpips,
                saved_to,
            })
            .await;
    }

    warner
        .warn_if_err(
            tracker
                .log_summary(avg_psnr.average(), avg_lpips.average())
                .context("Failed to track summary"),
        )
        .await;

    emitter
        .emit(ProcessMessage::Summary {
            count: avg_psnr.count(),
            avg_psnr: avg_psnr.average(),
            avg_lpips: avg_lpips.average(),
        })
        .await;

    Ok(())
}
