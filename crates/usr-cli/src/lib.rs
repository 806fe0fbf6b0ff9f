#![recursion_limit = "256"]

pub mod logging;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tokio_stream::{Stream, StreamExt};
use usr_process::{config::ProcessArgs, message::ProcessMessage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceChoice {
    /// Default wgpu adapter.
    Auto,
    /// Discrete GPU, the first of `gpu_ids` in the options.
    Gpu,
    /// Plain CPU backend.
    Cpu,
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "USRNet - evaluate a pretrained super-resolution network on a test set"
)]
pub struct Cli {
    /// Where to run the networks.
    #[arg(long, value_enum, default_value = "auto")]
    pub device: DeviceChoice,

    #[clap(flatten)]
    pub process: ProcessArgs,
}

/// Per sample log line, e.g. `---1-->   baby.png | 31.52dB | LPIPS: 0.112`.
pub fn sample_line(idx: usize, name: &str, psnr: f64, lpips: f64) -> String {
    format!("{idx:->4}--> {name:>10} | {psnr:<4.2}dB | LPIPS: {lpips:.3}")
}

pub fn summary_line(avg_psnr: f64, avg_lpips: f64) -> String {
    format!("<Average PSNR : {avg_psnr:.2}dB, Average LPIPS: {avg_lpips:.3}")
}

pub async fn process_ui(
    stream: impl Stream<Item = anyhow::Result<ProcessMessage>>,
    process_args: ProcessArgs,
) -> Result<(), anyhow::Error> {
    let main_spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .expect("Invalid indicatif config")
            .tick_strings(&["◐", "◓", "◑", "◒", "◒"]),
    );

    let eval_progress = ProgressBar::new(0)
        .with_style(
            ProgressStyle::with_template(
                "[{elapsed}] {bar:40.cyan/blue} {pos:>5}/{len:5} {msg} ({per_sec}, {eta} remaining)",
            )
            .expect("Invalid indicatif config")
            .progress_chars("◍○○"),
        )
        .with_message("Images");

    let sp = indicatif::MultiProgress::new();
    let main_spinner = sp.add(main_spinner);
    let eval_progress = sp.add(eval_progress);

    main_spinner.enable_steady_tick(Duration::from_millis(120));
    main_spinner.set_message("Starting up");

    if cfg!(debug_assertions) {
        let _ =
            sp.println("ℹ️  running in debug mode, compile with --release for best performance");
    }

    let mut stream = std::pin::pin!(stream);
    let start = Instant::now();
    let max_samples = process_args.eval_config.max_samples;

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(error) => {
                // Don't print the error here. It'll bubble up and be printed as output.
                let _ = sp.println("❌ Encountered an error");
                return Err(error);
            }
        };

        match msg {
            ProcessMessage::OptionsLoaded { options, saved_to } => {
                log::info!("{}", options.to_display_string()?);
                log::info!("Saved options to {}", saved_to.display());
                main_spinner.set_message("Loading data...");
            }
            ProcessMessage::Seed { seed } => {
                log::info!("Random seed: {seed}");
            }
            ProcessMessage::DatasetLoaded { name, len } => {
                log::info!("Number of test images: {len} ({name})");
                let total = max_samples.map_or(len, |max| max.min(len));
                eval_progress.set_length(total as u64);
            }
            ProcessMessage::ModelLoaded { pretrained, n_iter } => {
                match pretrained {
                    Some(path) => log::info!("Loaded model {} ({n_iter} iterations)", path.display()),
                    None => log::info!("Using a randomly initialized model ({n_iter} iterations)"),
                }
                main_spinner.set_message("Evaluating");
            }
            ProcessMessage::SampleResult {
                idx,
                name,
                psnr,
                lpips,
                ..
            } => {
                log::info!("{}", sample_line(idx, &name, psnr, lpips));
                eval_progress.set_position(idx as u64);
            }
            ProcessMessage::Warning { error } => {
                let _ = sp.println(format!("⚠️  {error:#}"));
            }
            ProcessMessage::Summary {
                count,
                avg_psnr,
                avg_lpips,
            } => {
                log::info!("{}", summary_line(avg_psnr, avg_lpips));
                main_spinner.set_message(format!("Evaluated {count} images"));
            }
        }
    }

    let duration = Duration::from_secs(start.elapsed().as_secs());
    main_spinner.finish();
    eval_progress.finish();
    let _ = sp.println(format!(
        "Evaluation took {}",
        humantime::format_duration(duration)
    ));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Cli, DeviceChoice, sample_line, summary_line};
    use clap::Parser;

    #[test]
    fn sample_lines_are_aligned() {
        assert_eq!(
            sample_line(1, "baby.png", 31.523, 0.1119),
            "---1-->   baby.png | 31.52dB | LPIPS: 0.112"
        );
        assert_eq!(
            sample_line(12, "butterfly.png", f64::INFINITY, 0.0),
            "--12--> butterfly.png | inf dB | LPIPS: 0.000"
        );
    }

    #[test]
    fn summary_line_rounds() {
        assert_eq!(
            summary_line(28.456, 0.2),
            "<Average PSNR : 28.46dB, Average LPIPS: 0.200"
        );
    }

    #[test]
    fn device_defaults_to_auto() {
        let cli = Cli::parse_from(["usrnet-eval"]);
        assert_eq!(cli.device, DeviceChoice::Auto);
        let cli = Cli::parse_from(["usrnet-eval", "--device", "cpu", "--max-samples", "1"]);
        assert_eq!(cli.device, DeviceChoice::Cpu);
        assert_eq!(cli.process.eval_config.max_samples, Some(1));
    }
}
