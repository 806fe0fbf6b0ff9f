use anyhow::Context;
use image::{DynamicImage, Rgb32FImage, RgbImage};
use rerun::{RecordingStream, RecordingStreamBuilder};

use crate::config::TrackingConfig;

/// Optional rerun.io recording of a run. Every call is a no-op when disabled.
pub struct Tracker {
    rec: Option<RecordingStream>,
}

impl Tracker {
    pub fn disabled() -> Self {
        Self { rec: None }
    }

    pub fn new(config: &TrackingConfig, run_name: &str) -> anyhow::Result<Self> {
        if !config.tracking_enabled {
            return Ok(Self::disabled());
        }
        let builder = RecordingStreamBuilder::new(run_name);
        let rec = match &config.tracking_save {
            Some(path) => builder
                .save(path)
                .with_context(|| format!("Failed to create recording {}", path.display()))?,
            None => builder.spawn().context("Failed to spawn rerun viewer")?,
        };
        Ok(Self { rec: Some(rec) })
    }

    pub fn is_enabled(&self) -> bool {
        self.rec.is_some()
    }

    pub fn log_options(&self, text: &str) -> anyhow::Result<()> {
        let Some(rec) = self.rec.as_ref() else {
            return Ok(());
        };
        rec.log_static("options", &rerun::TextDocument::new(text))?;
        Ok(())
    }

    pub fn log_sample(
        &self,
        idx: usize,
        psnr: f64,
        lpips: f64,
        img_l: &Rgb32FImage,
        img_e: &RgbImage,
        img_h: &RgbImage,
    ) -> anyhow::Result<()> {
        let Some(rec) = self.rec.as_ref() else {
            return Ok(());
        };
        rec.set_time_sequence("sample", idx as i64);

        if psnr.is_finite() {
            rec.log("metrics/psnr", &rerun::Scalars::single(psnr))?;
        }
        rec.log("metrics/lpips", &rerun::Scalars::single(lpips))?;

        let img_l = DynamicImage::ImageRgb32F(img_l.clone()).to_rgb8();
        for (path, img) in [("images/L", &img_l), ("images/E", img_e), ("images/H", img_h)] {
            let (w, h) = img.dimensions();
            rec.log(path, &rerun::Image::from_rgb24(img.as_raw().clone(), [w, h]))?;
        }
        Ok(())
    }

    pub fn log_summary(&self, avg_psnr: f64, avg_lpips: f64) -> anyhow::Result<()> {
        let Some(rec) = self.rec.as_ref() else {
            return Ok(());
        };
        let text = format!("Average PSNR: {avg_psnr:.2}dB\nAverage LPIPS: {avg_lpips:.3}");
        rec.log_static("summary", &rerun::TextDocument::new(text))?;
        Ok(())
    }
}
