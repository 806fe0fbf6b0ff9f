use std::path::{Path, PathBuf};

use image::{ImageError, Rgb32FImage, RgbImage};
use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;
use tracing::trace_span;
use usr_vfs::{Vfs, VfsError};

use crate::{
    degrade,
    image_utils::{decode_rgb, image_paths, is_image, modcrop, to_float},
    kernel::BlurKernel,
    options::DatasetOptions,
};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to mount dataset root.")]
    Vfs(#[from] VfsError),

    #[error("Failed to read {path}.")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}.")]
    Image {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    #[error("Dataset option '{0}' must be set.")]
    MissingOption(&'static str),

    #[error("Unknown dataset type '{0}'. Supported: usrnet, sr.")]
    UnknownType(String),

    #[error("No images found in {0}.")]
    Empty(PathBuf),

    #[error("No low resolution image matches {0}.")]
    MissingLowRes(PathBuf),

    #[error("Several low resolution images match {path}: {candidates:?}.")]
    AmbiguousLowRes {
        path: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("Image {path} is {actual:?}, expected {expected:?} for scale {sf}.")]
    SizeMismatch {
        path: PathBuf,
        actual: (u32, u32),
        expected: (u32, u32),
        sf: u32,
    },

    #[error("Sample {0} is out of range.")]
    OutOfRange(usize),

    #[error("Sample loading task failed: {0}")]
    Worker(String),
}

/// One evaluation sample: low resolution input, ground truth and how the input was degraded.
#[derive(Clone, Debug)]
pub struct SrSample {
    pub l_path: PathBuf,
    pub h_path: PathBuf,
    /// Low resolution input, float RGB, nominally in [0, 1].
    pub img_l: Rgb32FImage,
    /// Ground truth, cropped to a multiple of `sf`.
    pub img_h: RgbImage,
    pub kernel: BlurKernel,
    /// Noise level on the [0, 1] scale.
    pub sigma: f32,
    pub sf: u32,
}

impl SrSample {
    /// File name of the input, as shown in logs.
    pub fn name(&self) -> String {
        self.l_path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
    }

    pub fn stem(&self) -> String {
        self.l_path
            .file_stem()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    /// Inputs are synthesized from the ground truth with a known kernel and noise level.
    Synthetic,
    /// Inputs are read from `dataroot_L`, matched to ground truth by file stem.
    Paired,
}

impl DatasetKind {
    fn from_type(dataset_type: &str) -> Result<Self, DatasetError> {
        match dataset_type.to_lowercase().as_str() {
            "usrnet" => Ok(Self::Synthetic),
            "sr" | "paired" | "dnpatch" => Ok(Self::Paired),
            other => Err(DatasetError::UnknownType(other.to_owned())),
        }
    }
}

struct Source {
    root: PathBuf,
    vfs: Vfs,
}

impl Source {
    async fn mount(root: &Path) -> Result<Self, DatasetError> {
        Ok(Self {
            root: root.to_path_buf(),
            vfs: Vfs::from_path(root).await?,
        })
    }

    async fn read_rgb(&self, rel: &Path) -> Result<RgbImage, DatasetError> {
        let path = self.root.join(rel);
        let bytes = self
            .vfs
            .read_file(rel)
            .await
            .map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;
        tokio::task::spawn_blocking(move || {
            decode_rgb(&bytes).map_err(|source| DatasetError::Image { path, source })
        })
        .await
        .map_err(|e| DatasetError::Worker(e.to_string()))?
    }
}

/// The `test` phase dataset.
pub struct TestDataset {
    name: String,
    kind: DatasetKind,
    high: Source,
    low: Option<Source>,
    h_paths: Vec<PathBuf>,
    l_paths: Vec<PathBuf>,
    kernel: BlurKernel,
    sigma: f32,
    sf: u32,
    seed: u64,
}

impl std::fmt::Debug for TestDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDataset")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.h_paths.len())
            .field("sf", &self.sf)
            .finish_non_exhaustive()
    }
}

/// The low resolution image sharing the stem of `h`.
///
/// With several candidates the one with the same extension as `h` wins.
fn match_low_res(low: &Vfs, high_root: &Path, h: &Path) -> Result<PathBuf, DatasetError> {
    let stem = h.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let mut candidates: Vec<_> = low.files_with_stem(stem).filter(|p| is_image(p)).collect();
    alphanumeric_sort::sort_path_slice(&mut candidates);

    match candidates.len() {
        0 => Err(DatasetError::MissingLowRes(high_root.join(h))),
        1 => Ok(candidates.remove(0)),
        _ => {
            let same_ext = |p: &&PathBuf| match (p.extension(), h.extension()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            };
            match candidates.iter().find(same_ext) {
                Some(path) => Ok(path.clone()),
                None => Err(DatasetError::AmbiguousLowRes {
                    path: high_root.join(h),
                    candidates,
                }),
            }
        }
    }
}

impl TestDataset {
    pub async fn from_options(opts: &DatasetOptions, seed: u64) -> Result<Self, DatasetError> {
        let kind = DatasetKind::from_type(opts.dataset_type.as_deref().unwrap_or("usrnet"))?;
        let root_h = opts
            .dataroot_h
            .as_deref()
            .ok_or(DatasetError::MissingOption("dataroot_H"))?;
        let sf = opts.sf_validation.or(opts.scale).unwrap_or(4).max(1);

        let high = Source::mount(root_h).await?;
        let h_paths = image_paths(&high.vfs);
        if h_paths.is_empty() {
            return Err(DatasetError::Empty(root_h.to_path_buf()));
        }

        let (low, l_paths) = match kind {
            DatasetKind::Synthetic => (None, h_paths.clone()),
            DatasetKind::Paired => {
                let root_l = opts
                    .dataroot_l
                    .as_deref()
                    .ok_or(DatasetError::MissingOption("dataroot_L"))?;
                let low = Source::mount(root_l).await?;
                let l_paths = h_paths
                    .iter()
                    .map(|h| match_low_res(&low.vfs, &high.root, h))
                    .collect::<Result<Vec<_>, _>>()?;
                (Some(low), l_paths)
            }
        };

        let name = opts.name.clone().unwrap_or_else(|| "test".to_owned());
        log::info!(
            "Dataset [{name}] has {} images from {}",
            h_paths.len(),
            root_h.display()
        );

        Ok(Self {
            name,
            kind,
            high,
            low,
            h_paths,
            l_paths,
            kernel: opts.kernel.clone().unwrap_or_default().build(),
            sigma: opts.noise_level.unwrap_or(0.0) / 255.0,
            sf,
            seed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.h_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.h_paths.is_empty()
    }

    pub fn scale(&self) -> u32 {
        self.sf
    }

    pub async fn get(&self, idx: usize) -> Result<SrSample, DatasetError> {
        let h_rel = self.h_paths.get(idx).ok_or(DatasetError::OutOfRange(idx))?;
        let l_rel = &self.l_paths[idx];
        let sf = self.sf;

        let img_h = modcrop(&self.high.read_rgb(h_rel).await?, sf);
        let h_path = self.high.root.join(h_rel);

        let (img_l, l_path) = match &self.low {
            None => {
                let kernel = self.kernel.clone();
                let sigma = self.sigma;
                // Every sample gets its own noise stream so results don't depend on load order.
                let seed = self.seed.wrapping_add(idx as u64);
                let gt = img_h.clone();
                let img_l = tokio::task::spawn_blocking(move || {
                    let _span = trace_span!("Degrade sample", idx).entered();
                    let blurred = degrade::blur_wrap(&to_float(&gt), &kernel);
                    let mut img_l = degrade::downsample(&blurred, sf);
                    degrade::add_noise(&mut img_l, sigma, &mut StdRng::seed_from_u64(seed));
                    img_l
                })
                .await
                .map_err(|e| DatasetError::Worker(e.to_string()))?;
                (img_l, h_path.clone())
            }
            Some(low) => {
                let img_l = low.read_rgb(l_rel).await?;
                let l_path = low.root.join(l_rel);
                let expected = (img_h.width() / sf, img_h.height() / sf);
                if img_l.dimensions() != expected {
                    return Err(DatasetError::SizeMismatch {
                        path: l_path,
                        actual: img_l.dimensions(),
                        expected,
                        sf,
                    });
                }
                (to_float(&img_l), l_path)
            }
        };

        Ok(SrSample {
            l_path,
            h_path,
            img_l,
            img_h,
            kernel: self.kernel.clone(),
            sigma: self.sigma,
            sf,
        })
    }
}
