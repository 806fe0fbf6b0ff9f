use std::path::{Path, PathBuf};

use burn::tensor::{DataError, Tensor, TensorData, backend::Backend};
use image::{ImageError, Rgb32FImage, RgbImage};
use usr_vfs::Vfs;

/// Extensions treated as images, compared case-insensitively.
pub const IMG_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "ppm", "bmp", "tif", "tiff"];

/// All images in `vfs`, in natural sort order (`img2` before `img10`).
pub fn image_paths(vfs: &Vfs) -> Vec<PathBuf> {
    let mut paths: Vec<_> = vfs.files_with_extensions(&IMG_EXTENSIONS).collect();
    alphanumeric_sort::sort_path_slice(&mut paths);
    paths
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMG_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Crop width and height down to multiples of `scale`.
pub fn modcrop(img: &RgbImage, scale: u32) -> RgbImage {
    let scale = scale.max(1);
    let (w, h) = (img.width() - img.width() % scale, img.height() - img.height() % scale);
    image::imageops::crop_imm(img, 0, 0, w, h).to_image()
}

/// u8 RGB to float RGB in [0, 1].
pub fn to_float(img: &RgbImage) -> Rgb32FImage {
    let data = img.as_raw().iter().map(|&v| f32::from(v) / 255.0).collect();
    Rgb32FImage::from_raw(img.width(), img.height(), data).expect("same dimensions")
}

/// Float HWC image to a CHW tensor.
pub fn image_to_tensor<B: Backend>(img: &Rgb32FImage, device: &B::Device) -> Tensor<B, 3> {
    let (w, h) = img.dimensions();
    let data = TensorData::new(img.as_raw().clone(), [h as usize, w as usize, 3]);
    Tensor::<B, 3>::from_data(data, device).permute([2, 0, 1])
}

/// CHW tensor to u8 RGB: clamp to [0, 1], scale and round.
pub fn tensor_to_rgb8<B: Backend>(tensor: Tensor<B, 3>) -> Result<RgbImage, DataError> {
    let [_, h, w] = tensor.dims();
    let values = (tensor.clamp(0.0, 1.0) * 255.0)
        .round()
        .permute([1, 2, 0])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()?;
    let bytes = values.into_iter().map(|v| v as u8).collect();
    Ok(RgbImage::from_raw(w as u32, h as u32, bytes).expect("tensor has 3 channels"))
}

/// Save as an image file, creating the parent directory.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<(), ImageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(ImageError::IoError)?;
    }
    img.save(path)
}
