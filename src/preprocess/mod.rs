//! 画像の前処理
//!
//! 学習・推論の両方がここを通ります。リサイズ方法と正規化が一致していないと
//! 精度が黙って落ちるので、変換はこのモジュールの関数だけで行うこと。

pub mod augment;

pub use augment::{AffineParams, Augmentation};

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use rand::Rng;
use std::path::Path;

use crate::error::{ClassifierError, Result};
use crate::types::{ImageSize, ImageTensor, CHANNELS};

/// 画像ファイルを読み込む
///
/// 形式は拡張子ではなく中身から判定します。
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| ClassifierError::decode(path, e))
}

/// RGB8 に変換して指定サイズへ変形（最近傍補間、アスペクト比は保持しない）
pub fn resize_rgb(image: &DynamicImage, size: ImageSize) -> RgbImage {
    let rgb = image.to_rgb8();
    if rgb.dimensions() == (size.width, size.height) {
        return rgb;
    }
    imageops::resize(&rgb, size.width, size.height, FilterType::Nearest)
}

/// 各チャネルを 255 で割り (C, H, W) の順で平坦化
pub fn normalize(image: &RgbImage) -> ImageTensor {
    let (width, height) = image.dimensions();
    let plane = width as usize * height as usize;
    let mut data = vec![0.0f32; CHANNELS * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width as usize + x as usize;
        for channel in 0..CHANNELS {
            data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    ImageTensor::new(ImageSize::new(height, width), data)
}

/// 推論用の変換（リサイズ + 正規化のみ）
pub fn to_tensor(image: &DynamicImage, size: ImageSize) -> ImageTensor {
    normalize(&resize_rgb(image, size))
}

pub fn load_tensor(path: &Path, size: ImageSize) -> Result<ImageTensor> {
    Ok(to_tensor(&load_image(path)?, size))
}

/// 学習用の変換（リサイズ → ランダム変形 → 正規化）
pub fn load_augmented_tensor<R: Rng + ?Sized>(
    path: &Path,
    size: ImageSize,
    augmentation: &Augmentation,
    rng: &mut R,
) -> Result<ImageTensor> {
    let resized = resize_rgb(&load_image(path)?, size);
    let params = augmentation.sample(rng);
    Ok(normalize(&params.apply(&resized)))
}
