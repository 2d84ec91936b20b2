// 该文件是 Beiting （北亭） 项目的一部分。
// src/frame.rs - NCHW 归一化帧定义与预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use candle_core::{Device, Tensor};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

const RGB_CHANNELS: usize = 3;

/// ImageNet 预训练时使用的均值
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 预训练时使用的标准差
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub const RESIZE_SHORTER_SIDE: u32 = 256;
pub const CROP_SIZE: u32 = 224;
/// 缩放结果允许的最大像素数，超出时拒绝处理
pub const MAX_RESIZED_PIXELS: u64 = 64 * 1024 * 1024;

/// 分类器所需的输入帧
pub type ClassifierFrame = NormalizedNchwFrame<CROP_SIZE, CROP_SIZE>;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("图像尺寸无效: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("缩放后的图像 {width}x{height} 小于裁剪尺寸 {crop_w}x{crop_h}")]
  TooSmall {
    width: u32,
    height: u32,
    crop_w: u32,
    crop_h: u32,
  },
  #[error("图像 {width}x{height} 的长宽比过大，无法缩放")]
  TooLarge { width: u32, height: u32 },
  #[error("张量错误: {0}")]
  TensorError(#[from] candle_core::Error),
}

pub trait AsNchwFrame<const W: u32, const H: u32> {
  fn as_nchw(&self) -> &[f32];
}

/// 以 CHW 顺序存放、已归一化的 3 通道浮点帧
#[derive(Debug, Clone)]
pub struct NormalizedNchwFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for NormalizedNchwFrame<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    let data = vec![0f32; size].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> NormalizedNchwFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 增加批次维度并放到指定设备上，形状为 `(1, 3, H, W)`
  pub fn to_tensor(&self, device: &Device) -> Result<Tensor, FrameError> {
    let tensor = Tensor::from_slice(
      self.as_nchw(),
      (1, RGB_CHANNELS, H as usize, W as usize),
      device,
    )?;
    Ok(tensor)
  }
}

impl<const W: u32, const H: u32> AsMut<[f32]> for NormalizedNchwFrame<W, H> {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNchwFrame<W, H> for NormalizedNchwFrame<W, H> {
  fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}

/// 验证阶段的固定预处理：缩放短边、中心裁剪、转为张量并逐通道归一化
#[derive(Debug, Clone)]
pub struct Preprocess {
  pub resize_shorter_side: u32,
  pub mean: [f32; 3],
  pub std: [f32; 3],
  pub filter: FilterType,
}

impl Default for Preprocess {
  fn default() -> Self {
    Self {
      resize_shorter_side: RESIZE_SHORTER_SIDE,
      mean: IMAGENET_MEAN,
      std: IMAGENET_STD,
      filter: FilterType::Triangle,
    }
  }
}

impl Preprocess {
  pub fn apply<const W: u32, const H: u32>(
    &self,
    image: &DynamicImage,
  ) -> Result<NormalizedNchwFrame<W, H>, FrameError> {
    let (width, height) = (image.width(), image.height());
    let (resized_w, resized_h) = resized_dimensions(width, height, self.resize_shorter_side)?;
    debug!(
      "缩放图像 {}x{} -> {}x{}",
      width, height, resized_w, resized_h
    );
    let resized = image::imageops::resize(&image.to_rgb8(), resized_w, resized_h, self.filter);

    if resized_w < W || resized_h < H {
      return Err(FrameError::TooSmall {
        width: resized_w,
        height: resized_h,
        crop_w: W,
        crop_h: H,
      });
    }
    let left = center_offset(resized_w, W);
    let top = center_offset(resized_h, H);
    let cropped = image::imageops::crop_imm(&resized, left, top, W, H).to_image();

    Ok(self.normalize(&cropped))
  }

  fn normalize<const W: u32, const H: u32>(&self, image: &RgbImage) -> NormalizedNchwFrame<W, H> {
    let mut frame = NormalizedNchwFrame::<W, H>::default();

    let channels = frame.channels();
    let height = frame.height();
    let width = frame.width();
    let slice = frame.as_mut();

    for c in 0..channels {
      for h in 0..height {
        for w in 0..width {
          let pixel = image.get_pixel(w as u32, h as u32);
          let value = pixel[c] as f32 / 255.0;
          let index = c * height * width + h * width + w;
          slice[index] = (value - self.mean[c]) / self.std[c];
        }
      }
    }
    frame
  }
}

/// 按短边缩放到 `shorter` 后的尺寸，长边按比例向下取整。
///
/// 长边溢出 `u32` 或总像素数超过 [`MAX_RESIZED_PIXELS`] 时返回 [`FrameError::TooLarge`]。
pub fn resized_dimensions(width: u32, height: u32, shorter: u32) -> Result<(u32, u32), FrameError> {
  if width == 0 || height == 0 {
    return Err(FrameError::EmptyImage(width, height));
  }
  let too_large = || FrameError::TooLarge { width, height };

  let (short, long) = if width <= height {
    (width, height)
  } else {
    (height, width)
  };
  let long = shorter as u64 * long as u64 / short as u64;
  if long
    .checked_mul(shorter as u64)
    .is_none_or(|pixels| pixels > MAX_RESIZED_PIXELS)
  {
    return Err(too_large());
  }
  let long = u32::try_from(long).map_err(|_| too_large())?;

  if width <= height {
    Ok((shorter, long))
  } else {
    Ok((long, shorter))
  }
}

// 与四舍六入五成双的取整方式一致
fn center_offset(size: u32, crop: u32) -> u32 {
  ((size - crop) as f64 / 2.0).round_ties_even() as u32
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn shorter_side_is_resized_to_256() {
    assert_eq!(resized_dimensions(640, 480, 256).unwrap(), (341, 256));
    assert_eq!(resized_dimensions(480, 640, 256).unwrap(), (256, 341));
    assert_eq!(resized_dimensions(300, 300, 256).unwrap(), (256, 256));
    assert_eq!(resized_dimensions(100, 1000, 256).unwrap(), (256, 2560));
  }

  #[test]
  fn extreme_aspect_ratio_is_rejected() {
    assert!(matches!(
      resized_dimensions(1, 20_000_000, 256),
      Err(FrameError::TooLarge {
        width: 1,
        height: 20_000_000
      })
    ));
    assert!(matches!(
      resized_dimensions(u32::MAX, 1, 256),
      Err(FrameError::TooLarge { .. })
    ));
    // 1x50000 缩放后约为 256x12800000，同样超出上限
    assert!(matches!(
      resized_dimensions(1, 50_000, 256),
      Err(FrameError::TooLarge { .. })
    ));
  }

  #[test]
  fn long_thin_image_fails_before_resizing() {
    let image = DynamicImage::new_luma8(1, 50_000);
    let result: Result<ClassifierFrame, _> = Preprocess::default().apply(&image);
    assert!(matches!(
      result,
      Err(FrameError::TooLarge {
        width: 1,
        height: 50_000
      })
    ));
  }

  #[test]
  fn center_offset_rounds_half_to_even() {
    assert_eq!(center_offset(256, 224), 16);
    assert_eq!(center_offset(257, 224), 16);
    assert_eq!(center_offset(259, 224), 18);
    assert_eq!(center_offset(224, 224), 0);
  }

  #[test]
  fn uniform_image_is_normalized_per_channel() {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([255, 0, 128])));
    let frame: ClassifierFrame = Preprocess::default().apply(&image).unwrap();
    let data = frame.as_nchw();
    let plane = 224 * 224;
    assert_eq!(data.len(), 3 * plane);

    let expected = [
      (1.0 - 0.485) / 0.229,
      (0.0 - 0.456) / 0.224,
      (128.0 / 255.0 - 0.406) / 0.225,
    ];
    for (c, value) in expected.iter().enumerate() {
      assert!((data[c * plane] - value).abs() < 1e-4);
      assert!((data[c * plane + plane - 1] - value).abs() < 1e-4);
    }
  }

  #[test]
  fn grayscale_image_becomes_three_channels() {
    let image = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(300, 500, image::Luma([51])));
    let frame: ClassifierFrame = Preprocess::default().apply(&image).unwrap();
    let tensor = frame.to_tensor(&Device::Cpu).unwrap();
    assert_eq!(tensor.dims(), &[1, 3, 224, 224]);
  }

  #[test]
  fn empty_image_is_rejected() {
    let image = DynamicImage::new_rgb8(0, 0);
    let result: Result<ClassifierFrame, _> = Preprocess::default().apply(&image);
    assert!(matches!(result, Err(FrameError::EmptyImage(0, 0))));
  }
}
