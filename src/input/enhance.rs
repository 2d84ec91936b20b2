// 该文件是 Beiting （北亭） 项目的一部分。
// src/input/enhance.rs - 反锐化掩模增强
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

use image::{DynamicImage, ImageBuffer, Pixel};
use imageproc::filter::gaussian_blur_f32;

/// 反锐化掩模参数，与常见图像库的 `UnsharpMask(radius, percent, threshold)` 含义一致
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnsharpMask {
  /// 高斯模糊的标准差
  pub radius: f32,
  /// 锐化强度（百分比）
  pub percent: i32,
  /// 原图与模糊图之差小于该值的像素保持不变
  pub threshold: i32,
}

impl Default for UnsharpMask {
  fn default() -> Self {
    Self {
      radius: 4.0,
      percent: 150,
      threshold: 3,
    }
  }
}

impl UnsharpMask {
  pub fn apply(&self, image: &DynamicImage) -> DynamicImage {
    match image {
      DynamicImage::ImageLuma8(img) => {
        DynamicImage::ImageLuma8(self.combine(img, gaussian_blur_f32(img, self.radius)))
      }
      DynamicImage::ImageLumaA8(img) => {
        DynamicImage::ImageLumaA8(self.combine(img, gaussian_blur_f32(img, self.radius)))
      }
      DynamicImage::ImageRgb8(img) => {
        DynamicImage::ImageRgb8(self.combine(img, gaussian_blur_f32(img, self.radius)))
      }
      DynamicImage::ImageRgba8(img) => {
        DynamicImage::ImageRgba8(self.combine(img, gaussian_blur_f32(img, self.radius)))
      }
      other => {
        let img = other.to_rgb8();
        let blurred = gaussian_blur_f32(&img, self.radius);
        DynamicImage::ImageRgb8(self.combine(&img, blurred))
      }
    }
  }

  fn combine<P>(
    &self,
    original: &ImageBuffer<P, Vec<u8>>,
    blurred: ImageBuffer<P, Vec<u8>>,
  ) -> ImageBuffer<P, Vec<u8>>
  where
    P: Pixel<Subpixel = u8>,
  {
    let mut output = blurred;
    for (out, &orig) in output.iter_mut().zip(original.iter()) {
      let orig = orig as i32;
      let diff = orig - *out as i32;
      *out = if diff.abs() >= self.threshold {
        (orig + diff * self.percent / 100).clamp(0, u8::MAX as i32) as u8
      } else {
        orig as u8
      };
    }
    output
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb, RgbImage};

  fn stripes() -> RgbImage {
    RgbImage::from_fn(64, 48, |x, _| {
      if (x / 8) % 2 == 0 {
        Rgb([40, 80, 120])
      } else {
        Rgb([200, 180, 160])
      }
    })
  }

  #[test]
  fn flat_image_is_left_untouched() {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([90, 120, 30])));
    let sharpened = UnsharpMask::default().apply(&image);
    assert_eq!(sharpened, image);
  }

  #[test]
  fn edges_are_amplified() {
    let image = DynamicImage::ImageRgb8(stripes());
    let sharpened = UnsharpMask::default().apply(&image).to_rgb8();
    assert_ne!(sharpened, stripes());

    // 暗条纹边缘变得更暗
    let dark_edge = sharpened.get_pixel(7, 20);
    assert!(dark_edge[0] < 40);
  }

  #[test]
  fn small_differences_are_below_threshold() {
    let image = GrayImage::from_fn(32, 32, |x, _| Luma([100 + (x % 2) as u8]));
    let sharpened = UnsharpMask::default().apply(&DynamicImage::ImageLuma8(image.clone()));
    assert_eq!(sharpened.to_luma8(), image);
  }

  #[test]
  fn other_formats_become_rgb() {
    let image = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(8, 8, Rgb([1000u16, 0, 0])));
    let sharpened = UnsharpMask::default().apply(&image);
    assert!(matches!(sharpened, DynamicImage::ImageRgb8(_)));
  }
}
