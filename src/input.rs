// 该文件是 Beiting （北亭） 项目的一部分。
// src/input.rs - 推理请求输入解码
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

use std::path::PathBuf;

use image::{DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, info};

mod enhance;
mod object_store;
mod request;
#[cfg(feature = "s3")]
mod s3_store;

pub use self::enhance::UnsharpMask;
pub use self::object_store::{
  DownloadedFile, LocalObjectStore, ObjectStore, StorageError, StoreWrapper,
};
pub use self::request::{JsonRequest, ObjectLocation, ObjectUriError};
#[cfg(feature = "s3")]
pub use self::s3_store::S3ObjectStore;

pub const CONTENT_TYPE_JPEG: &str = "image/jpeg";
pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Error, Debug)]
pub enum InputError {
  #[error("推理请求的内容类型 '{0}' 不受支持")]
  UnsupportedContentType(String),
  #[error("推理 JSON 请求缺少 '{0}' 参数")]
  MissingField(&'static str),
  #[error("JSON 解析错误: {0}")]
  InvalidJson(#[from] serde_json::Error),
  #[error("{0}")]
  InvalidObjectUri(#[from] ObjectUriError),
  #[error("对象存储错误: {0}")]
  Storage(#[from] StorageError),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
}

impl From<std::io::Error> for InputError {
  fn from(err: std::io::Error) -> Self {
    InputError::IoError(err)
  }
}

impl From<image::ImageError> for InputError {
  fn from(err: image::ImageError) -> Self {
    InputError::ImageLoadError(err)
  }
}

#[derive(Debug, Clone)]
pub struct DecodeOptions {
  /// 下载对象的存放目录，每个请求使用独立的文件名
  pub download_dir: PathBuf,
  pub unsharp_mask: UnsharpMask,
}

impl Default for DecodeOptions {
  fn default() -> Self {
    Self {
      download_dir: std::env::temp_dir(),
      unsharp_mask: UnsharpMask::default(),
    }
  }
}

/// 去掉 `;` 之后的参数并转为小写，例如 `application/json; charset=utf-8`
pub fn media_type(content_type: &str) -> String {
  content_type
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_ascii_lowercase()
}

/// 根据内容类型把请求体解码为图像
pub fn decode_input<S: ObjectStore + ?Sized>(
  body: &[u8],
  content_type: &str,
  store: &S,
  options: &DecodeOptions,
) -> Result<DynamicImage, InputError> {
  match media_type(content_type).as_str() {
    CONTENT_TYPE_JPEG => {
      info!("收到 JPEG 输入 ({} 字节)", body.len());
      Ok(image::load_from_memory(body)?)
    }
    CONTENT_TYPE_JSON => {
      info!("收到 JSON 输入");
      debug!("请求体: {}", String::from_utf8_lossy(body));
      decode_json_request(body, store, options)
    }
    _ => Err(InputError::UnsupportedContentType(content_type.to_string())),
  }
}

fn decode_json_request<S: ObjectStore + ?Sized>(
  body: &[u8],
  store: &S,
  options: &DecodeOptions,
) -> Result<DynamicImage, InputError> {
  let request: JsonRequest = serde_json::from_slice(body)?;
  let uri = request
    .s3_uri
    .as_deref()
    .ok_or(InputError::MissingField("s3_uri"))?;
  let location = ObjectLocation::parse(uri)?;
  debug!("bucket '{}', key '{}'", location.bucket, location.key);

  let download = DownloadedFile::new(&options.download_dir);
  let size = store.fetch(&location, download.path())?;
  info!("已从对象存储下载 '{}' ({} 字节)", uri, size);

  let image = ImageReader::open(download.path())?
    .with_guessed_format()?
    .decode()?;
  info!("已打开图像 ({} x {} 像素)", image.width(), image.height());

  if request.needs_sharpening() {
    let enhanced = options.unsharp_mask.apply(&image);
    info!("已对下载的图像进行增强");
    Ok(enhanced)
  } else {
    Ok(image)
  }
}
