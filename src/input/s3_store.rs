// 该文件是 Beiting （北亭） 项目的一部分。
// src/input/s3_store.rs - AWS S3 对象下载
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

use std::path::Path;

use aws_config::BehaviorVersion;
use aws_sdk_s3::{Client, error::DisplayErrorContext};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{ObjectLocation, ObjectStore, StorageError},
};

/// 同步阻塞的 S3 下载器。凭证与区域由 SDK 默认链解析，
/// `s3://?region=<region>` 可以覆盖区域。
pub struct S3ObjectStore {
  client: Client,
  runtime: Runtime,
}

impl S3ObjectStore {
  pub fn new(region: Option<String>) -> Result<Self, StorageError> {
    let runtime = Builder::new_current_thread().enable_all().build()?;

    let loader = aws_config::defaults(BehaviorVersion::latest());
    let loader = match region {
      Some(region) => {
        debug!("使用指定的 S3 区域: {}", region);
        loader.region(aws_config::Region::new(region))
      }
      None => loader,
    };
    let config = runtime.block_on(loader.load());
    info!("S3 客户端已创建");

    Ok(Self {
      client: Client::new(&config),
      runtime,
    })
  }
}

impl FromUrlWithScheme for S3ObjectStore {
  const SCHEME: &'static str = "s3";
}

impl FromUrl for S3ObjectStore {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch(url.scheme().to_string()));
    }

    let region = url
      .query_pairs()
      .find(|(name, _)| name == "region")
      .map(|(_, value)| value.into_owned());
    S3ObjectStore::new(region)
  }
}

impl ObjectStore for S3ObjectStore {
  fn fetch(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
    self.runtime.block_on(async {
      let response = self
        .client
        .get_object()
        .bucket(&location.bucket)
        .key(&location.key)
        .send()
        .await
        .map_err(|e| {
          if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
            StorageError::NotFound(location.to_string())
          } else {
            StorageError::Remote(DisplayErrorContext(&e).to_string())
          }
        })?;

      let body = response
        .body
        .collect()
        .await
        .map_err(|e| StorageError::Remote(e.to_string()))?
        .into_bytes();
      tokio::fs::write(dest, &body).await?;
      Ok(body.len() as u64)
    })
  }
}
