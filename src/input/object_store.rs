// 该文件是 Beiting （北亭） 项目的一部分。
// src/input/object_store.rs - 对象存储下载
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

use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{CONTENT_TYPE_JSON, ObjectLocation, media_type},
};

#[cfg(feature = "s3")]
use crate::input::S3ObjectStore;

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("对象不存在: {0}")]
  NotFound(String),
  #[error("对象键无效: {0}")]
  InvalidKey(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("对象存储请求失败: {0}")]
  Remote(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub trait ObjectStore {
  /// 将对象下载到 `dest`，返回写入的字节数
  fn fetch(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError>;
}

/// 以 `<root>/<bucket>/<key>` 布局存放对象的本地目录
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
  root: PathBuf,
}

impl LocalObjectStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn object_path(&self, location: &ObjectLocation) -> Result<PathBuf, StorageError> {
    let relative = Path::new(&location.bucket).join(&location.key);
    if relative
      .components()
      .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
      return Err(StorageError::InvalidKey(location.to_string()));
    }
    Ok(self.root.join(relative))
  }
}

impl FromUrlWithScheme for LocalObjectStore {
  const SCHEME: &'static str = "file";
}

impl FromUrl for LocalObjectStore {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StorageError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LocalObjectStore::new(url.path()))
  }
}

impl ObjectStore for LocalObjectStore {
  fn fetch(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
    let source = self.object_path(location)?;
    if !source.is_file() {
      return Err(StorageError::NotFound(location.to_string()));
    }
    debug!("复制本地对象 {} -> {}", source.display(), dest.display());
    Ok(std::fs::copy(&source, dest)?)
  }
}

pub enum StoreWrapper {
  #[cfg(feature = "s3")]
  S3(S3ObjectStore),
  Local(LocalObjectStore),
}

impl FromUrl for StoreWrapper {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "s3")]
    {
      if url.scheme() == S3ObjectStore::SCHEME {
        return Ok(StoreWrapper::S3(S3ObjectStore::from_url(url)?));
      }
    }
    if url.scheme() == LocalObjectStore::SCHEME {
      return Ok(StoreWrapper::Local(LocalObjectStore::from_url(url)?));
    }
    Err(StorageError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl StoreWrapper {
  /// 只有 JSON 请求会读取对象存储，其余内容类型不创建远端客户端
  pub fn for_content_type(content_type: &str, url: &Url) -> Result<Self, StorageError> {
    if media_type(content_type) == CONTENT_TYPE_JSON {
      return Self::from_url(url);
    }
    debug!("内容类型 '{}' 无需对象存储，跳过 {}", content_type, url);
    Ok(StoreWrapper::Local(LocalObjectStore::new(std::env::temp_dir())))
  }
}

impl ObjectStore for StoreWrapper {
  fn fetch(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
    match self {
      #[cfg(feature = "s3")]
      StoreWrapper::S3(store) => store.fetch(location, dest),
      StoreWrapper::Local(store) => store.fetch(location, dest),
    }
  }
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
  fn fetch(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
    (**self).fetch(location, dest)
  }
}

/// 单次请求独占的下载文件，离开作用域时删除
pub struct DownloadedFile {
  path: PathBuf,
}

impl DownloadedFile {
  pub fn new(dir: &Path) -> Self {
    Self {
      path: dir.join(format!("{}.jpg", Uuid::new_v4())),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for DownloadedFile {
  fn drop(&mut self) {
    match std::fs::remove_file(&self.path) {
      Ok(()) => debug!("已删除下载文件 {}", self.path.display()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => warn!("删除下载文件 {} 失败: {}", self.path.display(), e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn location(bucket: &str, key: &str) -> ObjectLocation {
    ObjectLocation {
      bucket: bucket.to_string(),
      key: key.to_string(),
    }
  }

  #[test]
  fn local_store_copies_nested_keys() {
    let root = std::env::temp_dir().join(format!("beiting-store-{}", Uuid::new_v4()));
    std::fs::create_dir_all(root.join("bucket/a/b")).unwrap();
    std::fs::write(root.join("bucket/a/b/c.bin"), b"payload").unwrap();

    let store = LocalObjectStore::new(&root);
    let download = DownloadedFile::new(&std::env::temp_dir());
    let size = store.fetch(&location("bucket", "a/b/c.bin"), download.path()).unwrap();
    assert_eq!(size, 7);
    assert_eq!(std::fs::read(download.path()).unwrap(), b"payload");

    let path = download.path().to_path_buf();
    drop(download);
    assert!(!path.exists());
    std::fs::remove_dir_all(&root).unwrap();
  }

  #[test]
  fn missing_object_is_not_found() {
    let store = LocalObjectStore::new(std::env::temp_dir());
    let download = DownloadedFile::new(&std::env::temp_dir());
    let result = store.fetch(&location(&Uuid::new_v4().to_string(), "x.jpg"), download.path());
    assert!(matches!(result, Err(StorageError::NotFound(_))));
  }

  #[test]
  fn parent_components_are_rejected() {
    let store = LocalObjectStore::new("/srv/objects");
    let download = DownloadedFile::new(&std::env::temp_dir());
    let result = store.fetch(&location("bucket", "../../etc/passwd"), download.path());
    assert!(matches!(result, Err(StorageError::InvalidKey(_))));
  }

  #[test]
  fn download_paths_are_unique() {
    let dir = std::env::temp_dir();
    let a = DownloadedFile::new(&dir);
    let b = DownloadedFile::new(&dir);
    assert_ne!(a.path(), b.path());
    assert_eq!(a.path().parent(), Some(dir.as_path()));
  }

  #[test]
  fn store_is_selected_by_scheme() {
    let url = Url::parse("file:///srv/objects").unwrap();
    match StoreWrapper::from_url(&url).unwrap() {
      StoreWrapper::Local(store) => assert_eq!(store.root(), Path::new("/srv/objects")),
      #[cfg(feature = "s3")]
      StoreWrapper::S3(_) => panic!("expected a local store"),
    }

    let url = Url::parse("ftp://host/objects").unwrap();
    assert!(matches!(
      StoreWrapper::from_url(&url),
      Err(StorageError::SchemeMismatch(scheme)) if scheme == "ftp"
    ));
  }

  #[test]
  fn image_requests_do_not_build_the_configured_store() {
    // 不支持的方案只有在真正构建存储时才会报错
    let url = Url::parse("ftp://host/objects").unwrap();
    assert!(matches!(
      StoreWrapper::for_content_type("image/jpeg", &url),
      Ok(StoreWrapper::Local(_))
    ));
    assert!(matches!(
      StoreWrapper::for_content_type("application/json; charset=utf-8", &url),
      Err(StorageError::SchemeMismatch(scheme)) if scheme == "ftp"
    ));
  }
}
