// 该文件是 Beiting （北亭） 项目的一部分。
// src/model/checkpoint.rs - 检查点读取与参数表校验
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

use std::{
  collections::HashMap,
  fmt,
  path::{Path, PathBuf},
};

use candle_core::{Device, Tensor};
use thiserror::Error;
use tracing::debug;

/// 参数名到张量的映射
pub type StateDict = HashMap<String, Tensor>;

#[derive(Error, Debug)]
pub enum CheckpointError {
  #[error("检查点文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("无法读取检查点 {path}: {source}")]
  ReadError {
    path: PathBuf,
    source: candle_core::Error,
  },
  #[error("检查点与模型参数不匹配: {0}")]
  Mismatch(StateDictReport),
}

/// 读取检查点文件，张量保留在 CPU 上。
///
/// `.safetensors` 后缀按 safetensors 格式读取，其余按 PyTorch `torch.save` 格式读取。
pub fn read_state_dict(path: &Path) -> Result<StateDict, CheckpointError> {
  if !path.is_file() {
    return Err(CheckpointError::NotFound(path.to_path_buf()));
  }

  let read_error = |source| CheckpointError::ReadError {
    path: path.to_path_buf(),
    source,
  };

  let is_safetensors = path
    .extension()
    .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));
  let state: StateDict = if is_safetensors {
    candle_core::safetensors::load(path, &Device::Cpu).map_err(read_error)?
  } else {
    candle_core::pickle::read_all(path)
      .map_err(read_error)?
      .into_iter()
      .collect()
  };

  debug!("检查点 {} 包含 {} 个张量", path.display(), state.len());
  Ok(state)
}

/// 期望参数表与检查点之间的差异
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDictReport {
  pub missing: Vec<String>,
  pub unexpected: Vec<String>,
  pub mismatched: Vec<(String, Vec<usize>, Vec<usize>)>,
}

impl StateDictReport {
  /// 比较期望的参数形状与检查点内容，`ignore` 为真的检查点键不参与比较
  pub fn compare<'a, I, F>(expected: I, state: &StateDict, ignore: F) -> Self
  where
    I: IntoIterator<Item = (&'a str, &'a [usize])>,
    F: Fn(&str) -> bool,
  {
    let mut report = StateDictReport::default();
    let mut seen = Vec::new();

    for (name, shape) in expected {
      seen.push(name);
      match state.get(name) {
        None => report.missing.push(name.to_string()),
        Some(tensor) if tensor.dims() != shape => report.mismatched.push((
          name.to_string(),
          shape.to_vec(),
          tensor.dims().to_vec(),
        )),
        Some(_) => {}
      }
    }

    report.unexpected = state
      .keys()
      .filter(|key| !ignore(key) && !seen.contains(&key.as_str()))
      .cloned()
      .collect();

    report.missing.sort();
    report.unexpected.sort();
    report.mismatched.sort();
    report
  }

  pub fn is_clean(&self) -> bool {
    self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
  }
}

impl fmt::Display for StateDictReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = Vec::new();
    if !self.missing.is_empty() {
      parts.push(format!("缺少参数 [{}]", self.missing.join(", ")));
    }
    if !self.unexpected.is_empty() {
      parts.push(format!("多余参数 [{}]", self.unexpected.join(", ")));
    }
    if !self.mismatched.is_empty() {
      let items = self
        .mismatched
        .iter()
        .map(|(name, expected, found)| format!("{}: 期望 {:?}, 实际 {:?}", name, expected, found))
        .collect::<Vec<_>>();
      parts.push(format!("形状不符 [{}]", items.join(", ")));
    }
    write!(f, "{}", parts.join("; "))
  }
}
