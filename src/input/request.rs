// 该文件是 Beiting （北亭） 项目的一部分。
// src/input/request.rs - JSON 推理请求与对象 URI 解析
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

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// `{"s3_uri": "...", "is_enhanced": 0|1}`
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRequest {
  #[serde(default = "default_is_enhanced")]
  pub is_enhanced: Value,
  #[serde(default)]
  pub s3_uri: Option<String>,
}

fn default_is_enhanced() -> Value {
  Value::from(1)
}

impl JsonRequest {
  /// `is_enhanced` 为 0 时表示图像尚未增强，需要锐化；其余取值一律跳过
  pub fn needs_sharpening(&self) -> bool {
    match &self.is_enhanced {
      Value::Bool(enhanced) => !enhanced,
      Value::Number(n) => n.as_f64() == Some(0.0),
      _ => false,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("无效的对象 URI '{uri}': {reason}")]
pub struct ObjectUriError {
  pub uri: String,
  pub reason: &'static str,
}

/// 对象存储中的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
  pub bucket: String,
  pub key: String,
}

impl ObjectLocation {
  /// 按 `/` 切分 `scheme://bucket/key...`：第 2 段为桶名，其后各段重新以 `/` 连接为键
  pub fn parse(uri: &str) -> Result<Self, ObjectUriError> {
    let invalid = |reason| ObjectUriError {
      uri: uri.to_string(),
      reason,
    };

    let segments = uri.split('/').collect::<Vec<_>>();
    let bucket = segments.get(2).copied().ok_or_else(|| invalid("缺少桶名"))?;
    if bucket.is_empty() {
      return Err(invalid("桶名为空"));
    }

    let key = segments.get(3..).map(|rest| rest.join("/")).unwrap_or_default();
    if key.is_empty() {
      return Err(invalid("对象键为空"));
    }

    Ok(ObjectLocation {
      bucket: bucket.to_string(),
      key,
    })
  }
}

impl fmt::Display for ObjectLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "s3://{}/{}", self.bucket, self.key)
  }
}
