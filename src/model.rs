// 该文件是 Beiting （北亭） 项目的一部分。
// src/model.rs - 模型
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

use candle_core::Tensor;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
  fn postprocess(&self, output: Tensor) -> Result<Self::Output, Self::Error>;
}

/// 单张图像的原始分类得分
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
  pub scores: Box<[f32]>,
}

impl Prediction {
  /// 得分最高的类别下标及其得分
  pub fn top_class(&self) -> Option<(usize, f32)> {
    self
      .scores
      .iter()
      .copied()
      .enumerate()
      .fold(None, |best, (idx, score)| match best {
        Some((_, s)) if s >= score => best,
        _ => Some((idx, score)),
      })
  }
}

mod checkpoint;
mod resnet34;

pub use self::checkpoint::{CheckpointError, StateDict, StateDictReport, read_state_dict};
pub use self::resnet34::{
  CHECKPOINT_FILE_NAME, Classifier, ClassifierError, NUM_CLASSES, RESNET34_FEATURE_WIDTH,
  Resnet34Builder, load_model_dir,
};
