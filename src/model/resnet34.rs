// 该文件是 Beiting （北亭） 项目的一部分。
// src/model/resnet34.rs - 基于 ResNet34 微调的分类模型
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
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use candle_core::{DType, Device, Module, ModuleT, Tensor, Var};
use candle_nn::{Func, Linear, VarBuilder, VarMap};
use candle_transformers::models::resnet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{ClassifierFrame, FrameError},
  model::{
    Model, Prediction,
    checkpoint::{CheckpointError, StateDict, StateDictReport, read_state_dict},
  },
};

pub const NUM_CLASSES: usize = 5;
pub const RESNET34_FEATURE_WIDTH: usize = 512;
pub const CHECKPOINT_FILE_NAME: &str = "model.pt";

const HEAD_PREFIX: &str = "fc";
// BatchNorm 的计数缓冲区不参与推理
const BATCH_COUNTER_SUFFIX: &str = ".num_batches_tracked";

#[derive(Error, Debug)]
pub enum ClassifierError {
  #[error("检查点错误: {0}")]
  Checkpoint(#[from] CheckpointError),
  #[error("张量错误: {0}")]
  TensorError(#[from] candle_core::Error),
  #[error("输入帧错误: {0}")]
  Frame(#[from] FrameError),
  #[error("参数表锁已损坏")]
  Poisoned,
  #[error("模型输出形状不符: 期望 [1, {expected}], 实际 {actual:?}")]
  OutputShape { expected: usize, actual: Vec<usize> },
}

struct Parameter {
  var: Var,
  trainable: bool,
}

/// 冻结的 ResNet34 骨干网络加上可训练的全连接分类头
pub struct Classifier {
  backbone: Func<'static>,
  head: Linear,
  params: BTreeMap<String, Parameter>,
  num_classes: usize,
  device: Device,
}

pub struct Resnet34Builder {
  device: Device,
  num_classes: usize,
  backbone_weights: Option<PathBuf>,
  checkpoint_name: String,
}

impl Resnet34Builder {
  pub fn new(device: Device) -> Self {
    Self {
      device,
      num_classes: NUM_CLASSES,
      backbone_weights: None,
      checkpoint_name: CHECKPOINT_FILE_NAME.to_string(),
    }
  }

  pub fn num_classes(mut self, num_classes: usize) -> Self {
    self.num_classes = num_classes;
    self
  }

  /// 预训练骨干权重文件（torchvision 命名），其中的 `fc.*` 会被忽略
  pub fn backbone_weights(mut self, path: Option<PathBuf>) -> Self {
    self.backbone_weights = path;
    self
  }

  pub fn checkpoint_name(mut self, name: impl Into<String>) -> Self {
    self.checkpoint_name = name.into();
    self
  }

  pub fn build(&self) -> Result<Classifier, ClassifierError> {
    info!("构建 ResNet34 骨干网络");
    let backbone_vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&backbone_vars, DType::F32, &self.device);
    let backbone = resnet::resnet34_no_final_layer(vb)?;

    let head_vars = VarMap::new();
    let vb = VarBuilder::from_varmap(&head_vars, DType::F32, &self.device);
    let head = candle_nn::linear(RESNET34_FEATURE_WIDTH, self.num_classes, vb.pp(HEAD_PREFIX))?;

    let mut params = BTreeMap::new();
    collect_parameters(&backbone_vars, false, &mut params)?;
    collect_parameters(&head_vars, true, &mut params)?;

    let classifier = Classifier {
      backbone,
      head,
      params,
      num_classes: self.num_classes,
      device: self.device.clone(),
    };

    match &self.backbone_weights {
      Some(path) => {
        info!("加载预训练骨干权重: {}", path.display());
        let state = read_state_dict(path)?;
        classifier.overwrite(
          &state,
          |param| !param.trainable,
          |name| name.starts_with("fc.") || name.ends_with(BATCH_COUNTER_SUFFIX),
        )?;
      }
      None => warn!("未指定预训练骨干权重, 骨干网络使用默认初始化"),
    }

    debug!(
      "参数数量: 冻结 {}, 可训练 {}",
      classifier.frozen_parameters().count(),
      classifier.trainable_parameters().count()
    );
    info!(
      "已创建基于 ResNet34 微调的分类模型 ({} 类)",
      self.num_classes
    );
    Ok(classifier)
  }

  /// 构建新模型，并用 `<model_dir>/model.pt` 覆盖全部参数
  pub fn load(&self, model_dir: &Path) -> Result<Classifier, ClassifierError> {
    let classifier = self.build()?;
    classifier.load_checkpoint(&model_dir.join(&self.checkpoint_name))?;
    Ok(classifier)
  }
}

pub fn load_model_dir(
  model_dir: impl AsRef<Path>,
  device: Device,
) -> Result<Classifier, ClassifierError> {
  Resnet34Builder::new(device).load(model_dir.as_ref())
}

fn collect_parameters(
  vars: &VarMap,
  trainable: bool,
  params: &mut BTreeMap<String, Parameter>,
) -> Result<(), ClassifierError> {
  let data = vars.data().lock().map_err(|_| ClassifierError::Poisoned)?;
  for (name, var) in data.iter() {
    params.insert(
      name.clone(),
      Parameter {
        var: var.clone(),
        trainable,
      },
    );
  }
  Ok(())
}

impl Classifier {
  pub fn device(&self) -> &Device {
    &self.device
  }

  pub fn num_classes(&self) -> usize {
    self.num_classes
  }

  pub fn parameter(&self, name: &str) -> Option<&Var> {
    self.params.get(name).map(|param| &param.var)
  }

  pub fn trainable_parameters(&self) -> impl Iterator<Item = (&str, &Var)> {
    self
      .params
      .iter()
      .filter(|(_, param)| param.trainable)
      .map(|(name, param)| (name.as_str(), &param.var))
  }

  pub fn frozen_parameters(&self) -> impl Iterator<Item = (&str, &Var)> {
    self
      .params
      .iter()
      .filter(|(_, param)| !param.trainable)
      .map(|(name, param)| (name.as_str(), &param.var))
  }

  /// 交给优化器的变量，只包含分类头
  pub fn trainable_vars(&self) -> Vec<Var> {
    self.trainable_parameters().map(|(_, var)| var.clone()).collect()
  }

  pub fn load_checkpoint(&self, path: &Path) -> Result<(), ClassifierError> {
    info!("从检查点加载模型参数: {}", path.display());
    let state = read_state_dict(path)?;
    self.load_state_dict(&state)?;
    info!("已从检查点加载模型参数");
    Ok(())
  }

  /// 严格加载：所有参数必须同名同形状，校验通过前不写入任何参数
  pub fn load_state_dict(&self, state: &StateDict) -> Result<(), ClassifierError> {
    self.overwrite(state, |_| true, |name| name.ends_with(BATCH_COUNTER_SUFFIX))
  }

  fn overwrite<S, I>(&self, state: &StateDict, select: S, ignore: I) -> Result<(), ClassifierError>
  where
    S: Fn(&Parameter) -> bool,
    I: Fn(&str) -> bool,
  {
    let selected = self
      .params
      .iter()
      .filter(|(_, param)| select(param))
      .collect::<Vec<_>>();

    let report = StateDictReport::compare(
      selected
        .iter()
        .map(|(name, param)| (name.as_str(), param.var.dims())),
      state,
      ignore,
    );
    if !report.is_clean() {
      error!("检查点与模型参数不匹配: {}", report);
      return Err(CheckpointError::Mismatch(report).into());
    }

    let mut staged = Vec::with_capacity(selected.len());
    for (name, param) in &selected {
      let Some(tensor) = state.get(name.as_str()) else {
        continue;
      };
      let tensor = tensor.to_device(&self.device)?.to_dtype(DType::F32)?;
      staged.push((&param.var, tensor));
    }

    for (var, tensor) in staged {
      var.set(&tensor)?;
    }
    debug!("已覆盖 {} 个参数", selected.len());
    Ok(())
  }

  /// 对 `(N, 3, H, W)` 的输入执行推理模式的前向计算，返回单张图像的得分
  pub fn forward_scores(&self, xs: &Tensor) -> Result<Prediction, ClassifierError> {
    let xs = xs.to_device(&self.device)?;
    debug!("开始前向推理, 输入形状 {:?}", xs.dims());
    let logits = self.forward_t(&xs, false)?;
    self.postprocess(logits)
  }
}

impl Module for Classifier {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let features = self.backbone.forward(xs)?;
    self.head.forward(&features)
  }
}

impl Model for Classifier {
  type Input = ClassifierFrame;
  type Output = Prediction;
  type Error = ClassifierError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let xs = input.to_tensor(&self.device)?;
    self.forward_scores(&xs)
  }

  fn postprocess(&self, output: Tensor) -> Result<Self::Output, Self::Error> {
    if output.dims() != [1, self.num_classes] {
      return Err(ClassifierError::OutputShape {
        expected: self.num_classes,
        actual: output.dims().to_vec(),
      });
    }

    let scores = output.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    debug!("模型输出: {:?}", scores);
    Ok(Prediction {
      scores: scores.into_boxed_slice(),
    })
  }
}
