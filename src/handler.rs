// 该文件是 Beiting （北亭） 项目的一部分。
// src/handler.rs - 推理处理器：加载、解码、预测
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

use std::time::{Duration, Instant};

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{ClassifierFrame, FrameError, Preprocess},
  input::{DecodeOptions, InputError, ObjectStore, decode_input},
  model::{Classifier, ClassifierError, Model, Prediction},
  output::encode_prediction,
};

#[derive(Error, Debug)]
pub enum PredictError {
  #[error("输入变换失败: {0}")]
  Transform(#[from] FrameError),
  #[error("模型推理失败: {0}")]
  Inference(#[from] ClassifierError),
}

#[derive(Error, Debug)]
pub enum HandlerError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("预测错误: {0}")]
  Predict(#[from] PredictError),
}

/// 推理处理器，持有只读的模型与对象存储
pub struct InferenceHandler<S> {
  model: Classifier,
  store: S,
  preprocess: Preprocess,
  options: DecodeOptions,
}

impl<S: ObjectStore> InferenceHandler<S> {
  pub fn new(model: Classifier, store: S) -> Self {
    Self {
      model,
      store,
      preprocess: Preprocess::default(),
      options: DecodeOptions::default(),
    }
  }

  pub fn with_decode_options(mut self, options: DecodeOptions) -> Self {
    self.options = options;
    self
  }

  pub fn with_preprocess(mut self, preprocess: Preprocess) -> Self {
    self.preprocess = preprocess;
    self
  }

  pub fn model(&self) -> &Classifier {
    &self.model
  }

  pub fn decode_input(&self, body: &[u8], content_type: &str) -> Result<DynamicImage, InputError> {
    decode_input(body, content_type, &self.store, &self.options)
  }

  /// 预处理并执行前向推理；失败会记录日志并原样返回原因
  pub fn predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError> {
    let result = self.try_predict(image);
    if let Err(e) = &result {
      error!("预测阶段出现异常: '{}'", e);
    }
    result
  }

  fn try_predict(&self, image: &DynamicImage) -> Result<Prediction, PredictError> {
    let frame: ClassifierFrame = self.preprocess.apply(image)?;
    debug!("已完成输入变换");

    info!("开始推理...");
    let now = Instant::now();
    let prediction = self.model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    Ok(prediction)
  }

  pub fn handle(&self, body: &[u8], content_type: &str) -> Result<Prediction, HandlerError> {
    let image = self.decode_input(body, content_type)?;
    Ok(self.predict(&image)?)
  }
}

/// 一次推理请求
#[derive(Debug, Clone)]
pub struct Request {
  pub body: Vec<u8>,
  pub content_type: String,
}

pub trait Task<S>: Sized {
  type Output;
  type Error;
  fn run_task(self, handler: &InferenceHandler<S>, request: &Request)
  -> Result<Self::Output, Self::Error>;
}

/// 处理一次请求，预测失败编码为 JSON `null`
pub struct OneShotTask;

impl<S: ObjectStore> Task<S> for OneShotTask {
  type Output = serde_json::Value;
  type Error = InputError;

  fn run_task(
    self,
    handler: &InferenceHandler<S>,
    request: &Request,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let image = handler.decode_input(&request.body, &request.content_type)?;
    let result = handler.predict(&image);
    if let Ok(prediction) = &result
      && let Some((class, score)) = prediction.top_class()
    {
      info!("得分最高的类别: {} ({:.4})", class, score);
    }
    Ok(encode_prediction(&result))
  }
}

#[derive(Debug, Clone)]
pub struct RepeatShotReport {
  pub runs: usize,
  pub average: Duration,
  pub last: Prediction,
}

/// 对同一张图像重复预测，用于测量推理耗时
#[derive(Debug, Clone)]
pub struct RepeatShotTask {
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat: 100 }
  }
}

impl RepeatShotTask {
  // 前两次视为预热，不计入平均耗时
  const WARMUP_RUNS: usize = 2;

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

impl<S: ObjectStore> Task<S> for RepeatShotTask {
  type Output = RepeatShotReport;
  type Error = HandlerError;

  fn run_task(
    self,
    handler: &InferenceHandler<S>,
    request: &Request,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let image = handler.decode_input(&request.body, &request.content_type)?;
    info!("输入图像获取成功，开始推理...");

    let mut times = Vec::with_capacity(self.repeat);
    let mut run = |i: usize| -> Result<Prediction, PredictError> {
      let now = Instant::now();
      let prediction = handler.predict(&image)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      Ok(prediction)
    };

    let mut last = run(0)?;
    for i in 1..self.repeat {
      last = run(i)?;
    }

    let measured = if times.len() > Self::WARMUP_RUNS {
      &times[Self::WARMUP_RUNS..]
    } else {
      &times[..]
    };
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    warn!("平均推理时间: {:.2?}", average);

    Ok(RepeatShotReport {
      runs: times.len(),
      average,
      last,
    })
  }
}
