// 该文件是 Beiting （北亭） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理测速
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

use anyhow::{Context, Result};
use clap::Parser;

use beiting::{
  device::select_device,
  handler::{InferenceHandler, RepeatShotTask, Request, Task},
  input::{CONTENT_TYPE_JPEG, LocalObjectStore},
  model::Resnet34Builder,
  output::encode_scores,
};
use tracing::info;

/// Beiting 测速参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 包含 model.pt 的模型目录
  #[arg(long, value_name = "DIR")]
  pub model_dir: PathBuf,
  /// JPEG 图像文件
  #[arg(long, value_name = "FILE")]
  pub image: PathBuf,
  /// 重复次数
  #[arg(long, default_value = "100", value_name = "COUNT")]
  pub repeat: usize,
  /// 强制使用 CPU
  #[arg(long)]
  pub cpu: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型目录: {}", args.model_dir.display());
  info!("图像文件: {}", args.image.display());
  info!("重复次数: {}", args.repeat);

  let device = select_device(args.cpu)?;
  let model = Resnet34Builder::new(device)
    .load(&args.model_dir)
    .with_context(|| format!("无法加载模型: {}", args.model_dir.display()))?;
  // 只处理图像字节，不会访问对象存储
  let store = LocalObjectStore::new(std::env::temp_dir());
  let handler = InferenceHandler::new(model, store);

  let request = Request {
    body: std::fs::read(&args.image)
      .with_context(|| format!("无法读取图像文件: {}", args.image.display()))?,
    content_type: CONTENT_TYPE_JPEG.to_string(),
  };

  let report = RepeatShotTask::default()
    .with_repeat(args.repeat)
    .run_task(&handler, &request)?;

  info!("共推理 {} 次, 平均耗时: {:.2?}", report.runs, report.average);
  println!("{}", encode_scores(&report.last));

  Ok(())
}
