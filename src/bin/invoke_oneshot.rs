// 该文件是 Beiting （北亭） 项目的一部分。
// src/bin/invoke_oneshot.rs - 单次推理调用
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use url::Url;

use beiting::{
  device::select_device,
  handler::{InferenceHandler, OneShotTask, Request, Task},
  input::{CONTENT_TYPE_JPEG, DecodeOptions, StoreWrapper},
  model::Resnet34Builder,
};
use tracing::info;

/// Beiting 单次推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 包含 model.pt 的模型目录
  #[arg(long, value_name = "DIR")]
  pub model_dir: PathBuf,
  /// 请求体文件（JPEG 图像或 JSON 请求）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 请求内容类型: image/jpeg 或 application/json
  #[arg(long, default_value = CONTENT_TYPE_JPEG, value_name = "TYPE")]
  pub content_type: String,
  /// 对象存储: s3:// 或 file:///path/to/root，仅 JSON 请求使用
  #[arg(long, default_value = "s3://", value_name = "STORE")]
  pub store: Url,
  /// 预训练骨干权重文件
  #[arg(long, value_name = "FILE")]
  pub backbone_weights: Option<PathBuf>,
  /// 下载文件的存放目录，默认使用系统临时目录
  #[arg(long, value_name = "DIR")]
  pub download_dir: Option<PathBuf>,
  /// 强制使用 CPU
  #[arg(long)]
  pub cpu: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型目录: {}", args.model_dir.display());
  info!("请求文件: {}", args.input.display());
  info!("内容类型: {}", args.content_type);
  info!("对象存储: {}", args.store);

  let device = select_device(args.cpu)?;
  let model = Resnet34Builder::new(device)
    .backbone_weights(args.backbone_weights)
    .load(&args.model_dir)
    .with_context(|| format!("无法加载模型: {}", args.model_dir.display()))?;
  let store = StoreWrapper::for_content_type(&args.content_type, &args.store)?;

  let mut options = DecodeOptions::default();
  if let Some(dir) = args.download_dir {
    options.download_dir = dir;
  }
  let handler = InferenceHandler::new(model, store).with_decode_options(options);

  let request = Request {
    body: std::fs::read(&args.input)
      .with_context(|| format!("无法读取请求文件: {}", args.input.display()))?,
    content_type: args.content_type,
  };

  let output = OneShotTask.run_task(&handler, &request)?;
  println!("{}", output);
  if output.is_null() {
    bail!("预测失败");
  }

  Ok(())
}
