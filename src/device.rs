// 该文件是 Beiting （北亭） 项目的一部分。
// src/device.rs - 计算设备选择
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

use candle_core::Device;
use tracing::info;

/// 选择计算设备：有加速器时使用 CUDA 0 号卡，否则使用 CPU。
///
/// 进程启动时调用一次，结果显式传给模型与处理器。
pub fn select_device(force_cpu: bool) -> candle_core::Result<Device> {
  let device = if force_cpu {
    Device::Cpu
  } else {
    Device::cuda_if_available(0)?
  };
  info!("计算设备: '{}'", device_name(&device));
  Ok(device)
}

pub fn device_name(device: &Device) -> &'static str {
  match device {
    Device::Cpu => "cpu",
    Device::Cuda(_) => "cuda:0",
    Device::Metal(_) => "metal",
  }
}
