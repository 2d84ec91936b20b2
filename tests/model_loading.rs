// 该文件是 Beiting （北亭） 项目的一部分。
// tests/model_loading.rs - 模型目录加载测试
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
  path::{Path, PathBuf},
};

use beiting::model::{
  CheckpointError, Classifier, ClassifierError, NUM_CLASSES, Resnet34Builder, load_model_dir,
};
use candle_core::{DType, Device, Tensor};
use uuid::Uuid;

struct ModelDir(PathBuf);

impl ModelDir {
  fn new() -> Self {
    let dir = std::env::temp_dir().join(format!("beiting-model-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    Self(dir)
  }
}

impl Drop for ModelDir {
  fn drop(&mut self) {
    let _ = std::fs::remove_dir_all(&self.0);
  }
}

fn filled_state(classifier: &Classifier, value: f64) -> HashMap<String, Tensor> {
  classifier
    .frozen_parameters()
    .chain(classifier.trainable_parameters())
    .map(|(name, var)| {
      let tensor = (var.zeros_like().unwrap() + value).unwrap();
      (name.to_string(), tensor)
    })
    .collect()
}

#[test]
fn checkpoint_overwrites_all_parameters() {
  let dir = ModelDir::new();
  let template = Resnet34Builder::new(Device::Cpu).build().unwrap();
  let state = filled_state(&template, 0.125);
  candle_core::safetensors::save(&state, dir.0.join("model.safetensors")).unwrap();

  let classifier = Resnet34Builder::new(Device::Cpu)
    .checkpoint_name("model.safetensors")
    .load(&dir.0)
    .unwrap();

  for (name, var) in classifier
    .frozen_parameters()
    .chain(classifier.trainable_parameters())
  {
    let values = var.flatten_all().unwrap().to_vec1::<f32>().unwrap();
    assert!(values.iter().all(|v| *v == 0.125), "{} was not loaded", name);
  }
  assert_eq!(classifier.num_classes(), NUM_CLASSES);
}

#[test]
fn backbone_weights_ignore_the_imagenet_head() {
  let dir = ModelDir::new();
  let template = Resnet34Builder::new(Device::Cpu).build().unwrap();
  let mut state = filled_state(&template, 0.75);
  state.insert(
    "fc.weight".to_string(),
    Tensor::zeros((1000, 512), DType::F32, &Device::Cpu).unwrap(),
  );
  state.insert(
    "fc.bias".to_string(),
    Tensor::zeros(1000, DType::F32, &Device::Cpu).unwrap(),
  );
  let weights = dir.0.join("resnet34.safetensors");
  candle_core::safetensors::save(&state, &weights).unwrap();

  let classifier = Resnet34Builder::new(Device::Cpu)
    .backbone_weights(Some(weights))
    .build()
    .unwrap();
  let conv1 = classifier
    .parameter("conv1.weight")
    .unwrap()
    .flatten_all()
    .unwrap()
    .to_vec1::<f32>()
    .unwrap();
  assert!(conv1.iter().all(|v| *v == 0.75));
  let head = classifier.parameter("fc.weight").unwrap();
  assert_eq!(head.dims(), &[NUM_CLASSES, 512]);
}

#[test]
fn missing_checkpoint_fails_loading() {
  let dir = ModelDir::new();
  let result = load_model_dir(&dir.0, Device::Cpu);
  assert!(matches!(
    result,
    Err(ClassifierError::Checkpoint(CheckpointError::NotFound(path))) if path.ends_with("model.pt")
  ));
}

#[test]
fn shape_mismatch_fails_loading() {
  let dir = ModelDir::new();
  let template = Resnet34Builder::new(Device::Cpu).num_classes(10).build().unwrap();
  let state = filled_state(&template, 0.0);
  candle_core::safetensors::save(&state, dir.0.join("model.safetensors")).unwrap();

  let result = Resnet34Builder::new(Device::Cpu)
    .checkpoint_name("model.safetensors")
    .load(&dir.0);
  match result {
    Err(ClassifierError::Checkpoint(CheckpointError::Mismatch(report))) => {
      let names = report
        .mismatched
        .iter()
        .map(|(name, _, _)| name.as_str())
        .collect::<Vec<_>>();
      assert_eq!(names, vec!["fc.bias", "fc.weight"]);
      assert!(report.missing.is_empty());
      assert!(report.unexpected.is_empty());
    }
    Err(e) => panic!("unexpected error: {}", e),
    Ok(_) => panic!("mismatched checkpoint was accepted"),
  }
}

#[test]
fn incomplete_torch_checkpoint_fails_loading() {
  let dir = ModelDir::new();
  let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/head.pt");
  std::fs::copy(&fixture, dir.0.join("model.pt")).unwrap();

  match load_model_dir(&dir.0, Device::Cpu) {
    Err(ClassifierError::Checkpoint(CheckpointError::Mismatch(report))) => {
      assert!(report.missing.contains(&"conv1.weight".to_string()));
      assert!(report.missing.contains(&"layer4.2.bn2.running_var".to_string()));
      assert!(!report.missing.iter().any(|name| name.starts_with("fc.")));
      assert!(report.unexpected.is_empty());
      assert!(report.mismatched.is_empty());
    }
    Err(e) => panic!("unexpected error: {}", e),
    Ok(_) => panic!("incomplete checkpoint was accepted"),
  }
}
