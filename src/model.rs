// 该文件是 Wudao （舞蹈） 项目的一部分。
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
// Copyright (C) 2026 Wudao Contributors

use crate::tensor::{InputTensor, TensorShape};

/// 已加载的不透明模型：输入张量 → 输出 logits。
///
/// 实现不要求线程安全，[`InferenceEngine`] 保证同一时刻只有一个调用者。
pub trait ModelRuntime: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_shape(&self) -> TensorShape;
  fn output_len(&self) -> usize;
  fn run(&mut self, input: &InputTensor) -> Result<Vec<f32>, Self::Error>;
}

/// 在 `start()` 时加载模型
pub trait ModelLoader: Send + Sync {
  type Runtime: ModelRuntime;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self) -> Result<Self::Runtime, Self::Error>;
}

/// 一次前向推理的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  logits: Box<[f32]>,
}

impl RawOutput {
  pub fn logits(&self) -> &[f32] {
    &self.logits
  }
}

impl From<Vec<f32>> for RawOutput {
  fn from(logits: Vec<f32>) -> Self {
    Self {
      logits: logits.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + Copy + std::fmt::Debug + Send + Sync + 'static {
  /// 按输出张量下标排列的全部标签
  const ALL: &'static [Self];

  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

mod engine;
pub use self::engine::{EngineError, EngineStatus, InferenceEngine};

mod worker;
pub use self::worker::{LocalBackend, ThreadBoundRuntime, WorkerError};

mod label;
pub use self::label::{DanceMove, LabelError, check_catalog};

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnError, RknnLoader, RknnModel};
