// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/model/engine.rs - 推理引擎生命周期与互斥访问
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

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{ModelLoader, ModelRuntime, RawOutput},
  tensor::{InputTensor, TensorShape},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("推理引擎已关闭")]
  Closed,
  #[error("推理引擎尚未启动")]
  NotLoaded,
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] BoxError),
  #[error("输入形状不匹配: 模型期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("输出长度不匹配: 模型声明 {expected}, 实际 {actual}")]
  OutputLength { expected: usize, actual: usize },
  #[error("推理错误: {0}")]
  Runtime(#[source] BoxError),
}

impl EngineError {
  pub fn is_closed(&self) -> bool {
    matches!(self, EngineError::Closed)
  }
}

/// 对外可见的引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
  Unloaded,
  Loaded,
  Closed,
}

// 模型句柄只存在于 Loaded 变体中
enum EngineState<R> {
  Unloaded,
  Loaded(R),
  Closed,
}

impl<R> EngineState<R> {
  fn status(&self) -> EngineStatus {
    match self {
      EngineState::Unloaded => EngineStatus::Unloaded,
      EngineState::Loaded(_) => EngineStatus::Loaded,
      EngineState::Closed => EngineStatus::Closed,
    }
  }
}

/// 持有模型句柄的推理引擎。
///
/// 状态机为 Unloaded → Loaded → Closed，Closed 为终态。
/// `infer` 与 `stop` 共用同一把锁：`stop` 先置为 Closed 再释放模型，
/// 因此排在 `stop` 之后的推理调用只会得到 [`EngineError::Closed`]。
pub struct InferenceEngine<L: ModelLoader> {
  loader: L,
  state: Mutex<EngineState<L::Runtime>>,
}

impl<L: ModelLoader> InferenceEngine<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      state: Mutex::new(EngineState::Unloaded),
    }
  }

  // 状态机的每次修改都是单次赋值，锁中毒后数据仍然一致
  fn lock(&self) -> MutexGuard<'_, EngineState<L::Runtime>> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn status(&self) -> EngineStatus {
    self.lock().status()
  }

  /// 加载模型。已加载时仅告警，已关闭时返回 [`EngineError::Closed`]。
  pub fn start(&self) -> Result<(), EngineError> {
    let mut state = self.lock();
    match &*state {
      EngineState::Loaded(_) => {
        warn!("模型已加载，忽略重复启动");
        return Ok(());
      }
      EngineState::Closed => {
        warn!("推理引擎已关闭，无法重新启动");
        return Err(EngineError::Closed);
      }
      EngineState::Unloaded => {}
    }

    info!("加载模型...");
    let now = Instant::now();
    let runtime = self.loader.load().map_err(|e| {
      error!("模型加载失败: {}", e);
      EngineError::ModelLoad(Box::new(e))
    })?;
    info!(
      "模型加载完成，耗时: {:.2?}, 输入 {}, 输出 {}",
      now.elapsed(),
      runtime.input_shape(),
      runtime.output_len()
    );

    *state = EngineState::Loaded(runtime);
    Ok(())
  }

  pub fn input_shape(&self) -> Result<TensorShape, EngineError> {
    match &*self.lock() {
      EngineState::Loaded(runtime) => Ok(runtime.input_shape()),
      EngineState::Unloaded => Err(EngineError::NotLoaded),
      EngineState::Closed => Err(EngineError::Closed),
    }
  }

  pub fn output_len(&self) -> Result<usize, EngineError> {
    match &*self.lock() {
      EngineState::Loaded(runtime) => Ok(runtime.output_len()),
      EngineState::Unloaded => Err(EngineError::NotLoaded),
      EngineState::Closed => Err(EngineError::Closed),
    }
  }

  /// 执行一次前向推理，并发调用者在锁上排队
  pub fn infer(&self, input: &InputTensor) -> Result<RawOutput, EngineError> {
    let mut state = self.lock();
    let runtime = match &mut *state {
      EngineState::Loaded(runtime) => runtime,
      EngineState::Unloaded => return Err(EngineError::NotLoaded),
      EngineState::Closed => return Err(EngineError::Closed),
    };

    let expected = runtime.input_shape();
    if expected != input.shape() {
      return Err(EngineError::ShapeMismatch {
        expected,
        actual: input.shape(),
      });
    }

    let now = Instant::now();
    let logits = runtime
      .run(input)
      .map_err(|e| EngineError::Runtime(Box::new(e)))?;
    debug!("模型推理完成，耗时: {:.2?}", now.elapsed());

    if logits.len() != runtime.output_len() {
      return Err(EngineError::OutputLength {
        expected: runtime.output_len(),
        actual: logits.len(),
      });
    }

    Ok(RawOutput::from(logits))
  }

  /// 关闭引擎并释放模型，可重复调用
  pub fn stop(&self) {
    let mut state = self.lock();
    if let EngineState::Closed = &*state {
      debug!("推理引擎已关闭，跳过释放");
      return;
    }

    // 先置关闭状态，再释放模型
    let previous = std::mem::replace(&mut *state, EngineState::Closed);
    if let EngineState::Loaded(runtime) = previous {
      info!("释放模型资源...");
      drop(runtime);
      info!("模型资源已释放");
    }
  }
}
