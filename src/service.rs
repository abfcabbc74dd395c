// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/service.rs - 分类服务
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

use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, PipelineConfiguration},
  frame::RawImage,
  input::{FrameAdapter, NativeFrame},
  model::{
    DanceMove, EngineError, EngineStatus, InferenceEngine, LabelError, ModelLoader, WithLabel,
    check_catalog,
  },
  postprocess::{PostprocessError, Prediction, check_label_count, postprocess},
  tensor::{Preprocessor, TensorShape},
  transform,
};

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[source] EngineError),
  #[error("输入形状不匹配: 模型期望 {expected}, 配置为 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("标签不匹配: {0}")]
  LabelMismatch(#[from] PostprocessError),
  #[error("标签目录错误: {0}")]
  Catalog(#[from] LabelError),
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
}

/// 一帧的分类结果。`predictions` 要么包含全部标签，要么为空。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult<T = DanceMove> {
  pub is_detected: bool,
  pub confidence: f32,
  pub predictions: Vec<Prediction<T>>,
}

impl<T> ClassificationResult<T> {
  pub fn empty() -> Self {
    Self {
      is_detected: false,
      confidence: 0.0,
      predictions: Vec::new(),
    }
  }

  /// `predictions` 需已按概率降序排列；检测判定为严格大于阈值
  pub fn from_predictions(predictions: Vec<Prediction<T>>, threshold: f32) -> Self {
    let confidence = predictions.first().map(|p| p.probability).unwrap_or(0.0);
    Self {
      is_detected: !predictions.is_empty() && confidence > threshold,
      confidence,
      predictions,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.predictions.is_empty()
  }

  pub fn top(&self) -> Option<&Prediction<T>> {
    self.predictions.first()
  }
}

impl<T> Default for ClassificationResult<T> {
  fn default() -> Self {
    Self::empty()
  }
}

/// 串联 适配 → 变换 → 预处理 → 推理 → 后处理 的分类服务。
///
/// 活跃标志有自己的锁。`classify` 从不同时持有标志锁与引擎锁；
/// `start`/`stop` 的顺序固定为先标志后引擎。
pub struct ClassificationService<L: ModelLoader, T: WithLabel = DanceMove> {
  engine: InferenceEngine<L>,
  active: Mutex<bool>,
  _label: PhantomData<fn() -> T>,
}

impl<L: ModelLoader, T: WithLabel> ClassificationService<L, T> {
  pub fn new(loader: L) -> Self {
    Self {
      engine: InferenceEngine::new(loader),
      active: Mutex::new(false),
      _label: PhantomData,
    }
  }

  pub fn is_active(&self) -> bool {
    *self.active.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn engine_status(&self) -> EngineStatus {
    self.engine.status()
  }

  /// 加载模型并校验标签，成功后标记为活跃。可重复调用。
  ///
  /// 标签校验失败时模型会被释放，引擎进入关闭状态。
  pub fn start(&self) -> Result<(), ServiceError> {
    let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
    if *active {
      warn!("分类服务已启动，忽略重复启动");
      return Ok(());
    }

    check_catalog::<T>()?;
    self.engine.start().map_err(ServiceError::ModelLoad)?;
    let checked = self
      .engine
      .output_len()
      .map_err(ServiceError::ModelLoad)
      .and_then(|outputs| check_label_count::<T>(outputs).map_err(ServiceError::from));
    if let Err(e) = checked {
      error!("模型输出与标签不匹配，释放模型: {}", e);
      self.engine.stop();
      return Err(e);
    }

    *active = true;
    info!("分类服务已启动");
    Ok(())
  }

  /// 标记为非活跃并关闭引擎。可重复调用，未启动时也可调用。
  ///
  /// 与 `start` 相同，先持有活跃标志锁再操作引擎，两者不会交错。
  pub fn stop(&self) {
    let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
    if *active {
      info!("停止分类服务");
    }
    *active = false;
    self.engine.stop();
  }

  /// 校验配置本身以及目标尺寸与模型输入是否一致，应在启动后调用一次
  pub fn check_configuration(&self, configuration: &PipelineConfiguration) -> Result<(), ServiceError> {
    configuration.validate()?;
    let expected = self.engine.input_shape().map_err(ServiceError::ModelLoad)?;
    let actual = configuration.tensor_shape();
    if expected != actual {
      return Err(ServiceError::ShapeMismatch { expected, actual });
    }
    Ok(())
  }

  /// 从平台帧开始分类，无效帧得到空结果
  pub fn classify_native<F: NativeFrame>(
    &self,
    frame: &F,
    configuration: &PipelineConfiguration,
  ) -> Result<ClassificationResult<T>, ServiceError> {
    match FrameAdapter.to_domain(frame) {
      Ok(image) => self.classify(&image, configuration),
      Err(e) => {
        warn!("跳过无效帧: {}", e);
        Ok(ClassificationResult::empty())
      }
    }
  }

  /// 对一帧进行分类。
  ///
  /// 未启动、已关闭以及单帧失败都返回空结果；只有形状或标签这类配置错误返回 `Err`。
  pub fn classify(
    &self,
    image: &RawImage,
    configuration: &PipelineConfiguration,
  ) -> Result<ClassificationResult<T>, ServiceError> {
    if !self.is_active() {
      debug!("分类服务未启动，跳过帧 {}", image.timestamp());
      return Ok(ClassificationResult::empty());
    }

    let now = Instant::now();
    let expected = match self.engine.input_shape() {
      Ok(shape) => shape,
      Err(e) => {
        debug!("推理引擎不可用，跳过帧: {}", e);
        return Ok(ClassificationResult::empty());
      }
    };
    let actual = configuration.tensor_shape();
    if expected != actual {
      return Err(ServiceError::ShapeMismatch { expected, actual });
    }
    let preprocessor = Preprocessor::new(actual, configuration.normalization)
      .map_err(|e| ServiceError::Config(e.into()))?;

    let buffer = match transform::transform(image, configuration.mirror) {
      Ok(buffer) => buffer,
      Err(e) => {
        warn!("帧 {} 解码失败，跳过: {}", image.timestamp(), e);
        return Ok(ClassificationResult::empty());
      }
    };
    let tensor = preprocessor.preprocess(&buffer);
    debug!("预处理耗时: {:.2?}", now.elapsed());

    let output = match self.engine.infer(&tensor) {
      Ok(output) => output,
      Err(EngineError::ShapeMismatch { expected, actual }) => {
        return Err(ServiceError::ShapeMismatch { expected, actual });
      }
      Err(EngineError::Closed) => {
        debug!("模型已关闭，跳过帧 {}", image.timestamp());
        return Ok(ClassificationResult::empty());
      }
      Err(EngineError::OutputLength { actual, .. }) => {
        error!("模型实际输出长度 {} 与标签数量 {} 不一致", actual, T::ALL.len());
        return Err(ServiceError::LabelMismatch(
          PostprocessError::LabelCountMismatch {
            outputs: actual,
            labels: T::ALL.len(),
          },
        ));
      }
      Err(e) => {
        warn!("帧 {} 推理失败: {}", image.timestamp(), e);
        return Ok(ClassificationResult::empty());
      }
    };

    let predictions = match postprocess::<T>(&output) {
      Ok(predictions) => predictions,
      Err(e @ PostprocessError::LabelCountMismatch { .. }) => return Err(e.into()),
      Err(e) => {
        warn!("帧 {} 后处理失败: {}", image.timestamp(), e);
        return Ok(ClassificationResult::empty());
      }
    };

    let result = ClassificationResult::from_predictions(predictions, configuration.threshold);
    debug!(
      "帧 {} 分类完成，耗时: {:.2?}, 置信度 {:.4}, 检测 {}",
      image.timestamp(),
      now.elapsed(),
      result.confidence,
      result.is_detected
    );
    Ok(result)
  }
}

impl<L: ModelLoader, T: WithLabel> Drop for ClassificationService<L, T> {
  fn drop(&mut self) {
    self.engine.stop();
  }
}
