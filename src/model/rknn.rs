// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/model/rknn.rs - RKNPU 模型后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{LocalBackend, ModelLoader, ThreadBoundRuntime, WorkerError},
  tensor::TensorShape,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;
const RKNN_DEFAULT_WIDTH: usize = 160;
const RKNN_DEFAULT_HEIGHT: usize = 256;

#[derive(Error, Debug)]
pub enum RknnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理线程错误: {0}")]
  WorkerError(#[from] WorkerError),
}

impl RknnError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnError::ModelInvalid(msg.to_string(), e)
  }
}

/// 持有 RKNN 上下文，只在推理线程上创建、使用和释放
struct RknnBackend {
  context: Context,
}

impl LocalBackend for RknnBackend {
  type Error = RknnError;

  fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, Self::Error> {
    debug!("设置模型输入");
    let bytes = input
      .iter()
      .flat_map(|v| v.to_ne_bytes())
      .collect::<Vec<u8>>();
    self
      .context
      .set_input(0, &bytes, TensorFormat::NHWC, TensorType::Float32)?;

    debug!("执行模型推理");
    self.context.run()?;

    debug!("获取模型输出");
    let output = self.context.get_outputs()?;
    let logits = output.get_f32(0)?.to_vec();
    Ok(logits)
  }
}

/// RKNN 模型。输出长度取自加载时的预热推理，而不是标签表。
pub type RknnModel = ThreadBoundRuntime<RknnError>;

pub struct RknnLoader {
  model_path: String,
  flags: InitFlags,
  input_shape: TensorShape,
}

impl FromUrlWithScheme for RknnLoader {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnLoader {
  type Error = RknnError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query = |key: &str, default: usize| -> Result<usize, RknnError> {
      match url.query_pairs().find(|(k, _)| k == key) {
        Some((_, v)) => v
          .parse()
          .map_err(|_| RknnError::ModelPathError(format!("参数 {} 无效: {}", key, v))),
        None => Ok(default),
      }
    };

    Ok(RknnLoader {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      input_shape: TensorShape::rgb(
        query("width", RKNN_DEFAULT_WIDTH)?,
        query("height", RKNN_DEFAULT_HEIGHT)?,
      ),
    })
  }
}

impl RknnLoader {
  /// URL 中声明的输入尺寸。模型加载时以该尺寸预热一次，运行时拒绝则加载失败
  pub fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl ModelLoader for RknnLoader {
  type Runtime = RknnModel;
  type Error = RknnError;

  fn load(&self) -> Result<Self::Runtime, Self::Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let flags = self.flags;
    ThreadBoundRuntime::spawn("wudao-rknn", self.input_shape, move || {
      info!("创建 RKNN 推理上下文");
      let context = Context::new(&model_data, flags)
        .map_err(|e| RknnError::invalid("无法创建推理上下文", e))?;

      let num_inputs = context
        .num_inputs()
        .map_err(|e| RknnError::invalid("无法获取输入数量", e))?;
      let num_outputs = context
        .num_outputs()
        .map_err(|e| RknnError::invalid("无法获取输出数量", e))?;

      if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
        error!(
          "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
          RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
        );
        return Err(RknnError::invalid(
          &format!(
            "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
            RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
          ),
          rknpu::Error::InvalidModel,
        ));
      }

      Ok(RknnBackend { context })
    })
    // 上下文创建阶段的错误都已转成 ModelInvalid，剩下的 RknnError 只来自预热推理
    .map_err(|e| match e {
      RknnError::RknnError(inner) => {
        error!("模型无法以声明的输入尺寸 {} 运行", self.input_shape);
        RknnError::invalid(&format!("声明的输入尺寸 {} 预热失败", self.input_shape), inner)
      }
      other => other,
    })
  }
}
