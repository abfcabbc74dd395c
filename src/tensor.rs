// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/tensor.rs - 输入张量与预处理
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

use std::fmt;

use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::transform::PixelBuffer;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("数据长度不匹配: 形状 {shape} 需要 {expected}, 实际 {actual}")]
  LengthMismatch {
    shape: TensorShape,
    expected: usize,
    actual: usize,
  },
  #[error("无效的归一化参数: mean={mean}, std={std}")]
  InvalidNormalization { mean: f32, std: f32 },
}

/// NHWC 布局（批大小固定为 1）的张量形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl TensorShape {
  pub fn rgb(width: usize, height: usize) -> Self {
    Self {
      height,
      width,
      channels: RGB_CHANNELS,
    }
  }

  pub fn len(&self) -> usize {
    self.height * self.width * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 与另一形状比较，不一致时返回错误
  pub fn ensure_eq(&self, actual: &TensorShape) -> Result<(), TensorError> {
    if self != actual {
      return Err(TensorError::ShapeMismatch {
        expected: *self,
        actual: *actual,
      });
    }
    Ok(())
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[1, {}, {}, {}]", self.height, self.width, self.channels)
  }
}

/// `value' = (value - mean) / std`，默认把 0-255 映射到 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
  pub mean: f32,
  pub std: f32,
}

impl Default for Normalization {
  fn default() -> Self {
    Self {
      mean: 0.0,
      std: 255.0,
    }
  }
}

impl Normalization {
  pub fn validate(&self) -> Result<(), TensorError> {
    if !self.mean.is_finite() || !self.std.is_finite() || self.std <= 0.0 {
      return Err(TensorError::InvalidNormalization {
        mean: self.mean,
        std: self.std,
      });
    }
    Ok(())
  }

  #[inline]
  pub fn apply(&self, value: f32) -> f32 {
    (value - self.mean) / self.std
  }
}

/// 模型输入张量，float32，HWC 排列
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
  shape: TensorShape,
  data: Box<[f32]>,
}

impl InputTensor {
  pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self, TensorError> {
    if data.len() != shape.len() {
      return Err(TensorError::LengthMismatch {
        shape,
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      shape,
      data: data.into_boxed_slice(),
    })
  }

  pub fn zeros(shape: TensorShape) -> Self {
    Self {
      shape,
      data: vec![0.0; shape.len()].into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

pub struct Preprocessor {
  shape: TensorShape,
  normalization: Normalization,
}

impl Preprocessor {
  pub fn new(shape: TensorShape, normalization: Normalization) -> Result<Self, TensorError> {
    normalization.validate()?;
    if shape.channels != RGB_CHANNELS {
      return Err(TensorError::ShapeMismatch {
        expected: TensorShape::rgb(shape.width, shape.height),
        actual: shape,
      });
    }
    Ok(Self {
      shape,
      normalization,
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  /// 双线性缩放到目标尺寸并归一化
  pub fn preprocess(&self, buffer: &PixelBuffer) -> InputTensor {
    let (width, height) = (self.shape.width as u32, self.shape.height as u32);
    let resized;
    let image = if buffer.width() == width && buffer.height() == height {
      buffer.as_image()
    } else {
      resized = imageops::resize(buffer.as_image(), width, height, FilterType::Triangle);
      &resized
    };

    let mut data = Vec::with_capacity(self.shape.len());
    for pixel in image.pixels() {
      for &value in &pixel.0[..RGB_CHANNELS] {
        data.push(self.normalization.apply(value as f32));
      }
    }

    debug!(
      "预处理完成: {}x{} -> {}",
      buffer.width(),
      buffer.height(),
      self.shape
    );

    InputTensor {
      shape: self.shape,
      data: data.into_boxed_slice(),
    }
  }
}
