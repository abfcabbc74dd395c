// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/frame.rs - 原始帧定义
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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧不包含图像数据")]
  InvalidFrame,
  #[error("无效的旋转角度: {0}")]
  InvalidRotation(i32),
  #[error("无效的图像尺寸: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
  Yuv420_888,
  Rgba8888,
  Jpeg,
  Unknown,
}

impl PixelFormat {
  /// 该格式期望的平面数量，未知格式返回 None
  pub fn expected_planes(&self) -> Option<usize> {
    match self {
      PixelFormat::Yuv420_888 => Some(3),
      PixelFormat::Rgba8888 | PixelFormat::Jpeg => Some(1),
      PixelFormat::Unknown => None,
    }
  }
}

/// 顺时针旋转角度，只允许 90 的整数倍
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn degrees(&self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转后宽高是否互换
  pub fn swaps_axes(&self) -> bool {
    matches!(self, Rotation::Deg90 | Rotation::Deg270)
  }
}

impl TryFrom<i32> for Rotation {
  type Error = FrameError;

  // 不做就近取整，非法角度直接拒绝
  fn try_from(degrees: i32) -> Result<Self, Self::Error> {
    match degrees {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      _ => Err(FrameError::InvalidRotation(degrees)),
    }
  }
}

/// 单个像素平面，数据为自有拷贝
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlane {
  data: Box<[u8]>,
  row_stride: usize,
  pixel_stride: usize,
}

impl ImagePlane {
  pub fn new(data: impl Into<Box<[u8]>>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data: data.into(),
      row_stride,
      pixel_stride,
    }
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn row_stride(&self) -> usize {
    self.row_stride
  }

  pub fn pixel_stride(&self) -> usize {
    self.pixel_stride
  }
}

/// 一帧相机图像的不可变快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
  width: u32,
  height: u32,
  rotation: Rotation,
  format: PixelFormat,
  timestamp: u64,
  planes: Box<[ImagePlane]>,
}

impl RawImage {
  pub fn new(
    width: u32,
    height: u32,
    rotation: Rotation,
    format: PixelFormat,
    timestamp: u64,
    planes: Vec<ImagePlane>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidDimensions { width, height });
    }

    Ok(Self {
      width,
      height,
      rotation,
      format,
      timestamp,
      planes: planes.into_boxed_slice(),
    })
  }

  /// 由紧凑排列的 RGBA 像素构造单平面帧
  pub fn from_rgba(
    width: u32,
    height: u32,
    rotation: Rotation,
    timestamp: u64,
    rgba: Vec<u8>,
  ) -> Result<Self, FrameError> {
    let plane = ImagePlane::new(rgba, width as usize * 4, 4);
    Self::new(
      width,
      height,
      rotation,
      PixelFormat::Rgba8888,
      timestamp,
      vec![plane],
    )
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn timestamp(&self) -> u64 {
    self.timestamp
  }

  pub fn planes(&self) -> &[ImagePlane] {
    &self.planes
  }
}
