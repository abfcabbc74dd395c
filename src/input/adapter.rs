// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/input/adapter.rs - 平台相机帧到 RawImage 的适配
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

use tracing::{debug, warn};

use crate::frame::{FrameError, ImagePlane, PixelFormat, RawImage, Rotation};

/// 平台格式编码（与 Android `ImageFormat` 常量一致）
pub mod android_format {
  pub const RGBA_8888: i32 = 0x1;
  pub const YUV_420_888: i32 = 0x23;
  pub const JPEG: i32 = 0x100;
}

/// 平台帧中的一个像素平面。缓冲区只在平台帧有效期内可用。
pub trait NativePlane {
  fn buffer(&self) -> &[u8];
  fn row_stride(&self) -> usize;
  fn pixel_stride(&self) -> usize;
}

/// 平台相机帧，由外部相机子系统实现
pub trait NativeFrame {
  type Plane: NativePlane;

  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn rotation_degrees(&self) -> i32;
  fn format_code(&self) -> i32;
  fn timestamp(&self) -> u64;
  /// 没有图像负载时返回 None
  fn planes(&self) -> Option<&[Self::Plane]>;
}

/// 无状态适配器：把平台帧拷贝成自有的 [`RawImage`]
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameAdapter;

impl FrameAdapter {
  pub fn to_domain<F: NativeFrame>(&self, frame: &F) -> Result<RawImage, FrameError> {
    let planes = frame.planes().ok_or_else(|| {
      warn!("平台帧不包含图像数据");
      FrameError::InvalidFrame
    })?;

    let rotation = Rotation::try_from(frame.rotation_degrees())?;
    let format = convert_format(frame.format_code());

    // 必须拷贝，平台缓冲区在帧关闭后失效
    let planes = planes
      .iter()
      .map(|plane| ImagePlane::new(plane.buffer().to_vec(), plane.row_stride(), plane.pixel_stride()))
      .collect::<Vec<_>>();

    debug!(
      "适配平台帧: {}x{}, 旋转 {}, 格式 {:?}, {} 个平面",
      frame.width(),
      frame.height(),
      rotation.degrees(),
      format,
      planes.len()
    );

    RawImage::new(
      frame.width(),
      frame.height(),
      rotation,
      format,
      frame.timestamp(),
      planes,
    )
  }
}

fn convert_format(code: i32) -> PixelFormat {
  match code {
    android_format::YUV_420_888 => PixelFormat::Yuv420_888,
    android_format::JPEG => PixelFormat::Jpeg,
    android_format::RGBA_8888 => PixelFormat::Rgba8888,
    _ => PixelFormat::Unknown,
  }
}
