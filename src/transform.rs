// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/transform.rs - 帧解码、旋转与镜像
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

use image::{ImageFormat, Rgba, RgbaImage, imageops};
use thiserror::Error;
use tracing::debug;

use crate::frame::{ImagePlane, PixelFormat, RawImage, Rotation};

const RGBA_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum TransformError {
  #[error("帧没有像素平面")]
  NoPlanes,
  #[error("平面数量不匹配: 格式 {format:?} 期望 {expected}, 实际 {actual}")]
  PlaneCount {
    format: PixelFormat,
    expected: usize,
    actual: usize,
  },
  #[error("平面 {index} 格式错误: {reason}")]
  MalformedPlane { index: usize, reason: String },
  #[error("不支持的像素格式: {0:?}")]
  UnsupportedFormat(PixelFormat),
  #[error("JPEG 解码错误: {0}")]
  Jpeg(#[from] image::ImageError),
}

impl TransformError {
  fn malformed(index: usize, reason: impl Into<String>) -> Self {
    TransformError::MalformedPlane {
      index,
      reason: reason.into(),
    }
  }
}

/// 紧凑排列的 RGBA 像素缓冲，由单次流水线调用独占
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
  image: RgbaImage,
}

impl PixelBuffer {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
    self.image.get_pixel(x, y).0
  }

  pub fn as_image(&self) -> &RgbaImage {
    &self.image
  }

  pub fn into_image(self) -> RgbaImage {
    self.image
  }
}

impl From<RgbaImage> for PixelBuffer {
  fn from(image: RgbaImage) -> Self {
    Self { image }
  }
}

/// 将原始平面解码为 RGBA 缓冲
pub fn decode(raw: &RawImage) -> Result<PixelBuffer, TransformError> {
  let planes = raw.planes();
  if planes.is_empty() {
    return Err(TransformError::NoPlanes);
  }

  if let Some(expected) = raw.format().expected_planes() {
    if planes.len() < expected {
      return Err(TransformError::PlaneCount {
        format: raw.format(),
        expected,
        actual: planes.len(),
      });
    }
  }

  let image = match raw.format() {
    PixelFormat::Rgba8888 => decode_rgba(raw.width(), raw.height(), &planes[0])?,
    PixelFormat::Yuv420_888 => decode_yuv420(raw.width(), raw.height(), &planes[..3])?,
    PixelFormat::Jpeg => {
      image::load_from_memory_with_format(planes[0].data(), ImageFormat::Jpeg)?.to_rgba8()
    }
    PixelFormat::Unknown => return Err(TransformError::UnsupportedFormat(PixelFormat::Unknown)),
  };

  debug!(
    "解码完成: {:?} {}x{} -> {}x{}",
    raw.format(),
    raw.width(),
    raw.height(),
    image.width(),
    image.height()
  );

  Ok(PixelBuffer { image })
}

/// 覆盖 width x height 个像素所需的最小平面长度，步长来自平台帧，溢出视为畸形平面
fn required_len(
  index: usize,
  plane: &ImagePlane,
  width: usize,
  height: usize,
  bytes: usize,
) -> Result<usize, TransformError> {
  height
    .saturating_sub(1)
    .checked_mul(plane.row_stride())
    .zip(width.saturating_sub(1).checked_mul(plane.pixel_stride()))
    .and_then(|(rows, columns)| rows.checked_add(columns))
    .and_then(|offset| offset.checked_add(bytes))
    .ok_or_else(|| {
      TransformError::malformed(
        index,
        format!(
          "步长溢出: 行步长 {}, 像素步长 {}",
          plane.row_stride(),
          plane.pixel_stride()
        ),
      )
    })
}

// 行填充（rowStride > width * pixelStride）在拷贝时丢弃
fn decode_rgba(width: u32, height: u32, plane: &ImagePlane) -> Result<RgbaImage, TransformError> {
  let (w, h) = (width as usize, height as usize);
  let pixel_stride = plane.pixel_stride();

  if pixel_stride < RGBA_CHANNELS {
    return Err(TransformError::malformed(
      0,
      format!("像素步长 {} 小于 {}", pixel_stride, RGBA_CHANNELS),
    ));
  }
  let row_len = w
    .checked_mul(pixel_stride)
    .ok_or_else(|| TransformError::malformed(0, format!("像素步长 {} 溢出", pixel_stride)))?;
  if plane.row_stride() < row_len {
    return Err(TransformError::malformed(
      0,
      format!("行步长 {} 小于行宽 {}", plane.row_stride(), row_len),
    ));
  }
  let required = required_len(0, plane, w, h, RGBA_CHANNELS)?;
  if plane.data().len() < required {
    return Err(TransformError::malformed(
      0,
      format!("数据长度 {} 小于所需 {}", plane.data().len(), required),
    ));
  }

  let data = plane.data();
  let mut dense = Vec::with_capacity(w * h * RGBA_CHANNELS);
  for y in 0..h {
    let row = &data[y * plane.row_stride()..];
    if pixel_stride == RGBA_CHANNELS {
      dense.extend_from_slice(&row[..w * RGBA_CHANNELS]);
    } else {
      for x in 0..w {
        let offset = x * pixel_stride;
        dense.extend_from_slice(&row[offset..offset + RGBA_CHANNELS]);
      }
    }
  }

  RgbaImage::from_raw(width, height, dense)
    .ok_or_else(|| TransformError::malformed(0, "无法构造 RGBA 图像"))
}

fn decode_yuv420(
  width: u32,
  height: u32,
  planes: &[ImagePlane],
) -> Result<RgbaImage, TransformError> {
  let (w, h) = (width as usize, height as usize);
  let (chroma_w, chroma_h) = (w.div_ceil(2), h.div_ceil(2));

  for (index, plane) in planes.iter().enumerate() {
    let (pw, ph) = if index == 0 { (w, h) } else { (chroma_w, chroma_h) };
    if plane.pixel_stride() == 0 {
      return Err(TransformError::malformed(index, "像素步长为 0"));
    }
    let required = required_len(index, plane, pw, ph, 1)?;
    if plane.data().len() < required {
      return Err(TransformError::malformed(
        index,
        format!("数据长度 {} 小于所需 {}", plane.data().len(), required),
      ));
    }
  }

  let (y_plane, u_plane, v_plane) = (&planes[0], &planes[1], &planes[2]);
  let sample = |plane: &ImagePlane, x: usize, y: usize| -> f32 {
    plane.data()[y * plane.row_stride() + x * plane.pixel_stride()] as f32
  };

  let image = RgbaImage::from_fn(width, height, |x, y| {
    let (x, y) = (x as usize, y as usize);
    let luma = sample(y_plane, x, y);
    let u = sample(u_plane, x / 2, y / 2) - 128.0;
    let v = sample(v_plane, x / 2, y / 2) - 128.0;

    // BT.601 全范围
    let r = luma + 1.402 * v;
    let g = luma - 0.344_136 * u - 0.714_136 * v;
    let b = luma + 1.772 * u;
    Rgba([clamp_u8(r), clamp_u8(g), clamp_u8(b), u8::MAX])
  });

  Ok(image)
}

fn clamp_u8(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

/// 按元数据给出的角度顺时针旋转
pub fn rotate(buffer: PixelBuffer, rotation: Rotation) -> PixelBuffer {
  let image = match rotation {
    Rotation::Deg0 => return buffer,
    Rotation::Deg90 => imageops::rotate90(&buffer.image),
    Rotation::Deg180 => imageops::rotate180(&buffer.image),
    Rotation::Deg270 => imageops::rotate270(&buffer.image),
  };
  PixelBuffer { image }
}

/// 以图像中心为轴水平翻转
pub fn mirror_horizontal(buffer: PixelBuffer) -> PixelBuffer {
  PixelBuffer {
    image: imageops::flip_horizontal(&buffer.image),
  }
}

/// 解码、旋转，并在需要时镜像
pub fn transform(raw: &RawImage, mirror: bool) -> Result<PixelBuffer, TransformError> {
  let buffer = rotate(decode(raw)?, raw.rotation());
  Ok(if mirror {
    mirror_horizontal(buffer)
  } else {
    buffer
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gradient(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
      .flat_map(|i| [i as u8, (i * 3) as u8, (i * 7) as u8, 255])
      .collect()
  }

  fn rgba_frame(width: u32, height: u32, rotation: Rotation) -> RawImage {
    RawImage::from_rgba(width, height, rotation, 0, gradient(width, height)).unwrap()
  }

  #[test]
  fn decode_drops_row_padding() {
    let (width, height) = (3u32, 2u32);
    let dense = gradient(width, height);
    let row_stride = 16;
    let mut padded = vec![0xAAu8; row_stride * height as usize];
    for y in 0..height as usize {
      padded[y * row_stride..y * row_stride + 12].copy_from_slice(&dense[y * 12..y * 12 + 12]);
    }
    let raw = RawImage::new(
      width,
      height,
      Rotation::Deg0,
      PixelFormat::Rgba8888,
      0,
      vec![ImagePlane::new(padded, row_stride, 4)],
    )
    .unwrap();

    let buffer = decode(&raw).unwrap();
    assert_eq!(buffer.width(), 3);
    assert_eq!(buffer.as_image().as_raw(), &dense);
  }

  #[test]
  fn decode_rejects_short_rows() {
    let raw = RawImage::new(
      4,
      2,
      Rotation::Deg0,
      PixelFormat::Rgba8888,
      0,
      vec![ImagePlane::new(vec![0u8; 64], 8, 4)],
    )
    .unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::MalformedPlane { index: 0, .. })
    ));
  }

  #[test]
  fn decode_rejects_truncated_plane() {
    let raw = RawImage::new(
      2,
      2,
      Rotation::Deg0,
      PixelFormat::Rgba8888,
      0,
      vec![ImagePlane::new(vec![0u8; 12], 8, 4)],
    )
    .unwrap();
    assert!(decode(&raw).is_err());
  }

  #[test]
  fn decode_without_planes_fails() {
    let raw = RawImage::new(2, 2, Rotation::Deg0, PixelFormat::Rgba8888, 0, vec![]).unwrap();
    assert!(matches!(decode(&raw), Err(TransformError::NoPlanes)));
  }

  #[test]
  fn unknown_format_is_unsupported() {
    let raw = RawImage::new(
      1,
      1,
      Rotation::Deg0,
      PixelFormat::Unknown,
      0,
      vec![ImagePlane::new(vec![0u8; 4], 4, 4)],
    )
    .unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::UnsupportedFormat(PixelFormat::Unknown))
    ));
  }

  #[test]
  fn yuv_gray_decodes_to_gray() {
    let (width, height) = (4u32, 2u32);
    let y = ImagePlane::new(vec![100u8; 8], 4, 1);
    let u = ImagePlane::new(vec![128u8; 2], 2, 1);
    let v = ImagePlane::new(vec![128u8; 2], 2, 1);
    let raw = RawImage::new(
      width,
      height,
      Rotation::Deg0,
      PixelFormat::Yuv420_888,
      0,
      vec![y, u, v],
    )
    .unwrap();

    let buffer = decode(&raw).unwrap();
    assert_eq!(buffer.pixel(3, 1), [100, 100, 100, 255]);
  }

  #[test]
  fn yuv_with_interleaved_chroma() {
    // NV21 风格：V/U 交错，像素步长为 2
    let y = ImagePlane::new(vec![128u8; 4], 2, 1);
    let vu = vec![200u8, 60];
    let u = ImagePlane::new(vu[1..].to_vec(), 2, 2);
    let v = ImagePlane::new(vu.clone(), 2, 2);
    let raw = RawImage::new(2, 2, Rotation::Deg0, PixelFormat::Yuv420_888, 0, vec![y, u, v])
      .unwrap();

    let [r, g, b, a] = decode(&raw).unwrap().pixel(0, 0);
    assert!(r > 200, "r = {}", r);
    assert!(b < 20, "b = {}", b);
    assert!(g < 128);
    assert_eq!(a, 255);
  }

  #[test]
  fn yuv_missing_planes_fails() {
    let y = ImagePlane::new(vec![0u8; 4], 2, 1);
    let raw = RawImage::new(2, 2, Rotation::Deg0, PixelFormat::Yuv420_888, 0, vec![y]).unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::PlaneCount {
        expected: 3,
        actual: 1,
        ..
      })
    ));
  }

  #[test]
  fn jpeg_plane_is_decoded() {
    let source = RgbaImage::from_pixel(8, 4, Rgba([0, 0, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(source)
      .to_rgb8()
      .write_to(&mut bytes, ImageFormat::Jpeg)
      .unwrap();
    let data = bytes.into_inner();
    let len = data.len();
    let raw = RawImage::new(
      8,
      4,
      Rotation::Deg0,
      PixelFormat::Jpeg,
      0,
      vec![ImagePlane::new(data, len, 1)],
    )
    .unwrap();

    let buffer = decode(&raw).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (8, 4));
  }

  #[test]
  fn rotation_uses_exact_degrees() {
    let raw = rgba_frame(3, 2, Rotation::Deg90);
    let source = decode(&raw).unwrap();
    let top_left = source.pixel(0, 0);
    let bottom_left = source.pixel(0, 1);

    let rotated = rotate(source.clone(), Rotation::Deg90);
    assert_eq!((rotated.width(), rotated.height()), (2, 3));
    // 顺时针 90 度: 左下角移动到左上角
    assert_eq!(rotated.pixel(0, 0), bottom_left);
    assert_eq!(rotated.pixel(1, 0), top_left);

    let half = rotate(source.clone(), Rotation::Deg180);
    assert_eq!(half.pixel(2, 1), top_left);

    let back = rotate(rotate(source.clone(), Rotation::Deg90), Rotation::Deg270);
    assert_eq!(back, source);
  }

  #[test]
  fn mirror_twice_is_identity() {
    let buffer = decode(&rgba_frame(5, 3, Rotation::Deg0)).unwrap();
    let once = mirror_horizontal(buffer.clone());
    assert_eq!(once.pixel(0, 1), buffer.pixel(4, 1));
    assert_eq!(once.pixel(2, 2), buffer.pixel(2, 2));
    assert_eq!(mirror_horizontal(once), buffer);
  }

  #[test]
  fn transform_applies_rotation_from_metadata() {
    let raw = rgba_frame(4, 2, Rotation::Deg270);
    let buffer = transform(&raw, true).unwrap();
    assert_eq!((buffer.width(), buffer.height()), (2, 4));
  }

  #[test]
  fn oversized_row_stride_is_malformed_not_panic() {
    let plane = ImagePlane::new(vec![0u8; 64], usize::MAX / 2 + 1, 4);
    let raw = RawImage::new(2, 3, Rotation::Deg0, PixelFormat::Rgba8888, 0, vec![plane]).unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::MalformedPlane { index: 0, .. })
    ));
  }

  #[test]
  fn oversized_pixel_stride_is_malformed_not_panic() {
    let plane = ImagePlane::new(vec![0u8; 64], 16, usize::MAX / 2 + 1);
    let raw = RawImage::new(3, 1, Rotation::Deg0, PixelFormat::Rgba8888, 0, vec![plane]).unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::MalformedPlane { index: 0, .. })
    ));

    let luma = ImagePlane::new(vec![0u8; 8], 2, 1);
    let chroma = ImagePlane::new(vec![0u8; 1], usize::MAX, 1);
    let raw = RawImage::new(
      2,
      4,
      Rotation::Deg0,
      PixelFormat::Yuv420_888,
      0,
      vec![luma, chroma.clone(), chroma],
    )
    .unwrap();
    assert!(matches!(
      decode(&raw),
      Err(TransformError::MalformedPlane { index: 1, .. })
    ));
  }
}
