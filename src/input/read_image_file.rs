// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawImage,
  input::{FrameAdapter, NativeFrame, NativePlane, android_format},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 静态图片包装成的平台帧，旋转角度从查询参数 `rotation` 读取
pub struct StillFrame {
  planes: [StillPlane; 1],
  width: u32,
  height: u32,
  rotation: i32,
  timestamp: u64,
}

pub struct StillPlane {
  image: RgbaImage,
}

impl NativePlane for StillPlane {
  fn buffer(&self) -> &[u8] {
    self.image.as_raw()
  }

  fn row_stride(&self) -> usize {
    self.image.width() as usize * 4
  }

  fn pixel_stride(&self) -> usize {
    4
  }
}

impl StillFrame {
  pub fn new(image: RgbaImage, rotation: i32, timestamp: u64) -> Self {
    let (width, height) = image.dimensions();
    Self {
      planes: [StillPlane { image }],
      width,
      height,
      rotation,
      timestamp,
    }
  }

  pub fn open(path: &Path, rotation: i32, timestamp: u64) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path)?.decode()?.to_rgba8();
    Ok(Self::new(image, rotation, timestamp))
  }
}

impl NativeFrame for StillFrame {
  type Plane = StillPlane;

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn rotation_degrees(&self) -> i32 {
    self.rotation
  }

  fn format_code(&self) -> i32 {
    android_format::RGBA_8888
  }

  fn timestamp(&self) -> u64 {
    self.timestamp
  }

  fn planes(&self) -> Option<&[Self::Plane]> {
    Some(&self.planes)
  }
}

fn rotation_of(url: &Url) -> i32 {
  url
    .query_pairs()
    .find(|(k, _)| k == "rotation")
    .and_then(|(_, v)| v.parse().ok())
    .unwrap_or(0)
}

fn adapt(frame: &StillFrame) -> Option<RawImage> {
  match FrameAdapter.to_domain(frame) {
    Ok(image) => Some(image),
    Err(e) => {
      warn!("图片无法转换为帧: {}", e);
      None
    }
  }
}

/// 单张图片输入，只产生一帧
pub struct ImageFileInput {
  frame: Option<StillFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let frame = StillFrame::open(Path::new(url.path()), rotation_of(url), 0)?;

    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RawImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take().as_ref().and_then(adapt)
  }
}

/// 目录输入，按文件名顺序逐张读取图片
pub struct FolderInput {
  files: std::vec::IntoIter<PathBuf>,
  rotation: i32,
  timestamp: u64,
}

impl FromUrlWithScheme for FolderInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FolderInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut files = std::fs::read_dir(url.path())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect::<Vec<_>>();
    files.sort();
    info!("目录 {} 中共有 {} 张图片", url.path(), files.len());

    Ok(FolderInput {
      files: files.into_iter(),
      rotation: rotation_of(url),
      timestamp: 0,
    })
  }
}

impl Iterator for FolderInput {
  type Item = RawImage;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      let frame = match StillFrame::open(&path, self.rotation, self.timestamp) {
        Ok(frame) => frame,
        Err(e) => {
          warn!("跳过无法读取的图片 {}: {}", path.display(), e);
          continue;
        }
      };
      self.timestamp += 1;
      if let Some(image) = adapt(&frame) {
        return Some(image);
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{PixelFormat, Rotation};

  #[test]
  fn folder_input_reads_images_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]))
      .save(dir.path().join("b.png"))
      .unwrap();
    RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]))
      .save(dir.path().join("a.png"))
      .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

    let url = Url::parse(&format!("folder://{}?rotation=90", dir.path().display())).unwrap();
    let frames = FolderInput::from_url(&url).unwrap().collect::<Vec<_>>();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].width(), 2);
    assert_eq!(frames[1].width(), 3);
    assert_eq!(frames[1].timestamp(), 1);
    assert!(frames.iter().all(|f| f.rotation() == Rotation::Deg90));
    assert!(frames.iter().all(|f| f.format() == PixelFormat::Rgba8888));
  }

  #[test]
  fn image_input_rejects_other_schemes() {
    let url = Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
