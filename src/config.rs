// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/config.rs - 流水线配置与配置仓库
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
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{Normalization, TensorError, TensorShape},
};

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_TARGET_WIDTH: u32 = 160;
pub const DEFAULT_TARGET_HEIGHT: u32 = 256;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("阈值必须为非负有限数, 实际: {0}")]
  InvalidThreshold(f32),
  #[error("目标尺寸必须为正数, 实际: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("归一化参数错误: {0}")]
  Normalization(#[from] TensorError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 流水线配置，不可变值对象，整体替换
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
  pub threshold: f32,
  pub mirror: bool,
  pub analysis_enabled: bool,
  pub target_width: u32,
  pub target_height: u32,
  pub normalization: Normalization,
}

impl Default for PipelineConfiguration {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
      mirror: false,
      analysis_enabled: true,
      target_width: DEFAULT_TARGET_WIDTH,
      target_height: DEFAULT_TARGET_HEIGHT,
      normalization: Normalization::default(),
    }
  }
}

impl PipelineConfiguration {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.threshold.is_finite() || self.threshold < 0.0 {
      return Err(ConfigError::InvalidThreshold(self.threshold));
    }
    if self.target_width == 0 || self.target_height == 0 {
      return Err(ConfigError::InvalidDimensions {
        width: self.target_width,
        height: self.target_height,
      });
    }
    self.normalization.validate()?;
    Ok(())
  }

  pub fn tensor_shape(&self) -> TensorShape {
    TensorShape::rgb(self.target_width as usize, self.target_height as usize)
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_mirror(mut self, mirror: bool) -> Self {
    self.mirror = mirror;
    self
  }

  pub fn with_target(mut self, width: u32, height: u32) -> Self {
    self.target_width = width;
    self.target_height = height;
    self
  }
}

/// 配置仓库。读者拿到的是整体快照，永远看不到更新到一半的配置。
pub trait ConfigurationRepository: Send + Sync {
  fn current(&self) -> Arc<PipelineConfiguration>;

  /// 订阅配置流：立即收到当前配置，之后每次更新收到一份新快照
  fn subscribe(&self) -> Receiver<Arc<PipelineConfiguration>>;

  /// 在当前配置上修改并校验，成功后整体替换
  fn modify(
    &self,
    edit: &mut dyn FnMut(&mut PipelineConfiguration),
  ) -> Result<Arc<PipelineConfiguration>, ConfigError>;

  fn update(
    &self,
    configuration: PipelineConfiguration,
  ) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    self.modify(&mut |c: &mut PipelineConfiguration| *c = configuration)
  }

  fn update_threshold(&self, threshold: f32) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    self.modify(&mut |c: &mut PipelineConfiguration| c.threshold = threshold)
  }

  fn update_mirror(&self, mirror: bool) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    self.modify(&mut |c: &mut PipelineConfiguration| c.mirror = mirror)
  }

  fn update_analysis_enabled(
    &self,
    enabled: bool,
  ) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    self.modify(&mut |c: &mut PipelineConfiguration| c.analysis_enabled = enabled)
  }
}

/// 配置快照单元：写锁内完成修改、校验、持久化与替换
struct ConfigCell {
  snapshot: RwLock<Arc<PipelineConfiguration>>,
  subscribers: Mutex<Vec<Sender<Arc<PipelineConfiguration>>>>,
}

impl ConfigCell {
  fn new(configuration: PipelineConfiguration) -> Self {
    Self {
      snapshot: RwLock::new(Arc::new(configuration)),
      subscribers: Mutex::new(Vec::new()),
    }
  }

  fn current(&self) -> Arc<PipelineConfiguration> {
    self
      .snapshot
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn subscribe(&self) -> Receiver<Arc<PipelineConfiguration>> {
    let (tx, rx) = mpsc::channel();
    let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
    // 持有订阅锁再读快照，保证不会漏掉并发的更新
    let _ = tx.send(self.current());
    subscribers.push(tx);
    rx
  }

  fn replace(
    &self,
    edit: &mut dyn FnMut(&mut PipelineConfiguration),
    persist: impl FnOnce(&PipelineConfiguration) -> Result<(), ConfigError>,
  ) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
    let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);

    let mut next = **snapshot;
    edit(&mut next);
    next.validate()?;
    persist(&next)?;

    let next = Arc::new(next);
    *snapshot = next.clone();
    drop(snapshot);

    subscribers.retain(|tx| tx.send(next.clone()).is_ok());
    debug!("配置已更新: {:?}", next);
    Ok(next)
  }
}

/// 仅在内存中保存配置
pub struct MemoryConfigurationRepository {
  cell: ConfigCell,
}

impl MemoryConfigurationRepository {
  pub fn new(configuration: PipelineConfiguration) -> Result<Self, ConfigError> {
    configuration.validate()?;
    Ok(Self {
      cell: ConfigCell::new(configuration),
    })
  }
}

impl Default for MemoryConfigurationRepository {
  fn default() -> Self {
    Self {
      cell: ConfigCell::new(PipelineConfiguration::default()),
    }
  }
}

impl ConfigurationRepository for MemoryConfigurationRepository {
  fn current(&self) -> Arc<PipelineConfiguration> {
    self.cell.current()
  }

  fn subscribe(&self) -> Receiver<Arc<PipelineConfiguration>> {
    self.cell.subscribe()
  }

  fn modify(
    &self,
    edit: &mut dyn FnMut(&mut PipelineConfiguration),
  ) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    self.cell.replace(edit, |_| Ok(()))
  }
}

/// 以 JSON 文件持久化的配置仓库
pub struct JsonFileConfigurationRepository {
  path: PathBuf,
  cell: ConfigCell,
}

impl JsonFileConfigurationRepository {
  /// 打开配置文件；文件缺失、损坏或校验失败时使用默认配置
  pub fn open(path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let configuration = match Self::load(&path) {
      Ok(Some(configuration)) => {
        info!("已读取配置文件: {}", path.display());
        configuration
      }
      Ok(None) => {
        info!("配置文件不存在，使用默认配置: {}", path.display());
        PipelineConfiguration::default()
      }
      Err(e) => {
        warn!("配置文件无效，使用默认配置: {}: {}", path.display(), e);
        PipelineConfiguration::default()
      }
    };

    Self {
      path,
      cell: ConfigCell::new(configuration),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn load(path: &Path) -> Result<Option<PipelineConfiguration>, ConfigError> {
    if !path.exists() {
      return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let configuration: PipelineConfiguration = serde_json::from_str(&text)?;
    configuration.validate()?;
    Ok(Some(configuration))
  }

  fn persist(path: &Path, configuration: &PipelineConfiguration) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    // 先写临时文件再改名，避免留下半截配置
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(configuration)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
  }
}

impl FromUrlWithScheme for JsonFileConfigurationRepository {
  const SCHEME: &'static str = "file";
}

impl FromUrl for JsonFileConfigurationRepository {
  type Error = ConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigError::SchemeMismatch);
    }
    Ok(Self::open(url.path()))
  }
}

impl ConfigurationRepository for JsonFileConfigurationRepository {
  fn current(&self) -> Arc<PipelineConfiguration> {
    self.cell.current()
  }

  fn subscribe(&self) -> Receiver<Arc<PipelineConfiguration>> {
    self.cell.subscribe()
  }

  fn modify(
    &self,
    edit: &mut dyn FnMut(&mut PipelineConfiguration),
  ) -> Result<Arc<PipelineConfiguration>, ConfigError> {
    let path = &self.path;
    self
      .cell
      .replace(edit, |configuration| Self::persist(path, configuration))
  }
}
