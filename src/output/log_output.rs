// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/output/log_output.rs - 日志输出
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
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawImage,
  model::WithLabel,
  output::Render,
  service::ClassificationResult,
};

const LOG_OUTPUT_DEFAULT_TOP: usize = 3;

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 通过 tracing 打印前 N 个预测，`log://?top=5`
pub struct LogOutput {
  top: usize,
}

impl Default for LogOutput {
  fn default() -> Self {
    Self {
      top: LOG_OUTPUT_DEFAULT_TOP,
    }
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let top = url
      .query_pairs()
      .find(|(k, _)| k == "top")
      .and_then(|(_, v)| v.parse().ok())
      .unwrap_or(LOG_OUTPUT_DEFAULT_TOP);
    Ok(LogOutput { top })
  }
}

impl<T: WithLabel> Render<RawImage, ClassificationResult<T>> for LogOutput {
  type Error = LogOutputError;

  fn render_result(
    &self,
    frame: &RawImage,
    result: &ClassificationResult<T>,
  ) -> Result<(), Self::Error> {
    if result.is_empty() {
      info!("帧 {}: 无结果", frame.timestamp());
      return Ok(());
    }

    info!(
      "帧 {}: {} (置信度 {:.2}%)",
      frame.timestamp(),
      if result.is_detected { "检测到动作" } else { "未检测到动作" },
      result.confidence * 100.0
    );
    for prediction in result.predictions.iter().take(self.top) {
      info!(
        "  - {}: {:.2}%",
        prediction.label.to_label_str(),
        prediction.probability * 100.0
      );
    }
    Ok(())
  }
}
