// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/output/jsonl_output.rs - JSON Lines 结果记录
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

use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RawImage,
  model::WithLabel,
  output::Render,
  service::ClassificationResult,
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Record<'a, T> {
  time: String,
  frame: u64,
  width: u32,
  height: u32,
  #[serde(flatten)]
  result: &'a ClassificationResult<T>,
}

/// 每个结果追加一行 JSON，`jsonl:///path/history.jsonl?always`
///
/// 默认跳过空结果。
pub struct JsonLinesOutput {
  path: PathBuf,
  writer: Mutex<LineWriter<File>>,
  always: bool,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }

    let path = PathBuf::from(url.path());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    let always = url.query_pairs().any(|(k, _)| k == "always");

    Ok(JsonLinesOutput {
      path,
      writer: Mutex::new(LineWriter::new(file)),
      always,
    })
  }
}

impl JsonLinesOutput {
  pub fn path(&self) -> &PathBuf {
    &self.path
  }
}

impl<T: WithLabel + Serialize> Render<RawImage, ClassificationResult<T>> for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(
    &self,
    frame: &RawImage,
    result: &ClassificationResult<T>,
  ) -> Result<(), Self::Error> {
    if result.is_empty() && !self.always {
      return Ok(());
    }

    let record = Record {
      time: Utc::now().to_rfc3339(),
      frame: frame.timestamp(),
      width: frame.width(),
      height: frame.height(),
      result,
    };
    let line = serde_json::to_string(&record)?;

    let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(writer, "{}", line)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Rotation, model::DanceMove, postprocess::Prediction};

  #[test]
  fn appends_one_line_per_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history/records.jsonl");
    let url = Url::parse(&format!("jsonl://{}", path.display())).unwrap();
    let output = JsonLinesOutput::from_url(&url).unwrap();

    let frame = RawImage::from_rgba(1, 1, Rotation::Deg0, 9, vec![0; 4]).unwrap();
    let result = ClassificationResult::from_predictions(
      vec![
        Prediction {
          label: DanceMove::Wap2,
          probability: 0.8,
        },
        Prediction {
          label: DanceMove::DabLeft,
          probability: 0.2,
        },
      ],
      0.5,
    );
    output.render_result(&frame, &result).unwrap();
    output
      .render_result(&frame, &ClassificationResult::<DanceMove>::empty())
      .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 1);

    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["frame"], 9);
    assert_eq!(value["is_detected"], true);
    assert_eq!(value["predictions"][0]["label"], "10");
  }
}
