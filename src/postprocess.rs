// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/postprocess.rs - softmax 与预测排序
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

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{RawOutput, WithLabel};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostprocessError {
  #[error("输出长度 {outputs} 与标签数量 {labels} 不一致")]
  LabelCountMismatch { outputs: usize, labels: usize },
  #[error("模型输出包含非有限值")]
  NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction<T> {
  pub label: T,
  pub probability: f32,
}

/// 数值稳定的 softmax：先减去最大值再取指数
pub fn softmax(logits: &[f32]) -> Vec<f32> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exps = logits.iter().map(|&x| (x - max).exp()).collect::<Vec<_>>();
  let sum: f32 = exps.iter().sum();
  exps.into_iter().map(|e| e / sum).collect()
}

/// 标签数量与模型输出长度必须一致
pub fn check_label_count<T: WithLabel>(outputs: usize) -> Result<(), PostprocessError> {
  if outputs != T::ALL.len() {
    return Err(PostprocessError::LabelCountMismatch {
      outputs,
      labels: T::ALL.len(),
    });
  }
  Ok(())
}

/// softmax 后按下标与标签配对，再按概率降序稳定排序
pub fn postprocess<T: WithLabel>(output: &RawOutput) -> Result<Vec<Prediction<T>>, PostprocessError> {
  let logits = output.logits();
  check_label_count::<T>(logits.len())?;
  if logits.iter().any(|x| !x.is_finite()) {
    return Err(PostprocessError::NonFinite);
  }

  let mut predictions = T::ALL
    .iter()
    .zip(softmax(logits))
    .map(|(&label, probability)| Prediction { label, probability })
    .collect::<Vec<_>>();
  predictions.sort_by(|a, b| b.probability.total_cmp(&a.probability));

  if let Some(top) = predictions.first() {
    debug!(
      "最高预测: {} ({:.4})",
      top.label.to_label_str(),
      top.probability
    );
  }

  Ok(predictions)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DanceMove;

  fn logits(values: &[f32]) -> RawOutput {
    RawOutput::from(values.to_vec())
  }

  #[test]
  fn softmax_sums_to_one_for_extreme_logits() {
    let cases: [&[f32]; 4] = [
      &[0.0, 0.0, 0.0],
      &[1000.0, 999.0, -1000.0],
      &[-5000.0, -5001.0],
      &[3.4e38, -3.4e38, 0.0],
    ];
    for case in cases {
      let probabilities = softmax(case);
      let sum: f32 = probabilities.iter().sum();
      assert!((sum - 1.0).abs() < 1e-5, "{:?} -> {}", case, sum);
      assert!(probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
    }
  }

  #[test]
  fn predictions_pair_by_index_and_sort_descending() {
    let mut values = vec![0.0f32; 15];
    values[3] = 2.0;
    values[7] = 4.0;
    let predictions = postprocess::<DanceMove>(&logits(&values)).unwrap();

    assert_eq!(predictions.len(), 15);
    assert_eq!(predictions[0].label, DanceMove::SaySo2);
    assert_eq!(predictions[1].label, DanceMove::Lottery2Right);
    assert!(
      predictions
        .windows(2)
        .all(|w| w[0].probability >= w[1].probability)
    );
  }

  #[test]
  fn ties_keep_label_order() {
    let predictions = postprocess::<DanceMove>(&logits(&[1.0; 15])).unwrap();
    let order = predictions.iter().map(|p| p.label).collect::<Vec<_>>();
    assert_eq!(order, DanceMove::ALL);
  }

  #[test]
  fn label_count_mismatch_is_an_error() {
    assert_eq!(
      postprocess::<DanceMove>(&logits(&[1.0; 14])),
      Err(PostprocessError::LabelCountMismatch {
        outputs: 14,
        labels: 15
      })
    );
  }

  #[test]
  fn non_finite_logits_are_rejected() {
    let mut values = vec![0.0f32; 15];
    values[0] = f32::NAN;
    assert_eq!(
      postprocess::<DanceMove>(&logits(&values)),
      Err(PostprocessError::NonFinite)
    );
  }
}
