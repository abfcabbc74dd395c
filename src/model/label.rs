// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/model/label.rs - 舞蹈动作标签
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

use std::collections::HashSet;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::model::WithLabel;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
  #[error("标签 {label} 位于下标 {index}, 但其编号为 {id}")]
  IndexMismatch { label: String, index: usize, id: u32 },
  #[error("标签编号 {0} 重复")]
  DuplicateId(u32),
  #[error("标签编号 {0} 无法反查")]
  Unresolvable(u32),
}

/// 模型可识别的 15 个舞蹈动作，顺序与模型输出下标一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DanceMove {
  DabLeft,
  DabRight,
  Lottery1,
  Lottery2Right,
  Lottery2Left,
  SaySo1Left,
  SaySo1Right,
  SaySo2,
  Wap1Left,
  Wap1Right,
  Wap2,
  Wap3Left,
  Wap3Right,
  Wap4Left,
  Wap4Right,
}

impl DanceMove {
  pub fn id(&self) -> &'static str {
    const IDS: [&str; 15] = [
      "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14",
    ];
    IDS[*self as usize]
  }

  pub fn display_name(&self) -> &'static str {
    match self {
      DanceMove::DabLeft => "Dab (left)",
      DanceMove::DabRight => "Dab (right)",
      DanceMove::Lottery1 => "Lottery 1",
      DanceMove::Lottery2Right => "Lottery 2 (right)",
      DanceMove::Lottery2Left => "Lottery 2 (left)",
      DanceMove::SaySo1Left => "Say So 1 (left)",
      DanceMove::SaySo1Right => "Say So 1 (right)",
      DanceMove::SaySo2 => "Say So 2",
      DanceMove::Wap1Left => "WAP 1 (left)",
      DanceMove::Wap1Right => "WAP 1 (right)",
      DanceMove::Wap2 => "WAP 2",
      DanceMove::Wap3Left => "WAP 3 (left)",
      DanceMove::Wap3Right => "WAP 3 (right)",
      DanceMove::Wap4Left => "WAP 4 (left)",
      DanceMove::Wap4Right => "WAP 4 (right)",
    }
  }

  /// 按字符串编号精确查找，不做模糊匹配
  pub fn from_id(id: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|m| m.id() == id)
  }
}

impl WithLabel for DanceMove {
  const ALL: &'static [Self] = &[
    DanceMove::DabLeft,
    DanceMove::DabRight,
    DanceMove::Lottery1,
    DanceMove::Lottery2Right,
    DanceMove::Lottery2Left,
    DanceMove::SaySo1Left,
    DanceMove::SaySo1Right,
    DanceMove::SaySo2,
    DanceMove::Wap1Left,
    DanceMove::Wap1Right,
    DanceMove::Wap2,
    DanceMove::Wap3Left,
    DanceMove::Wap3Right,
    DanceMove::Wap4Left,
    DanceMove::Wap4Right,
  ];

  fn to_label_str(&self) -> String {
    self.display_name().to_string()
  }

  fn to_label_id(&self) -> u32 {
    *self as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    Self::ALL.get(id as usize).copied()
  }
}

impl Serialize for DanceMove {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.id())
  }
}

/// 校验标签目录是输出下标到标签的双射，启动时调用一次
pub fn check_catalog<T: WithLabel>() -> Result<(), LabelError> {
  let mut seen = HashSet::with_capacity(T::ALL.len());
  for (index, label) in T::ALL.iter().enumerate() {
    let id = label.to_label_id();
    if !seen.insert(id) {
      return Err(LabelError::DuplicateId(id));
    }
    if id as usize != index {
      return Err(LabelError::IndexMismatch {
        label: label.to_label_str(),
        index,
        id,
      });
    }
    if T::from_label_id(id).map(|l| l.to_label_id()) != Some(id) {
      return Err(LabelError::Unresolvable(id));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn catalog_is_bijective() {
    assert_eq!(DanceMove::ALL.len(), 15);
    assert_eq!(check_catalog::<DanceMove>(), Ok(()));
  }

  #[test]
  fn ids_round_trip() {
    for (index, label) in DanceMove::ALL.iter().enumerate() {
      assert_eq!(label.id(), index.to_string());
      assert_eq!(DanceMove::from_id(label.id()), Some(*label));
    }
    assert_eq!(DanceMove::from_id("15"), None);
    assert_eq!(DanceMove::from_id("1 "), None);
  }

  #[derive(Debug, Clone, Copy)]
  struct Shuffled(u32);

  impl WithLabel for Shuffled {
    const ALL: &'static [Self] = &[Shuffled(0), Shuffled(2), Shuffled(1)];

    fn to_label_str(&self) -> String {
      format!("s{}", self.0)
    }

    fn to_label_id(&self) -> u32 {
      self.0
    }

    fn from_label_id(id: u32) -> Option<Self> {
      Some(Shuffled(id))
    }
  }

  #[test]
  fn out_of_order_catalog_is_rejected() {
    assert_eq!(
      check_catalog::<Shuffled>(),
      Err(LabelError::IndexMismatch {
        label: "s2".to_string(),
        index: 1,
        id: 2
      })
    );
  }
}
