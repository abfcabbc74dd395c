// 该文件是 Wudao （舞蹈） 项目的一部分。
// tests/common/mod.rs - 测试用的脚本化模型
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

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use wudao::{
  model::{DanceMove, ModelLoader, ModelRuntime, WithLabel},
  tensor::{InputTensor, TensorShape},
};

#[derive(Error, Debug)]
#[error("脚本化模型错误")]
pub struct ScriptError;

/// 记录调用情况，供测试断言
#[derive(Default)]
pub struct Tally {
  pub loads: AtomicUsize,
  pub runs: AtomicUsize,
  pub releases: AtomicUsize,
  pub last_input: Mutex<Option<Vec<f32>>>,
}

#[derive(Clone)]
pub struct Script {
  pub shape: TensorShape,
  pub output_len: usize,
  pub logits: Vec<f32>,
  pub delay: Duration,
  pub load_delay: Duration,
}

impl Script {
  pub fn new(width: usize, height: usize) -> Self {
    let mut logits = vec![0.0; DanceMove::ALL.len()];
    logits[0] = 5.0;
    logits[1] = 1.0;
    Self {
      shape: TensorShape::rgb(width, height),
      output_len: DanceMove::ALL.len(),
      logits,
      delay: Duration::ZERO,
      load_delay: Duration::ZERO,
    }
  }

  pub fn with_logits(mut self, logits: Vec<f32>) -> Self {
    self.logits = logits;
    self
  }

  pub fn with_output_len(mut self, output_len: usize) -> Self {
    self.output_len = output_len;
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn with_load_delay(mut self, delay: Duration) -> Self {
    self.load_delay = delay;
    self
  }
}

pub struct ScriptedRuntime {
  script: Script,
  tally: Arc<Tally>,
}

impl ModelRuntime for ScriptedRuntime {
  type Error = ScriptError;

  fn input_shape(&self) -> TensorShape {
    self.script.shape
  }

  fn output_len(&self) -> usize {
    self.script.output_len
  }

  fn run(&mut self, input: &InputTensor) -> Result<Vec<f32>, Self::Error> {
    self.tally.runs.fetch_add(1, Ordering::SeqCst);
    *self.tally.last_input.lock().unwrap() = Some(input.data().to_vec());
    if !self.script.delay.is_zero() {
      thread::sleep(self.script.delay);
    }
    Ok(self.script.logits.clone())
  }
}

impl Drop for ScriptedRuntime {
  fn drop(&mut self) {
    self.tally.releases.fetch_add(1, Ordering::SeqCst);
  }
}

pub struct ScriptedLoader {
  script: Script,
  tally: Arc<Tally>,
}

impl ScriptedLoader {
  pub fn new(script: Script) -> (Self, Arc<Tally>) {
    let tally = Arc::new(Tally::default());
    (
      Self {
        script,
        tally: tally.clone(),
      },
      tally,
    )
  }
}

impl ModelLoader for ScriptedLoader {
  type Runtime = ScriptedRuntime;
  type Error = ScriptError;

  fn load(&self) -> Result<Self::Runtime, Self::Error> {
    self.tally.loads.fetch_add(1, Ordering::SeqCst);
    if !self.script.load_delay.is_zero() {
      thread::sleep(self.script.load_delay);
    }
    Ok(ScriptedRuntime {
      script: self.script.clone(),
      tally: self.tally.clone(),
    })
  }
}
