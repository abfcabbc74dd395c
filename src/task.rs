// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/task.rs - 任务与帧分析循环
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

use std::fmt::Display;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::{
  config::ConfigurationRepository,
  frame::RawImage,
  model::{ModelLoader, WithLabel},
  output::Render,
  service::{ClassificationResult, ClassificationService},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 取第一帧分类一次
pub struct OneShotTask {
  configuration: Arc<dyn ConfigurationRepository>,
}

impl OneShotTask {
  pub fn new(configuration: Arc<dyn ConfigurationRepository>) -> Self {
    Self { configuration }
  }
}

impl<L, T, I, O> Task<I, Arc<ClassificationService<L, T>>, O> for OneShotTask
where
  L: ModelLoader,
  T: WithLabel,
  I: Iterator<Item = RawImage>,
  O: Render<RawImage, ClassificationResult<T>>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    model: Arc<ClassificationService<L, T>>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let configuration = self.configuration.current();
    let now = Instant::now();
    let result = model.classify(&frame, &configuration)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一帧重复分类，统计平均耗时
pub struct RepeatShotTask {
  configuration: Arc<dyn ConfigurationRepository>,
  repeat: usize,
}

impl RepeatShotTask {
  pub const DEFAULT_REPEAT: usize = 100;

  pub fn new(configuration: Arc<dyn ConfigurationRepository>) -> Self {
    Self {
      configuration,
      repeat: Self::DEFAULT_REPEAT,
    }
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }
}

/// 去掉前两次预热后的平均值；次数不足时退化为全部平均
fn average_elapsed(times: &[Duration]) -> Option<Duration> {
  let warm = if times.len() > 2 { &times[2..] } else { times };
  if warm.is_empty() {
    return None;
  }
  Some(warm.iter().sum::<Duration>() / warm.len() as u32)
}

impl<L, T, I, O> Task<I, Arc<ClassificationService<L, T>>, O> for RepeatShotTask
where
  L: ModelLoader,
  T: WithLabel,
  I: Iterator<Item = RawImage>,
  O: Render<RawImage, ClassificationResult<T>>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    model: Arc<ClassificationService<L, T>>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let configuration = self.configuration.current();
      let now = Instant::now();
      let result = model.classify(&frame, &configuration)?;
      let elapsed = now.elapsed();
      debug!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&frame, &result)?;
      times.push(elapsed);
    }

    if let Some(average) = average_elapsed(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

/// 分析线程的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerStats {
  pub analyzed: usize,
  pub dropped: usize,
  pub skipped: usize,
}

#[derive(Default)]
struct Slot {
  frame: Option<RawImage>,
  closed: bool,
  dropped: usize,
}

/// 单槽信箱：新帧覆盖尚未取走的旧帧
#[derive(Default)]
struct Mailbox {
  slot: Mutex<Slot>,
  ready: Condvar,
}

impl Mailbox {
  fn put(&self, frame: RawImage) -> bool {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.closed {
      return true;
    }
    let replaced = slot.frame.replace(frame).is_some();
    if replaced {
      slot.dropped += 1;
    }
    drop(slot);
    self.ready.notify_one();
    replaced
  }

  /// 阻塞到有帧或信箱关闭；关闭后仍先交出槽中剩下的一帧
  fn take(&self) -> Option<RawImage> {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
      if let Some(frame) = slot.frame.take() {
        return Some(frame);
      }
      if slot.closed {
        return None;
      }
      slot = self
        .ready
        .wait(slot)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  fn close(&self) {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .closed = true;
    self.ready.notify_all();
  }

  fn dropped(&self) -> usize {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner).dropped
  }
}

/// 帧分析循环。
///
/// 生产者通过 [`FrameAnalyzer::submit`] 投递帧，独立的分析线程每次只处理最新的一帧，
/// 处理不过来的帧直接丢弃。每帧读取一次配置快照，`analysis_enabled` 关闭时跳过分类。
pub struct FrameAnalyzer {
  mailbox: Arc<Mailbox>,
  handle: Option<JoinHandle<AnalyzerStats>>,
}

impl FrameAnalyzer {
  pub fn spawn<L, T, O>(
    service: Arc<ClassificationService<L, T>>,
    configuration: Arc<dyn ConfigurationRepository>,
    output: O,
  ) -> std::io::Result<Self>
  where
    L: ModelLoader + 'static,
    T: WithLabel,
    O: Render<RawImage, ClassificationResult<T>> + Send + 'static,
    O::Error: Display,
  {
    let mailbox = Arc::new(Mailbox::default());
    let worker = mailbox.clone();
    let handle = thread::Builder::new()
      .name("wudao-analyzer".to_string())
      .spawn(move || Self::analyze_loop(&worker, &service, configuration.as_ref(), &output))?;

    Ok(Self {
      mailbox,
      handle: Some(handle),
    })
  }

  fn analyze_loop<L, T, O>(
    mailbox: &Mailbox,
    service: &ClassificationService<L, T>,
    configuration: &dyn ConfigurationRepository,
    output: &O,
  ) -> AnalyzerStats
  where
    L: ModelLoader,
    T: WithLabel,
    O: Render<RawImage, ClassificationResult<T>>,
    O::Error: Display,
  {
    let mut stats = AnalyzerStats::default();
    info!("分析线程启动");
    while let Some(frame) = mailbox.take() {
      let snapshot = configuration.current();
      if !snapshot.analysis_enabled {
        stats.skipped += 1;
        continue;
      }

      let result = match service.classify(&frame, &snapshot) {
        Ok(result) => result,
        Err(e) => {
          error!("帧 {} 分类失败: {}", frame.timestamp(), e);
          continue;
        }
      };
      stats.analyzed += 1;
      if let Err(e) = output.render_result(&frame, &result) {
        warn!("帧 {} 输出失败: {}", frame.timestamp(), e);
      }
    }
    stats.dropped = mailbox.dropped();
    info!(
      "分析线程退出: 分析 {} 帧, 丢弃 {} 帧, 跳过 {} 帧",
      stats.analyzed, stats.dropped, stats.skipped
    );
    stats
  }

  /// 投递一帧。返回 `true` 表示有帧被丢弃（覆盖了未处理的旧帧，或分析已停止）
  pub fn submit(&self, frame: RawImage) -> bool {
    self.mailbox.put(frame)
  }

  /// 停止接收新帧并等待线程退出，已投递的最新一帧仍会处理
  pub fn shutdown(mut self) -> AnalyzerStats {
    self.join()
  }

  fn join(&mut self) -> AnalyzerStats {
    self.mailbox.close();
    match self.handle.take().map(JoinHandle::join) {
      Some(Ok(stats)) => stats,
      Some(Err(_)) => {
        error!("分析线程异常退出");
        AnalyzerStats {
          dropped: self.mailbox.dropped(),
          ..AnalyzerStats::default()
        }
      }
      None => AnalyzerStats::default(),
    }
  }
}

impl Drop for FrameAnalyzer {
  fn drop(&mut self) {
    if self.handle.is_some() {
      self.join();
    }
  }
}

/// 持续读取输入并交给 [`FrameAnalyzer`]，直到输入结束、达到帧数或收到 Ctrl-C
pub struct ContinuousTask {
  configuration: Arc<dyn ConfigurationRepository>,
  frame_number: Option<usize>,
  interrupt: bool,
}

impl ContinuousTask {
  pub fn new(configuration: Arc<dyn ConfigurationRepository>) -> Self {
    Self {
      configuration,
      frame_number: None,
      interrupt: true,
    }
  }

  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 是否安装 Ctrl-C 处理器，进程内只能安装一次
  pub fn with_interrupt(mut self, interrupt: bool) -> Self {
    self.interrupt = interrupt;
    self
  }

  fn install_interrupt(&self) -> anyhow::Result<Option<Receiver<()>>> {
    if !self.interrupt {
      return Ok(None);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("设置 Ctrl-C 处理器失败")?;
    Ok(Some(rx))
  }
}

impl<L, T, I, O> Task<I, Arc<ClassificationService<L, T>>, O> for ContinuousTask
where
  L: ModelLoader + 'static,
  T: WithLabel,
  I: Iterator<Item = RawImage>,
  O: Render<RawImage, ClassificationResult<T>> + Send + 'static,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: I,
    model: Arc<ClassificationService<L, T>>,
    output: O,
  ) -> Result<(), Self::Error> {
    info!("开始任务...");
    let interrupt = self.install_interrupt()?;
    let analyzer = FrameAnalyzer::spawn(model, self.configuration.clone(), output)
      .context("启动分析线程失败")?;

    let mut frame_index = 0usize;
    let now = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);
      debug!("提交第 {} 帧图像", frame_index);
      if analyzer.submit(frame) {
        debug!("分析跟不上，丢弃旧帧");
      }
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if interrupt.as_ref().map(|rx| rx.try_recv().is_ok()).unwrap_or(false) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    let stats = analyzer.shutdown();
    info!(
      "任务结束: 提交 {} 帧, 分析 {} 帧, 丢弃 {} 帧, 跳过 {} 帧, 耗时 {:.2?}",
      frame_index,
      stats.analyzed,
      stats.dropped,
      stats.skipped,
      now.elapsed()
    );
    Ok(())
  }
}
