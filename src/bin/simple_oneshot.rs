// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/bin/simple_oneshot.rs - 对单张图片进行动作分类
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

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use wudao::{
  FromUrl,
  config::{ConfigurationRepository, MemoryConfigurationRepository, PipelineConfiguration},
  input::InputWrapper,
  model::{DanceMove, RknnLoader},
  output::OutputWrapper,
  service::ClassificationService,
  task::{OneShotTask, RepeatShotTask, Task},
};
use tracing::info;

/// Wudao 单帧分类参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型文件路径，例如 rknn:///models/dance.rknn
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 检测阈值
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
  /// 水平镜像
  #[arg(long)]
  pub mirror: bool,
  /// 重复推理次数，用于统计平均耗时
  #[arg(long, value_name = "REPEAT")]
  pub repeat: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = InputWrapper::from_url(&args.input)?;
  let loader = RknnLoader::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let shape = loader.input_shape();
  let mut configuration = PipelineConfiguration::default()
    .with_target(shape.width as u32, shape.height as u32)
    .with_mirror(args.mirror);
  if let Some(threshold) = args.threshold {
    configuration = configuration.with_threshold(threshold);
  }
  let repository: Arc<dyn ConfigurationRepository> =
    Arc::new(MemoryConfigurationRepository::new(configuration).context("配置无效")?);

  let service = Arc::new(ClassificationService::<_, DanceMove>::new(loader));
  service.start().context("启动分类服务失败")?;
  service.check_configuration(&repository.current())?;

  match args.repeat {
    Some(repeat) => RepeatShotTask::new(repository)
      .with_repeat(repeat)
      .run_task(input, service.clone(), output)?,
    None => OneShotTask::new(repository).run_task(input, service.clone(), output)?,
  }

  service.stop();
  Ok(())
}
