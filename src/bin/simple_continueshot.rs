// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/bin/simple_continueshot.rs - 持续读取输入并分类
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
  config::{ConfigurationRepository, JsonFileConfigurationRepository, MemoryConfigurationRepository},
  input::InputWrapper,
  model::{DanceMove, RknnLoader},
  output::OutputWrapper,
  service::ClassificationService,
  task::{ContinuousTask, Task},
};
use tracing::info;

/// Wudao 持续分类参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// RKNN 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
  /// 配置文件，例如 file:///etc/wudao.json；缺省时使用内存中的默认配置
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<Url>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
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

  let repository: Arc<dyn ConfigurationRepository> = match &args.config {
    Some(url) => {
      info!("配置文件: {}", url);
      Arc::new(JsonFileConfigurationRepository::from_url(url)?)
    }
    None => Arc::new(MemoryConfigurationRepository::default()),
  };

  let service = Arc::new(ClassificationService::<_, DanceMove>::new(loader));
  service.start().context("启动分类服务失败")?;
  service
    .check_configuration(&repository.current())
    .context("配置与模型不匹配")?;

  ContinuousTask::new(repository)
    .with_frame_number(args.frame_number)
    .run_task(input, service.clone(), output)?;

  service.stop();
  Ok(())
}
