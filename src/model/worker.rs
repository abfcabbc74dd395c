// 该文件是 Wudao （舞蹈） 项目的一部分。
// src/model/worker.rs - 绑定在专用线程上的推理后端
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

use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  model::ModelRuntime,
  tensor::{InputTensor, TensorShape},
};

/// 只能在创建它的线程上使用的后端，例如持有原生推理上下文的句柄
pub trait LocalBackend {
  type Error;
  fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("推理线程启动失败: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("推理线程已退出")]
  Gone,
}

type Reply<E> = Sender<Result<Vec<f32>, E>>;
type Request<E> = (Vec<f32>, Reply<E>);

/// 后端从创建、推理到释放都留在同一个线程上，调用方只通过通道交换数据，
/// 因此后端本身不需要 `Send`。
pub struct ThreadBoundRuntime<E> {
  requests: Option<Sender<Request<E>>>,
  worker: Option<JoinHandle<()>>,
  input_shape: TensorShape,
  output_len: usize,
}

impl<E> ThreadBoundRuntime<E>
where
  E: std::error::Error + Send + Sync + 'static + From<WorkerError>,
{
  /// 在新线程上执行 `open` 创建后端，随后以声明的输入尺寸做一次全零预热推理。
  /// 预热被后端拒绝时返回该错误；成功时以实际输出长度作为 `output_len`。
  pub fn spawn<B, F>(name: &str, input_shape: TensorShape, open: F) -> Result<Self, E>
  where
    B: LocalBackend<Error = E> + 'static,
    F: FnOnce() -> Result<B, E> + Send + 'static,
  {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<usize, E>>();
    let (requests, inbox) = mpsc::channel::<Request<E>>();

    let worker = thread::Builder::new()
      .name(name.to_string())
      .spawn(move || {
        let opened = open().and_then(|mut backend| {
          let warm_up = backend.infer(&vec![0.0; input_shape.len()])?;
          Ok((backend, warm_up.len()))
        });
        let mut backend = match opened {
          Ok((backend, output_len)) => {
            let _ = ready_tx.send(Ok(output_len));
            backend
          }
          Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
          }
        };

        for (input, reply) in inbox {
          let _ = reply.send(backend.infer(&input));
        }
        debug!("推理线程退出，释放后端");
      })
      .map_err(|e| E::from(WorkerError::Spawn(e)))?;

    let output_len = match ready_rx.recv() {
      Ok(Ok(output_len)) => output_len,
      Ok(Err(e)) => {
        let _ = worker.join();
        return Err(e);
      }
      Err(_) => {
        let _ = worker.join();
        return Err(WorkerError::Gone.into());
      }
    };
    info!("推理线程就绪: 输入 {}, 输出长度 {}", input_shape, output_len);

    Ok(Self {
      requests: Some(requests),
      worker: Some(worker),
      input_shape,
      output_len,
    })
  }
}

impl<E> ModelRuntime for ThreadBoundRuntime<E>
where
  E: std::error::Error + Send + Sync + 'static + From<WorkerError>,
{
  type Error = E;

  fn input_shape(&self) -> TensorShape {
    self.input_shape
  }

  fn output_len(&self) -> usize {
    self.output_len
  }

  fn run(&mut self, input: &InputTensor) -> Result<Vec<f32>, Self::Error> {
    let requests = self.requests.as_ref().ok_or(WorkerError::Gone)?;
    let (reply, response) = mpsc::channel();
    requests
      .send((input.data().to_vec(), reply))
      .map_err(|_| WorkerError::Gone)?;
    response.recv().map_err(|_| WorkerError::Gone)?
  }
}

impl<E> Drop for ThreadBoundRuntime<E> {
  fn drop(&mut self) {
    // 关闭请求通道后推理线程自行退出并释放后端
    self.requests.take();
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}
