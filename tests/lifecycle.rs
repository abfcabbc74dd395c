// 该文件是 Wudao （舞蹈） 项目的一部分。
// tests/lifecycle.rs - 服务启停与并发
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

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{Script, ScriptedLoader};
use wudao::{
  config::PipelineConfiguration,
  frame::{RawImage, Rotation},
  model::{DanceMove, EngineError, EngineStatus},
  service::{ClassificationService, ServiceError},
};

fn frame() -> RawImage {
  RawImage::from_rgba(2, 2, Rotation::Deg0, 0, vec![64; 16]).unwrap()
}

#[test]
fn start_and_stop_are_idempotent() {
  let (loader, tally) = ScriptedLoader::new(Script::new(2, 2));
  let service = ClassificationService::<_, DanceMove>::new(loader);

  service.start().unwrap();
  service.start().unwrap();
  assert!(service.is_active());
  assert_eq!(service.engine_status(), EngineStatus::Loaded);
  assert_eq!(tally.loads.load(Ordering::SeqCst), 1);

  service.stop();
  service.stop();
  assert!(!service.is_active());
  assert_eq!(service.engine_status(), EngineStatus::Closed);
  assert_eq!(tally.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_before_start_is_safe() {
  let (loader, tally) = ScriptedLoader::new(Script::new(2, 2));
  let service = ClassificationService::<_, DanceMove>::new(loader);

  service.stop();
  assert_eq!(service.engine_status(), EngineStatus::Closed);
  assert_eq!(tally.loads.load(Ordering::SeqCst), 0);

  let error = service.start().unwrap_err();
  assert!(matches!(error, ServiceError::ModelLoad(EngineError::Closed)));
}

#[test]
fn classify_after_stop_is_empty() {
  let (loader, tally) = ScriptedLoader::new(Script::new(2, 2));
  let service = ClassificationService::<_, DanceMove>::new(loader);
  let configuration = PipelineConfiguration::default().with_target(2, 2);

  service.start().unwrap();
  assert!(!service.classify(&frame(), &configuration).unwrap().is_empty());
  service.stop();

  let result = service.classify(&frame(), &configuration).unwrap();
  assert!(result.is_empty());
  assert_eq!(tally.runs.load(Ordering::SeqCst), 1);
}

#[test]
fn dropping_service_releases_model() {
  let (loader, tally) = ScriptedLoader::new(Script::new(2, 2));
  {
    let service = ClassificationService::<_, DanceMove>::new(loader);
    service.start().unwrap();
  }
  assert_eq!(tally.releases.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_while_classifying_never_fails() {
  for _ in 0..10 {
    let script = Script::new(2, 2).with_delay(Duration::from_millis(2));
    let (loader, tally) = ScriptedLoader::new(script);
    let service = Arc::new(ClassificationService::<_, DanceMove>::new(loader));
    service.start().unwrap();
    let configuration = PipelineConfiguration::default().with_target(2, 2);

    let workers = (0..4)
      .map(|_| {
        let service = service.clone();
        thread::spawn(move || {
          let mut answered = 0;
          for _ in 0..50 {
            let result = service.classify(&frame(), &configuration).unwrap();
            if !result.is_empty() {
              assert_eq!(result.predictions.len(), 15);
              answered += 1;
            }
          }
          answered
        })
      })
      .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(10));
    service.stop();

    let answered: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(answered <= tally.runs.load(Ordering::SeqCst));
    assert_eq!(tally.releases.load(Ordering::SeqCst), 1);
    assert_eq!(service.engine_status(), EngineStatus::Closed);
  }
}

#[test]
fn stop_during_start_leaves_service_closed() {
  for _ in 0..10 {
    let script = Script::new(2, 2).with_load_delay(Duration::from_millis(5));
    let (loader, tally) = ScriptedLoader::new(script);
    let service = Arc::new(ClassificationService::<_, DanceMove>::new(loader));

    let starter = {
      let service = service.clone();
      thread::spawn(move || service.start())
    };
    thread::sleep(Duration::from_millis(1));
    service.stop();

    // start 先拿到锁则随后被 stop 关闭，否则 start 因引擎已关闭而失败
    match starter.join().unwrap() {
      Ok(()) => assert_eq!(tally.releases.load(Ordering::SeqCst), 1),
      Err(e) => assert!(matches!(e, ServiceError::ModelLoad(EngineError::Closed))),
    }
    assert!(!service.is_active());
    assert_eq!(service.engine_status(), EngineStatus::Closed);
    assert_eq!(
      tally.loads.load(Ordering::SeqCst),
      tally.releases.load(Ordering::SeqCst)
    );
  }
}
