use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::control::controller::{JobController, JobSnapshot};
use crate::models::job::JobStatus;

/// 状态流中的一条事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StatusEvent {
    Update(JobSnapshot),
    /// 最后一条事件，之后流结束
    Final(JobSnapshot),
}

impl StatusEvent {
    pub fn snapshot(&self) -> &JobSnapshot {
        match self {
            StatusEvent::Update(s) | StatusEvent::Final(s) => s,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, StatusEvent::Final(_))
    }
}

/// 所有作业的汇总（监控用）
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistrySummary {
    pub total_jobs: usize,
    pub active: usize,
    pub paused: usize,
    pub cancelled: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_responses: usize,
    pub responses_done: usize,
    pub mean_progress_pct: f64,
}

/// 作业控制器注册表
///
/// 由调用层创建并注入，不是进程级单例；克隆后共享同一份数据。
/// 读写锁只保护映射本身，每个控制器内部状态各自加锁，状态查询不会阻塞工作任务。
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, Arc<JobController>>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobController>>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobController>>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 创建作业控制器，返回 (作业 ID, 控制器)
    pub fn create(&self, total_responses: usize, total_batches: usize) -> (String, Arc<JobController>) {
        let job_id = Uuid::new_v4().to_string();
        let controller = Arc::new(JobController::new(&job_id, total_responses, total_batches));
        self.write().insert(job_id.clone(), Arc::clone(&controller));
        info!("🆕 [作业 {}] 已创建: {} 个回答", job_id, total_responses);
        (job_id, controller)
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobController>> {
        self.read().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.get(job_id).map(|c| c.snapshot())
    }

    pub fn pause(&self, job_id: &str) -> Option<JobSnapshot> {
        self.get(job_id).map(|c| c.pause())
    }

    pub fn resume(&self, job_id: &str) -> Option<JobSnapshot> {
        self.get(job_id).map(|c| c.resume())
    }

    pub fn cancel(&self, job_id: &str) -> Option<JobSnapshot> {
        self.get(job_id).map(|c| c.cancel())
    }

    pub fn remove(&self, job_id: &str) -> Option<Arc<JobController>> {
        let removed = self.write().remove(job_id);
        if removed.is_some() {
            debug!("[作业 {}] 控制器已移除", job_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 宽限期后移除作业控制器
    ///
    /// 计时任务依附于当前 tokio 运行时，运行时结束时计时随之失效。
    pub fn schedule_removal(&self, job_id: &str, grace: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            registry.remove(&job_id);
        })
    }

    /// 所有作业的汇总
    pub fn summary(&self) -> RegistrySummary {
        let snapshots: Vec<JobSnapshot> = self.read().values().map(|c| c.snapshot()).collect();

        let mut summary = RegistrySummary {
            total_jobs: snapshots.len(),
            ..Default::default()
        };
        for s in &snapshots {
            match s.status {
                Some(JobStatus::Done) => summary.completed += 1,
                Some(JobStatus::Failed) => summary.failed += 1,
                Some(JobStatus::Cancelled) => summary.cancelled += 1,
                None if s.cancelled => summary.cancelled += 1,
                None if s.paused => summary.paused += 1,
                None => summary.active += 1,
            }
            summary.total_responses += s.total_responses;
            summary.responses_done += s.responses_done;
        }
        if !snapshots.is_empty() {
            summary.mean_progress_pct =
                snapshots.iter().map(|s| s.progress_pct).sum::<f64>() / snapshots.len() as f64;
        }
        summary
    }

    /// 状态流：每隔 `interval` 推送一次快照，
    /// 直到进度达到 100、作业被取消或结束，再推送一条最终事件后关闭
    pub fn watch(&self, job_id: &str, interval: Duration) -> Option<impl Stream<Item = StatusEvent>> {
        let controller = self.get(job_id)?;

        Some(stream::unfold(
            (controller, true, false),
            move |(controller, first, finished)| async move {
                if finished {
                    return None;
                }
                if !first {
                    tokio::time::sleep(interval).await;
                }
                let snapshot = controller.snapshot();
                if snapshot.is_final() {
                    Some((StatusEvent::Final(snapshot), (controller, false, true)))
                } else {
                    Some((StatusEvent::Update(snapshot), (controller, false, false)))
                }
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::progress::{Phase, ProgressEvent};
    use futures::StreamExt;

    #[test]
    fn test_control_calls_on_unknown_job() {
        let registry = JobRegistry::new();
        assert!(registry.status("nope").is_none());
        assert!(registry.pause("nope").is_none());
        assert!(registry.resume("nope").is_none());
        assert!(registry.cancel("nope").is_none());
    }

    #[test]
    fn test_registries_are_isolated() {
        let a = JobRegistry::new();
        let b = JobRegistry::new();
        let (id, _) = a.create(10, 1);
        assert!(a.get(&id).is_some());
        assert!(b.get(&id).is_none());
    }

    #[test]
    fn test_summary() {
        let registry = JobRegistry::new();
        let (_, running) = registry.create(10, 1);
        let (_, paused) = registry.create(20, 2);
        let (_, done) = registry.create(30, 3);
        paused.pause();
        done.finish(
            &ProgressEvent {
                batch_index: 3,
                total_batches: 3,
                processed_count: 30,
                batch_len: 0,
                total_responses: 30,
                phase: Phase::Completed,
            },
            JobStatus::Done,
            None,
        );
        let _ = running;

        let summary = registry.summary();
        assert_eq!(summary.total_jobs, 3);
        assert_eq!(summary.active, 1);
        assert_eq!(summary.paused, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.total_responses, 60);
        assert_eq!(summary.responses_done, 30);
    }

    #[tokio::test]
    async fn test_schedule_removal() {
        let registry = JobRegistry::new();
        let (id, _) = registry.create(1, 1);
        registry
            .schedule_removal(&id, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(registry.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_watch_ends_after_cancel() {
        let registry = JobRegistry::new();
        let (id, controller) = registry.create(10, 1);
        let events = registry.watch(&id, Duration::from_millis(5)).unwrap();
        futures::pin_mut!(events);

        let first = events.next().await.unwrap();
        assert!(!first.is_final());

        controller.cancel();
        let mut last = None;
        while let Some(event) = events.next().await {
            last = Some(event);
        }
        let last = last.unwrap();
        assert!(last.is_final());
        assert!(last.snapshot().cancelled);
    }
}
