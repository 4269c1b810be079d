use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::control::progress::{Phase, ProgressEvent, ProgressReporter};
use crate::models::job::JobStatus;

/// 作业控制器的只读快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub phase: Phase,
    pub paused: bool,
    pub cancelled: bool,
    /// 已完成的批次数
    pub batch_index: usize,
    pub total_batches: usize,
    pub responses_done: usize,
    pub total_responses: usize,
    pub progress_pct: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// 状态流是否应当结束
    pub fn is_final(&self) -> bool {
        self.progress_pct >= 100.0 || self.cancelled || self.status.is_some()
    }
}

#[derive(Debug)]
struct ControllerState {
    phase: Phase,
    batch_index: usize,
    total_batches: usize,
    responses_done: usize,
    total_responses: usize,
    progress_pct: f64,
    message: String,
    status: Option<JobStatus>,
    error: Option<String>,
    updated_at: DateTime<Utc>,
}

/// 单个作业的控制与进度记录
///
/// 职责：
/// - 暂停 / 取消标志由外部控制调用修改，工作任务在批次边界协作式检查
/// - 进度计数只由工作任务在批次边界（及批次内子阶段）更新
/// - 未取消时进度百分比单调不减
#[derive(Debug)]
pub struct JobController {
    job_id: String,
    paused: AtomicBool,
    cancelled: AtomicBool,
    state: Mutex<ControllerState>,
}

impl JobController {
    pub fn new(job_id: impl Into<String>, total_responses: usize, total_batches: usize) -> Self {
        Self {
            job_id: job_id.into(),
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(ControllerState {
                phase: Phase::Pending,
                batch_index: 0,
                total_batches,
                responses_done: 0,
                total_responses,
                progress_pct: 0.0,
                message: "Esperando inicio".to_string(),
                status: None,
                error: None,
                updated_at: Utc::now(),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        // 状态只包含普通字段，锁中毒后继续使用内部数据
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 暂停（在当前批次结束后生效）
    pub fn pause(&self) -> JobSnapshot {
        self.paused.store(true, Ordering::SeqCst);
        {
            let mut state = self.lock();
            if state.status.is_none() {
                state.message = "Pausa solicitada".to_string();
                state.updated_at = Utc::now();
            }
        }
        info!("⏸️ [作业 {}] 已请求暂停", self.job_id);
        self.snapshot()
    }

    pub fn resume(&self) -> JobSnapshot {
        self.paused.store(false, Ordering::SeqCst);
        {
            let mut state = self.lock();
            if state.status.is_none() {
                state.message = "Reanudado".to_string();
                state.updated_at = Utc::now();
            }
        }
        info!("▶️ [作业 {}] 已恢复", self.job_id);
        self.snapshot()
    }

    /// 取消（在当前批次结束后生效，暂停中立即生效）
    pub fn cancel(&self) -> JobSnapshot {
        self.cancelled.store(true, Ordering::SeqCst);
        {
            let mut state = self.lock();
            if state.status.is_none() {
                state.message = "Cancelación solicitada".to_string();
                state.updated_at = Utc::now();
            }
        }
        info!("⏹️ [作业 {}] 已请求取消", self.job_id);
        self.snapshot()
    }

    /// 批次数确定后写入（批次大小在作业开始时才决定）
    pub fn set_total_batches(&self, total_batches: usize) {
        let mut state = self.lock();
        state.total_batches = total_batches;
        state.updated_at = Utc::now();
    }

    /// 记录调度器的进度事件
    pub fn record(&self, event: &ProgressEvent) {
        let (pct, message) = ProgressReporter::report(event);
        let mut state = self.lock();
        if state.status.is_some() {
            return;
        }

        state.phase = event.phase;
        state.batch_index = if event.phase == Phase::BatchDone {
            event.batch_index
        } else {
            state.batch_index
        };
        state.total_batches = event.total_batches;
        state.responses_done = event.processed_count;
        state.total_responses = event.total_responses;
        state.progress_pct = if event.phase == Phase::Cancelled {
            pct
        } else {
            state.progress_pct.max(pct)
        };
        state.message = message;
        state.updated_at = Utc::now();
    }

    /// 写入终止状态
    pub fn finish(&self, event: &ProgressEvent, status: JobStatus, error: Option<String>) {
        self.record(event);
        let mut state = self.lock();
        if let Some(error) = &error {
            state.message = format!("{}: {}", state.message, error);
        }
        state.status = Some(status);
        state.error = error;
        state.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock();
        JobSnapshot {
            job_id: self.job_id.clone(),
            phase: state.phase,
            paused: self.is_paused(),
            cancelled: self.is_cancelled(),
            batch_index: state.batch_index,
            total_batches: state.total_batches,
            responses_done: state.responses_done,
            total_responses: state.total_responses,
            progress_pct: state.progress_pct,
            message: state.message.clone(),
            status: state.status,
            error: state.error.clone(),
            updated_at: state.updated_at,
        }
    }

    /// 协作式暂停等待
    ///
    /// 每隔 `poll` 检查一次暂停与取消标志。
    ///
    /// # 返回
    /// 已取消时返回 `true`
    pub async fn wait_while_paused(&self, poll: Duration) -> bool {
        let mut announced = false;
        loop {
            if self.is_cancelled() {
                return true;
            }
            if !self.is_paused() {
                if announced {
                    debug!("[作业 {}] 暂停结束，继续处理", self.job_id);
                }
                return false;
            }
            if !announced {
                info!("⏸️ [作业 {}] 已暂停，等待恢复", self.job_id);
                let mut state = self.lock();
                state.message = "Pausado".to_string();
                state.updated_at = Utc::now();
                announced = true;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(batch_index: usize, processed: usize, phase: Phase) -> ProgressEvent {
        ProgressEvent {
            batch_index,
            total_batches: 5,
            processed_count: processed,
            batch_len: 10,
            total_responses: 50,
            phase,
        }
    }

    #[test]
    fn test_progress_never_decreases() {
        let controller = JobController::new("j1", 50, 5);
        controller.record(&event(1, 10, Phase::Finalizing));
        let high = controller.snapshot().progress_pct;
        controller.record(&event(1, 10, Phase::Preparing));
        assert_eq!(controller.snapshot().progress_pct, high);
    }

    #[test]
    fn test_finish_done_reaches_100() {
        let controller = JobController::new("j1", 50, 5);
        controller.finish(&event(5, 50, Phase::Completed), JobStatus::Done, None);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.progress_pct, 100.0);
        assert_eq!(snapshot.status, Some(JobStatus::Done));
        assert!(snapshot.is_final());

        // 终止后不再接受进度事件
        controller.record(&event(0, 0, Phase::Preparing));
        assert_eq!(controller.snapshot().phase, Phase::Completed);
    }

    #[test]
    fn test_control_flags() {
        let controller = JobController::new("j1", 10, 1);
        assert!(controller.pause().paused);
        assert!(!controller.resume().paused);
        let snapshot = controller.cancel();
        assert!(snapshot.cancelled);
        assert!(snapshot.is_final());
    }

    #[tokio::test]
    async fn test_wait_while_paused_until_resume() {
        let controller = Arc::new(JobController::new("j1", 10, 1));
        controller.pause();

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_while_paused(Duration::from_millis(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        controller.resume();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let controller = Arc::new(JobController::new("j1", 10, 1));
        controller.pause();

        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.wait_while_paused(Duration::from_millis(5)).await })
        };

        controller.cancel();
        assert!(waiter.await.unwrap());
    }
}
