//! 批次调度器 - 编排层
//!
//! ## 职责
//!
//! 驱动单个作业的批次循环，是整个编码流程的状态机：
//!
//! ```text
//! PrepareBatch → Classify → Assemble → Advance ─┐
//!      ↑                                        │
//!      └────────────────────────────────────────┘
//!      ↓ 切片为空          ↓ 分类失败        ↓ 已取消
//!    Done               Failed           Cancelled
//! ```
//!
//! - 每个作业只有一个工作任务，暂停 / 取消只在批次边界（Advance）生效，最后一批完成后不再生效
//! - 一次分类服务调用一旦开始就会完整结束，不做抢占
//! - 失败或取消时返回已经产生的全部决策，已提交的批次不回滚
//! - 迭代次数超过 max(预计批次 × 10, 100) 视为致命错误

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clients::Classifier;
use crate::config::SchedulerSettings;
use crate::control::{JobController, JobRegistry, Phase, ProgressEvent};
use crate::error::{AppError, SchedulerError};
use crate::models::decision::{CodingDecision, Decision};
use crate::models::job::{CodingJob, JobOutcome, JobStats, JobStatus};
use crate::orchestrator::batch_size::{batch_count, choose_batch_size, iteration_limit};
use crate::services::assembler::ResponseAssembler;
use crate::services::classification::{BatchClassification, ClassificationContract, PreparedBatch};
use crate::services::code_normalizer::CodeNormalizer;
use crate::utils::logging;

/// 状态机状态
enum State {
    PrepareBatch,
    Classify(PreparedBatch),
    Assemble(PreparedBatch, BatchClassification),
    Advance,
    Done,
    Cancelled,
    Failed(AppError),
}

/// 单个作业的运行计数
struct Cursor {
    batch_index: usize,
    total_batches: usize,
    processed: usize,
    total_responses: usize,
}

impl Cursor {
    fn event(&self, phase: Phase, batch_len: usize) -> ProgressEvent {
        ProgressEvent {
            batch_index: self.batch_index,
            total_batches: self.total_batches,
            processed_count: self.processed,
            batch_len,
            total_responses: self.total_responses,
            phase,
        }
    }
}

/// 批次调度器
///
/// 不持有作业状态，可以被多个作业共享；每个作业的编号与去重状态只存在于一次 `run` 调用中。
pub struct BatchScheduler {
    classifier: Arc<dyn Classifier>,
    settings: SchedulerSettings,
    contract: ClassificationContract,
    assembler: ResponseAssembler,
}

impl BatchScheduler {
    pub fn new(classifier: Arc<dyn Classifier>, settings: SchedulerSettings) -> Self {
        let contract = ClassificationContract::new(
            settings.max_catalogue_in_prompt,
            settings.max_known_codes_in_prompt,
        );
        let assembler = ResponseAssembler::new(settings.match_confidence);
        Self {
            classifier,
            settings,
            contract,
            assembler,
        }
    }

    /// 作业的批次大小（固定配置优先，否则按策略计算）
    pub fn batch_size_for(&self, job: &CodingJob) -> usize {
        self.settings.batch_size.filter(|size| *size > 0).unwrap_or_else(|| {
            choose_batch_size(
                self.classifier.model_name(),
                job.catalogue.len(),
                job.responses.len(),
            )
        })
    }

    /// 运行一个作业直到结束
    ///
    /// # 返回
    /// 总是返回 `JobOutcome`；失败原因记录在 `error` 中
    pub async fn run(&self, job_id: &str, job: &CodingJob, controller: &JobController) -> JobOutcome {
        let batch_size = self.batch_size_for(job);
        let total_responses = job.responses.len();
        let total_batches = batch_count(total_responses, batch_size);
        let limit = self
            .settings
            .max_iterations
            .unwrap_or_else(|| iteration_limit(total_batches));
        controller.set_total_batches(total_batches);

        info!(
            "🚀 [作业 {}] 开始编码: {} 个回答, 每批 {} 个, 共 {} 批, 历史编码 {} 个",
            job_id,
            total_responses,
            batch_size,
            total_batches,
            job.catalogue.len()
        );

        let mut normalizer = CodeNormalizer::new(
            &job.catalogue,
            &job.special_codes,
            self.settings.similarity_threshold,
        );
        let mut decisions: Vec<CodingDecision> = Vec::with_capacity(total_responses);
        let mut stats = JobStats {
            total_responses,
            total_batches,
            ..Default::default()
        };
        let mut cursor = Cursor {
            batch_index: 0,
            total_batches,
            processed: 0,
            total_responses,
        };

        let mut iterations = 0usize;
        let mut state = State::PrepareBatch;

        let (status, failure) = loop {
            iterations += 1;
            if iterations > limit && !matches!(state, State::Failed(_)) {
                state = State::Failed(
                    SchedulerError::IterationLimitExceeded {
                        limit,
                        expected_batches: total_batches,
                    }
                    .into(),
                );
            }

            state = match state {
                State::PrepareBatch => {
                    let start = cursor.batch_index * batch_size;
                    if start >= total_responses {
                        State::Done
                    } else {
                        let end = (start + batch_size).min(total_responses);
                        logging::log_batch_start(
                            job_id,
                            cursor.batch_index + 1,
                            total_batches,
                            start + 1,
                            end,
                            total_responses,
                        );
                        controller.record(&cursor.event(Phase::Preparing, end - start));
                        let prepared = self.contract.prepare(
                            cursor.batch_index,
                            &job.responses[start..end],
                            &job.special_codes,
                        );
                        State::Classify(prepared)
                    }
                }

                State::Classify(prepared) => {
                    controller.record(&cursor.event(Phase::Classifying, prepared.len()));
                    let known_codes = normalizer.canonical_codes();
                    let result = self
                        .contract
                        .request(
                            self.classifier.as_ref(),
                            &job.question,
                            &prepared,
                            &job.catalogue,
                            &known_codes,
                            normalizer.next_free_code(),
                        )
                        .await;

                    match result {
                        Ok(classification) => {
                            if classification.called {
                                stats.classifier_calls += 1;
                            }
                            if let Some(usage) = classification.usage {
                                stats.prompt_tokens += usage.prompt_tokens;
                                stats.completion_tokens += usage.completion_tokens;
                            }
                            State::Assemble(prepared, classification)
                        }
                        Err(e) => {
                            error!(
                                "❌ [作业 {}] 第 {}/{} 批分类失败: {}",
                                job_id,
                                cursor.batch_index + 1,
                                total_batches,
                                e
                            );
                            State::Failed(e)
                        }
                    }
                }

                State::Assemble(prepared, classification) => {
                    controller.record(&cursor.event(Phase::Assembling, prepared.len()));
                    let batch_decisions = self.assembler.assemble(
                        cursor.batch_index,
                        &classification.proposals,
                        &job.catalogue,
                        job.auxiliary.as_ref(),
                        &mut normalizer,
                    );
                    controller.record(&cursor.event(Phase::Finalizing, prepared.len()));

                    let rejected = batch_decisions
                        .iter()
                        .filter(|d| d.decision == Decision::Reject)
                        .count();
                    logging::log_batch_complete(
                        job_id,
                        cursor.batch_index + 1,
                        batch_decisions.len() - rejected,
                        batch_decisions.len(),
                        normalizer.len(),
                    );

                    cursor.processed += prepared.len();
                    stats.completed_batches += 1;
                    decisions.extend(batch_decisions);
                    State::Advance
                }

                State::Advance => {
                    cursor.batch_index += 1;
                    controller.record(&cursor.event(Phase::BatchDone, 0));

                    // 最后一批之后直接结束，不再响应暂停 / 取消
                    if cursor.batch_index * batch_size >= total_responses {
                        State::Done
                    } else if controller.is_cancelled()
                        || controller
                            .wait_while_paused(self.settings.pause_poll_interval)
                            .await
                    {
                        State::Cancelled
                    } else {
                        State::PrepareBatch
                    }
                }

                State::Done => break (JobStatus::Done, None),
                State::Cancelled => break (JobStatus::Cancelled, None),
                State::Failed(e) => break (JobStatus::Failed, Some(e)),
            };
        };

        normalizer.finalize(&mut decisions);
        stats.count_decisions(&decisions);
        stats.canonical_codes = normalizer.len();

        let final_phase = match status {
            JobStatus::Done => Phase::Completed,
            JobStatus::Cancelled => Phase::Cancelled,
            JobStatus::Failed => Phase::Failed,
        };
        controller.finish(
            &cursor.event(final_phase, 0),
            status,
            failure.as_ref().map(|e| e.to_string()),
        );
        let message = controller.snapshot().message;

        match status {
            JobStatus::Done => info!("✅ [作业 {}] {}", job_id, message),
            JobStatus::Cancelled => warn!(
                "⏹️ [作业 {}] 已取消，保留前 {} 批的 {} 个决策",
                job_id,
                stats.completed_batches,
                decisions.len()
            ),
            JobStatus::Failed => error!(
                "❌ [作业 {}] 失败，保留已完成的 {} 个决策: {}",
                job_id,
                decisions.len(),
                message
            ),
        }

        JobOutcome {
            job_id: job_id.to_string(),
            status,
            decisions,
            canonical_codes: normalizer.canonical_codes(),
            message,
            error: failure,
            stats,
        }
    }
}

/// 在后台任务中运行作业，不阻塞调用方
///
/// # 返回
/// (作业 ID, 控制器, 作业结果句柄)
pub fn spawn_job(
    registry: &JobRegistry,
    scheduler: Arc<BatchScheduler>,
    job: CodingJob,
) -> (String, Arc<JobController>, JoinHandle<JobOutcome>) {
    let batch_size = scheduler.batch_size_for(&job);
    let total_batches = batch_count(job.responses.len(), batch_size);
    let (job_id, controller) = registry.create(job.responses.len(), total_batches);

    let handle = {
        let job_id = job_id.clone();
        let controller = Arc::clone(&controller);
        tokio::spawn(async move { scheduler.run(&job_id, &job, &controller).await })
    };

    (job_id, controller, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ClassifierResponse;
    use crate::error::AppResult;
    use crate::models::catalogue::Catalogue;
    use crate::models::response::RawResponse;
    use async_trait::async_trait;

    struct NeverCalled;

    #[async_trait]
    impl Classifier for NeverCalled {
        fn model_name(&self) -> &str {
            "gpt-4o-mini"
        }

        async fn classify(&self, _system: &str, _user: &str) -> AppResult<ClassifierResponse> {
            panic!("classifier should not be called");
        }
    }

    fn scheduler(batch_size: usize) -> BatchScheduler {
        BatchScheduler::new(
            Arc::new(NeverCalled),
            SchedulerSettings {
                batch_size: Some(batch_size),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_job_completes() {
        let job = CodingJob::new("¿?", vec![], Catalogue::empty());
        let controller = JobController::new("j", 0, 0);
        let outcome = scheduler(10).run("j", &job, &controller).await;

        assert_eq!(outcome.status, JobStatus::Done);
        assert!(outcome.decisions.is_empty());
        assert_eq!(controller.snapshot().progress_pct, 100.0);
    }

    #[tokio::test]
    async fn test_short_circuit_only_batches_skip_classifier() {
        let responses = vec![
            RawResponse::new("1", 1, "---"),
            RawResponse::new("2", 2, "NS"),
            RawResponse::new("3", 3, ""),
        ];
        let job = CodingJob::new("¿?", responses, Catalogue::empty());
        let controller = JobController::new("j", 3, 2);
        let outcome = scheduler(2).run("j", &job, &controller).await;

        assert_eq!(outcome.status, JobStatus::Done);
        assert_eq!(outcome.decisions.len(), 3);
        assert_eq!(outcome.stats.classifier_calls, 0);
        assert_eq!(outcome.stats.completed_batches, 2);
        assert_eq!(outcome.decisions[1].historical_codes, vec![98]);
        assert_eq!(outcome.decisions[2].batch_index, 1);
    }

    fn special_responses(count: usize) -> Vec<RawResponse> {
        (1..=count)
            .map(|i| RawResponse::new(i.to_string(), i, "NS"))
            .collect()
    }

    #[tokio::test]
    async fn test_iteration_limit_fails_job_and_keeps_finished_batches() {
        let s = BatchScheduler::new(
            Arc::new(NeverCalled),
            SchedulerSettings {
                batch_size: Some(2),
                max_iterations: Some(6),
                ..Default::default()
            },
        );
        let job = CodingJob::new("¿?", special_responses(6), Catalogue::empty());
        let controller = JobController::new("j", 6, 3);
        let outcome = s.run("j", &job, &controller).await;

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(matches!(
            outcome.error,
            Some(AppError::Scheduler(SchedulerError::IterationLimitExceeded {
                limit: 6,
                expected_batches: 3
            }))
        ));
        assert_eq!(outcome.decisions.len(), 2);
        assert!(outcome.decisions.iter().all(|d| d.batch_index == 0));
        assert_eq!(outcome.stats.completed_batches, 1);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.status, Some(JobStatus::Failed));
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn test_pause_after_last_batch_does_not_block() {
        let job = CodingJob::new("¿?", special_responses(3), Catalogue::empty());
        let controller = JobController::new("j", 3, 1);
        controller.pause();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            scheduler(10).run("j", &job, &controller),
        )
        .await
        .expect("job should finish without resume");

        assert_eq!(outcome.status, JobStatus::Done);
        assert_eq!(outcome.decisions.len(), 3);
        assert_eq!(controller.snapshot().progress_pct, 100.0);
    }

    #[tokio::test]
    async fn test_cancel_only_applies_between_batches() {
        // 只有一批：取消请求来不及生效，作业完整结束
        let job = CodingJob::new("¿?", special_responses(3), Catalogue::empty());
        let controller = JobController::new("j", 3, 1);
        controller.cancel();
        let outcome = scheduler(10).run("j", &job, &controller).await;
        assert_eq!(outcome.status, JobStatus::Done);
        assert_eq!(outcome.decisions.len(), 3);

        // 两批：第一批结束后停止
        let job = CodingJob::new("¿?", special_responses(4), Catalogue::empty());
        let controller = JobController::new("j", 4, 2);
        controller.cancel();
        let outcome = scheduler(2).run("j", &job, &controller).await;
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(outcome.decisions.len(), 2);
    }

    #[test]
    fn test_batch_size_policy_applies_without_fixed_size() {
        let s = BatchScheduler::new(Arc::new(NeverCalled), SchedulerSettings::default());
        let job = CodingJob::new("¿?", vec![], Catalogue::empty());
        assert_eq!(s.batch_size_for(&job), 10);
    }
}
