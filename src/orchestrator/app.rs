//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：创建分类服务客户端、调度器与作业注册表
//! 2. **加载作业**：读取作业 TOML 文件
//! 3. **后台运行**：作业在独立任务中运行，主任务只负责监控与控制
//! 4. **进度输出**：订阅状态流并输出日志
//! 5. **协作式取消**：收到 Ctrl-C 时请求取消，当前批次结束后停止
//! 6. **结果导出**：把作业结果（含部分结果）写为 JSON
//! 7. **保留期**：结束的作业在 `JOB_RETENTION_SECS` 内仍可通过 `registry()` 查询，之后移除

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::clients::{Classifier, OpenAiClassifier};
use crate::config::Config;
use crate::control::JobRegistry;
use crate::error::FileError;
use crate::models::decision::CanonicalCode;
use crate::models::job::JobOutcome;
use crate::models::loaders::load_job;
use crate::orchestrator::scheduler::{spawn_job, BatchScheduler};
use crate::utils::logging;

/// 导出文件结构
#[derive(Serialize)]
struct ExportDocument<'a> {
    #[serde(flatten)]
    outcome: &'a JobOutcome,
    new_code_catalogue: Vec<CanonicalCode>,
    /// 按原始行号回写的编码列
    coded_rows: Vec<CodedRow<'a>>,
}

#[derive(Serialize)]
struct CodedRow<'a> {
    row: usize,
    response_id: &'a str,
    codes: String,
}

/// 应用主结构
pub struct App {
    config: Config,
    scheduler: Arc<BatchScheduler>,
    registry: JobRegistry,
}

impl App {
    /// 初始化应用（使用 OpenAI 兼容的分类服务）
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        logging::log_startup(&config);

        let classifier: Arc<dyn Classifier> = Arc::new(OpenAiClassifier::new(&config));
        Ok(Self::with_classifier(config, classifier))
    }

    /// 使用指定的分类服务创建应用
    pub fn with_classifier(config: Config, classifier: Arc<dyn Classifier>) -> Self {
        let scheduler = Arc::new(BatchScheduler::new(classifier, config.scheduler_settings()));
        Self {
            config,
            scheduler,
            registry: JobRegistry::new(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<JobOutcome> {
        info!("\n📁 正在加载作业: {}", self.config.job_file);
        let job = load_job(Path::new(&self.config.job_file)).await?;
        if job.responses.is_empty() {
            warn!("⚠️ 作业中没有回答");
        }

        let (job_id, controller, handle) =
            spawn_job(&self.registry, Arc::clone(&self.scheduler), job);

        let monitor = self.spawn_progress_logger(&job_id);

        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⏹️ 收到 Ctrl-C，当前批次结束后停止（已完成的结果会保存）");
                controller.cancel();
            }
        });

        let outcome = handle.await?;
        interrupt.abort();

        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }

        self.write_outcome(&outcome).await?;
        logging::print_final_stats(&outcome, &self.config.output_file);

        // 保留期只对长期持有 App 的调用方有效；命令行进程在 run 返回后即退出
        let _ = self
            .registry
            .schedule_removal(&job_id, self.config.job_retention());

        Ok(outcome)
    }

    /// 订阅状态流并输出进度日志（只在消息变化时输出）
    fn spawn_progress_logger(&self, job_id: &str) -> Option<tokio::task::JoinHandle<()>> {
        let events = self
            .registry
            .watch(job_id, self.config.status_stream_interval())?;
        let job_id = job_id.to_string();

        Some(tokio::spawn(async move {
            futures::pin_mut!(events);
            let mut last_message = String::new();
            while let Some(event) = events.next().await {
                let snapshot = event.snapshot();
                if snapshot.message != last_message {
                    info!(
                        "📈 [作业 {}] {:.1}% - {}",
                        job_id, snapshot.progress_pct, snapshot.message
                    );
                    last_message = snapshot.message.clone();
                }
            }
        }))
    }

    /// 写出作业结果
    async fn write_outcome(&self, outcome: &JobOutcome) -> Result<()> {
        let document = ExportDocument {
            outcome,
            new_code_catalogue: outcome.new_code_catalogue(),
            coded_rows: outcome
                .decisions
                .iter()
                .map(|d| CodedRow {
                    row: d.row,
                    response_id: &d.response_id,
                    codes: d.codes_label(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let path = &self.config.output_file;
        tokio::fs::write(path, json)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: path.clone(),
                source,
            })?;
        info!("💾 结果已写入: {}", path);
        Ok(())
    }
}
