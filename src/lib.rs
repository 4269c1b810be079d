//! # Survey Coder
//!
//! 问卷开放题的批量编码引擎：调用外部文本分类服务（LLM）按批次为回答分配数字编码，
//! 同时发现历史目录中不存在的新编码并在整个作业范围内去重。
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `clients/` - 外部分类服务的调用契约
//! - `Classifier` - 核心层唯一依赖的 trait
//! - `OpenAiClassifier` - 基于 async-openai 的实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个批次
//! - `TextNormalizer` - 文本规范化与描述相似度
//! - `CodeNormalizer` - 跨批次新编码去重与编号
//! - `ClassificationContract` - 构建请求、解析并修复回复
//! - `ResponseAssembler` - 组装每个回答的最终决策
//!
//! ### ③ 控制层（Control）
//! - `control/` - 作业控制器、注册表、进度计算
//! - 暂停 / 恢复 / 取消、状态查询与状态流
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/scheduler` - 批次状态机，在批次边界协作式响应控制
//! - `orchestrator/app` - 应用入口：加载作业、后台运行、导出结果
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use clients::{Classifier, ClassifierResponse, OpenAiClassifier, TokenUsage};
pub use config::{Config, SchedulerSettings};
pub use control::{JobController, JobRegistry, JobSnapshot, Phase, ProgressEvent, StatusEvent};
pub use error::{AppError, AppResult};
pub use models::{
    Catalogue, CatalogueEntry, CodingDecision, CodingJob, Decision, JobOutcome, JobStatus,
    RawResponse, SpecialCodeTable,
};
pub use orchestrator::{spawn_job, App, BatchScheduler};
