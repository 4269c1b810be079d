//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责作业调度与批次循环，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `app` - 应用入口
//! - 管理应用生命周期（初始化、运行、导出）
//! - 后台运行作业，订阅状态流输出进度
//! - Ctrl-C 时协作式取消
//!
//! ### `scheduler` - 批次调度器
//! - 批次状态机（准备 → 分类 → 组装 → 推进）
//! - 在批次边界检查暂停 / 取消
//! - 失败与取消时保留部分结果
//!
//! ### `batch_size` - 批次大小策略
//!
//! ## 层次关系
//!
//! ```text
//! app (加载作业、监控、导出)
//!     ↓
//! scheduler (处理 Vec<RawResponse>，按批次循环)
//!     ↓
//! services (能力层：classification / assembler / code_normalizer)
//!     ↓
//! clients (基础设施：Classifier)
//! ```

pub mod app;
pub mod batch_size;
pub mod scheduler;

// 重新导出主要类型
pub use app::App;
pub use scheduler::{spawn_job, BatchScheduler};
