//! 作业控制层
//!
//! - `JobController` - 单个作业的暂停 / 取消标志与进度记录
//! - `JobRegistry` - 按作业 ID 索引的控制器注册表（状态查询、控制调用、状态流）
//! - `ProgressReporter` - 进度事件 → (百分比, 消息)

pub mod controller;
pub mod progress;
pub mod registry;

pub use controller::{JobController, JobSnapshot};
pub use progress::{Phase, ProgressEvent, ProgressReporter};
pub use registry::{JobRegistry, RegistrySummary, StatusEvent};
