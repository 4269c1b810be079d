//! 进度计算
//!
//! 调度器直接传递结构化的 `ProgressEvent`，`ProgressReporter` 只根据事件计算
//! (进度百分比, 提示消息)，不修改任何状态。

use serde::{Deserialize, Serialize};

/// 作业所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// 作业已创建，尚未开始
    Pending,
    Preparing,
    Classifying,
    Assembling,
    Finalizing,
    /// 批次边界
    BatchDone,
    Completed,
    Cancelled,
    Failed,
}

impl Phase {
    /// 批次内子阶段的权重
    pub fn weight(self) -> Option<f64> {
        match self {
            Phase::Preparing => Some(0.1),
            Phase::Classifying => Some(0.3),
            Phase::Assembling => Some(0.6),
            Phase::Finalizing => Some(0.9),
            _ => None,
        }
    }
}

/// 调度器发出的进度事件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    /// 当前批次（从 0 开始）
    pub batch_index: usize,
    pub total_batches: usize,
    /// 已完成批次中的回答数
    pub processed_count: usize,
    /// 当前批次的回答数
    pub batch_len: usize,
    pub total_responses: usize,
    pub phase: Phase,
}

/// 完成前的进度上限，100% 只在完成时出现
const IN_FLIGHT_CAP: f64 = 0.98;

/// 进度计算器（纯函数）
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressReporter;

impl ProgressReporter {
    /// 计算 (进度百分比 0~100, 提示消息)
    pub fn report(event: &ProgressEvent) -> (f64, String) {
        let total = event.total_responses.max(1) as f64;
        let batch_no = event.batch_index + 1;
        let of = event.total_batches;

        match event.phase {
            Phase::Pending => (0.0, "Esperando inicio".to_string()),
            Phase::Completed => (
                100.0,
                format!("Completado: {} respuestas procesadas", event.processed_count),
            ),
            Phase::BatchDone => {
                let pct = (event.processed_count as f64 / total).min(IN_FLIGHT_CAP) * 100.0;
                (
                    pct,
                    format!(
                        "Lote {}/{} completado ({}/{} respuestas)",
                        event.batch_index.min(of),
                        of,
                        event.processed_count,
                        event.total_responses
                    ),
                )
            }
            Phase::Cancelled => {
                let pct = (event.processed_count as f64 / total).min(1.0) * 100.0;
                (
                    pct,
                    format!(
                        "Cancelado: {}/{} respuestas procesadas",
                        event.processed_count, event.total_responses
                    ),
                )
            }
            Phase::Failed => {
                let pct = (event.processed_count as f64 / total).min(1.0) * 100.0;
                (pct, format!("Error en lote {}/{}", batch_no, of))
            }
            phase => {
                let weight = phase.weight().unwrap_or(0.0);
                let done = event.processed_count as f64 + event.batch_len as f64 * weight;
                let pct = (done / total).min(IN_FLIGHT_CAP) * 100.0;
                let action = match phase {
                    Phase::Preparing => "Preparando",
                    Phase::Classifying => "Clasificando",
                    Phase::Assembling => "Ensamblando",
                    _ => "Finalizando",
                };
                (pct, format!("{} lote {}/{}", action, batch_no, of))
            }
        }
    }
}
