use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::catalogue::{AuxiliaryConfig, Catalogue, SpecialCodeTable};
use crate::models::decision::{CanonicalCode, CodingDecision, Decision};
use crate::models::response::RawResponse;

/// 一个编码作业的全部输入
#[derive(Debug, Clone, PartialEq)]
pub struct CodingJob {
    /// 问题文本
    pub question: String,
    pub responses: Vec<RawResponse>,
    pub catalogue: Catalogue,
    pub auxiliary: Option<AuxiliaryConfig>,
    pub special_codes: SpecialCodeTable,
}

impl CodingJob {
    pub fn new(question: impl Into<String>, responses: Vec<RawResponse>, catalogue: Catalogue) -> Self {
        Self {
            question: question.into(),
            responses,
            catalogue,
            auxiliary: None,
            special_codes: SpecialCodeTable::default(),
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: AuxiliaryConfig) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }

    pub fn with_special_codes(mut self, special_codes: SpecialCodeTable) -> Self {
        self.special_codes = special_codes;
        self
    }
}

/// 作业终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Done,
    Cancelled,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobStatus::Done => "完成",
            JobStatus::Cancelled => "已取消",
            JobStatus::Failed => "失败",
        };
        f.write_str(label)
    }
}

/// 作业统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_responses: usize,
    pub processed_responses: usize,
    pub total_batches: usize,
    pub completed_batches: usize,
    pub classifier_calls: usize,
    pub assigned: usize,
    pub new: usize,
    pub mixed: usize,
    pub rejected: usize,
    pub canonical_codes: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl JobStats {
    /// 按决策类型累计计数
    pub fn count_decisions(&mut self, decisions: &[CodingDecision]) {
        for decision in decisions {
            match decision.decision {
                Decision::Assign => self.assigned += 1,
                Decision::New => self.new += 1,
                Decision::Mixed => self.mixed += 1,
                Decision::Reject => self.rejected += 1,
            }
        }
        self.processed_responses += decisions.len();
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// 作业结果
///
/// 失败或取消时同样携带已经产生的全部决策。
#[derive(Debug, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub decisions: Vec<CodingDecision>,
    pub canonical_codes: Vec<CanonicalCode>,
    /// 人类可读的终止说明
    pub message: String,
    #[serde(skip)]
    pub error: Option<AppError>,
    pub stats: JobStats,
}

impl JobOutcome {
    pub fn is_done(&self) -> bool {
        self.status == JobStatus::Done
    }

    /// 新编码目录：按类别（负面、中性、正面、无类别）再按编号排序
    pub fn new_code_catalogue(&self) -> Vec<CanonicalCode> {
        let mut codes = self.canonical_codes.clone();
        codes.sort_by_key(|c| (c.category.map(|cat| cat.order()).unwrap_or(u8::MAX), c.id));
        codes
    }
}
