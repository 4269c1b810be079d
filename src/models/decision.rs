use serde::{Deserialize, Serialize};

use crate::models::catalogue::Category;
use crate::models::response::RawResponse;

/// 去重后的新编码
///
/// 在一个作业内 ID 唯一且严格递增。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCode {
    pub id: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// 首次出现的批次（从 0 开始）
    pub origin_batch: usize,
}

/// 编码决策类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// 仅历史编码
    #[serde(rename = "historico")]
    Assign,
    /// 仅新编码
    #[serde(rename = "nuevo")]
    New,
    /// 历史编码 + 新编码
    #[serde(rename = "mixto")]
    Mixed,
    /// 拒绝（无效回答或无可用编码）
    #[serde(rename = "rechazar")]
    Reject,
}

impl Decision {
    /// 按历史编码 / 新编码是否存在推导决策
    pub fn from_codes(has_historical: bool, has_new: bool) -> Self {
        match (has_historical, has_new) {
            (true, true) => Decision::Mixed,
            (true, false) => Decision::Assign,
            (false, true) => Decision::New,
            (false, false) => Decision::Reject,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Assign => "historico",
            Decision::New => "nuevo",
            Decision::Mixed => "mixto",
            Decision::Reject => "rechazar",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 决策中引用的新编码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCodeRef {
    pub id: i64,
    pub description: String,
}

/// 单个回答的最终编码结果
///
/// 创建后不可变；`decision != Reject` 当且仅当至少有一个编码。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingDecision {
    pub response_id: String,
    pub row: usize,
    pub text: String,
    pub decision: Decision,
    pub historical_codes: Vec<i64>,
    pub new_codes: Vec<NewCodeRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub batch_index: usize,
}

impl CodingDecision {
    /// 拒绝决策
    pub fn reject(
        response: &RawResponse,
        batch_index: usize,
        category: Option<Category>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            response_id: response.id.clone(),
            row: response.row,
            text: response.text.clone(),
            decision: Decision::Reject,
            historical_codes: Vec::new(),
            new_codes: Vec::new(),
            category,
            reason: Some(reason.into()),
            batch_index,
        }
    }

    /// 由编码推导决策；没有任何编码时为拒绝
    pub fn from_codes(
        response: &RawResponse,
        batch_index: usize,
        category: Option<Category>,
        historical_codes: Vec<i64>,
        new_codes: Vec<NewCodeRef>,
        reason: Option<String>,
    ) -> Self {
        let decision = Decision::from_codes(!historical_codes.is_empty(), !new_codes.is_empty());
        Self {
            response_id: response.id.clone(),
            row: response.row,
            text: response.text.clone(),
            decision,
            historical_codes,
            new_codes,
            category,
            reason,
            batch_index,
        }
    }

    /// 全部编码（历史在前，新编码在后）
    pub fn codes(&self) -> Vec<i64> {
        self.historical_codes
            .iter()
            .copied()
            .chain(self.new_codes.iter().map(|c| c.id))
            .collect()
    }

    /// 导出格式："12; 48; 49"
    pub fn codes_label(&self) -> String {
        self.codes()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_codes() {
        assert_eq!(Decision::from_codes(true, true), Decision::Mixed);
        assert_eq!(Decision::from_codes(true, false), Decision::Assign);
        assert_eq!(Decision::from_codes(false, true), Decision::New);
        assert_eq!(Decision::from_codes(false, false), Decision::Reject);
    }

    #[test]
    fn test_codes_non_empty_iff_not_rejected() {
        let response = RawResponse::new("7", 8, "Buen precio");
        let assigned = CodingDecision::from_codes(&response, 0, None, vec![12], vec![], None);
        assert_eq!(assigned.decision, Decision::Assign);
        assert_eq!(assigned.codes_label(), "12");

        let empty = CodingDecision::from_codes(&response, 0, None, vec![], vec![], None);
        assert_eq!(empty.decision, Decision::Reject);
        assert!(empty.codes().is_empty());

        let mixed = CodingDecision::from_codes(
            &response,
            0,
            None,
            vec![12],
            vec![NewCodeRef {
                id: 48,
                description: "Precio".into(),
            }],
            None,
        );
        assert_eq!(mixed.decision, Decision::Mixed);
        assert_eq!(mixed.codes_label(), "12; 48");
    }

    #[test]
    fn test_decision_serializes_with_export_labels() {
        assert_eq!(serde_json::to_string(&Decision::Assign).unwrap(), "\"historico\"");
        assert_eq!(serde_json::to_string(&Decision::Reject).unwrap(), "\"rechazar\"");
    }
}
