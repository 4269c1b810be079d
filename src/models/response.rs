use serde::{Deserialize, Serialize};

use crate::models::lenient::deserialize_id;

/// 单个受访者的开放式回答
///
/// 加载后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    /// 受访者 ID
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// 原始表格中的行号（用于回写）
    #[serde(default)]
    pub row: usize,
    /// 回答文本
    pub text: String,
    /// 辅助标签（例如满意度评分），用于推断类别
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl RawResponse {
    pub fn new(id: impl Into<String>, row: usize, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            row,
            text: text.into(),
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// 是否为空回答或只有占位符号（"-"、"---" 等）
    pub fn is_placeholder(&self) -> bool {
        self.text
            .chars()
            .all(|c| c.is_whitespace() || matches!(c, '-' | '–' | '—' | '_' | '.'))
    }
}

impl std::fmt::Display for RawResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview = crate::utils::logging::truncate_text(&self.text, 60);
        write!(f, "[受访者 #{} 行 {}] {}", self.id, self.row, preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        assert!(RawResponse::new("1", 2, "").is_placeholder());
        assert!(RawResponse::new("1", 2, "   ").is_placeholder());
        assert!(RawResponse::new("1", 2, "-").is_placeholder());
        assert!(RawResponse::new("1", 2, "---").is_placeholder());
        assert!(RawResponse::new("1", 2, " - - ").is_placeholder());
        assert!(!RawResponse::new("1", 2, "Precio").is_placeholder());
        assert!(!RawResponse::new("1", 2, "NS").is_placeholder());
    }
}
