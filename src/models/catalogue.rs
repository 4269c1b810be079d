//! 历史编码目录、类别与特殊编码表

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use phf::phf_map;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::lenient::deserialize_number;
use crate::services::text_normalizer::fold_text;

/// 编码类别（由辅助标签或目录中的类别标记决定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "negativa")]
    Negative,
    #[serde(rename = "neutral")]
    Neutral,
    #[serde(rename = "positiva")]
    Positive,
}

impl Category {
    /// 导出排序用的顺序：负面 → 中性 → 正面
    pub fn order(self) -> u8 {
        match self {
            Category::Negative => 0,
            Category::Neutral => 1,
            Category::Positive => 2,
        }
    }

    /// 从类别标记文本中识别类别（"1-2 Negativas"、"3 - Neutras" 等）
    pub fn detect(text: &str) -> Option<Self> {
        let folded = fold_text(text);
        if folded.contains("negativ") {
            Some(Category::Negative)
        } else if folded.contains("neutr") {
            Some(Category::Neutral)
        } else if folded.contains("positiv") {
            Some(Category::Positive)
        } else {
            None
        }
    }

    /// 无法从文本识别时，按标记编码所在的千位推断
    fn from_marker_code(code: i64) -> Option<Self> {
        match code {
            1000..=1999 => Some(Category::Negative),
            2000..=2999 => Some(Category::Neutral),
            c if c >= 3000 => Some(Category::Positive),
            _ => None,
        }
    }
}

/// 目录中编码 >= 此值的行是类别标记，不是编码
pub const CATEGORY_MARKER_MIN: i64 = 1000;

/// 历史编码
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    #[serde(deserialize_with = "deserialize_number")]
    pub code: i64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl CatalogueEntry {
    pub fn new(code: i64, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            category: None,
        }
    }
}

/// 某个问题的历史编码目录
///
/// 作业开始时加载一次，之后不可变；可以为空。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalogue {
    entries: Vec<CatalogueEntry>,
}

impl Catalogue {
    pub fn new(entries: Vec<CatalogueEntry>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// 从 (编码, 文本) 行构建目录，识别编码 >= 1000 的类别标记行
    ///
    /// 普通行继承其上方最近一个标记的类别。
    pub fn from_rows<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut current: Option<Category> = None;

        for (code, text) in rows {
            let text = text.into();
            if code >= CATEGORY_MARKER_MIN {
                current = Category::detect(&text).or_else(|| Category::from_marker_code(code));
                match current {
                    Some(category) => debug!("📂 类别标记: {:?} (编码={}, 文本={})", category, code, text),
                    None => warn!("⚠️ 无法识别类别标记: 编码={}, 文本={}", code, text),
                }
                continue;
            }
            entries.push(CatalogueEntry {
                code,
                description: text,
                category: current,
            });
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, code: i64) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    pub fn get(&self, code: i64) -> Option<&CatalogueEntry> {
        self.entries.iter().find(|e| e.code == code)
    }

    /// 新编码的起始编号：最大有效历史编码 + 1（保留区间内的编码不参与计算），目录为空时为 1
    pub fn next_free_code(&self, specials: &SpecialCodeTable) -> i64 {
        self.entries
            .iter()
            .map(|e| e.code)
            .filter(|code| !specials.is_reserved(*code))
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }
}

/// 默认特殊编码关键词（不区分大小写，去除首尾空白后完全匹配）
static DEFAULT_SPECIAL_KEYWORDS: phf::Map<&'static str, i64> = phf_map! {
    "NS" => 98,
    "NO SABE" => 98,
    "NC" => 99,
    "NO CONTESTA" => 99,
    "NA" => 97,
    "N/A" => 97,
};

/// 特殊编码表
///
/// 关键词匹配优先；保留区间只影响新编码起始编号的计算。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialCodeTable {
    keywords: BTreeMap<String, i64>,
    #[serde(default)]
    reserved: Option<RangeInclusive<i64>>,
}

impl Default for SpecialCodeTable {
    fn default() -> Self {
        Self {
            keywords: DEFAULT_SPECIAL_KEYWORDS
                .entries()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            reserved: Some(90..=98),
        }
    }
}

impl SpecialCodeTable {
    /// 不含任何关键词和保留区间的空表
    pub fn none() -> Self {
        Self {
            keywords: BTreeMap::new(),
            reserved: None,
        }
    }

    pub fn with_keyword(mut self, keyword: &str, code: i64) -> Self {
        self.keywords.insert(keyword.trim().to_uppercase(), code);
        self
    }

    pub fn with_reserved(mut self, reserved: Option<RangeInclusive<i64>>) -> Self {
        self.reserved = reserved;
        self
    }

    /// 查找回答对应的特殊编码
    pub fn lookup(&self, text: &str) -> Option<i64> {
        let key = text.trim().to_uppercase();
        if key.is_empty() {
            return None;
        }
        self.keywords.get(&key).copied()
    }

    /// 关键词对应的全部特殊编码
    pub fn codes(&self) -> impl Iterator<Item = i64> + '_ {
        self.keywords.values().copied()
    }

    pub fn is_reserved(&self, code: i64) -> bool {
        self.reserved.as_ref().is_some_and(|r| r.contains(&code))
    }
}

/// 辅助标签分类配置：标签值 → 类别
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryConfig {
    #[serde(default)]
    pub negative: Vec<String>,
    #[serde(default)]
    pub neutral: Vec<String>,
    #[serde(default)]
    pub positive: Vec<String>,
}

impl AuxiliaryConfig {
    pub fn category_for(&self, tag: Option<&str>) -> Option<Category> {
        let tag = tag?.trim();
        if tag.is_empty() {
            return None;
        }
        let hit = |values: &[String]| values.iter().any(|v| v.trim() == tag);
        if hit(&self.negative) {
            Some(Category::Negative)
        } else if hit(&self.neutral) {
            Some(Category::Neutral)
        } else if hit(&self.positive) {
            Some(Category::Positive)
        } else {
            None
        }
    }
}
