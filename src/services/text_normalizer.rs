//! 文本规范化服务 - 业务能力层
//!
//! 只负责"文本规范化 + 描述相似度"能力：
//! - 小写、去除变音符号、合并空白
//! - 去除固定停用词后按空白分词
//! - 计算两条编码描述之间的相似度（0.0 ~ 1.0）

use std::collections::BTreeSet;

use phf::phf_set;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// 西班牙语停用词
static STOP_WORDS: phf::Set<&'static str> = phf_set! {
    "de", "del", "la", "el", "en", "para", "por", "con", "sin", "sobre", "a", "y", "o",
};

/// 包含关系（一方规范化文本是另一方的子串）的相似度
pub const CONTAINMENT_SIMILARITY: f64 = 0.95;
/// 高词汇重叠（交集 / 较短一方词数 >= 0.8）的相似度
pub const OVERLAP_SIMILARITY: f64 = 0.90;
/// 触发高词汇重叠规则的比例
const OVERLAP_RATIO: f64 = 0.8;

/// 小写 + 去除变音符号 + 非字母数字替换为空格 + 合并空白
///
/// 不去除停用词，可用于关键词检测。
pub fn fold_text(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 规范化后的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    /// 去除停用词后的词集合
    pub tokens: BTreeSet<String>,
    /// 去除停用词后按原顺序拼接的文本
    pub joined: String,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// 文本规范化器
#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer;

impl TextNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// 规范化一条描述
    pub fn normalize(&self, text: &str) -> NormalizedText {
        let folded = fold_text(text);
        let words: Vec<&str> = folded
            .split_whitespace()
            .filter(|w| !STOP_WORDS.contains(w))
            .collect();

        NormalizedText {
            tokens: words.iter().map(|w| w.to_string()).collect(),
            joined: words.join(" "),
        }
    }

    /// 计算两条描述的相似度
    ///
    /// 规则依次为：
    /// 1. 任一方去除停用词后为空 → 0.0
    /// 2. 一方规范化文本包含另一方 → 0.95
    /// 3. 交集 / 较短一方词数 >= 0.8 → 0.90
    /// 4. 否则为 Jaccard 系数
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        self.similarity_normalized(&self.normalize(a), &self.normalize(b))
    }

    pub fn similarity_normalized(&self, a: &NormalizedText, b: &NormalizedText) -> f64 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        if a.joined.contains(&b.joined) || b.joined.contains(&a.joined) {
            return CONTAINMENT_SIMILARITY;
        }

        let intersection = a.tokens.intersection(&b.tokens).count();
        let min_len = a.tokens.len().min(b.tokens.len());
        if intersection as f64 / min_len as f64 >= OVERLAP_RATIO {
            return OVERLAP_SIMILARITY;
        }

        let union = a.tokens.union(&b.tokens).count();
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_text() {
        assert_eq!(fold_text("  Está  MUY   rico! "), "esta muy rico");
        assert_eq!(fold_text("Año/Niño"), "ano nino");
        assert_eq!(fold_text("---"), "");
    }

    #[test]
    fn test_normalize_drops_stop_words() {
        let n = TextNormalizer::new().normalize("Versatilidad de uso en comidas");
        assert_eq!(n.joined, "versatilidad uso comidas");
        assert_eq!(n.tokens.len(), 3);

        let only_stop = TextNormalizer::new().normalize("de la y o");
        assert!(only_stop.is_empty());
    }

    #[test]
    fn test_containment_rule() {
        let tn = TextNormalizer::new();
        assert_eq!(
            tn.similarity("Versatilidad de uso", "Versatilidad de uso en comidas"),
            CONTAINMENT_SIMILARITY
        );
        assert_eq!(tn.similarity("PRECIO", "precio"), CONTAINMENT_SIMILARITY);
        assert_eq!(tn.similarity("Fácil de usar", "facil usar"), CONTAINMENT_SIMILARITY);
    }

    #[test]
    fn test_overlap_rule() {
        let tn = TextNormalizer::new();
        // 较短一方的全部词都出现在另一方，但顺序不同，不构成子串
        assert_eq!(
            tn.similarity("buen sabor natural", "natural y buen sabor intenso"),
            OVERLAP_SIMILARITY
        );
    }

    #[test]
    fn test_jaccard_fallback() {
        let tn = TextNormalizer::new();
        let s = tn.similarity("precio alto", "precio bajo");
        assert!((s - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(tn.similarity("Precio", "Sabor"), 0.0);
    }

    #[test]
    fn test_empty_after_normalization() {
        let tn = TextNormalizer::new();
        assert_eq!(tn.similarity("de la", "de la"), 0.0);
        assert_eq!(tn.similarity("", "Precio"), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let tn = TextNormalizer::new();
        let pairs = [
            ("Buen precio", "Precio accesible y bueno"),
            ("Sabor agradable", "Agradable"),
            ("Envase práctico", "Practicidad del envase"),
        ];
        for (a, b) in pairs {
            assert_eq!(tn.similarity(a, b), tn.similarity(b, a));
        }
    }
}
