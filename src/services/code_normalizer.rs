//! 新编码去重服务 - 业务能力层
//!
//! 负责把整个作业中所有批次提出的"新概念"合并为去重后的规范编码。
//!
//! ## 规则
//! - 先与历史目录比较，相似则直接归入历史编码
//! - 再按插入顺序与已登记的代表描述比较，第一个相似度 >= 阈值的即为合并目标（首个匹配，而非最佳匹配）
//! - 都不匹配时登记为新代表，编号从 `历史最大编码 + 1` 开始依次递增，
//!   跳过已被历史目录或特殊编码占用的编号
//! - 分类服务建议的编号一律忽略

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::models::catalogue::{Catalogue, Category, SpecialCodeTable};
use crate::models::decision::{CanonicalCode, CodingDecision, Decision, NewCodeRef};
use crate::services::text_normalizer::{NormalizedText, TextNormalizer};

/// 一条新概念的归并结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 与历史编码相似，归入该历史编码
    Historical(i64),
    /// 归入（或新建）的规范编码
    Canonical(i64),
}

#[derive(Debug, Clone)]
struct HistoricalEntry {
    code: i64,
    normalized: NormalizedText,
}

#[derive(Debug, Clone)]
struct Representative {
    code: CanonicalCode,
    normalized: NormalizedText,
}

/// 新编码去重器
///
/// 职责：
/// - 作业级状态，跨批次共享，不同作业之间互不影响
/// - 增量处理每个批次的新概念
/// - 作业结束时再做一次全局一致性整理
#[derive(Debug, Clone)]
pub struct CodeNormalizer {
    text: TextNormalizer,
    threshold: f64,
    start_id: i64,
    next_id: i64,
    /// 不可分配的编号（历史编码 + 特殊编码）
    taken: BTreeSet<i64>,
    historical: Vec<HistoricalEntry>,
    representatives: Vec<Representative>,
}

impl CodeNormalizer {
    /// 创建去重器
    ///
    /// # 参数
    /// - `catalogue`: 历史编码目录（参与历史去重，并决定起始编号）
    /// - `specials`: 特殊编码表（保留区间不参与起始编号计算）
    /// - `threshold`: 相似度阈值（默认 0.85）
    pub fn new(catalogue: &Catalogue, specials: &SpecialCodeTable, threshold: f64) -> Self {
        let text = TextNormalizer::new();
        let taken: BTreeSet<i64> = catalogue
            .entries()
            .iter()
            .map(|entry| entry.code)
            .chain(specials.codes())
            .collect();
        let start_id = first_free(&taken, catalogue.next_free_code(specials));
        let historical = catalogue
            .entries()
            .iter()
            .map(|entry| HistoricalEntry {
                code: entry.code,
                normalized: text.normalize(&entry.description),
            })
            .filter(|entry| !entry.normalized.is_empty())
            .collect();

        Self {
            text,
            threshold,
            start_id,
            next_id: start_id,
            taken,
            historical,
            representatives: Vec::new(),
        }
    }

    /// 归并一条新概念
    ///
    /// # 参数
    /// - `description`: 分类服务给出的描述
    /// - `category`: 回答的类别（新建编码或已有编码尚无类别时写入）
    /// - `batch_index`: 当前批次（从 0 开始）
    ///
    /// # 返回
    /// 描述规范化后为空时返回 `None`（该概念被丢弃）
    pub fn resolve(
        &mut self,
        description: &str,
        category: Option<Category>,
        batch_index: usize,
    ) -> Option<Resolution> {
        let description = description.trim();
        let normalized = self.text.normalize(description);
        if normalized.is_empty() {
            debug!("丢弃空描述的新概念: '{}'", description);
            return None;
        }

        if let Some(hit) = self
            .historical
            .iter()
            .find(|h| self.text.similarity_normalized(&normalized, &h.normalized) >= self.threshold)
        {
            debug!("新概念 '{}' 归入历史编码 {}", description, hit.code);
            return Some(Resolution::Historical(hit.code));
        }

        let threshold = self.threshold;
        let text = self.text;
        if let Some(rep) = self
            .representatives
            .iter_mut()
            .find(|r| text.similarity_normalized(&normalized, &r.normalized) >= threshold)
        {
            if rep.code.category.is_none() {
                rep.code.category = category;
            }
            debug!(
                "新概念 '{}' 合并到编码 {} ('{}')",
                description, rep.code.id, rep.code.description
            );
            return Some(Resolution::Canonical(rep.code.id));
        }

        let id = self.next_id;
        self.next_id = first_free(&self.taken, id + 1);
        debug!("🆕 新编码 {}: '{}' (批次 {})", id, description, batch_index + 1);
        self.representatives.push(Representative {
            code: CanonicalCode {
                id,
                description: description.to_string(),
                category,
                origin_batch: batch_index,
            },
            normalized,
        });
        Some(Resolution::Canonical(id))
    }

    /// 已创建的全部规范编码（按编号递增）
    pub fn canonical_codes(&self) -> Vec<CanonicalCode> {
        self.representatives.iter().map(|r| r.code.clone()).collect()
    }

    pub fn get(&self, id: i64) -> Option<&CanonicalCode> {
        self.representatives
            .iter()
            .map(|r| &r.code)
            .find(|c| c.id == id)
    }

    /// 第一个规范编码的编号
    pub fn start_id(&self) -> i64 {
        self.start_id
    }

    /// 下一个可用编号
    pub fn next_free_code(&self) -> i64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.representatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.representatives.is_empty()
    }

    /// 作业结束时的全局整理
    ///
    /// - 新编码描述统一为规范描述，去除重复编号
    /// - 不再有任何新编码且无历史编码的决策显式降级为拒绝
    /// - 检查规范编码两两之间不相似
    pub fn finalize(&self, decisions: &mut [CodingDecision]) {
        let canon: BTreeMap<i64, &CanonicalCode> =
            self.representatives.iter().map(|r| (r.code.id, &r.code)).collect();

        for decision in decisions.iter_mut() {
            if decision.new_codes.is_empty() {
                continue;
            }

            let mut seen = HashSet::new();
            let refreshed: Vec<NewCodeRef> = decision
                .new_codes
                .iter()
                .filter_map(|c| canon.get(&c.id))
                .filter(|c| seen.insert(c.id))
                .map(|c| NewCodeRef {
                    id: c.id,
                    description: c.description.clone(),
                })
                .collect();

            if refreshed.is_empty() {
                let downgraded = if decision.historical_codes.is_empty() {
                    Decision::Reject
                } else {
                    Decision::Assign
                };
                warn!(
                    "受访者 {} 的新编码全部失效，决策 {} → {}",
                    decision.response_id, decision.decision, downgraded
                );
                decision.decision = downgraded;
            } else {
                decision.decision =
                    Decision::from_codes(!decision.historical_codes.is_empty(), true);
            }
            decision.new_codes = refreshed;
        }

        for (i, a) in self.representatives.iter().enumerate() {
            for b in &self.representatives[i + 1..] {
                let score = self.text.similarity_normalized(&a.normalized, &b.normalized);
                if score >= self.threshold {
                    warn!(
                        "⚠️ 规范编码 {} 与 {} 相似度 {:.2} 超过阈值",
                        a.code.id, b.code.id, score
                    );
                }
            }
        }
    }
}

/// 从 `from` 开始第一个未被占用的编号
fn first_free(taken: &BTreeSet<i64>, from: i64) -> i64 {
    let mut id = from;
    while taken.contains(&id) {
        id += 1;
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalogue::CatalogueEntry;
    use crate::models::response::RawResponse;

    fn catalogue_up_to_47() -> Catalogue {
        Catalogue::new(vec![
            CatalogueEntry::new(1, "Buen sabor"),
            CatalogueEntry::new(12, "Textura agradable"),
            CatalogueEntry::new(47, "Envase práctico"),
        ])
    }

    fn normalizer(catalogue: &Catalogue) -> CodeNormalizer {
        CodeNormalizer::new(catalogue, &SpecialCodeTable::default(), 0.85)
    }

    #[test]
    fn test_containment_merge_and_numbering() {
        let mut n = normalizer(&catalogue_up_to_47());
        assert_eq!(n.start_id(), 48);

        assert_eq!(n.resolve("Versatilidad de uso", None, 0), Some(Resolution::Canonical(48)));
        assert_eq!(
            n.resolve("Versatilidad de uso en comidas", None, 0),
            Some(Resolution::Canonical(48))
        );
        assert_eq!(n.resolve("Precio", None, 1), Some(Resolution::Canonical(49)));

        let codes = n.canonical_codes();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].description, "Versatilidad de uso");
        assert_eq!(codes[1].description, "Precio");
        assert_eq!(codes[1].origin_batch, 1);
        assert_eq!(n.next_free_code(), 50);
    }

    #[test]
    fn test_historical_dedup() {
        let mut n = normalizer(&catalogue_up_to_47());
        assert_eq!(
            n.resolve("Tiene buen sabor", None, 0),
            Some(Resolution::Historical(1))
        );
        assert!(n.is_empty());
    }

    #[test]
    fn test_empty_descriptions_are_dropped() {
        let mut n = normalizer(&Catalogue::empty());
        assert_eq!(n.resolve("   ", None, 0), None);
        assert_eq!(n.resolve("de la", None, 0), None);
        assert_eq!(n.next_free_code(), 1);
    }

    #[test]
    fn test_first_match_wins() {
        let mut n = normalizer(&Catalogue::empty());
        n.resolve("sabor dulce", None, 0);
        n.resolve("sabor amargo", None, 0);
        // 与两个代表都满足重叠规则，归入先登记的那个
        assert_eq!(n.resolve("sabor", None, 0), Some(Resolution::Canonical(1)));
    }

    #[test]
    fn test_determinism() {
        let stream = [
            "Buen precio",
            "Precio bueno y accesible",
            "Fácil de preparar",
            "Facil preparar",
            "Rinde mucho",
        ];
        let run = || {
            let mut n = normalizer(&Catalogue::empty());
            let ids: Vec<_> = stream.iter().map(|d| n.resolve(d, None, 0)).collect();
            (ids, n.canonical_codes())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_category_filled_on_merge() {
        let mut n = normalizer(&Catalogue::empty());
        n.resolve("Precio alto", None, 0);
        n.resolve("Precio muy alto", Some(Category::Negative), 1);
        assert_eq!(n.get(1).unwrap().category, Some(Category::Negative));
    }

    #[test]
    fn test_finalize_downgrades_decisions_without_new_codes() {
        let n = normalizer(&Catalogue::empty());
        let response = RawResponse::new("5", 6, "algo");
        let stale = NewCodeRef {
            id: 999,
            description: "Inexistente".into(),
        };

        let mut decisions = vec![
            CodingDecision::from_codes(&response, 0, None, vec![], vec![stale.clone()], None),
            CodingDecision::from_codes(&response, 0, None, vec![3], vec![stale], None),
        ];
        n.finalize(&mut decisions);

        assert_eq!(decisions[0].decision, Decision::Reject);
        assert_eq!(decisions[1].decision, Decision::Assign);
        assert!(decisions[1].new_codes.is_empty());
    }

    /// 每个概念只含一个互不相似的词
    fn distinct_concepts(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("concepto{:03}", i)).collect()
    }

    #[test]
    fn test_allocation_skips_reserved_catalogue_code() {
        let catalogue = Catalogue::new(vec![
            CatalogueEntry::new(10, "Buen sabor"),
            CatalogueEntry::new(95, "Otro motivo"),
        ]);
        let mut n = normalizer(&catalogue);
        assert_eq!(n.start_id(), 11);

        let ids: Vec<i64> = distinct_concepts(90)
            .iter()
            .filter_map(|d| match n.resolve(d, None, 0) {
                Some(Resolution::Canonical(id)) => Some(id),
                _ => None,
            })
            .collect();

        assert_eq!(ids.len(), 90);
        assert!(!ids.contains(&10));
        assert!(!ids.contains(&95));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_allocation_skips_special_keyword_codes() {
        let mut n = normalizer(&catalogue_up_to_47());
        let ids: Vec<i64> = distinct_concepts(60)
            .iter()
            .filter_map(|d| match n.resolve(d, None, 0) {
                Some(Resolution::Canonical(id)) => Some(id),
                _ => None,
            })
            .collect();

        assert_eq!(ids.len(), 60);
        assert_eq!(ids[0], 48);
        for special in [97, 98, 99] {
            assert!(!ids.contains(&special));
        }
        // 48..=96 共 49 个，之后直接跳到 100
        assert_eq!(ids[49], 100);
    }

    #[test]
    fn test_start_id_skips_taken_code() {
        let catalogue = Catalogue::new(vec![
            CatalogueEntry::new(1, "Buen sabor"),
            CatalogueEntry::new(2, "Precio"),
        ]);
        let specials = SpecialCodeTable::default().with_keyword("OTRO", 3);
        let mut n = CodeNormalizer::new(&catalogue, &specials, 0.85);

        assert_eq!(n.start_id(), 4);
        assert_eq!(n.resolve("Aroma intenso", None, 0), Some(Resolution::Canonical(4)));
    }
}
