//! 结果组装服务 - 业务能力层
//!
//! 把一个批次的分类提案（有效性、历史编码匹配、新概念）组装为最终的 `CodingDecision`。
//! 新概念通过作业级的 `CodeNormalizer` 归并，组装器本身不持有状态。

use tracing::debug;

use crate::models::catalogue::{AuxiliaryConfig, Catalogue};
use crate::models::decision::{CodingDecision, Decision, NewCodeRef};
use crate::models::proposal::{ClassificationProposal, CodeMatch, ProposalOutcome};
use crate::services::code_normalizer::{CodeNormalizer, Resolution};

pub const PLACEHOLDER_REASON: &str = "empty/placeholder";
pub const SPECIAL_CODE_REASON: &str = "Código especial";
pub const INVALID_REASON: &str = "Respuesta no válida";
pub const NO_CODES_REASON: &str = "Sin códigos aplicables";
pub const MERGED_AWAY_REASON: &str = "Conceptos nuevos sin código resultante";

/// 结果组装器
pub struct ResponseAssembler {
    match_confidence: f64,
}

impl ResponseAssembler {
    /// `match_confidence`: 历史编码匹配的最低置信度（默认 0.85）
    pub fn new(match_confidence: f64) -> Self {
        Self { match_confidence }
    }

    /// 组装一个批次的全部决策，顺序与提案一致
    pub fn assemble(
        &self,
        batch_index: usize,
        proposals: &[ClassificationProposal],
        catalogue: &Catalogue,
        auxiliary: Option<&AuxiliaryConfig>,
        normalizer: &mut CodeNormalizer,
    ) -> Vec<CodingDecision> {
        proposals
            .iter()
            .map(|p| self.assemble_one(batch_index, p, catalogue, auxiliary, normalizer))
            .collect()
    }

    fn assemble_one(
        &self,
        batch_index: usize,
        proposal: &ClassificationProposal,
        catalogue: &Catalogue,
        auxiliary: Option<&AuxiliaryConfig>,
        normalizer: &mut CodeNormalizer,
    ) -> CodingDecision {
        let response = &proposal.response;
        let category = auxiliary.and_then(|a| a.category_for(response.tag.as_deref()));

        let (valid, reason, matches, new_concepts) = match &proposal.outcome {
            ProposalOutcome::Placeholder => {
                return CodingDecision::reject(response, batch_index, category, PLACEHOLDER_REASON);
            }
            ProposalOutcome::Special(code) => {
                return CodingDecision::from_codes(
                    response,
                    batch_index,
                    category,
                    vec![*code],
                    Vec::new(),
                    Some(SPECIAL_CODE_REASON.to_string()),
                );
            }
            ProposalOutcome::Classified {
                valid,
                reason,
                matches,
                new_concepts,
                ..
            } => (*valid, reason, matches, new_concepts),
        };

        if !valid {
            let reason = reason.clone().unwrap_or_else(|| INVALID_REASON.to_string());
            return CodingDecision::reject(response, batch_index, category, reason);
        }

        let mut historical = self.accepted_matches(matches, catalogue);
        let mut new_codes: Vec<NewCodeRef> = Vec::new();

        for description in new_concepts {
            match normalizer.resolve(description, category, batch_index) {
                Some(Resolution::Historical(code)) => {
                    if !historical.contains(&code) {
                        historical.push(code);
                    }
                }
                Some(Resolution::Canonical(id)) => {
                    if !new_codes.iter().any(|c| c.id == id) {
                        let description = normalizer
                            .get(id)
                            .map(|c| c.description.clone())
                            .unwrap_or_else(|| description.clone());
                        new_codes.push(NewCodeRef { id, description });
                    }
                }
                None => {}
            }
        }

        // 提出了新概念但合并后一个新编码都没有：显式降级
        if !new_concepts.is_empty() && new_codes.is_empty() {
            let downgraded = if historical.is_empty() {
                Decision::Reject
            } else {
                Decision::Assign
            };
            debug!(
                "受访者 {} 的 {} 个新概念全部归入历史编码，决策降级为 {}",
                response.id,
                new_concepts.len(),
                downgraded
            );
            if downgraded == Decision::Reject {
                return CodingDecision::reject(response, batch_index, category, MERGED_AWAY_REASON);
            }
        }

        if historical.is_empty() && new_codes.is_empty() {
            return CodingDecision::reject(response, batch_index, category, NO_CODES_REASON);
        }

        CodingDecision::from_codes(response, batch_index, category, historical, new_codes, reason.clone())
    }

    /// 置信度达标、存在于目录中且不重复的历史编码
    fn accepted_matches(&self, matches: &[CodeMatch], catalogue: &Catalogue) -> Vec<i64> {
        let mut codes = Vec::new();
        for m in matches {
            if m.confidence < self.match_confidence {
                continue;
            }
            if !catalogue.contains(m.code) {
                debug!("忽略目录中不存在的编码 {}", m.code);
                continue;
            }
            if !codes.contains(&m.code) {
                codes.push(m.code);
            }
        }
        codes
    }
}
