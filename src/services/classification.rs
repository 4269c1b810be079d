//! 分类契约 - 业务能力层
//!
//! ## 职责
//! - 预处理批次：空回答、占位符、特殊编码关键词直接得出结果，不占用分类服务调用
//! - 构建单个批次的分类请求（问题、历史编码、已创建新编码、下一个可用编号、回答列表）
//! - 解析、修复、校验分类服务的回复，按原始顺序合并为 `ClassificationProposal`
//!
//! 不关心批次循环，也不做编码去重。

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::clients::{Classifier, TokenUsage};
use crate::error::{AppError, AppResult, SchedulerError};
use crate::models::catalogue::{Catalogue, SpecialCodeTable};
use crate::models::decision::CanonicalCode;
use crate::models::proposal::{ClassificationProposal, ClassifierReply, CodeMatch, ProposalOutcome};
use crate::models::response::RawResponse;
use crate::services::json_repair::parse_lenient;

/// 验证条目缺失时的默认理由
pub const DEFAULT_VALID_REASON: &str = "Válida (sin validación específica)";

/// 批次内的一个回答
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedEntry {
    /// 批次内编号（从 1 开始）
    pub local_id: usize,
    pub response: RawResponse,
    /// 已直接得出的结果；`None` 表示需要发送给分类服务
    pub short_circuit: Option<ProposalOutcome>,
}

/// 预处理后的批次
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    pub batch_index: usize,
    pub entries: Vec<PreparedEntry>,
}

impl PreparedBatch {
    /// 需要发送给分类服务的回答
    pub fn pending(&self) -> impl Iterator<Item = &PreparedEntry> {
        self.entries.iter().filter(|e| e.short_circuit.is_none())
    }

    pub fn pending_count(&self) -> usize {
        self.pending().count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 提示词中的编码
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptCode {
    pub code: i64,
    pub description: String,
}

/// 发送给分类服务的结构化请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationRequest {
    pub question: String,
    pub catalogue: Vec<PromptCode>,
    pub known_new_codes: Vec<PromptCode>,
    pub next_free_code: i64,
    /// "<编号>. <回答>"
    pub responses: Vec<String>,
}

/// 一个批次的分类结果
#[derive(Debug, Clone, PartialEq)]
pub struct BatchClassification {
    /// 按批次内原始顺序排列
    pub proposals: Vec<ClassificationProposal>,
    pub usage: Option<TokenUsage>,
    /// 是否实际调用了分类服务
    pub called: bool,
}

/// 分类契约
///
/// 职责：
/// - 只处理单个批次
/// - 不持有作业状态
pub struct ClassificationContract {
    max_catalogue: usize,
    max_known_codes: usize,
}

impl ClassificationContract {
    /// # 参数
    /// - `max_catalogue`: 提示词中最多包含的历史编码数量（前 N 个）
    /// - `max_known_codes`: 提示词中最多包含的已创建新编码数量（最近 M 个）
    pub fn new(max_catalogue: usize, max_known_codes: usize) -> Self {
        Self {
            max_catalogue,
            max_known_codes,
        }
    }

    /// 预处理一个批次
    pub fn prepare(
        &self,
        batch_index: usize,
        responses: &[RawResponse],
        specials: &SpecialCodeTable,
    ) -> PreparedBatch {
        let entries = responses
            .iter()
            .enumerate()
            .map(|(i, response)| {
                let short_circuit = if response.is_placeholder() {
                    debug!("回答为空或占位符，跳过分类: {}", response);
                    Some(ProposalOutcome::Placeholder)
                } else {
                    specials.lookup(&response.text).map(|code| {
                        debug!("回答命中特殊编码 {}: {}", code, response);
                        ProposalOutcome::Special(code)
                    })
                };
                PreparedEntry {
                    local_id: i + 1,
                    response: response.clone(),
                    short_circuit,
                }
            })
            .collect();

        PreparedBatch {
            batch_index,
            entries,
        }
    }

    /// 构建结构化请求
    pub fn build_request(
        &self,
        question: &str,
        batch: &PreparedBatch,
        catalogue: &Catalogue,
        known_codes: &[CanonicalCode],
        next_free_code: i64,
    ) -> ClassificationRequest {
        let skip = known_codes.len().saturating_sub(self.max_known_codes);
        ClassificationRequest {
            question: question.to_string(),
            catalogue: catalogue
                .entries()
                .iter()
                .take(self.max_catalogue)
                .map(|e| PromptCode {
                    code: e.code,
                    description: e.description.clone(),
                })
                .collect(),
            known_new_codes: known_codes[skip..]
                .iter()
                .map(|c| PromptCode {
                    code: c.id,
                    description: c.description.clone(),
                })
                .collect(),
            next_free_code,
            responses: batch
                .pending()
                .map(|e| format!("{}. {}", e.local_id, e.response.text.trim()))
                .collect(),
        }
    }

    /// 渲染提示词，返回 (system_message, user_message)
    pub fn render_prompt(&self, request: &ClassificationRequest) -> (String, String) {
        let system_message = "Eres un experto en codificación de respuestas abiertas de encuestas. \
                              Evalúas cada respuesta contra un catálogo de códigos históricos y \
                              detectas conceptos nuevos que el catálogo no cubre. \
                              Respondes únicamente con JSON válido, sin texto adicional."
            .to_string();

        let format_codes = |codes: &[PromptCode]| {
            if codes.is_empty() {
                "(ninguno)".to_string()
            } else {
                codes
                    .iter()
                    .map(|c| format!("  {}: {}", c.code, c.description))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        let user_message = format!(
            r#"PREGUNTA: {question}

CATÁLOGO DE CÓDIGOS HISTÓRICOS:
{catalogue}

CÓDIGOS NUEVOS YA CREADOS EN ESTE PROCESO (reutilízalos, no los dupliques):
{known}

PRÓXIMO CÓDIGO DISPONIBLE: {next}

RESPUESTAS A CODIFICAR:
{responses}

INSTRUCCIONES:
1. Valida cada respuesta: es inválida si no responde la pregunta o no tiene contenido interpretable.
2. Para cada respuesta válida, evalúa qué códigos históricos aplican, con una confianza entre 0 y 1.
3. Si la respuesta contiene conceptos que ningún código cubre, propón conceptos nuevos con una descripción breve y general.
4. Usa como response_id el número que precede a cada respuesta.

FORMATO DE SALIDA (JSON):
{{
  "validations": [{{"response_id": 1, "es_valida": true, "razon": "..."}}],
  "evaluations": [{{"response_id": 1, "evaluaciones": [{{"codigo": 12, "aplica": true, "confianza": 0.92}}]}}],
  "analysis": [{{"response_id": 1, "respuesta_cubierta_completamente": false, "conceptos_nuevos": [{{"codigo": {next}, "descripcion": "..."}}]}}]
}}"#,
            question = request.question,
            catalogue = format_codes(&request.catalogue),
            known = format_codes(&request.known_new_codes),
            next = request.next_free_code,
            responses = request.responses.join("\n"),
        );

        (system_message, user_message)
    }

    /// 解析分类服务回复：直接解析，失败后修复再解析
    pub fn parse_reply(&self, batch_index: usize, content: &str) -> AppResult<ClassifierReply> {
        parse_lenient(content)
            .map_err(|source| AppError::malformed_response(batch_index + 1, content, source))
    }

    /// 对一个批次调用分类服务并得出全部提案
    ///
    /// 所有回答都已直接得出结果时不调用分类服务。
    pub async fn request(
        &self,
        classifier: &dyn Classifier,
        question: &str,
        batch: &PreparedBatch,
        catalogue: &Catalogue,
        known_codes: &[CanonicalCode],
        next_free_code: i64,
    ) -> AppResult<BatchClassification> {
        if batch.pending_count() == 0 {
            debug!("批次 {} 无需调用分类服务", batch.batch_index + 1);
            return Ok(BatchClassification {
                proposals: self.merge(batch, &ClassifierReply::default()),
                usage: None,
                called: false,
            });
        }

        let request = self.build_request(question, batch, catalogue, known_codes, next_free_code);
        let (system_message, user_message) = self.render_prompt(&request);
        let response = classifier.classify(&system_message, &user_message).await?;
        let reply = self.parse_reply(batch.batch_index, &response.content)?;

        Ok(BatchClassification {
            proposals: self.merge(batch, &reply),
            usage: response.usage,
            called: true,
        })
    }

    /// 把直接得出的结果与分类服务回复按原始顺序合并
    ///
    /// 回复条目先按 response_id 匹配，再按发送顺序中的位置匹配；
    /// 缺失的验证条目按"有效、无具体理由"处理。
    pub fn merge(&self, batch: &PreparedBatch, reply: &ClassifierReply) -> Vec<ClassificationProposal> {
        let sent_ids: HashSet<String> = batch.pending().map(|e| e.local_id.to_string()).collect();
        let mut position = 0;
        let mut defaulted = 0;

        let proposals: Vec<ClassificationProposal> = batch
            .entries
            .iter()
            .map(|entry| {
                let outcome = match &entry.short_circuit {
                    Some(outcome) => outcome.clone(),
                    None => {
                        let key = entry.local_id.to_string();
                        let validation = pick(&reply.validations, |v| &v.response_id, &key, position, &sent_ids);
                        let evaluation = pick(&reply.evaluations, |v| &v.response_id, &key, position, &sent_ids);
                        let analysis = pick(&reply.analysis, |v| &v.response_id, &key, position, &sent_ids);
                        position += 1;

                        let (valid, reason) = match validation {
                            Some(v) => (v.es_valida, v.razon.clone()),
                            None => {
                                defaulted += 1;
                                (true, Some(DEFAULT_VALID_REASON.to_string()))
                            }
                        };

                        let matches = evaluation
                            .map(|e| {
                                e.evaluaciones
                                    .iter()
                                    .filter(|ev| ev.aplica)
                                    .filter_map(|ev| {
                                        ev.codigo.map(|code| CodeMatch {
                                            code,
                                            confidence: ev.confianza,
                                        })
                                    })
                                    .collect()
                            })
                            .unwrap_or_default();

                        let (new_concepts, fully_covered) = analysis
                            .map(|a| {
                                let concepts = a
                                    .conceptos_nuevos
                                    .iter()
                                    .map(|c| c.descripcion.trim().to_string())
                                    .filter(|d| !d.is_empty())
                                    .collect();
                                (concepts, a.respuesta_cubierta_completamente)
                            })
                            .unwrap_or((Vec::new(), true));

                        ProposalOutcome::Classified {
                            valid,
                            reason,
                            matches,
                            new_concepts,
                            fully_covered,
                        }
                    }
                };

                ClassificationProposal {
                    local_id: entry.local_id,
                    response: entry.response.clone(),
                    outcome,
                }
            })
            .collect();

        if defaulted > 0 {
            let gap = SchedulerError::ValidationGap {
                batch: batch.batch_index + 1,
                expected: sent_ids.len(),
                received: sent_ids.len() - defaulted,
            };
            warn!("⚠️ {}", gap);
        }

        proposals
    }
}

/// 先按 ID 查找条目，找不到时取同一位置上 ID 不属于其他已发送回答的条目
fn pick<'a, T>(
    entries: &'a [T],
    id_of: impl Fn(&T) -> &String,
    key: &str,
    position: usize,
    sent_ids: &HashSet<String>,
) -> Option<&'a T> {
    entries.iter().find(|e| id_of(*e) == key).or_else(|| {
        entries
            .get(position)
            .filter(|e| !sent_ids.contains(id_of(*e).as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalogue::CatalogueEntry;

    fn contract() -> ClassificationContract {
        ClassificationContract::new(50, 150)
    }

    fn responses(texts: &[&str]) -> Vec<RawResponse> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| RawResponse::new((i + 100).to_string(), i + 2, *t))
            .collect()
    }

    #[test]
    fn test_prepare_short_circuits() {
        let batch = contract().prepare(
            0,
            &responses(&["Buen precio", "---", "NS", "  "]),
            &SpecialCodeTable::default(),
        );

        assert_eq!(batch.len(), 4);
        assert_eq!(batch.pending_count(), 1);
        assert_eq!(batch.entries[1].short_circuit, Some(ProposalOutcome::Placeholder));
        assert_eq!(batch.entries[2].short_circuit, Some(ProposalOutcome::Special(98)));
        assert_eq!(batch.entries[3].short_circuit, Some(ProposalOutcome::Placeholder));
    }

    #[test]
    fn test_build_request_limits_context() {
        let c = ClassificationContract::new(2, 1);
        let batch = c.prepare(0, &responses(&["Rico", "-", "Barato"]), &SpecialCodeTable::default());
        let catalogue = Catalogue::new(vec![
            CatalogueEntry::new(1, "Sabor"),
            CatalogueEntry::new(2, "Precio"),
            CatalogueEntry::new(3, "Envase"),
        ]);
        let known = vec![
            CanonicalCode {
                id: 4,
                description: "Aroma".into(),
                category: None,
                origin_batch: 0,
            },
            CanonicalCode {
                id: 5,
                description: "Color".into(),
                category: None,
                origin_batch: 0,
            },
        ];

        let request = c.build_request("¿Por qué?", &batch, &catalogue, &known, 6);
        assert_eq!(request.catalogue.len(), 2);
        assert_eq!(request.known_new_codes.len(), 1);
        assert_eq!(request.known_new_codes[0].code, 5);
        assert_eq!(request.responses, vec!["1. Rico".to_string(), "3. Barato".to_string()]);

        let (_, user) = c.render_prompt(&request);
        assert!(user.contains("PRÓXIMO CÓDIGO DISPONIBLE: 6"));
        assert!(user.contains("3. Barato"));
    }

    #[test]
    fn test_parse_reply_with_repair() {
        let content = "```json\n{'validations': [{'response_id': 1, 'es_valida': true,},],}\n```";
        let reply = contract().parse_reply(0, content).unwrap();
        assert_eq!(reply.validations.len(), 1);
    }

    #[test]
    fn test_parse_reply_failure_is_malformed() {
        let err = contract().parse_reply(2, "lo siento, no puedo").unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
        assert!(err.to_string().contains("批次 3"));
    }

    #[test]
    fn test_merge_keeps_original_order_and_defaults_gaps() {
        let c = contract();
        let batch = c.prepare(
            0,
            &responses(&["Buen precio", "---", "Rico y barato"]),
            &SpecialCodeTable::default(),
        );
        let reply: ClassifierReply = serde_json::from_str(
            r#"{
                "validations": [{"response_id": 1, "es_valida": true, "razon": "ok"}],
                "evaluations": [
                    {"response_id": 3, "evaluaciones": [
                        {"codigo": 2, "aplica": true, "confianza": 0.9},
                        {"codigo": 1, "aplica": false, "confianza": 0.95}
                    ]}
                ],
                "analysis": [{"response_id": 3, "conceptos_nuevos": [{"descripcion": " Rinde mucho "}, {"descripcion": ""}]}]
            }"#,
        )
        .unwrap();

        let proposals = c.merge(&batch, &reply);
        assert_eq!(proposals.len(), 3);
        assert_eq!(proposals[1].outcome, ProposalOutcome::Placeholder);

        match &proposals[2].outcome {
            ProposalOutcome::Classified {
                valid,
                reason,
                matches,
                new_concepts,
                ..
            } => {
                assert!(*valid);
                assert_eq!(reason.as_deref(), Some(DEFAULT_VALID_REASON));
                assert_eq!(matches, &vec![CodeMatch { code: 2, confidence: 0.9 }]);
                assert_eq!(new_concepts, &vec!["Rinde mucho".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_merge_falls_back_to_position() {
        let c = contract();
        let batch = c.prepare(0, &responses(&["Rico", "Caro"]), &SpecialCodeTable::default());
        let reply: ClassifierReply = serde_json::from_str(
            r#"{"validations": [
                {"response_id": "a", "es_valida": true},
                {"response_id": "b", "es_valida": false, "razon": "No responde"}
            ]}"#,
        )
        .unwrap();

        let proposals = c.merge(&batch, &reply);
        match &proposals[1].outcome {
            ProposalOutcome::Classified { valid, reason, .. } => {
                assert!(!*valid);
                assert_eq!(reason.as_deref(), Some("No responde"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
