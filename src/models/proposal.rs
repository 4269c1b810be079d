//! 分类服务的回复结构与每个回答的分类提案
//!
//! 回复按显式结构解析：必填字段缺失即解析失败，可选字段使用确定的默认值。
//! 字段名同时接受英文契约名和西班牙语名，数字字段同时接受字符串和数字。

use serde::{Deserialize, Serialize};

use crate::models::lenient::{deserialize_flag, deserialize_id, deserialize_opt_number};
use crate::models::response::RawResponse;

/// 分类服务对一个批次的完整回复
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierReply {
    #[serde(default, alias = "validaciones")]
    pub validations: Vec<ValidationEntry>,
    #[serde(default, alias = "evaluaciones")]
    pub evaluations: Vec<EvaluationEntry>,
    #[serde(default, alias = "analisis", alias = "análisis")]
    pub analysis: Vec<AnalysisEntry>,
}

fn default_true() -> bool {
    true
}

/// 有效性判断
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    #[serde(alias = "respuesta_id", deserialize_with = "deserialize_id")]
    pub response_id: String,
    #[serde(default = "default_true", alias = "valid", deserialize_with = "deserialize_flag")]
    pub es_valida: bool,
    #[serde(default, alias = "reason")]
    pub razon: Option<String>,
}

/// 历史编码评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationEntry {
    #[serde(alias = "respuesta_id", deserialize_with = "deserialize_id")]
    pub response_id: String,
    #[serde(default, alias = "evaluations")]
    pub evaluaciones: Vec<CodeEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEvaluation {
    #[serde(default, alias = "code", deserialize_with = "deserialize_opt_number")]
    pub codigo: Option<i64>,
    #[serde(default, alias = "applies", deserialize_with = "deserialize_flag")]
    pub aplica: bool,
    #[serde(default, alias = "confidence")]
    pub confianza: f64,
}

/// 新概念分析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEntry {
    #[serde(alias = "respuesta_id", deserialize_with = "deserialize_id")]
    pub response_id: String,
    #[serde(
        default = "default_true",
        alias = "fully_covered",
        deserialize_with = "deserialize_flag"
    )]
    pub respuesta_cubierta_completamente: bool,
    #[serde(default, alias = "new_concepts")]
    pub conceptos_nuevos: Vec<NewConcept>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConcept {
    /// 分类服务建议的编号，仅作参考，最终编号由去重器决定
    #[serde(default, alias = "code", deserialize_with = "deserialize_opt_number")]
    pub codigo: Option<i64>,
    #[serde(default, alias = "description")]
    pub descripcion: String,
}

/// 历史编码匹配
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodeMatch {
    pub code: i64,
    pub confidence: f64,
}

/// 单个回答的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    /// 空回答或占位符，未发送给分类服务
    Placeholder,
    /// 命中特殊编码关键词，未发送给分类服务
    Special(i64),
    /// 分类服务给出的结果
    Classified {
        valid: bool,
        reason: Option<String>,
        matches: Vec<CodeMatch>,
        new_concepts: Vec<String>,
        fully_covered: bool,
    },
}

/// 单个回答的分类提案（批次内临时数据）
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationProposal {
    /// 回答在批次内的编号（从 1 开始）
    pub local_id: usize,
    pub response: RawResponse,
    pub outcome: ProposalOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_with_spanish_field_names() {
        let raw = r#"{
            "validaciones": [{"respuesta_id": "1", "es_valida": "si", "razon": "Válida"}],
            "evaluaciones": [{"respuesta_id": 1, "evaluaciones": [{"codigo": "12", "aplica": true, "confianza": 0.9}]}],
            "analisis": [{"respuesta_id": 1, "conceptos_nuevos": [{"codigo": "nuevo", "descripcion": "Precio"}]}]
        }"#;
        let reply: ClassifierReply = serde_json::from_str(raw).unwrap();

        assert_eq!(reply.validations[0].response_id, "1");
        assert!(reply.validations[0].es_valida);
        assert_eq!(reply.evaluations[0].evaluaciones[0].codigo, Some(12));
        assert_eq!(reply.analysis[0].conceptos_nuevos[0].codigo, None);
        assert!(reply.analysis[0].respuesta_cubierta_completamente);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let reply: ClassifierReply = serde_json::from_str(r#"{"validations": []}"#).unwrap();
        assert!(reply.evaluations.is_empty());
        assert!(reply.analysis.is_empty());
    }

    #[test]
    fn test_entry_without_response_id_is_rejected() {
        let raw = r#"{"validations": [{"es_valida": true}]}"#;
        assert!(serde_json::from_str::<ClassifierReply>(raw).is_err());
    }
}
