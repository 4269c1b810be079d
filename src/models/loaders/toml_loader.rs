use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tokio::fs;

use crate::error::{AppResult, FileError};
use crate::models::catalogue::{AuxiliaryConfig, Catalogue, SpecialCodeTable};
use crate::models::job::CodingJob;
use crate::models::lenient::deserialize_number;
use crate::models::response::RawResponse;

/// 作业文件结构
///
/// ```toml
/// question = "¿Por qué recomendaría el producto?"
///
/// [[responses]]
/// id = 101
/// text = "Buen precio"
/// tag = "5"
///
/// [[catalogue]]
/// code = 1000
/// description = "1-2 Negativas"
///
/// [auxiliary]
/// negative = ["1", "2"]
///
/// [special_codes]
/// reserved = [90, 98]
/// keywords = { "NINGUNO" = 96 }
/// ```
#[derive(Debug, Deserialize)]
struct JobFile {
    question: String,
    #[serde(default)]
    responses: Vec<RawResponse>,
    #[serde(default)]
    catalogue: Vec<CatalogueRow>,
    #[serde(default)]
    auxiliary: Option<AuxiliaryConfig>,
    #[serde(default)]
    special_codes: Option<SpecialCodesSection>,
}

#[derive(Debug, Deserialize)]
struct CatalogueRow {
    #[serde(deserialize_with = "deserialize_number")]
    code: i64,
    description: String,
}

#[derive(Debug, Deserialize)]
struct SpecialCodesSection {
    /// 替换默认关键词表，而不是追加
    #[serde(default)]
    replace_defaults: bool,
    #[serde(default)]
    keywords: BTreeMap<String, i64>,
    /// `[min, max]`；空数组表示不保留任何区间
    #[serde(default)]
    reserved: Option<Vec<i64>>,
}

impl SpecialCodesSection {
    fn into_table(self) -> SpecialCodeTable {
        let base = if self.replace_defaults {
            SpecialCodeTable::none()
        } else {
            SpecialCodeTable::default()
        };
        let mut table = self
            .keywords
            .iter()
            .fold(base, |table, (keyword, code)| table.with_keyword(keyword, *code));

        if let Some(bounds) = self.reserved {
            let range = match bounds.as_slice() {
                [min, max] if min <= max => Some(*min..=*max),
                _ => None,
            };
            table = table.with_reserved(range);
        }
        table
    }
}

/// 解析作业 TOML 内容
///
/// `path` 只用于错误信息。
pub fn parse_job(content: &str, path: &str) -> AppResult<CodingJob> {
    let file: JobFile = toml::from_str(content).map_err(|source| FileError::TomlParseFailed {
        path: path.to_string(),
        source,
    })?;

    let responses = file
        .responses
        .into_iter()
        .enumerate()
        .map(|(i, mut response)| {
            if response.row == 0 {
                response.row = i + 1;
            }
            response
        })
        .collect();

    let catalogue = Catalogue::from_rows(file.catalogue.into_iter().map(|r| (r.code, r.description)));

    let mut job = CodingJob::new(file.question, responses, catalogue);
    if let Some(auxiliary) = file.auxiliary {
        job = job.with_auxiliary(auxiliary);
    }
    if let Some(section) = file.special_codes {
        job = job.with_special_codes(section.into_table());
    }
    Ok(job)
}

/// 从 TOML 文件加载编码作业
pub async fn load_job(path: &Path) -> AppResult<CodingJob> {
    let display = path.display().to_string();
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| FileError::ReadFailed {
            path: display.clone(),
            source,
        })?;

    let job = parse_job(&content, &display)?;
    tracing::info!(
        "成功加载作业: {} 个回答, {} 个历史编码",
        job.responses.len(),
        job.catalogue.len()
    );
    Ok(job)
}
