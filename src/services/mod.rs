//! 业务能力层（Services）
//!
//! 每个服务只描述"我能做什么"，只处理单个批次或单条描述，不关心批次循环。

pub mod assembler;
pub mod classification;
pub mod code_normalizer;
pub mod json_repair;
pub mod text_normalizer;

pub use assembler::ResponseAssembler;
pub use classification::{ClassificationContract, PreparedBatch};
pub use code_normalizer::{CodeNormalizer, Resolution};
pub use text_normalizer::TextNormalizer;
