//! 批次大小策略
//!
//! 每个作业开始时计算一次：
//! - 大上下文模型基础为 15，其余为 10
//! - 目录超过 100 条：减 3（不少于 5）；超过 50 条：减 2（不少于 7）
//! - 回答总数超过 1000：不超过 12

const LARGE_MODEL_BASE: usize = 15;
const STANDARD_MODEL_BASE: usize = 10;

const LARGE_MODEL_PREFIXES: [&str; 5] = ["gpt-4o", "gpt-4-turbo", "gpt-4", "gpt-5", "o1"];

/// 模型是否属于大上下文模型（名称含 `mini` 的一律按普通模型处理）
pub fn is_large_model(model_name: &str) -> bool {
    let name = model_name.trim().to_lowercase();
    if name.contains("mini") {
        return false;
    }
    LARGE_MODEL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// 计算批次大小
pub fn choose_batch_size(model_name: &str, catalogue_len: usize, total_responses: usize) -> usize {
    let mut size = if is_large_model(model_name) {
        LARGE_MODEL_BASE
    } else {
        STANDARD_MODEL_BASE
    };

    if catalogue_len > 100 {
        size = size.saturating_sub(3).max(5);
    } else if catalogue_len > 50 {
        size = size.saturating_sub(2).max(7);
    }

    if total_responses > 1000 {
        size = size.min(12);
    }

    size
}

/// 批次数
pub fn batch_count(total_responses: usize, batch_size: usize) -> usize {
    total_responses.div_ceil(batch_size.max(1))
}

/// 状态机迭代上限：max(预计批次 × 10, 100)
pub fn iteration_limit(expected_batches: usize) -> usize {
    (expected_batches * 10).max(100)
}
