/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::job::JobOutcome;

/// 初始化 tracing 订阅器
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info。
/// 重复调用不会报错（测试中可多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 问卷开放题批量编码");
    info!("🤖 模型: {}", config.llm_model_name);
    if config.batch_size > 0 {
        info!("📦 固定批次大小: {}", config.batch_size);
    } else {
        info!("📦 批次大小: 自动");
    }
    info!("📄 作业文件: {}", config.job_file);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `job_id`: 作业 ID
/// - `batch_num`: 批次编号（从 1 开始）
/// - `total_batches`: 批次总数
/// - `start`: 起始回答编号
/// - `end`: 结束回答编号
/// - `total`: 回答总数
pub fn log_batch_start(
    job_id: &str,
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("{}", "─".repeat(60));
    info!("📦 [作业 {}] 开始处理第 {}/{} 批", job_id, batch_num, total_batches);
    info!("📄 本批回答: {}-{} / 共 {} 个", start, end, total);
}

/// 记录批次完成信息
pub fn log_batch_complete(
    job_id: &str,
    batch_num: usize,
    coded: usize,
    total: usize,
    canonical_codes: usize,
) {
    info!(
        "✓ [作业 {}] 第 {} 批完成: 已编码 {}/{}，累计新编码 {} 个",
        job_id, batch_num, coded, total, canonical_codes
    );
}

/// 打印最终统计信息
pub fn print_final_stats(outcome: &JobOutcome, output_file: &str) {
    let stats = &outcome.stats;
    info!("\n{}", "=".repeat(60));
    info!("📊 作业 {} 结束: {}", outcome.job_id, outcome.status);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📄 已处理: {}/{}", stats.processed_responses, stats.total_responses);
    info!("📦 批次: {}/{}", stats.completed_batches, stats.total_batches);
    info!("🏷️ 历史: {}  新: {}  混合: {}", stats.assigned, stats.new, stats.mixed);
    info!("❌ 拒绝: {}", stats.rejected);
    info!("🆕 新编码: {}", stats.canonical_codes);
    info!(
        "🔢 Token: {} (提示 {} / 生成 {})，调用 {} 次",
        stats.total_tokens(),
        stats.prompt_tokens,
        stats.completion_tokens,
        stats.classifier_calls
    );
    info!("{}", "=".repeat(60));
    info!("\n结果已保存至: {}", output_file);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("Versatilidad", 5), "Versa...");
        assert_eq!(truncate_text("Año", 5), "Año");
    }
}
