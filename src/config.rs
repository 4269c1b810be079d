use std::time::Duration;

use crate::error::{AppError, AppResult};

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 作业输入文件（TOML）
    pub job_file: String,
    /// 结果输出文件（JSON）
    pub output_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 温度参数，未设置时不发送（部分模型不支持）
    pub llm_temperature: Option<f32>,
    pub llm_max_tokens: u32,
    // --- 批次调度配置 ---
    /// 固定批次大小，0 表示按策略自动计算
    pub batch_size: usize,
    /// 暂停状态下的轮询间隔（毫秒）
    pub pause_poll_interval_ms: u64,
    /// 状态流推送间隔（毫秒）
    pub status_stream_interval_ms: u64,
    /// 作业完成后控制器保留时长（秒）
    pub job_retention_secs: u64,
    /// 提示词中最多包含的历史编码数量
    pub max_catalogue_in_prompt: usize,
    /// 提示词中最多包含的已创建新编码数量
    pub max_known_codes_in_prompt: usize,
    /// 新编码合并的相似度阈值
    pub similarity_threshold: f64,
    /// 历史编码匹配的最低置信度
    pub match_confidence: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job_file: "job.toml".to_string(),
            output_file: "resultados.json".to_string(),
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: Some(0.1),
            llm_max_tokens: 4096,
            batch_size: 0,
            pause_poll_interval_ms: 500,
            status_stream_interval_ms: 500,
            job_retention_secs: 300,
            max_catalogue_in_prompt: 50,
            max_known_codes_in_prompt: 150,
            similarity_threshold: 0.85,
            match_confidence: 0.85,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            job_file: std::env::var("JOB_FILE").unwrap_or(default.job_file),
            output_file: std::env::var("OUTPUT_FILE").unwrap_or(default.output_file),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_temperature: match std::env::var("LLM_TEMPERATURE") {
                Ok(v) if v.trim().is_empty() || v.eq_ignore_ascii_case("none") => None,
                Ok(v) => v.parse().ok().or(default.llm_temperature),
                Err(_) => default.llm_temperature,
            },
            llm_max_tokens: std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.llm_max_tokens),
            batch_size: std::env::var("BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.batch_size),
            pause_poll_interval_ms: std::env::var("PAUSE_POLL_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.pause_poll_interval_ms),
            status_stream_interval_ms: std::env::var("STATUS_STREAM_INTERVAL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.status_stream_interval_ms),
            job_retention_secs: std::env::var("JOB_RETENTION_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.job_retention_secs),
            max_catalogue_in_prompt: std::env::var("MAX_CATALOGUE_IN_PROMPT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_catalogue_in_prompt),
            max_known_codes_in_prompt: std::env::var("MAX_KNOWN_CODES_IN_PROMPT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_known_codes_in_prompt),
            similarity_threshold: std::env::var("SIMILARITY_THRESHOLD").ok().and_then(|v| v.parse().ok()).unwrap_or(default.similarity_threshold),
            match_confidence: std::env::var("MATCH_CONFIDENCE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.match_confidence),
        }
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> AppResult<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(AppError::invalid_config(
                "SIMILARITY_THRESHOLD",
                self.similarity_threshold,
                "必须在 0 到 1 之间",
            ));
        }
        if !(0.0..=1.0).contains(&self.match_confidence) {
            return Err(AppError::invalid_config(
                "MATCH_CONFIDENCE",
                self.match_confidence,
                "必须在 0 到 1 之间",
            ));
        }
        if self.pause_poll_interval_ms == 0 || self.pause_poll_interval_ms > 500 {
            return Err(AppError::invalid_config(
                "PAUSE_POLL_INTERVAL_MS",
                self.pause_poll_interval_ms,
                "必须在 1 到 500 毫秒之间",
            ));
        }
        if self.llm_model_name.trim().is_empty() {
            return Err(AppError::invalid_config("LLM_MODEL_NAME", "", "不能为空"));
        }
        Ok(())
    }

    /// 提取调度核心所需的配置（核心层不直接读取环境变量）
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            batch_size: (self.batch_size > 0).then_some(self.batch_size),
            pause_poll_interval: Duration::from_millis(self.pause_poll_interval_ms),
            max_catalogue_in_prompt: self.max_catalogue_in_prompt,
            max_known_codes_in_prompt: self.max_known_codes_in_prompt,
            similarity_threshold: self.similarity_threshold,
            match_confidence: self.match_confidence,
            max_iterations: None,
        }
    }

    pub fn status_stream_interval(&self) -> Duration {
        Duration::from_millis(self.status_stream_interval_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

/// 调度核心配置
#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    /// 固定批次大小；`None` 时由批次策略决定
    pub batch_size: Option<usize>,
    pub pause_poll_interval: Duration,
    pub max_catalogue_in_prompt: usize,
    pub max_known_codes_in_prompt: usize,
    pub similarity_threshold: f64,
    pub match_confidence: f64,
    /// 状态机迭代上限；`None` 时为 max(批次数 × 10, 100)
    pub max_iterations: Option<usize>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Config::default().scheduler_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let settings = config.scheduler_settings();
        assert_eq!(settings.batch_size, None);
        assert_eq!(settings.pause_poll_interval, Duration::from_millis(500));
        assert_eq!(settings.max_catalogue_in_prompt, 50);
        assert_eq!(settings.max_known_codes_in_prompt, 150);
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let config = Config {
            similarity_threshold: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            pause_poll_interval_ms: 2_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fixed_batch_size() {
        let config = Config {
            batch_size: 7,
            ..Default::default()
        };
        assert_eq!(config.scheduler_settings().batch_size, Some(7));
    }
}
