use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 分类服务（LLM）错误
    #[error("分类服务错误: {0}")]
    Classifier(#[from] ClassifierError),
    /// 分类结果解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] ParseError),
    /// 调度器错误
    #[error("调度错误: {0}")]
    Scheduler(#[from] SchedulerError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
}

/// 分类服务错误
///
/// 全部属于"临时性服务错误"：核心层不重试，直接以批次为单位上报给调用方。
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// 请求频率限制
    #[error("分类服务请求频率受限 (模型: {model})，请稍后重试")]
    RateLimited { model: String },
    /// 请求超时
    #[error("与分类服务通信超时 (模型: {model})")]
    Timeout { model: String },
    /// 认证失败
    #[error("分类服务 API 密钥无效或未配置 (模型: {model})")]
    Unauthorized { model: String },
    /// 额度不足
    #[error("分类服务额度不足 (模型: {model})")]
    QuotaExceeded { model: String },
    /// 其他调用失败
    #[error("分类服务调用失败 (模型: {model}): {message}")]
    Unavailable { model: String, message: String },
    /// 返回内容为空
    #[error("分类服务返回内容为空 (模型: {model})")]
    EmptyReply { model: String },
}

/// 分类结果解析错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 修复后仍无法解析的 JSON
    #[error("批次 {batch} 的分类结果无法解析 (已尝试修复): {source}; 内容: {excerpt}")]
    MalformedResponse {
        batch: usize,
        excerpt: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 调度器错误
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// 状态机迭代次数超过上限
    #[error("调度迭代次数超过上限 {limit} (预计批次: {expected_batches})")]
    IterationLimitExceeded { limit: usize, expected_batches: usize },
    /// 分类结果中的验证条目不足（不致命，仅记录）
    #[error("批次 {batch} 的验证条目不足: 期望 {expected}，实际 {received}，缺失部分按有效处理")]
    ValidationGap {
        batch: usize,
        expected: usize,
        received: usize,
    },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 配置值无效
    #[error("配置项 {key} 的值 '{value}' 无效: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建解析失败错误
    pub fn malformed_response(batch: usize, content: &str, source: serde_json::Error) -> Self {
        AppError::Parse(ParseError::MalformedResponse {
            batch,
            excerpt: crate::utils::logging::truncate_text(content, 200),
            source,
        })
    }

    /// 创建通用分类服务错误
    pub fn classifier_unavailable(model: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Classifier(ClassifierError::Unavailable {
            model: model.into(),
            message: message.into(),
        })
    }

    /// 创建配置值无效错误
    pub fn invalid_config(
        key: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        AppError::Config(ConfigError::InvalidValue {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        })
    }

    /// 是否为临时性服务错误（调用方可自行决定是否重试）
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Classifier(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err: AppError = ClassifierError::RateLimited {
            model: "gpt-4o-mini".to_string(),
        }
        .into();
        assert!(err.is_transient());
        assert!(err.to_string().contains("频率受限"));

        let err = AppError::invalid_config("SIMILARITY_THRESHOLD", 1.5, "必须在 0 到 1 之间");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_malformed_response_keeps_excerpt_short() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let content = "x".repeat(500);
        let err = AppError::malformed_response(3, &content, source);
        match err {
            AppError::Parse(ParseError::MalformedResponse { batch, excerpt, .. }) => {
                assert_eq!(batch, 3);
                assert!(excerpt.chars().count() <= 203);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
