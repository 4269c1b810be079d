//! 分类服务客户端 - 基础设施层
//!
//! `Classifier` 是外部文本分类服务（LLM）的调用契约，核心层只依赖这个 trait；
//! `OpenAiClassifier` 基于 `async-openai`，兼容所有 OpenAI 风格的 API 端点。

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, ClassifierError};

/// 单次调用的 token 用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// 分类服务的原始回复
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

impl ClassifierResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: None,
        }
    }
}

/// 外部文本分类服务
#[async_trait]
pub trait Classifier: Send + Sync {
    /// 模型名称（决定批次容量，也用于错误信息）
    fn model_name(&self) -> &str;

    /// 发送一次分类请求
    async fn classify(&self, system_message: &str, user_message: &str) -> AppResult<ClassifierResponse>;
}

/// 基于 async-openai 的分类服务客户端
pub struct OpenAiClassifier {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl OpenAiClassifier {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    fn build_error(&self, message: impl std::fmt::Display) -> AppError {
        AppError::classifier_unavailable(&self.model_name, message.to_string())
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn classify(&self, system_message: &str, user_message: &str) -> AppResult<ClassifierResponse> {
        debug!("调用分类服务，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(system_message)
            .build()
            .map_err(|e| self.build_error(e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| self.build_error(e))?;

        let messages = vec![
            ChatCompletionRequestMessage::System(system_msg),
            ChatCompletionRequestMessage::User(user_msg),
        ];

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model_name)
            .messages(messages)
            .max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            builder.temperature(temperature);
        }
        let request = builder.build().map_err(|e| self.build_error(e))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("分类服务调用失败: {}", e);
            AppError::Classifier(map_service_error(&self.model_name, &e.to_string()))
        })?;

        debug!("分类服务调用成功");

        let usage = response.usage.as_ref().map(|u| TokenUsage {
            prompt_tokens: u64::from(u.prompt_tokens),
            completion_tokens: u64::from(u.completion_tokens),
        });

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ClassifierError::EmptyReply {
                model: self.model_name.clone(),
            })?;

        Ok(ClassifierResponse {
            content: content.trim().to_string(),
            usage,
        })
    }
}

/// 把服务端错误信息映射为带类型的临时性错误
pub fn map_service_error(model: &str, message: &str) -> ClassifierError {
    let lower = message.to_lowercase();
    let model = model.to_string();

    if lower.contains("insufficient_quota") || lower.contains("quota") {
        ClassifierError::QuotaExceeded { model }
    } else if lower.contains("rate limit") || lower.contains("rate_limit") || lower.contains("429") {
        ClassifierError::RateLimited { model }
    } else if lower.contains("invalid_api_key") || lower.contains("401") || lower.contains("unauthorized") {
        ClassifierError::Unauthorized { model }
    } else if lower.contains("timeout") || lower.contains("timed out") {
        ClassifierError::Timeout { model }
    } else {
        ClassifierError::Unavailable {
            model,
            message: message.to_string(),
        }
    }
}
