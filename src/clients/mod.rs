pub mod llm_client;

pub use llm_client::{Classifier, ClassifierResponse, OpenAiClassifier, TokenUsage};
