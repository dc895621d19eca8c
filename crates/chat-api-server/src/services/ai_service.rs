use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::AiConfig;
use crate::services::conversation::{ExtractedInfo, SessionContext};

/// Reply produced by an AI responder for one visitor message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiReply {
    pub message: String,
    /// Raw score, clamped by the store
    #[serde(default)]
    pub lead_score: f64,
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub should_ask_for_lead_info: bool,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub extracted_info: Option<ExtractedInfo>,
}

fn default_intent() -> String {
    "general".to_string()
}

/// Generates the assistant reply for a message given the session context
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AiResponder: Send + Sync {
    async fn respond(&self, message: &str, context: &SessionContext) -> Result<AiReply>;
}

#[derive(Debug, Serialize)]
struct BackendChatRequest<'a> {
    message: &'a str,
    context: &'a SessionContext,
}

/// Calls the external AI backend over HTTP
#[derive(Clone)]
pub struct BackendAiResponder {
    client: Client,
    endpoint: String,
}

impl BackendAiResponder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create AI HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/ai/chat", base_url.trim_end_matches('/')),
        })
    }

    /// None when no backend is configured
    pub fn from_config(config: &AiConfig) -> Result<Option<Self>> {
        match config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Self::new(url, Duration::from_secs(config.timeout_seconds)).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl AiResponder for BackendAiResponder {
    async fn respond(&self, message: &str, context: &SessionContext) -> Result<AiReply> {
        debug!(
            "Calling AI backend: history={}, lead_score={}",
            context.conversation_history.len(),
            context.lead_score
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&BackendChatRequest { message, context })
            .send()
            .await
            .context("Failed to call AI backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("AI backend error: {} - {}", status, body);
        }

        let reply: AiReply = response
            .json()
            .await
            .context("Failed to parse AI backend response")?;

        debug!("AI backend replied: intent={}, lead_score={}", reply.intent, reply.lead_score);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_defaults_for_sparse_backend_payload() {
        let reply: AiReply = serde_json::from_str(r#"{"message":"Hi there"}"#).unwrap();
        assert_eq!(reply.message, "Hi there");
        assert_eq!(reply.intent, "general");
        assert_eq!(reply.lead_score, 0.0);
        assert!(reply.suggested_questions.is_empty());
        assert!(reply.extracted_info.is_none());
    }

    #[test]
    fn test_reply_camel_case_fields() {
        let reply: AiReply = serde_json::from_str(
            r#"{
                "message": "Sure",
                "leadScore": 82.5,
                "intent": "pricing",
                "confidence": 0.9,
                "shouldAskForLeadInfo": true,
                "suggestedQuestions": ["What is your budget?"],
                "industry": "ecommerce",
                "extractedInfo": {"goals": ["grow sales"]}
            }"#,
        )
        .unwrap();
        assert_eq!(reply.lead_score, 82.5);
        assert!(reply.should_ask_for_lead_info);
        assert_eq!(reply.industry.as_deref(), Some("ecommerce"));
        assert_eq!(reply.extracted_info.unwrap().goals, vec!["grow sales"]);
    }

    #[test]
    fn test_backend_from_config() {
        let none = BackendAiResponder::from_config(&AiConfig::default()).unwrap();
        assert!(none.is_none());

        let config = AiConfig {
            base_url: Some("http://localhost:9000/".to_string()),
            timeout_seconds: 3,
        };
        let backend = BackendAiResponder::from_config(&config).unwrap().unwrap();
        assert_eq!(backend.endpoint, "http://localhost:9000/api/ai/chat");
    }
}
