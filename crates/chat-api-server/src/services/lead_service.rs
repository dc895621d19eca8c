use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::LeadsConfig;
use crate::services::conversation::{Session, TurnRole};

/// Lead payload handed to the backend CRM
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub session_id: String,
    pub name: Option<String>,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub industry: Option<String>,
    pub lead_score: u8,
    pub goals: Vec<String>,
    pub source: String,
    /// Last visitor messages, newest last
    pub transcript_excerpt: Vec<String>,
}

impl LeadRecord {
    const EXCERPT_LEN: usize = 5;

    /// None when the session has no email to follow up on
    pub fn from_session(session: &Session) -> Option<Self> {
        let ctx = &session.context;
        let email = ctx.extracted_info.email.clone().filter(|e| !e.trim().is_empty())?;

        let mut transcript_excerpt: Vec<String> = ctx
            .conversation_history
            .iter()
            .rev()
            .filter(|t| t.role == TurnRole::User)
            .take(Self::EXCERPT_LEN)
            .map(|t| t.content.clone())
            .collect();
        transcript_excerpt.reverse();

        Some(Self {
            session_id: session.session_id.clone(),
            name: ctx.extracted_info.name.clone(),
            email,
            company: ctx.extracted_info.company.clone(),
            phone: ctx.extracted_info.phone.clone(),
            industry: ctx.industry.clone(),
            lead_score: ctx.lead_score,
            goals: ctx.extracted_info.goals.clone(),
            source: "chat".to_string(),
            transcript_excerpt,
        })
    }
}

/// Persists a lead and returns its id
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait LeadSink: Send + Sync {
    async fn create_lead(&self, lead: &LeadRecord) -> Result<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLeadResponse {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    lead_id: Option<serde_json::Value>,
}

impl CreateLeadResponse {
    /// Backends return the id either as a string or a number
    fn into_lead_id(self) -> Option<String> {
        [self.id, self.lead_id]
            .into_iter()
            .flatten()
            .find_map(|value| match value {
                serde_json::Value::String(s) if !s.is_empty() => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }
}

#[derive(Clone)]
pub struct BackendLeadClient {
    client: Client,
    endpoint: String,
}

impl BackendLeadClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create lead HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/leads", base_url.trim_end_matches('/')),
        })
    }

    /// None when lead hand-off is disabled or no backend is configured
    pub fn from_config(config: &LeadsConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        match config.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Self::new(url, Duration::from_secs(config.timeout_seconds)).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl LeadSink for BackendLeadClient {
    async fn create_lead(&self, lead: &LeadRecord) -> Result<String> {
        debug!("Creating lead for session {}", lead.session_id);

        let response = self
            .client
            .post(&self.endpoint)
            .json(lead)
            .send()
            .await
            .context("Failed to call lead backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Lead backend error: {} - {}", status, body);
        }

        let created: CreateLeadResponse = response
            .json()
            .await
            .context("Failed to parse lead backend response")?;

        let lead_id = created
            .into_lead_id()
            .context("Lead backend response missing id")?;

        info!("Lead {} created for session {}", lead_id, lead.session_id);
        Ok(lead_id)
    }
}
