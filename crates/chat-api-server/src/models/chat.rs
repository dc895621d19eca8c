use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::services::conversation::{ExtractedInfo, SessionStats};

/// Opaque session identifier
pub type SessionId = String;

// ===== REQUEST MODELS =====

/// `message` and `session_id` stay optional so that missing fields are
/// reported as 400 by the handler instead of a JSON rejection.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub lead_info: Option<LeadInfo>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeadInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    pub lead_score: u8,
    pub intent: String,
    pub confidence: f32,
    pub should_ask_for_lead_info: bool,
    pub suggested_questions: Vec<String>,
    pub session_id: SessionId,
    pub lead_created: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub session_id: SessionId,
    pub lead_score: u8,
    pub industry: Option<String>,
    pub message_count: usize,
    pub lead_created: bool,
    pub extracted_info: ExtractedInfo,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyticsResponse {
    pub stats: SessionStats,
    pub timestamp: DateTime<Utc>,
}
