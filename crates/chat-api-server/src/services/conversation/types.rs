use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::chat::{LeadInfo, SessionId};

pub const MAX_LEAD_SCORE: u8 = 100;

/// Round and clamp a raw score into `0..=100`. NaN counts as zero.
pub fn clamp_lead_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, MAX_LEAD_SCORE as f64) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One message in the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Structured fields inferred from the chat or supplied by the visitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
}

impl ExtractedInfo {
    /// Newer non-blank scalars overwrite older ones, goals are unioned in
    /// first-seen order.
    pub fn merge(&mut self, incoming: ExtractedInfo) {
        merge_field(&mut self.name, incoming.name);
        merge_field(&mut self.email, incoming.email);
        merge_field(&mut self.company, incoming.company);
        merge_field(&mut self.phone, incoming.phone);
        merge_field(&mut self.budget, incoming.budget);
        merge_field(&mut self.timeline, incoming.timeline);

        for goal in incoming.goals {
            let goal = goal.trim();
            if goal.is_empty() {
                continue;
            }
            if !self.goals.iter().any(|g| g.eq_ignore_ascii_case(goal)) {
                self.goals.push(goal.to_string());
            }
        }
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }
}

impl From<LeadInfo> for ExtractedInfo {
    fn from(info: LeadInfo) -> Self {
        Self {
            name: info.name,
            email: info.email,
            company: info.company,
            phone: info.phone,
            ..Default::default()
        }
    }
}

fn merge_field(slot: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming {
        let value = value.trim();
        if !value.is_empty() {
            *slot = Some(value.to_string());
        }
    }
}

/// Mutable conversation state of a session
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub lead_score: u8,
    pub industry: Option<String>,
    pub conversation_history: Vec<ConversationTurn>,
    pub extracted_info: ExtractedInfo,
    pub last_intent: Option<String>,
    /// All messages ever exchanged, including those dropped from the window
    pub message_count: usize,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: Option<String>,
    pub context: SessionContext,
    pub lead_created: bool,
    pub lead_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: SessionId, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            user_id,
            context: SessionContext::default(),
            lead_created: false,
            lead_id: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>, idle_timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity_at) > idle_timeout
    }

    /// Never moves `last_activity_at` backwards
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn apply(&mut self, update: ContextUpdate, max_history_turns: usize, now: DateTime<Utc>) {
        let ctx = &mut self.context;

        ctx.message_count += update.turns.len();
        ctx.conversation_history.extend(update.turns);
        if ctx.conversation_history.len() > max_history_turns {
            let overflow = ctx.conversation_history.len() - max_history_turns;
            ctx.conversation_history.drain(..overflow);
        }

        if let Some(score) = update.lead_score {
            ctx.lead_score = clamp_lead_score(score);
        }
        if let Some(industry) = update.industry.filter(|i| !i.trim().is_empty()) {
            ctx.industry = Some(industry);
        }
        if let Some(intent) = update.intent {
            ctx.last_intent = Some(intent);
        }
        if let Some(info) = update.extracted_info {
            ctx.extracted_info.merge(info);
        }

        self.touch(now);
    }

    pub fn mark_lead_created(&mut self, lead_id: String, now: DateTime<Utc>) {
        self.lead_created = true;
        self.lead_id = Some(lead_id);
        self.touch(now);
    }
}

/// Fields merged into a session context by `update_session`
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub turns: Vec<ConversationTurn>,
    pub lead_score: Option<f64>,
    pub industry: Option<String>,
    pub intent: Option<String>,
    pub extracted_info: Option<ExtractedInfo>,
}

impl ContextUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn(mut self, turn: ConversationTurn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn with_lead_score(mut self, score: f64) -> Self {
        self.lead_score = Some(score);
        self
    }

    pub fn with_industry(mut self, industry: Option<String>) -> Self {
        self.industry = industry;
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// Accumulates, so visitor-supplied and inferred info can both be merged
    pub fn with_extracted_info(mut self, info: ExtractedInfo) -> Self {
        match self.extracted_info.as_mut() {
            Some(existing) => existing.merge(info),
            None => self.extracted_info = Some(info),
        }
        self
    }
}

/// Result of a session lookup. Expired sessions are `NotFound`.
#[derive(Debug, Clone)]
pub enum SessionLookup {
    Found(Session),
    NotFound,
}

impl SessionLookup {
    pub fn into_option(self) -> Option<Session> {
        match self {
            SessionLookup::Found(session) => Some(session),
            SessionLookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, SessionLookup::Found(_))
    }
}

/// Store statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Physically present, including expired sessions not yet swept
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub leads_created: usize,
    pub by_industry: BTreeMap<String, usize>,
    pub total_messages: usize,
    pub average_lead_score: f64,
}

/// Store tuning derived from [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub idle_timeout: Duration,
    pub max_history_turns: usize,
    pub max_session_id_len: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs.max(1)),
            max_history_turns: cfg.max_history_turns.max(1),
            max_session_id_len: cfg.max_session_id_len.max(1),
        }
    }
}
