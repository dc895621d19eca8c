//! Keyword Responder
//! Local rule-based responder. Detects the visitor's intent and industry
//! with pattern matching and nudges the lead score accordingly. Serves as
//! the fallback whenever the AI backend is unavailable.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::services::ai_service::{AiReply, AiResponder};
use crate::services::conversation::{ExtractedInfo, SessionContext, MAX_LEAD_SCORE};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\s().-]{7,}\d").expect("valid phone regex"));

// Whole words only, "they" and "this" are not greetings
static GREETING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(hi|hey|hello|good morning|good afternoon)\b").expect("valid greeting regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatIntent {
    /// "how much does it cost?", "pricing plans"
    Pricing,
    /// "book a demo", "schedule a call"
    Demo,
    /// "contact sales", "talk to someone"
    Contact,
    /// "what services do you offer?"
    Services,
    Greeting,
    General,
}

impl ChatIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatIntent::Pricing => "pricing",
            ChatIntent::Demo => "demo_request",
            ChatIntent::Contact => "contact",
            ChatIntent::Services => "services_inquiry",
            ChatIntent::Greeting => "greeting",
            ChatIntent::General => "general",
        }
    }

    /// Lead score gained by a message with this intent
    fn score_weight(&self) -> u8 {
        match self {
            ChatIntent::Demo => 25,
            ChatIntent::Pricing => 20,
            ChatIntent::Contact => 20,
            ChatIntent::Services => 10,
            ChatIntent::General => 5,
            ChatIntent::Greeting => 0,
        }
    }
}

// Checked in order, first match wins. Greetings come last.
const INTENT_PATTERNS: &[(ChatIntent, &[&str])] = &[
    (
        ChatIntent::Demo,
        &["demo", "trial", "schedule a call", "book a call", "book a meeting", "consultation"],
    ),
    (
        ChatIntent::Pricing,
        &["price", "pricing", "cost", "how much", "budget", "quote", "plans", "package"],
    ),
    (
        ChatIntent::Contact,
        &["contact", "talk to", "speak with", "call me", "email me", "reach out", "sales team"],
    ),
    (
        ChatIntent::Services,
        &["services", "service", "offer", "what do you do", "automation", "seo", "marketing", "campaign"],
    ),
];

const INDUSTRY_PATTERNS: &[(&str, &[&str])] = &[
    ("ecommerce", &["ecommerce", "e-commerce", "online store", "shopify", "retail"]),
    ("healthcare", &["clinic", "healthcare", "hospital", "dental", "medical"]),
    ("real_estate", &["real estate", "realtor", "property", "properties"]),
    ("saas", &["saas", "software", "startup", "app "]),
    ("restaurant", &["restaurant", "cafe", "food", "catering"]),
    ("legal", &["law firm", "lawyer", "attorney", "legal"]),
    ("education", &["school", "course", "education", "university", "academy"]),
    ("finance", &["bank", "finance", "insurance", "accounting", "fintech"]),
];

pub struct IntentAnalyzer;

impl IntentAnalyzer {
    pub fn analyze_intent(message: &str) -> (ChatIntent, f32) {
        let lower = format!("{} ", message.to_lowercase());

        for (intent, patterns) in INTENT_PATTERNS {
            if let Some(pattern) = patterns.iter().find(|p| lower.contains(*p)) {
                debug!("Detected {:?} intent: matched '{}'", intent, pattern);
                return (*intent, 0.85);
            }
        }

        if let Some(m) = GREETING_RE.find(&lower) {
            debug!("Detected Greeting intent: matched '{}'", m.as_str());
            return (ChatIntent::Greeting, 0.85);
        }

        debug!("Defaulting to General intent");
        (ChatIntent::General, 0.5)
    }

    pub fn detect_industry(message: &str) -> Option<String> {
        let lower = format!("{} ", message.to_lowercase());
        INDUSTRY_PATTERNS
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
            .map(|(industry, _)| industry.to_string())
    }

    pub fn extract_contact(message: &str) -> ExtractedInfo {
        ExtractedInfo {
            email: EMAIL_RE.find(message).map(|m| m.as_str().to_string()),
            phone: PHONE_RE.find(message).map(|m| m.as_str().trim().to_string()),
            ..Default::default()
        }
    }
}

pub struct KeywordResponder {
    ask_threshold: u8,
}

impl KeywordResponder {
    pub fn new(ask_threshold: u8) -> Self {
        Self { ask_threshold }
    }

    fn reply_text(intent: ChatIntent, industry: Option<&str>) -> String {
        let base = match intent {
            ChatIntent::Pricing => {
                "Our pricing depends on the channels and volume you want to automate. \
                 Most clients start with a tailored package after a short discovery call."
            }
            ChatIntent::Demo => {
                "We'd be happy to walk you through a live demo of our automation platform."
            }
            ChatIntent::Contact => {
                "Our team would love to talk. Share your contact details and we'll reach out shortly."
            }
            ChatIntent::Services => {
                "We offer marketing automation, SEO optimisation, AI chat assistants, \
                 email campaigns and analytics dashboards."
            }
            ChatIntent::Greeting => "Hi! How can we help you grow your business today?",
            ChatIntent::General => {
                "Thanks for your message. Could you tell us a bit more about what you're looking for?"
            }
        };

        match industry {
            Some(industry) => format!(
                "{} We have helped many {} businesses with exactly this.",
                base,
                industry.replace('_', " ")
            ),
            None => base.to_string(),
        }
    }

    fn suggested_questions(intent: ChatIntent) -> Vec<String> {
        let questions: &[&str] = match intent {
            ChatIntent::Pricing => &["What is your monthly marketing budget?", "Which channels matter most to you?"],
            ChatIntent::Demo => &["When would suit you for a demo?", "How large is your team?"],
            ChatIntent::Contact => &["What's the best email to reach you?", "Would you prefer a call?"],
            ChatIntent::Services => &["What are your main growth goals?", "Which industry are you in?"],
            ChatIntent::Greeting | ChatIntent::General => {
                &["What services do you offer?", "How does your pricing work?"]
            }
        };
        questions.iter().map(|q| q.to_string()).collect()
    }
}

#[async_trait::async_trait]
impl AiResponder for KeywordResponder {
    async fn respond(&self, message: &str, context: &SessionContext) -> Result<AiReply> {
        let (intent, confidence) = IntentAnalyzer::analyze_intent(message);
        let industry = IntentAnalyzer::detect_industry(message);
        let extracted = IntentAnalyzer::extract_contact(message);

        let mut gain = intent.score_weight();
        if extracted.email.is_some() {
            gain = gain.saturating_add(15);
        }
        if extracted.phone.is_some() {
            gain = gain.saturating_add(10);
        }
        if industry.is_some() && context.industry.is_none() {
            gain = gain.saturating_add(5);
        }
        let lead_score = context.lead_score.saturating_add(gain).min(MAX_LEAD_SCORE);

        let email_known = context.extracted_info.has_email() || extracted.has_email();
        let should_ask_for_lead_info = lead_score >= self.ask_threshold && !email_known;

        let display_industry = industry.as_deref().or(context.industry.as_deref());
        let mut text = Self::reply_text(intent, display_industry);
        if should_ask_for_lead_info {
            text.push_str(" Could you share your name and email so a specialist can follow up?");
        }

        Ok(AiReply {
            message: text,
            lead_score: lead_score as f64,
            intent: intent.as_str().to_string(),
            confidence,
            should_ask_for_lead_info,
            suggested_questions: Self::suggested_questions(intent),
            industry,
            extracted_info: Some(extracted),
        })
    }
}
