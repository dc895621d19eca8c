use std::sync::Arc;

use crate::config::Settings;
use crate::services::{
    AiResponder, BackendAiResponder, BackendLeadClient, ConversationStore, KeywordResponder,
    LeadSink,
};
use crate::services::conversation::SessionPolicy;
use crate::utils::limiters::Limiters;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ConversationStore>,
    /// Primary responder (AI backend, or the keyword responder when none is configured)
    pub ai: Arc<dyn AiResponder>,
    /// Used when the primary responder fails
    pub fallback_ai: Arc<dyn AiResponder>,
    pub leads: Option<Arc<dyn LeadSink>>,
    pub limiters: Arc<Limiters>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let store = Arc::new(ConversationStore::new(SessionPolicy::from(&settings.session)));
        let fallback_ai: Arc<dyn AiResponder> =
            Arc::new(KeywordResponder::new(settings.leads.ask_threshold));

        let ai: Arc<dyn AiResponder> = match BackendAiResponder::from_config(&settings.ai)? {
            Some(backend) => Arc::new(backend),
            None => {
                tracing::warn!("No AI backend configured, using keyword responder only");
                fallback_ai.clone()
            }
        };

        let leads: Option<Arc<dyn LeadSink>> = match BackendLeadClient::from_config(&settings.leads)? {
            Some(client) => Some(Arc::new(client)),
            None => {
                tracing::warn!("Lead hand-off disabled (no backend configured or leads.enabled=false)");
                None
            }
        };

        Ok(Self::new(store, ai, fallback_ai, leads, settings))
    }

    pub fn new(
        store: Arc<ConversationStore>,
        ai: Arc<dyn AiResponder>,
        fallback_ai: Arc<dyn AiResponder>,
        leads: Option<Arc<dyn LeadSink>>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            ai,
            fallback_ai,
            leads,
            limiters: Arc::new(Limiters::new(&settings.limits)),
            settings: Arc::new(settings),
        }
    }
}
