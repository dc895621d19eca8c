pub mod ai_service;
pub mod conversation;
pub mod keyword_responder;
pub mod lead_service;

pub use ai_service::{AiReply, AiResponder, BackendAiResponder};
pub use conversation::ConversationStore;
pub use keyword_responder::KeywordResponder;
pub use lead_service::{BackendLeadClient, LeadRecord, LeadSink};
