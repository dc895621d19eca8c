//! Conversation session management module
//!
//! Provides in-memory chat session state with:
//! - Thread-safe storage (DashMap) with per-session locks
//! - Context merging (history window, lead score, extracted info)
//! - Idle expiration (lazy on access + background sweep)
//! - Aggregate statistics

mod error;
mod store;
pub mod types;

pub use error::StoreError;
pub use store::{ConversationStore, TurnGuard};
pub use types::{
    clamp_lead_score, ContextUpdate, ConversationTurn, ExtractedInfo, Session, SessionContext,
    SessionLookup, SessionPolicy, SessionStats, TurnRole, MAX_LEAD_SCORE,
};

pub use crate::models::chat::SessionId;
