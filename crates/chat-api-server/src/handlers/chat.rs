use crate::models::chat::*;
use crate::services::ai_service::AiReply;
use crate::services::conversation::{
    ContextUpdate, ConversationStore, ConversationTurn, Session, SessionContext, SessionLookup,
    TurnGuard,
};
use crate::services::LeadRecord;
use crate::state::AppState;
use crate::utils::error::ApiError;
use crate::utils::limiters::Limiters;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let start_time = Instant::now();

    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let message = required(request.message, "message")?;
    let session_id = required(request.session_id, "sessionId")?;

    info!(
        "Chat request: session={}, message_len={}, has_lead_info={}",
        session_id,
        message.len(),
        request.lead_info.is_some()
    );

    // Held until the response is built, so turns of one session never interleave
    let _turn = acquire_turn(&state.store, &session_id).await?;
    let session = state
        .store
        .get_session(&session_id)
        .into_option()
        .ok_or_else(|| ApiError::InternalError(format!("session {} vanished mid-turn", session_id)))?;

    let reply = generate_reply(&state, &message, &session.context).await?;

    let mut update = ContextUpdate::new()
        .with_turn(ConversationTurn::user(message))
        .with_turn(ConversationTurn::assistant(reply.message.clone()))
        .with_lead_score(reply.lead_score)
        .with_industry(reply.industry.clone())
        .with_intent(reply.intent.clone());
    if let Some(info) = reply.extracted_info.clone() {
        update = update.with_extracted_info(info);
    }
    // Visitor-supplied details win over inferred ones
    if let Some(lead_info) = request.lead_info {
        update = update.with_extracted_info(lead_info.into());
    }

    let session = state.store.update_session(&session_id, update)?;
    let lead_created = maybe_create_lead(&state, &session).await;

    info!(
        "Chat completed in {}ms: session={}, lead_score={}, lead_created={}",
        start_time.elapsed().as_millis(),
        session_id,
        session.context.lead_score,
        lead_created
    );

    Ok(Json(ChatResponse {
        message: reply.message,
        lead_score: session.context.lead_score,
        intent: reply.intent,
        confidence: reply.confidence.clamp(0.0, 1.0),
        should_ask_for_lead_info: reply.should_ask_for_lead_info && !lead_created,
        suggested_questions: reply.suggested_questions,
        session_id,
        lead_created,
    }))
}

/// GET /api/chat?sessionId=
pub async fn session_info_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionInfoResponse>, ApiError> {
    let session_id = required(query.session_id, "sessionId")?;

    match state.store.get_session(&session_id) {
        SessionLookup::Found(session) => Ok(Json(SessionInfoResponse {
            session_id: session.session_id,
            lead_score: session.context.lead_score,
            industry: session.context.industry,
            message_count: session.context.message_count,
            lead_created: session.lead_created,
            extracted_info: session.context.extracted_info,
        })),
        SessionLookup::NotFound => Err(ApiError::NotFound(format!(
            "Session {} not found",
            session_id
        ))),
    }
}

/// PUT /api/chat. The body is optional.
pub async fn create_session_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let request: CreateSessionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    let user_id = request.user_id.filter(|u| !u.trim().is_empty());
    let session = state.store.create_session(user_id);

    Ok(Json(CreateSessionResponse {
        session_id: session.session_id,
        message: "Session created successfully".to_string(),
    }))
}

/// GET /api/chat/analytics
pub async fn analytics_handler(State(state): State<AppState>) -> Json<AnalyticsResponse> {
    Json(AnalyticsResponse {
        stats: state.store.stats(),
        timestamp: chrono::Utc::now(),
    })
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{} is required", field)))
}

/// Create the session on a miss, then take its turn lock
async fn acquire_turn(store: &ConversationStore, session_id: &str) -> Result<TurnGuard, ApiError> {
    // Retries cover a session expiring or being replaced between lookup and lock
    for _ in 0..3 {
        if let SessionLookup::NotFound = store.get_session(session_id) {
            info!("Session {} not found, creating", session_id);
            store.create_session_with_id(session_id, None)?;
        }
        if let Some(guard) = store.lock_turn(session_id).await {
            return Ok(guard);
        }
    }
    Err(ApiError::InternalError(format!(
        "could not acquire turn for session {}",
        session_id
    )))
}

async fn generate_reply(
    state: &AppState,
    message: &str,
    context: &SessionContext,
) -> Result<AiReply, ApiError> {
    let primary = match Limiters::acquire_timed(
        state.limiters.ai_generate.clone(),
        state.limiters.acquire_timeout,
        "ai_generate",
    )
    .await
    {
        Ok((_permit, waited)) => {
            debug!("AI permit acquired after {:?}", waited);
            state.ai.respond(message, context).await
        }
        Err(e) => Err(e),
    };

    match primary {
        Ok(reply) => Ok(reply),
        Err(e) => {
            warn!("AI responder failed, using fallback: {:#}", e);
            Ok(state.fallback_ai.respond(message, context).await?)
        }
    }
}

/// Hand the lead to the backend once the session qualifies.
/// Failures are logged and never fail the chat turn.
async fn maybe_create_lead(state: &AppState, session: &Session) -> bool {
    if session.lead_created {
        return true;
    }
    let Some(sink) = state.leads.as_ref() else {
        return false;
    };
    if session.context.lead_score < state.settings.leads.score_threshold {
        return false;
    }
    let Some(lead) = LeadRecord::from_session(session) else {
        debug!("Session {} qualifies but has no email yet", session.session_id);
        return false;
    };

    let result = match Limiters::acquire_timed(
        state.limiters.lead_create.clone(),
        state.limiters.acquire_timeout,
        "lead_create",
    )
    .await
    {
        Ok((_permit, _)) => sink.create_lead(&lead).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(lead_id) => match state.store.mark_lead_created(&session.session_id, &lead_id) {
            Ok(updated) => updated.lead_created,
            Err(e) => {
                warn!("Lead {} created but session update failed: {}", lead_id, e);
                false
            }
        },
        Err(e) => {
            warn!("Lead creation failed for session {}: {:#}", session.session_id, e);
            false
        }
    }
}
