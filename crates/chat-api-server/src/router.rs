use std::any::Any;

use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;
use crate::utils::error::ApiError;

pub fn build_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let api_routes = Router::new()
        .route(
            "/api/chat",
            get(handlers::chat::session_info_handler)
                .post(handlers::chat::chat_handler)
                .put(handlers::chat::create_session_handler),
        )
        .route("/api/chat/analytics", get(handlers::chat::analytics_handler));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| err.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "unknown panic".to_string());
    ApiError::InternalError(format!("handler panicked: {}", detail)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::ai_service::{AiReply, AiResponder, MockAiResponder};
    use crate::services::conversation::{ConversationStore, SessionContext, SessionPolicy};
    use crate::services::lead_service::{LeadRecord, LeadSink, MockLeadSink};
    use crate::services::KeywordResponder;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        store: Arc<ConversationStore>,
    }

    fn keyword() -> Arc<dyn AiResponder> {
        Arc::new(KeywordResponder::new(50))
    }

    fn test_app(ai: Arc<dyn AiResponder>, leads: Option<Arc<dyn LeadSink>>) -> TestApp {
        let store = Arc::new(ConversationStore::new(SessionPolicy::default()));
        let state = AppState::new(store.clone(), ai, keyword(), leads, Settings::default());
        TestApp {
            router: build_router(state),
            store,
        }
    }

    fn scored_reply(score: f64) -> AiReply {
        AiReply {
            message: "Happy to help with that.".to_string(),
            lead_score: score,
            intent: "pricing".to_string(),
            confidence: 0.9,
            should_ask_for_lead_info: true,
            suggested_questions: vec!["What is your budget?".to_string()],
            industry: Some("ecommerce".to_string()),
            extracted_info: None,
        }
    }

    async fn send(app: &TestApp, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_session(app: &TestApp) -> String {
        let (status, body) = send(app, Method::PUT, "/api/chat", None).await;
        assert_eq!(status, StatusCode::OK);
        body["sessionId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_chat_and_inspect_session() {
        let app = test_app(keyword(), None);
        let session_id = create_session(&app).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "What services do you offer?", "sessionId": session_id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], session_id.as_str());
        let score = body["leadScore"].as_u64().unwrap();
        assert!(score <= 100);
        assert!(!body["message"].as_str().unwrap().is_empty());
        assert_eq!(body["leadCreated"], false);
        assert!(body["suggestedQuestions"].is_array());

        let (status, info) = send(&app, Method::GET, &format!("/api/chat?sessionId={}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["leadCreated"], false);
        assert_eq!(info["messageCount"], 2);
        assert_eq!(info["leadScore"].as_u64().unwrap(), score);
    }

    #[tokio::test]
    async fn test_qualified_chat_creates_lead_once() {
        let mut ai = MockAiResponder::new();
        ai.expect_respond().returning(|_, _| Ok(scored_reply(82.0)));

        let mut leads = MockLeadSink::new();
        leads
            .expect_create_lead()
            .withf(|lead: &LeadRecord| lead.email == "jane@example.com" && lead.lead_score == 82)
            .times(1)
            .returning(|_| Ok("lead-123".to_string()));

        let app = test_app(Arc::new(ai), Some(Arc::new(leads)));
        let session_id = create_session(&app).await;

        let request = json!({
            "message": "How much for the full package?",
            "sessionId": session_id,
            "leadInfo": {"name": "Jane", "email": "jane@example.com"}
        });
        let (status, body) = send(&app, Method::POST, "/api/chat", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leadCreated"], true);
        assert_eq!(body["shouldAskForLeadInfo"], false);

        let (_, info) = send(&app, Method::GET, &format!("/api/chat?sessionId={}", session_id), None).await;
        assert_eq!(info["leadCreated"], true);
        assert_eq!(info["extractedInfo"]["name"], "Jane");
        assert_eq!(info["industry"], "ecommerce");

        // Already converted: no second lead
        let (status, body) = send(&app, Method::POST, "/api/chat", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leadCreated"], true);

        let session = app.store.get_session(&session_id).into_option().unwrap();
        assert_eq!(session.lead_id.as_deref(), Some("lead-123"));
    }

    #[tokio::test]
    async fn test_low_score_does_not_create_lead() {
        let mut ai = MockAiResponder::new();
        ai.expect_respond().returning(|_, _| Ok(scored_reply(40.0)));
        let mut leads = MockLeadSink::new();
        leads.expect_create_lead().times(0);

        let app = test_app(Arc::new(ai), Some(Arc::new(leads)));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({
                "message": "Just browsing",
                "sessionId": "visitor-1",
                "leadInfo": {"email": "jane@example.com"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leadCreated"], false);
    }

    #[tokio::test]
    async fn test_lead_failure_keeps_chat_and_session_update() {
        let mut ai = MockAiResponder::new();
        ai.expect_respond().returning(|_, _| Ok(scored_reply(90.0)));
        let mut leads = MockLeadSink::new();
        leads
            .expect_create_lead()
            .returning(|_| Err(anyhow::anyhow!("crm down")));

        let app = test_app(Arc::new(ai), Some(Arc::new(leads)));
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({
                "message": "Sign me up",
                "sessionId": "visitor-2",
                "leadInfo": {"name": "Jane", "email": "jane@example.com"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["leadCreated"], false);
        assert_eq!(body["leadScore"], 90);

        let session = app.store.get_session("visitor-2").into_option().unwrap();
        assert!(!session.lead_created);
        assert_eq!(session.context.message_count, 2);
        assert_eq!(session.context.lead_score, 90);
    }

    #[tokio::test]
    async fn test_ai_failure_falls_back_to_keyword_responder() {
        let mut ai = MockAiResponder::new();
        ai.expect_respond()
            .returning(|_, _| Err(anyhow::anyhow!("backend timeout")));

        let app = test_app(Arc::new(ai), None);
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "What services do you offer?", "sessionId": "visitor-3"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "services_inquiry");
        assert_eq!(body["sessionId"], "visitor-3");
    }

    #[tokio::test]
    async fn test_chat_creates_unknown_session() {
        let app = test_app(keyword(), None);
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "hello", "sessionId": "fresh-id"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, info) = send(&app, Method::GET, "/api/chat?sessionId=fresh-id", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["sessionId"], "fresh-id");
        assert_eq!(info["messageCount"], 2);
    }

    #[tokio::test]
    async fn test_session_id_is_echoed_verbatim() {
        let app = test_app(keyword(), None);
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "hello", "sessionId": " abc "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], " abc ");
        assert!(app.store.get_session(" abc ").is_found());
        assert!(!app.store.get_session("abc").is_found());

        let (status, info) = send(&app, Method::GET, "/api/chat?sessionId=%20abc%20", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["sessionId"], " abc ");
    }

    #[tokio::test]
    async fn test_chat_works_with_zero_idle_timeout() {
        let mut settings = Settings::default();
        settings.session.idle_timeout_secs = 0;
        let store = Arc::new(ConversationStore::new(SessionPolicy::from(&settings.session)));
        let state = AppState::new(store.clone(), keyword(), keyword(), None, settings);
        let app = TestApp {
            router: build_router(state),
            store,
        };

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "hello", "sessionId": "quick"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], "quick");
        assert!(app.store.get_session("quick").is_found());
    }

    #[tokio::test]
    async fn test_unknown_session_info_is_404() {
        let app = test_app(keyword(), None);
        let (status, body) = send(&app, Method::GET, "/api/chat?sessionId=never-created", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NotFound");
    }

    #[tokio::test]
    async fn test_session_info_requires_id() {
        let app = test_app(keyword(), None);
        let (status, _) = send(&app, Method::GET, "/api/chat", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected_without_side_effects() {
        let app = test_app(keyword(), None);

        let (status, body) = send(&app, Method::POST, "/api/chat", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "BadRequest");
        assert!(body["message"].as_str().unwrap().contains("sessionId"));

        let (status, _) = send(&app, Method::POST, "/api/chat", Some(json!({"sessionId": "abc"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "   ", "sessionId": "abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test_app(keyword(), None);
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_create_session_with_user_id() {
        let app = test_app(keyword(), None);
        let (status, body) = send(&app, Method::PUT, "/api/chat", Some(json!({"userId": "user-42"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Session created successfully");

        let session_id = body["sessionId"].as_str().unwrap();
        let session = app.store.get_session(session_id).into_option().unwrap();
        assert_eq!(session.user_id.as_deref(), Some("user-42"));
    }

    #[tokio::test]
    async fn test_analytics() {
        let app = test_app(keyword(), None);
        create_session(&app).await;
        send(
            &app,
            Method::POST,
            "/api/chat",
            Some(json!({"message": "We run an online store", "sessionId": "shop-1"})),
        )
        .await;

        let (status, body) = send(&app, Method::GET, "/api/chat/analytics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["totalSessions"], 2);
        assert_eq!(body["stats"]["activeSessions"], 2);
        assert_eq!(body["stats"]["leadsCreated"], 0);
        assert_eq!(body["stats"]["byIndustry"]["ecommerce"], 1);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = test_app(keyword(), None);
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, Method::GET, "/health/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeSessions"], 0);
    }

    #[tokio::test]
    async fn test_readiness_counts_only_live_sessions() {
        let mut settings = Settings::default();
        settings.session.idle_timeout_secs = 1;
        let store = Arc::new(ConversationStore::new(SessionPolicy::from(&settings.session)));
        let state = AppState::new(store.clone(), keyword(), keyword(), None, settings);
        let app = TestApp {
            router: build_router(state),
            store,
        };

        create_session(&app).await;
        let (_, body) = send(&app, Method::GET, "/health/ready", None).await;
        assert_eq!(body["activeSessions"], 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let (_, body) = send(&app, Method::GET, "/health/ready", None).await;
        assert_eq!(body["activeSessions"], 0);
        assert_eq!(app.store.len(), 1);
    }

    /// Scores each reply with the history length it was given
    struct HistoryCountingResponder;

    #[async_trait::async_trait]
    impl AiResponder for HistoryCountingResponder {
        async fn respond(&self, _message: &str, context: &SessionContext) -> anyhow::Result<AiReply> {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(AiReply {
                lead_score: context.conversation_history.len() as f64,
                ..scored_reply(0.0)
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session_are_serialized() {
        let app = test_app(Arc::new(HistoryCountingResponder), None);
        let session_id = create_session(&app).await;

        let body = json!({"message": "quick double send", "sessionId": session_id});
        let (first, second) = tokio::join!(
            send(&app, Method::POST, "/api/chat", Some(body.clone())),
            send(&app, Method::POST, "/api/chat", Some(body)),
        );
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);

        let session = app.store.get_session(&session_id).into_option().unwrap();
        assert_eq!(session.context.message_count, 4);
        assert_eq!(session.context.conversation_history.len(), 4);
        // The later turn saw the earlier turn's history
        assert_eq!(session.context.lead_score, 2);
    }
}
