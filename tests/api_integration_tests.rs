//! API Integration Tests
//!
//! Tests the HTTP API endpoints with a real database and the full service graph.
//! The generator and the quote provider are replaced by fakes so replies are known
//! in advance and nothing leaves the process.
//!
//! Tests are serialized because they point `DATABASE_URL` at their own database
//! before the provider is built.

use async_stream::stream;
use async_trait::async_trait;
use axum::response::IntoResponse;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use di::{Injectable, ServiceCollection, ServiceDescriptor, inject, injectable};
use di_axum::RouterServiceProviderExtensions;
use prometeo_chat_api::api;
use prometeo_chat_api::core::config::{Settings, jwt_secret_from_env};
use prometeo_chat_api::core::error::{ChatError, UpstreamError};
use prometeo_chat_api::core::generation::{Fragment, GENERATION_ERROR, GenerationAdapter};
use prometeo_chat_api::core::orchestrator::ChatOrchestrator;
use prometeo_chat_api::core::prompt::PromptBuilder;
use prometeo_chat_api::core::quotes::Quote;
use prometeo_chat_api::core::services::{ConversationStore, CredentialService};
use prometeo_chat_api::core::session;
use prometeo_chat_api::core::traits::{FragmentStream, Generator, QuoteProvider};
use prometeo_chat_api::infrastructure::database::DatabaseConnection;
use prometeo_chat_api::infrastructure::repositories::{DbConversationRepository, DbUserRepository};
use serde_json::{Value, json};
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use tower::ServiceExt;
use uuid::Uuid;

const CANNED_REPLY: &str = "Respuesta de prueba";

/// Answers every prompt with [`CANNED_REPLY`], streamed in two pieces.
struct CannedGenerator;

#[injectable(Generator)]
impl CannedGenerator {
    #[inject]
    fn create() -> CannedGenerator {
        CannedGenerator
    }
}

#[async_trait]
impl Generator for CannedGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, UpstreamError> {
        Ok(CANNED_REPLY.to_owned())
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream, UpstreamError> {
        Ok(Box::pin(stream! {
            yield Ok::<_, UpstreamError>(Fragment::Response { response: "Respuesta ".to_owned() });
            yield Ok(Fragment::Response { response: "de prueba".to_owned() });
        }))
    }
}

/// A generator backend that is down.
struct DownGenerator;

#[injectable(Generator)]
impl DownGenerator {
    #[inject]
    fn create() -> DownGenerator {
        DownGenerator
    }
}

#[async_trait]
impl Generator for DownGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String, UpstreamError> {
        Err(UpstreamError::Status(503))
    }

    async fn stream(&self, _prompt: &str) -> Result<FragmentStream, UpstreamError> {
        Err(UpstreamError::Status(503))
    }
}

/// Every quote lookup comes back empty.
struct NoQuotes;

#[injectable(QuoteProvider)]
impl NoQuotes {
    #[inject]
    fn create() -> NoQuotes {
        NoQuotes
    }
}

#[async_trait]
impl QuoteProvider for NoQuotes {
    async fn lookup(&self, _symbol: &str) -> Option<Quote> {
        None
    }
}

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns pool
/// Uses in-memory SQLite for test isolation
async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    // Use file URI format with shared cache - each test gets a unique DB
    let db_url = format!("sqlite:file:apitestdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();

    // Safe: tests touching the environment are serialized.
    unsafe { std::env::set_var("DATABASE_URL", &db_url) };

    pool
}

/// Create test app - the provider's DatabaseConnection reads the URL set by setup_test_db()
fn create_test_app() -> Router {
    create_test_app_with(CannedGenerator::singleton().into())
}

fn create_test_app_with(generator: ServiceDescriptor) -> Router {
    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(DatabaseConnection::singleton())
        .add(DbConversationRepository::scoped())
        .add(DbUserRepository::scoped())
        .add(ConversationStore::scoped())
        .add(CredentialService::scoped())
        .add(NoQuotes::singleton())
        .add(generator)
        .add(PromptBuilder::scoped())
        .add(GenerationAdapter::scoped())
        .add(ChatOrchestrator::scoped())
        .build_provider()
        .unwrap();

    api::router().with_provider(provider)
}

fn bearer(user_id: Uuid) -> String {
    let token = session::issue_token(user_id, jwt_secret_from_env(), 1).unwrap();
    format!("Bearer {token}")
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    user_id: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        request = request.header("Authorization", bearer(user_id));
    }
    let request = match body {
        Some(body) => request
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, headers, body.to_vec())
}

fn json_body(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
#[serial]
async fn test_health() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _, body) = send(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["status"], "ok");
}

#[tokio::test]
#[serial]
async fn test_list_conversations_requires_auth() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _, _) = send(&app, "GET", "/conversations", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[serial]
async fn test_list_conversations_empty() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _, body) = send(&app, "GET", "/conversations", Some(Uuid::new_v4()), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["conversations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
#[serial]
async fn test_register_and_login_through_combined_route() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let credentials = json!({"email": "ana@example.com", "password": "s3creto", "isRegister": true});

    let (status, _, body) = send(&app, "POST", "/", None, Some(credentials.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        json_body(&body)["msg"],
        "Usuario registrado correctamente. Ahora inicia sesión."
    );

    let (status, _, body) = send(&app, "POST", "/", None, Some(credentials)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json_body(&body)["detail"], "Usuario ya existe");

    let (status, _, body) = send(
        &app,
        "POST",
        "/",
        None,
        Some(json!({"email": "ana@example.com", "password": "s3creto", "isRegister": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let login = json_body(&body);
    assert_eq!(login["msg"], "Bienvenido ana@example.com");
    assert_eq!(login["token_type"], "bearer");

    // The issued token opens the protected routes.
    let token = login["access_token"].as_str().unwrap();
    let request = Request::builder()
        .uri("/conversations")
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn test_wrong_password_is_rejected() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"email": "ana@example.com", "password": "s3creto"})),
    )
    .await;
    let (status, _, body) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "ana@example.com", "password": "otra"})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(&body)["detail"], "Credenciales inválidas");
}

#[tokio::test]
#[serial]
async fn test_chat_starts_a_conversation() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let user_id = Uuid::new_v4();

    let (status, _, body) = send(
        &app,
        "POST",
        "/chat",
        Some(user_id),
        Some(json!({"message": "¿Qué es un ETF?"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let reply = json_body(&body);
    assert_eq!(reply["response"], CANNED_REPLY);
    let conversation_id = reply["conversation_id"].as_str().unwrap();

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/conversations/{conversation_id}/messages"),
        Some(user_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = json_body(&body)["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["kind"], "User");
    assert_eq!(messages[0]["text"], "¿Qué es un ETF?");
    assert_eq!(messages[1]["kind"], "Bot");
    assert_eq!(messages[1]["text"], CANNED_REPLY);

    let (_, _, body) = send(&app, "GET", "/conversations", Some(user_id), None).await;
    let conversations = json_body(&body)["conversations"].as_array().unwrap().clone();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["title"], "¿Qué es un ETF?");
}

#[tokio::test]
#[serial]
async fn test_chat_stream_relays_and_saves_reply() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let user_id = Uuid::new_v4();
    let conversation_id = Uuid::new_v4();

    let (status, headers, body) = send(
        &app,
        "POST",
        "/chat/stream",
        Some(user_id),
        Some(json!({"message": "Cuéntame del IPC", "conversation_id": conversation_id})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers["X-Conversation-ID"].to_str().unwrap(),
        conversation_id.to_string()
    );
    assert!(
        headers["Content-Type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(String::from_utf8(body).unwrap(), CANNED_REPLY);

    // The body ends only after the reply is stored.
    let (_, _, body) = send(
        &app,
        "GET",
        &format!("/conversations/{conversation_id}/messages"),
        Some(user_id),
        None,
    )
    .await;
    let messages = json_body(&body)["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["text"], CANNED_REPLY);
}

#[tokio::test]
#[serial]
async fn test_unknown_ticker_gets_notice() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        "POST",
        "/chat",
        Some(Uuid::new_v4()),
        Some(json!({"message": "aapl"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json_body(&body)["response"],
        "No se pudieron obtener datos para AAPL"
    );
}

#[tokio::test]
#[serial]
async fn test_blank_message_is_bad_request() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let user_id = Uuid::new_v4();

    let (status, _, body) = send(
        &app,
        "POST",
        "/chat",
        Some(user_id),
        Some(json!({"message": "   "})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_body(&body)["detail"].is_string());

    let (_, _, body) = send(&app, "GET", "/conversations", Some(user_id), None).await;
    assert_eq!(json_body(&body)["conversations"].as_array().unwrap().len(), 0);
}

#[tokio::test]
#[serial]
async fn test_get_messages_nonexistent_conversation() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _, body) = send(
        &app,
        "GET",
        &format!("/conversations/{}/messages", Uuid::new_v4()),
        Some(Uuid::new_v4()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json_body(&body)["detail"].is_string());
}

#[tokio::test]
#[serial]
async fn test_user_isolation() {
    let _pool = setup_test_db().await;
    let app = create_test_app();
    let owner = Uuid::new_v4();
    let intruder = Uuid::new_v4();

    let (_, _, body) = send(
        &app,
        "POST",
        "/chat",
        Some(owner),
        Some(json!({"message": "mi cartera"})),
    )
    .await;
    let conversation_id = json_body(&body)["conversation_id"]
        .as_str()
        .unwrap()
        .to_owned();

    let messages_uri = format!("/conversations/{conversation_id}/messages");
    let (status, _, _) = send(&app, "GET", &messages_uri, Some(intruder), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app,
        "POST",
        &messages_uri,
        Some(intruder),
        Some(json!({"message": "hola"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(
        &app,
        "DELETE",
        &format!("/conversations/{conversation_id}"),
        Some(intruder),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, body) = send(&app, "GET", "/conversations", Some(intruder), None).await;
    assert_eq!(json_body(&body)["conversations"].as_array().unwrap().len(), 0);

    let (_, _, body) = send(&app, "GET", &messages_uri, Some(owner), None).await;
    assert_eq!(json_body(&body)["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn test_conversation_lifecycle() {
    let pool = setup_test_db().await;
    let app = create_test_app();
    let user_id = Uuid::new_v4();

    let (status, _, body) = send(
        &app,
        "POST",
        "/conversations",
        Some(user_id),
        Some(json!({"title": "Cartera"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let conversation = json_body(&body);
    assert_eq!(conversation["title"], "Cartera");
    let conversation_id = conversation["id"].as_str().unwrap().to_owned();

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/conversations/{conversation_id}/messages"),
        Some(user_id),
        Some(json!({"text": "¿Diversifico?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["response"], CANNED_REPLY);

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/conversations/{conversation_id}/messages/stream"),
        Some(user_id),
        Some(json!({"message": "¿Y bonos?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), CANNED_REPLY);

    let (_, _, body) = send(&app, "GET", "/conversations", Some(user_id), None).await;
    let conversations = json_body(&body)["conversations"].as_array().unwrap().clone();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["title"], "¿Y bonos?");

    let delete_uri = format!("/conversations/{conversation_id}");
    let (status, _, _) = send(&app, "DELETE", &delete_uri, Some(user_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, "DELETE", &delete_uri, Some(user_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}

#[tokio::test]
#[serial]
async fn test_generator_outage_is_answered_not_raised() {
    let _pool = setup_test_db().await;
    let app = create_test_app_with(DownGenerator::singleton().into());
    let user_id = Uuid::new_v4();

    let (status, _, body) = send(
        &app,
        "POST",
        "/chat",
        Some(user_id),
        Some(json!({"message": "¿Qué es un ETF?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["response"], GENERATION_ERROR);

    let (status, _, body) = send(
        &app,
        "POST",
        "/chat/stream",
        Some(user_id),
        Some(json!({"message": "¿Qué es un ETF?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let streamed = String::from_utf8(body).unwrap();
    assert!(streamed.starts_with(&format!("\n{GENERATION_ERROR}: ")));
    assert!(streamed.contains("503"));
}

#[tokio::test]
async fn test_error_responses_carry_detail() {
    let cases = [
        (ChatError::NotFound("x".to_owned()), StatusCode::NOT_FOUND, "x"),
        (ChatError::Storage(sqlx::Error::PoolClosed), StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
        (ChatError::Internal("secreto".to_owned()), StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
    ];

    for (error, status, detail) in cases {
        let response = error.into_response();
        assert_eq!(response.status(), status);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(json_body(&body)["detail"], detail);
    }
}
