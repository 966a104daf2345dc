//! Prometeo chat backend

use prometeo_chat_api::api;
use prometeo_chat_api::core::config::Settings;
use prometeo_chat_api::core::generation::GenerationAdapter;
use prometeo_chat_api::core::orchestrator::ChatOrchestrator;
use prometeo_chat_api::core::prompt::PromptBuilder;
use prometeo_chat_api::core::quotes::FallbackQuoteProvider;
use prometeo_chat_api::core::services::{ConversationStore, CredentialService};
use prometeo_chat_api::infrastructure::database::DatabaseConnection;
use prometeo_chat_api::infrastructure::ollama::OllamaGenerator;
use prometeo_chat_api::infrastructure::repositories::{DbConversationRepository, DbUserRepository};

use anyhow::anyhow;
use axum::http::{HeaderName, HeaderValue, Method};
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tower_http::cors::{Any, CorsLayer};

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(web_server_task(Settings::from_env()))
}

async fn web_server_task(settings: Settings) -> anyhow::Result<()> {
    // Create the schema before anything is served.
    let database = DatabaseConnection::open(&settings.database_url).await?;
    database.close().await;
    info!("database ready at {}", settings.database_url);

    let provider = ServiceCollection::new()
        .add(Settings::singleton())
        .add(DatabaseConnection::singleton())
        .add(DbConversationRepository::scoped())
        .add(DbUserRepository::scoped())
        .add(ConversationStore::scoped())
        .add(CredentialService::scoped())
        .add(FallbackQuoteProvider::singleton())
        .add(OllamaGenerator::singleton())
        .add(PromptBuilder::scoped())
        .add(GenerationAdapter::scoped())
        .add(ChatOrchestrator::scoped())
        .build_provider()
        .map_err(|e| anyhow!("invalid service registrations: {e:?}"))?;

    let origins = settings
        .allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;

    let app = api::router()
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_origin(origins)
                .expose_headers([HeaderName::from_static("x-conversation-id")]),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&settings.bind_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");

    Ok(())
}
