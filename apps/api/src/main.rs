mod blob;
mod config;
mod context_pack;
mod db;
mod docx;
mod errors;
mod fieldpath;
mod fsm;
mod guards;
mod llm;
mod models;
mod pdf;
mod routes;
mod stable_profile;
mod state;
mod store;
mod wizard;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::blob::{BlobStore, S3BlobStore};
use crate::config::Config;
use crate::db::create_pool;
use crate::docx::{DocumentExtractor, ZipDocxExtractor};
use crate::llm::{LlmClient, LlmGateway};
use crate::pdf::{DefaultPdfRenderer, PdfRenderer};
use crate::routes::build_router;
use crate::stable_profile::{PgStableProfileStore, StableProfileStore};
use crate::state::AppState;
use crate::store::{PgSessionStore, SessionStore};
use crate::wizard::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; fails fast on missing required env vars.
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV wizard API v{}", env!("CARGO_PKG_VERSION"));

    let db = create_pool(&config.database_url).await?;

    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    let blobs: Arc<dyn BlobStore> = Arc::new(S3BlobStore::new(s3));
    let store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db.clone(), blobs.clone()));
    let llm: Arc<dyn LlmGateway> = Arc::new(LlmClient::new(&config));
    let pdf: Arc<dyn PdfRenderer> = Arc::new(DefaultPdfRenderer);
    let docx: Arc<dyn DocumentExtractor> = Arc::new(ZipDocxExtractor);
    let stable_profiles: Arc<dyn StableProfileStore> = Arc::new(PgStableProfileStore::new(db));

    let orchestrator = Arc::new(Orchestrator::new(store, blobs, llm, pdf, docx, stable_profiles, config.clone()));

    let state = AppState { orchestrator, config: config.clone() };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "cv-wizard-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
