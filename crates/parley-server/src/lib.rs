//! Parley server library.
//!
//! Exposes the router and shared state so the binary and the integration
//! tests build the same application.

pub mod api;
pub mod config;
pub mod error;
pub mod session;

pub use config::{load_config, load_config_with, Config, ConfigError};
pub use error::SessionError;
pub use session::{CallServices, CallSession};

use axum::routing::{get, post};
use axum::{Extension, Router};
use parley_agent::{builtin_tools, OpenAiCompletion};
use parley_store::{create_session_store, StoreError};
use parley_voice::{recording_hook, DeepgramSpeech, DeepgramTranscription};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub services: Arc<CallServices>,
    /// Fallback host for the media stream URL.
    pub public_host: String,
}

impl AppState {
    pub fn new(services: CallServices, public_host: impl Into<String>) -> Self {
        Self {
            services: Arc::new(services),
            public_host: public_host.into(),
        }
    }
}

/// Builds the production collaborators for every call from `config`.
///
/// # Errors
///
/// Fails when the selected session store cannot be constructed.
pub fn build_services(config: &Config, client: reqwest::Client) -> Result<CallServices, StoreError> {
    let store = create_session_store(&config.session_store, client.clone())?;
    let tools = builtin_tools(
        config.tools.appointment_types.clone(),
        config.tools.staff_members.clone(),
    );

    Ok(CallServices {
        store,
        store_ttl_secs: config.session_store.ttl_seconds,
        transcription: Arc::new(DeepgramTranscription::new(config.deepgram.clone())),
        speech: Arc::new(DeepgramSpeech::new(client.clone(), config.deepgram.clone())),
        completion: Arc::new(OpenAiCompletion::new(client.clone(), config.openai.clone())),
        recording: recording_hook(client, &config.twilio),
        tools: Arc::new(tools),
        agent: config.agent.clone(),
    })
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/healthz", get(api::healthz))
        .route("/readyz", get(api::readyz))
        .route("/incoming", post(api::incoming_call))
        .route("/connection", get(api::connection_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
