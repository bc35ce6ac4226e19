mod agent;
mod app;
mod backend;
mod config;
mod executor;
mod gate;
mod handlers;
mod models;
mod session;
mod state;

use advisor_common::{bind_listener, env_or, init_tracing, shutdown_signal};
use std::sync::Arc;

use crate::agent::{CustomerScanner, GeminiClient};
use crate::config::{AgentConfig, ExecutorConfig};
use crate::executor::BatchExecutor;
use crate::session::SessionFactory;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let _guards = init_tracing("advisor-service");

    let port = env_or("PORT", 8000u16);
    let executor_config = ExecutorConfig::from_env();
    let agent_config = AgentConfig::from_env();
    if agent_config.api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY is not set; backend calls will be unauthenticated");
    }

    let client = GeminiClient::new(&agent_config).expect("build gemini client");
    let sessions = SessionFactory::new(agent_config.app_name.as_str(), agent_config.user_id.as_str());
    // One gate for the whole process, shared by every request.
    let executor = BatchExecutor::new(
        &executor_config,
        sessions,
        Arc::new(CustomerScanner::new(client)),
    );
    tracing::info!(
        port = port,
        model = agent_config.model.as_str(),
        max_concurrent_rows = executor_config.max_concurrent_rows,
        chunk_size = executor_config.chunk_size,
        item_timeout_secs = executor_config.item_timeout.map(|limit| limit.as_secs()),
        "advisor service starting"
    );

    let app = app::build_router(AppState::new(executor));
    let listener = bind_listener(port).await.expect("bind listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}
