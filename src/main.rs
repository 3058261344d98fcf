use std::sync::Arc;

use applyflow::apply::agent::RemoteFormAgent;
use applyflow::apply::profile::UserProfile;
use applyflow::config::OrchestratorConfig;
use applyflow::gateway::{
    AiGateway, GatewayBackend, GatewayConfig, RoleConfig, create_gateway,
};
use applyflow::http::api_routes;
use applyflow::orchestrator::Orchestrator;
use applyflow::reputation::{HttpReputationLookup, ReputationGate};
use applyflow::secretary::feed::spawn_feed_consumer;
use applyflow::store::{LibSqlBackend, Store};

/// Build one role's gateway from the environment. A role without a model
/// configured is simply absent; the orchestrator degrades per role.
fn role_gateway(role_var: &str, backend: GatewayBackend, api_key: &str) -> Option<Arc<dyn AiGateway>> {
    let model = std::env::var(role_var).ok()?;
    let config = GatewayConfig {
        backend,
        api_key: secrecy::SecretString::from(api_key.to_string()),
        model,
    };
    match create_gateway(&config) {
        Ok(gateway) => Some(gateway),
        Err(e) => {
            eprintln!("Warning: could not create gateway for {}: {}", role_var, e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; APPLYFLOW_LOG_DIR switches to a daily rolling file.
    let _log_guard = match std::env::var("APPLYFLOW_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "applyflow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_target(false)
                .init();
            None
        }
    };

    let config = OrchestratorConfig::from_env();

    let port: u16 = std::env::var("APPLYFLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    // Which provider backs the AI roles.
    let (backend, api_key) = if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        (GatewayBackend::Anthropic, key)
    } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        (GatewayBackend::OpenAi, key)
    } else {
        eprintln!("Error: neither ANTHROPIC_API_KEY nor OPENAI_API_KEY is set");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        std::process::exit(1);
    };

    let roles = RoleConfig {
        thinker: role_gateway("APPLYFLOW_THINKER_MODEL", backend, &api_key),
        auditor: role_gateway("APPLYFLOW_AUDITOR_MODEL", backend, &api_key),
        observer: role_gateway("APPLYFLOW_OBSERVER_MODEL", backend, &api_key),
        secretary: role_gateway("APPLYFLOW_SECRETARY_MODEL", backend, &api_key),
    };

    eprintln!("📋 Applyflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Roles: {:?}", roles);
    eprintln!("   API: http://0.0.0.0:{}/api", port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("APPLYFLOW_DB_PATH").unwrap_or_else(|_| "./data/applyflow.db".to_string());
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", db_path);

    // ── Reputation gate ──────────────────────────────────────────────────
    let reputation_url = std::env::var("APPLYFLOW_REPUTATION_URL")
        .unwrap_or_else(|_| "http://localhost:9200".to_string());
    let gate = Arc::new(ReputationGate::new(
        Arc::new(HttpReputationLookup::new(&reputation_url)),
        config.reputation_cache_ttl,
    ));

    // ── Form automation agent ────────────────────────────────────────────
    let agent_url = std::env::var("APPLYFLOW_AGENT_URL")
        .unwrap_or_else(|_| "http://localhost:9300".to_string());
    let agent = Arc::new(RemoteFormAgent::new(&agent_url));

    // ── User profile ─────────────────────────────────────────────────────
    let profile = match std::env::var("APPLYFLOW_PROFILE_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path).unwrap_or_else(|e| {
                eprintln!("Error: failed to read profile at {}: {}", path, e);
                std::process::exit(1);
            });
            serde_json::from_str::<UserProfile>(&raw).unwrap_or_else(|e| {
                eprintln!("Error: invalid profile JSON at {}: {}", path, e);
                std::process::exit(1);
            })
        }
        Err(_) => {
            eprintln!("   Profile: none loaded (set APPLYFLOW_PROFILE_PATH)");
            UserProfile::default()
        }
    };

    // ── Orchestrator ─────────────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        store, roles, gate, agent, profile, config,
    ));

    // Re-attach attempts suspended before the last shutdown.
    match orchestrator.recover().await {
        Ok(0) => {}
        Ok(n) => eprintln!("   Recovered {} suspended application attempt(s)", n),
        Err(e) => eprintln!("   Warning: attempt recovery failed: {}", e),
    }

    // ── Correspondence feed ──────────────────────────────────────────────
    // Raw RFC 822 mail lands on this channel from the HTTP surface; the
    // consumer runs it through the Secretary for the life of the process.
    let (feed_tx, feed_rx) = tokio::sync::mpsc::channel(256);
    let _feed_handle = spawn_feed_consumer(orchestrator.secretary(), feed_rx);

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = api_routes(orchestrator, feed_tx);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Applyflow API server started");
    axum::serve(listener, app).await?;

    Ok(())
}
