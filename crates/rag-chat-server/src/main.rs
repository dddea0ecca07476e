use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use rag_chat_server::config::Settings;
use rag_chat_server::routes::build_router;
use rag_chat_server::services::conversation::{dedup_sources, HistoryWindow, SessionStore};
use rag_chat_server::services::{ChainHandle, ChatOrchestrator, Provider, ProviderAdapter};
use rag_chat_server::state::AppState;
use rag_chat_server::utils::logger::init_logger;

#[derive(Parser)]
#[command(name = "rag-chat-server")]
#[command(about = "Conversational retrieval QA over an Amazon Kendra index")]
struct Cli {
    /// LLM provider: openai, flanxl, flanxxl, llama2chat, falcon,
    /// bedrockclaude, bedrocktitan, bedrockai21labs, cohere
    provider: String,

    /// Settings file (TOML). Defaults to config/settings.toml when present.
    #[arg(short, long, env = "RAG_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Answer one question, print it with its sources, and exit.
    #[arg(long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_logger()?;

    info!("🚀 Starting RAG chat server...");

    // Configuration errors abort before anything is served
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let provider: Provider = cli.provider.parse()?;
    let chain = provider
        .initialize(&settings)
        .with_context(|| format!("Failed to initialize provider `{}`", provider))?;
    let provider_name = provider.display_name(&settings);
    info!("✅ Provider {} ready", provider_name);

    if let Some(question) = cli.ask {
        return ask_once(provider, &chain, &question).await;
    }

    let sessions = SessionStore::new(settings.history.capacity(), settings.session.idle_ttl());
    let orchestrator = ChatOrchestrator::new(Arc::new(provider), chain, sessions);

    spawn_session_sweeper(orchestrator.clone(), settings.session.sweep_interval());

    let app = build_router(AppState::new(
        orchestrator,
        settings.ui.clone(),
        &provider_name,
    ));

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn ask_once(
    provider: Provider,
    chain: &ChainHandle,
    question: &str,
) -> Result<()> {
    let result = provider
        .answer(chain, question, &HistoryWindow::new(0))
        .await?;

    println!("{}", result.answer);
    let sources = dedup_sources(&result.source_documents);
    if !sources.is_empty() {
        println!("Sources:");
        for source in sources {
            println!("{}", source.locator);
        }
    }
    Ok(())
}

fn spawn_session_sweeper(orchestrator: ChatOrchestrator, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            orchestrator.cleanup_expired_sessions();
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
