//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `serve` (default) -- run the webhook server
//! - `check-flows` -- validate a flow definitions file
//! - `simulate` -- drive a conversation from stdin without WhatsApp
//! - `version` -- print build/version info

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::channels::whatsapp::WhatsAppGateway;
use crate::channels::{cap_buttons, Delivery, GatewayError, GatewayResult, MessageGateway};
use crate::config::{AppConfig, ConfigError};
use crate::engine::{ActionDispatcher, ConversationEngine, CustomerRef};
use crate::flows::{load_flows_file, FlowStoreError, InMemoryFlowStore};
use crate::messages::{Button, InboundEvent};
use crate::server::{router, ServerState};
use crate::sessions::store::preload_sessions;
use crate::sessions::{SessionStore, SessionStoreError};

/// WhatsApp order-taking chat assistant.
#[derive(Parser, Debug)]
#[command(
    name = "duka",
    version = env!("CARGO_PKG_VERSION"),
    about = "duka — conversation engine for WhatsApp order-taking"
)]
pub struct Cli {
    /// Path to the config file (default: platform config dir).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the webhook server (default when no subcommand is given).
    Serve {
        /// Override the configured bind port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate a flow definitions file and print a summary.
    CheckFlows {
        /// Flow definitions file (default: from config).
        path: Option<PathBuf>,
    },

    /// Drive a conversation from stdin, printing replies instead of
    /// sending them. Prefix a line with `btn:` to simulate a button tap,
    /// e.g. `btn:pay_cash`.
    Simulate {
        /// Customer phone number to simulate.
        #[arg(long, default_value = "+254700000001")]
        phone: String,
    },

    /// Print version, build date, and git commit information.
    Version,
}

/// CLI-level errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Flows(#[from] FlowStoreError),

    #[error(transparent)]
    Sessions(#[from] SessionStoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            crate::logging::init();
            let mut config = AppConfig::load(&config_path)?;
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Command::CheckFlows { path } => {
            crate::logging::init();
            let config = AppConfig::load(&config_path)?;
            check_flows(path.unwrap_or(config.flows_path))
        }
        Command::Simulate { phone } => {
            crate::logging::init();
            let config = AppConfig::load(&config_path)?;
            simulate(config, phone).await
        }
        Command::Version => {
            println!(
                "duka {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                env!("DUKABOT_GIT_HASH"),
                env!("DUKABOT_BUILD_DATE"),
            );
            Ok(())
        }
    }
}

/// Run the webhook server until ctrl-c.
async fn serve(config: AppConfig) -> Result<(), CliError> {
    config.warn_incomplete();

    let flows = match InMemoryFlowStore::load_file(&config.flows_path) {
        Ok(store) => {
            info!(count = store.flow_count(), path = %config.flows_path.display(), "loaded flows");
            Arc::new(store)
        }
        Err(FlowStoreError::Io { .. }) => {
            // Missing flows file is survivable; every turn falls back until
            // flows are provided.
            tracing::warn!(path = %config.flows_path.display(), "no flows file; all turns will get the fallback reply");
            Arc::new(InMemoryFlowStore::new())
        }
        Err(e) => return Err(e.into()),
    };

    let sessions = match &config.sessions_dir {
        Some(dir) => {
            let store = Arc::new(SessionStore::with_persist_dir(dir)?);
            let loaded = preload_sessions(&store, dir);
            info!(loaded, dir = %dir.display(), "preloaded persisted sessions");
            store
        }
        None => Arc::new(SessionStore::new()),
    };

    let gateway: Arc<dyn MessageGateway> =
        Arc::new(WhatsAppGateway::new(config.whatsapp.clone())?);
    let dispatcher = ActionDispatcher::with_defaults(gateway.clone());
    let mut engine = ConversationEngine::new(flows, sessions.clone(), dispatcher, gateway);
    if let Some(message) = &config.fallback_message {
        engine = engine.with_fallback_message(message);
    }

    // Hourly stale-session sweep.
    let retention = chrono::Duration::hours(config.session_retention_hours as i64);
    let cleanup_store = sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.tick().await;
        loop {
            interval.tick().await;
            cleanup_store.cleanup_stale(retention).await;
        }
    });

    let state = ServerState {
        engine: Arc::new(engine),
        verify_token: config.verify_token.clone(),
        tenant_id: config.tenant_id.clone(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(host = %config.host, port = config.port, "webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install ctrl-c handler");
    }
}

/// Validate a flows file and print a per-flow summary.
fn check_flows(path: PathBuf) -> Result<(), CliError> {
    let flows = load_flows_file(&path)?;
    println!("{}: {} flow(s) OK", path.display(), flows.len());
    for flow in &flows {
        let transitions: usize = flow.states.iter().map(|s| s.transitions.len()).sum();
        println!(
            "  {} (tenant {}, {}): {} states, {} transitions, start '{}'",
            flow.id,
            flow.tenant_id,
            if flow.active { "active" } else { "inactive" },
            flow.states.len(),
            transitions,
            flow.resolve_start_state()
                .map(|s| s.token())
                .unwrap_or_default(),
        );
    }
    Ok(())
}

/// Gateway that prints replies to stdout for `simulate`.
struct ConsoleGateway;

#[async_trait]
impl MessageGateway for ConsoleGateway {
    async fn send_text(&self, _to: &str, body: &str) -> GatewayResult<Delivery> {
        println!("<- {body}");
        Ok(Delivery {
            message_id: format!("local-{}", uuid::Uuid::new_v4()),
        })
    }

    async fn send_buttons(
        &self,
        _to: &str,
        body: &str,
        buttons: &[Button],
    ) -> GatewayResult<Delivery> {
        println!("<- {body}");
        for button in cap_buttons(buttons) {
            println!("   [{}] {}", button.id, button.title);
        }
        Ok(Delivery {
            message_id: format!("local-{}", uuid::Uuid::new_v4()),
        })
    }
}

/// Read lines from stdin and feed them through the engine as one customer.
async fn simulate(config: AppConfig, phone: String) -> Result<(), CliError> {
    let flows = Arc::new(InMemoryFlowStore::load_file(&config.flows_path)?);
    info!(count = flows.flow_count(), "loaded flows for simulation");

    let gateway: Arc<dyn MessageGateway> = Arc::new(ConsoleGateway);
    let dispatcher = ActionDispatcher::with_defaults(gateway.clone());
    let engine = ConversationEngine::new(flows, Arc::new(SessionStore::new()), dispatcher, gateway);

    let customer = CustomerRef::from_phone(phone, config.tenant_id.clone());
    println!("simulating as {} (tenant {}); ctrl-d to quit", customer.phone_number, customer.tenant_id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let event = match line.strip_prefix("btn:") {
            Some(id) => InboundEvent::button(&customer.phone_number, id.trim(), id.trim()),
            None => InboundEvent::text(&customer.phone_number, &line),
        };
        let outcome = engine.process_event(&customer, &event).await;
        tracing::debug!(?outcome, "simulated turn");
    }
    Ok(())
}
