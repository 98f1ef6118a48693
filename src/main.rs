//! Streamgate CLI entry point

mod cli;

use crate::cli::{Cli, Commands, TokenCommands};
use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use streamgate::auth::{
    generate_token_value, spawn_sweeper, AccessRecorder, AuthEngine, SessionLedger, TokenStatus,
};
use streamgate::config::AuthConfig;
use streamgate::server::{GateServer, GateServerConfig};
use streamgate::storage::{
    AccessLog, MemoryStore, NewToken, PostgresConfig, PostgresStore, TokenFilter, TokenPatch,
    TokenStore,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Helper to get database config lazily (only when needed)
    let get_db_config = || -> Result<PostgresConfig> {
        if let Some(url) = &cli.database_url {
            PostgresConfig::from_url(url).context("Invalid DATABASE_URL")
        } else {
            PostgresConfig::from_env().context("DATABASE_URL not set")
        }
    };

    match cli.command {
        Commands::Serve {
            bind,
            api_key,
            auth_duration,
            default_max_sessions,
            sweep_interval,
            disable_access_log,
            memory,
        } => {
            let config = AuthConfig {
                auth_duration: Duration::from_secs(auth_duration),
                default_max_sessions,
                sweep_interval: Duration::from_secs(sweep_interval),
                access_log_enabled: !disable_access_log,
                ..AuthConfig::default()
            };

            if memory {
                let store = Arc::new(MemoryStore::new());
                serve(store.clone(), store, bind, api_key, config).await
            } else {
                let store = Arc::new(PostgresStore::new(get_db_config()?).await?);
                serve(store.clone(), store, bind, api_key, config).await
            }
        }
        Commands::Token { command } => token(get_db_config()?, command).await,
        Commands::Init => init(get_db_config()?).await,
        Commands::Status => status(get_db_config()?).await,
    }
}

async fn serve(
    store: Arc<dyn TokenStore>,
    access_sink: Arc<dyn AccessLog>,
    bind: String,
    api_key: Option<String>,
    config: AuthConfig,
) -> Result<()> {
    let bind_addr = bind.parse().context("Invalid bind address")?;

    let ledger = Arc::new(SessionLedger::new());

    let recorder = if config.access_log_enabled {
        let (recorder, _task) = AccessRecorder::spawn(access_sink);
        recorder
    } else {
        AccessRecorder::disabled()
    };

    let sweeper = spawn_sweeper(ledger.clone(), config.sweep_interval);

    let engine = Arc::new(AuthEngine::new(store.clone(), ledger, recorder, config));

    let server = GateServer::new(GateServerConfig { bind_addr, api_key }, engine, store);

    info!("Starting Streamgate server...");
    let result = server.run().await;
    sweeper.abort();
    result
}

async fn token(db_config: PostgresConfig, command: TokenCommands) -> Result<()> {
    let store = PostgresStore::new(db_config).await?;

    match command {
        TokenCommands::Create {
            user_id,
            value,
            max_sessions,
            valid_from,
            valid_until,
            allow_ips,
            allow_streams,
        } => {
            let new = NewToken {
                value: value.unwrap_or_else(generate_token_value),
                user_id,
                status: TokenStatus::Active,
                max_sessions,
                valid_from: parse_ts(valid_from.as_deref())?,
                valid_until: parse_ts(valid_until.as_deref())?,
                allowed_ips: allow_ips,
                allowed_streams: allow_streams,
                metadata: serde_json::json!({}),
            };

            let record = store.create(new).await?;

            println!("{}", record.value);
            println!();
            println!("Id: {}", record.id);
            println!("User: {}", record.user_id);
            match record.max_sessions {
                Some(0) => println!("Max sessions: unlimited"),
                Some(n) => println!("Max sessions: {}", n),
                None => println!("Max sessions: (server default)"),
            }
            if !record.allowed_ips.is_empty() {
                println!("Allowed IPs: {}", record.allowed_ips.join(", "));
            }
            if !record.allowed_streams.is_empty() {
                println!("Allowed streams: {}", record.allowed_streams.join(", "));
            }
        }
        TokenCommands::List { status } => {
            let status = status
                .as_deref()
                .map(TokenStatus::parse)
                .transpose()
                .context("Invalid status filter")?;

            let records = store
                .list(&TokenFilter {
                    status,
                    ..Default::default()
                })
                .await?;

            if records.is_empty() {
                println!("(no tokens)");
            }
            for t in records {
                println!(
                    "{:>6}  {:<10}  {:<20}  {}",
                    t.id,
                    t.status,
                    t.user_id,
                    t.value
                );
            }
        }
        TokenCommands::Show { id } => {
            let record = store
                .get_by_id(id)
                .await?
                .with_context(|| format!("Token not found: {}", id))?;

            println!("Token: {}", record.value);
            println!("Id: {}", record.id);
            println!("User: {}", record.user_id);
            println!("Status: {}", record.status);
            if let Some(from) = record.valid_from {
                println!("Valid from: {}", from.to_rfc3339());
            }
            if let Some(until) = record.valid_until {
                println!("Valid until: {}", until.to_rfc3339());
            }
            match record.max_sessions {
                Some(0) => println!("Max sessions: unlimited"),
                Some(n) => println!("Max sessions: {}", n),
                None => println!("Max sessions: (server default)"),
            }
            println!(
                "Allowed IPs: {}",
                if record.allowed_ips.is_empty() {
                    "(unrestricted)".to_string()
                } else {
                    record.allowed_ips.join(", ")
                }
            );
            println!(
                "Allowed streams: {}",
                if record.allowed_streams.is_empty() {
                    "(unrestricted)".to_string()
                } else {
                    record.allowed_streams.join(", ")
                }
            );
        }
        TokenCommands::Suspend { id } => {
            set_status(&store, id, TokenStatus::Suspended).await?;
            println!("Suspended token {}", id);
        }
        TokenCommands::Resume { id } => {
            set_status(&store, id, TokenStatus::Active).await?;
            println!("Reactivated token {}", id);
        }
        TokenCommands::Revoke { id } => {
            if store.delete(id).await? {
                println!("Deleted token {}", id);
            } else {
                anyhow::bail!("Token not found: {}", id);
            }
        }
    }

    Ok(())
}

async fn set_status(store: &PostgresStore, id: i64, status: TokenStatus) -> Result<()> {
    let patch = TokenPatch {
        status: Some(status),
        ..Default::default()
    };
    store
        .update(id, patch)
        .await?
        .with_context(|| format!("Token not found: {}", id))?;
    Ok(())
}

fn parse_ts(value: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .with_context(|| format!("Invalid RFC 3339 timestamp: {}", s))
        })
        .transpose()
}

async fn init(db_config: PostgresConfig) -> Result<()> {
    let _store = PostgresStore::new(db_config).await?;
    println!("Database schema initialized successfully");
    Ok(())
}

async fn status(db_config: PostgresConfig) -> Result<()> {
    let store = PostgresStore::new(db_config).await?;

    let tokens = store.list(&TokenFilter::default()).await?;
    let active = tokens
        .iter()
        .filter(|t| t.status == TokenStatus::Active)
        .count();

    println!("Streamgate Status");
    println!("=================");
    println!("Database: Connected");
    println!("Tokens: {} ({} active)", tokens.len(), active);

    Ok(())
}
