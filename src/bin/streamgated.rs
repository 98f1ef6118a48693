//! Streamgate daemon - authorization backend for media streaming servers

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamgate::auth::{spawn_sweeper, AccessRecorder, AuthEngine, SessionLedger};
use streamgate::config::AuthConfig;
use streamgate::server::{GateServer, GateServerConfig};
use streamgate::storage::{PostgresConfig, PostgresStore};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "streamgated")]
#[command(about = "Streamgate authorization daemon")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "STREAMGATE_BIND")]
    bind: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// API key protecting the management surface (open when unset)
    #[arg(long, env = "STREAMGATE_API_KEY")]
    api_key: Option<String>,

    /// Session lease in seconds, sent as X-AuthDuration
    #[arg(long, default_value_t = 180, env = "STREAMGATE_AUTH_DURATION")]
    auth_duration: u64,

    /// Session cap for tokens without an explicit one (0 = unlimited)
    #[arg(long, default_value_t = 1, env = "STREAMGATE_DEFAULT_MAX_SESSIONS")]
    default_max_sessions: u32,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 60, env = "STREAMGATE_SWEEP_INTERVAL")]
    sweep_interval: u64,

    /// Disable access-log writes
    #[arg(long, env = "STREAMGATE_DISABLE_ACCESS_LOG")]
    disable_access_log: bool,

    /// Run as daemon (background)
    #[arg(short, long)]
    daemon: bool,

    /// PID file path (only with --daemon)
    #[arg(long, env = "STREAMGATE_PIDFILE")]
    pidfile: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Daemonize if requested
    #[cfg(unix)]
    if args.daemon {
        daemonize(&args)?;
    }
    #[cfg(not(unix))]
    if args.daemon {
        anyhow::bail!("--daemon is only supported on unix");
    }

    run_server(args).await
}

#[cfg(unix)]
fn daemonize(args: &Args) -> Result<()> {
    use std::fs::File;
    use std::io::Write;

    // Fork and detach
    match unsafe { libc::fork() } {
        -1 => return Err(anyhow::anyhow!("Fork failed")),
        0 => {
            // Child process - continue
        }
        pid => {
            // Parent process - write pidfile and exit
            if let Some(pidfile) = &args.pidfile {
                let mut f = File::create(pidfile)
                    .with_context(|| format!("Failed to create pidfile: {:?}", pidfile))?;
                writeln!(f, "{}", pid)?;
            }
            info!(pid = pid, "Daemon started");
            std::process::exit(0);
        }
    }

    // Create new session
    if unsafe { libc::setsid() } == -1 {
        return Err(anyhow::anyhow!("setsid failed"));
    }

    // Change to root directory
    std::env::set_current_dir("/")?;

    // Close standard file descriptors
    unsafe {
        libc::close(0);
        libc::close(1);
        libc::close(2);
    }

    Ok(())
}

async fn run_server(args: Args) -> Result<()> {
    // Parse database config
    let db_config =
        PostgresConfig::from_url(&args.database_url).context("Invalid DATABASE_URL")?;

    // Create store
    let store = Arc::new(PostgresStore::new(db_config).await?);

    // Parse bind address
    let bind_addr = args.bind.parse().context("Invalid bind address")?;

    let config = AuthConfig {
        auth_duration: Duration::from_secs(args.auth_duration),
        default_max_sessions: args.default_max_sessions,
        sweep_interval: Duration::from_secs(args.sweep_interval),
        access_log_enabled: !args.disable_access_log,
        ..AuthConfig::default()
    };

    // Wire up the core: ledger, recorder, sweeper, engine
    let ledger = Arc::new(SessionLedger::new());

    let recorder = if config.access_log_enabled {
        let (recorder, _task) = AccessRecorder::spawn(store.clone());
        recorder
    } else {
        AccessRecorder::disabled()
    };

    let sweeper = spawn_sweeper(ledger.clone(), config.sweep_interval);

    let engine = Arc::new(AuthEngine::new(store.clone(), ledger, recorder, config));

    let server = GateServer::new(
        GateServerConfig {
            bind_addr,
            api_key: args.api_key.clone(),
        },
        engine,
        store,
    );

    info!(addr = %args.bind, "Streamgate daemon starting");

    // Run server with graceful shutdown on signals
    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server");
        }
    }

    sweeper.abort();

    // Cleanup pidfile if it exists
    if let Some(pidfile) = &args.pidfile {
        if pidfile.exists() {
            if let Err(e) = std::fs::remove_file(pidfile) {
                warn!(error = %e, "Failed to remove pidfile");
            }
        }
    }

    info!("Streamgate daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
