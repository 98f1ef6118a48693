//! CLI command definitions

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "streamgate")]
#[command(about = "Token authorization backend for media streaming servers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    pub database_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the authorization server
    Serve {
        /// Address to bind to
        #[arg(short, long, default_value = "0.0.0.0:8080", env = "STREAMGATE_BIND")]
        bind: String,

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

        /// Run fully in memory, without a database (testing/demo)
        #[arg(long)]
        memory: bool,
    },

    /// Manage tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Initialize the database schema
    Init,

    /// Show backend status
    Status,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Create a new token
    ///
    /// Examples:
    ///   streamgate token create --user-id alice
    ///   streamgate token create --user-id bob --max-sessions 3 --allow-ip 10.0.0.1
    Create {
        /// User identifier returned to the streaming server
        #[arg(long, required = true)]
        user_id: String,

        /// Explicit token value (generated when omitted)
        #[arg(long)]
        value: Option<String>,

        /// Concurrent session cap (0 = unlimited)
        #[arg(long)]
        max_sessions: Option<u32>,

        /// Validity start, RFC 3339
        #[arg(long)]
        valid_from: Option<String>,

        /// Validity end, RFC 3339
        #[arg(long)]
        valid_until: Option<String>,

        /// Allowed client IP (can be repeated; none = unrestricted)
        #[arg(long = "allow-ip")]
        allow_ips: Vec<String>,

        /// Allowed stream name (can be repeated; none = unrestricted)
        #[arg(long = "allow-stream")]
        allow_streams: Vec<String>,
    },

    /// List tokens
    List {
        /// Filter by status: active, suspended, expired
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a token by id
    Show {
        /// Token id
        id: i64,
    },

    /// Suspend a token
    Suspend {
        /// Token id
        id: i64,
    },

    /// Reactivate a suspended token
    Resume {
        /// Token id
        id: i64,
    },

    /// Delete a token
    Revoke {
        /// Token id
        id: i64,
    },
}
