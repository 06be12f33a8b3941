//! Authenticating gateway.
//!
//! Sits in front of an HTTP service and lets a request through only when
//! it carries a valid API token, valid Basic credentials or a signed-in
//! session cookie. Browsers without credentials get a login page.
//!
//! ```text
//!     Client ──▶ listener ──▶ adapter (http | socket) ──▶ Backend
//!                                 │
//!                                 ▼
//!                           Authenticator
//!                      (account + session store)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use locker_gateway::auth::account::hash_password;
use locker_gateway::config::{load_or_default, validate_config, ConfigError, GatewayConfig};
use locker_gateway::lifecycle::{spawn_signal_handler, startup, Adapter, Shutdown};
use locker_gateway::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "locker-gateway", version, about = "Authenticating gateway for an HTTP service")]
struct Cli {
    /// TOML configuration file. Missing file means defaults.
    #[arg(long, env = "CONFIG_FILE", default_value = "locker-gateway.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Terminate HTTP and judge every request.
    Http(ServeArgs),
    /// Relay raw connections, judging every request on them.
    Socket(ServeArgs),
    /// Print an argon2id hash for use in `auth.users`.
    HashPassword { password: String },
}

#[derive(Debug, Args)]
struct ServeArgs {
    /// Backend URL to protect.
    #[arg(long, env = "TARGET_URL")]
    target: Option<String>,

    /// Listen address.
    #[arg(long, env = "LISTEN_ADDRESS")]
    host: Option<String>,

    /// Listen port.
    #[arg(long, env = "LISTEN_PORT")]
    port: Option<u16>,

    /// Session lifetime in hours.
    #[arg(long, env = "EXPIRES")]
    expires: Option<u64>,

    /// Static API token.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    key: Option<String>,
}

impl ServeArgs {
    /// Flags and environment take precedence over the config file.
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(target) = &self.target {
            config.target.url = target.clone();
        }
        if self.host.is_some() || self.port.is_some() {
            config.listener.bind_address =
                bind_address(&config.listener.bind_address, self.host.as_deref(), self.port);
        }
        if let Some(hours) = self.expires {
            config.session.lifetime_hours = hours;
        }
        if let Some(key) = &self.key {
            config.auth.api_token = Some(key.clone());
        }
    }
}

/// Replace the host and/or port of `current`.
fn bind_address(current: &str, host: Option<&str>, port: Option<u16>) -> String {
    let (current_host, current_port) = match current.parse::<SocketAddr>() {
        Ok(addr) => (addr.ip().to_string(), addr.port()),
        Err(_) => ("0.0.0.0".to_string(), 3000),
    };
    let host = host.map(str::to_string).unwrap_or(current_host);
    let port = port.unwrap_or(current_port);
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let (adapter, args) = match &cli.command {
        Command::HashPassword { password } => {
            println!("{}", hash_password(password)?);
            return Ok(());
        }
        Command::Http(args) => (Adapter::Http, args),
        Command::Socket(args) => (Adapter::Socket, args),
    };

    let mut config = load_or_default(&cli.config)?;
    args.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(config.observability.log_format);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = %cli.config.display(),
        "locker-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    startup::run(config, adapter, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
