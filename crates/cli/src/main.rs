mod token_commands;

use std::{path::PathBuf, time::Duration};

use {
    anyhow::Context,
    chatrelay_config::RelayConfig,
    chatrelay_store::SqliteStore,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{
        EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
    },
};

const DEFAULT_LOG_LEVEL: &str = "info";
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "chatrelay", about = "chatrelay: realtime chat relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (toml, yaml or json). Defaults to standard locations.
    #[arg(long, short, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides `logger.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server.
    Serve {
        /// Address to bind. Overrides `server.host`.
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on. Overrides `server.port`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create any missing tables and indexes in the configured database.
    Migrate,
    /// Issue or inspect session tokens.
    Token {
        #[command(subcommand)]
        action: token_commands::TokenAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config with secrets redacted.
    Show,
}

/// Filter to log with before the config is read, and whether it is final.
/// `RUST_LOG` wins, then `--log-level`; otherwise `info` stands in until
/// `logger.level` is known.
fn initial_filter(rust_log: Option<&str>, cli_level: Option<&str>) -> (EnvFilter, bool) {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return (filter, true);
    }
    match cli_level {
        Some(level) => (EnvFilter::new(level), true),
        None => (EnvFilter::new(DEFAULT_LOG_LEVEL), false),
    }
}

/// Install the global subscriber. The returned handle swaps the filter once
/// the config is loaded.
fn init_telemetry(filter: EnvFilter, json_logs: bool) -> reload::Handle<EnvFilter, Registry> {
    let (filter, handle) = reload::Layer::new(filter);

    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
    handle
}

/// Apply `serve` flag overrides, which win over file and environment.
fn apply_serve_overrides(config: &mut RelayConfig, bind: Option<String>, port: Option<u16>) {
    if let Some(bind) = bind {
        config.server.host = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
}

async fn run_migrations(url: &str) -> anyhow::Result<()> {
    tokio::time::timeout(MIGRATION_TIMEOUT, SqliteStore::connect(url))
        .await
        .context("timed out running migrations")?
        .context("failed to run migrations")?;
    info!("database schema is up to date");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Logging comes up first so config discovery can report what it found.
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (filter, filter_is_final) = initial_filter(rust_log.as_deref(), cli.log_level.as_deref());
    let log_filter = init_telemetry(filter, cli.json_logs);

    let mut config = chatrelay_config::load(cli.config.as_deref())?;
    if !filter_is_final
        && let Err(e) = log_filter.modify(|filter| *filter = EnvFilter::new(&config.logger.level))
    {
        warn!(error = %e, level = %config.logger.level, "could not apply configured log level");
    }

    match cli.command {
        Commands::Serve { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "chatrelay starting");
            apply_serve_overrides(&mut config, bind, port);
            chatrelay_gateway::start_gateway(&config).await
        },
        Commands::Migrate => {
            run_migrations(&config.database.url).await?;
            println!("Migrations executed successfully.");
            Ok(())
        },
        Commands::Token { action } => token_commands::handle_token(action, &config),
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            println!("{}", serde_json::to_string_pretty(&config.redacted())?);
            Ok(())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "chatrelay",
            "--log-level",
            "debug",
            "serve",
            "--bind",
            "127.0.0.1",
            "--port",
            "9001",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let Commands::Serve { bind, port } = cli.command else {
            panic!("expected serve");
        };

        let mut config = RelayConfig::default();
        apply_serve_overrides(&mut config, bind, port);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
    }

    #[test]
    fn log_filter_precedence() {
        let (filter, is_final) = initial_filter(None, None);
        assert_eq!(filter.to_string(), "info");
        assert!(!is_final);

        let (filter, is_final) = initial_filter(None, Some("debug"));
        assert_eq!(filter.to_string(), "debug");
        assert!(is_final);

        let (filter, is_final) = initial_filter(Some("warn"), Some("debug"));
        assert_eq!(filter.to_string(), "warn");
        assert!(is_final);

        // Unparseable RUST_LOG falls through to the flag.
        let (filter, _) = initial_filter(Some("chatrelay=verbose"), Some("trace"));
        assert_eq!(filter.to_string(), "trace");
    }

    #[test]
    fn serve_without_flags_keeps_config() {
        let mut config = RelayConfig::default();
        apply_serve_overrides(&mut config, None, None);
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn migrate_creates_schema_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("relay.db").display());

        assert!(matches!(
            Cli::try_parse_from(["chatrelay", "migrate"]).unwrap().command,
            Commands::Migrate
        ));
        run_migrations(&url).await.unwrap();
        run_migrations(&url).await.unwrap();

        let store = SqliteStore::connect(&url).await.unwrap();
        store.create_user("alice", "hash", "Alice").await.unwrap();
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[test]
    fn parses_token_commands() {
        let cli = Cli::try_parse_from([
            "chatrelay", "token", "issue", "--user-id", "42", "--name", "alice",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Token {
                action: token_commands::TokenAction::Issue { user_id: 42, .. }
            }
        ));
        assert!(Cli::try_parse_from(["chatrelay", "token", "issue"]).is_err());
    }
}
