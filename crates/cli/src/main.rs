mod access_commands;
mod config_commands;
mod trace_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    sqlx::SqlitePool,
    switchboard_config::{SwitchboardConfig, apply_env_overrides, find_config_file, load_config},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "switchboard",
    version,
    about = "Switchboard: multi-tenant gateway between chat channels and agent backends"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./switchboard.toml and the user config dir).
    #[arg(long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Database URL (overrides config value).
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Serve,
    /// Inspect message traces.
    Traces {
        #[command(subcommand)]
        action: trace_commands::TraceAction,
    },
    /// Evaluate access rules.
    Access {
        #[command(subcommand)]
        action: access_commands::AccessAction,
    },
    /// Configuration checks.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Load the config file (explicit or discovered), then apply env and CLI
/// overrides. A config file that exists but does not parse is an error.
fn load_settings(cli: &Cli) -> anyhow::Result<(SwitchboardConfig, Option<PathBuf>)> {
    let path = cli.config.clone().or_else(find_config_file);
    let config = match &path {
        Some(path) => load_config(path)?,
        None => SwitchboardConfig::default(),
    };
    let mut config = apply_env_overrides(config);
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    Ok((config, path))
}

/// Open the gateway database and bring its schema up to date.
pub(crate) async fn open_database(config: &SwitchboardConfig) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(&config.database.url)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    switchboard_gateway::run_migrations(&pool).await?;
    Ok(pool)
}

async fn serve(config: SwitchboardConfig, path: Option<PathBuf>) -> anyhow::Result<()> {
    match &path {
        Some(path) => info!(path = %path.display(), "config loaded"),
        None => info!("no config file found, using defaults"),
    }
    let result = switchboard_config::validate(&config);
    for diagnostic in &result.diagnostics {
        warn!("{diagnostic}");
    }
    if result.has_errors() {
        anyhow::bail!(
            "invalid configuration ({} error(s)), run `switchboard config check`",
            result.count(switchboard_config::Severity::Error)
        );
    }
    switchboard_gateway::server::start_gateway(config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "switchboard starting");

    let (config, path) = load_settings(&cli)?;

    match cli.command {
        None | Some(Commands::Serve) => serve(config, path).await,
        Some(Commands::Traces { action }) => {
            let pool = open_database(&config).await?;
            trace_commands::handle_traces(action, pool).await
        },
        Some(Commands::Access { action }) => {
            let pool = open_database(&config).await?;
            access_commands::handle_access(action, pool).await
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config, path),
    }
}
