mod config_commands;
mod db_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    parley_config::{ParleyConfig, Severity},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley: WhatsApp conversations and campaigns")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./parley.toml and the user config dir).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default when no subcommand is provided).
    Serve,
    /// Close every conversation whose reply window has expired, once.
    Sweep,
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
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
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

/// Load the explicit or discovered config, then apply command-line overrides.
fn resolve_config(cli: &Cli) -> anyhow::Result<ParleyConfig> {
    let mut config = match &cli.config {
        Some(path) => parley_config::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => parley_config::discover_and_load(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Log diagnostics and refuse to start on errors.
fn ensure_valid(config: &ParleyConfig) -> anyhow::Result<()> {
    let diagnostics = parley_config::validate(config);
    let mut errors = 0;
    for d in &diagnostics {
        match d.severity {
            Severity::Error => {
                errors += 1;
                error!(path = d.path, "{}", d.message);
            },
            Severity::Warning => warn!(path = d.path, "{}", d.message),
            Severity::Info => info!(path = d.path, "{}", d.message),
        }
    }
    if errors > 0 {
        anyhow::bail!("configuration has {errors} error(s); run `parley config check`");
    }
    Ok(())
}

async fn sweep(config: &ParleyConfig) -> anyhow::Result<()> {
    let store = db_commands::open_store(config).await?;
    let closed = parley_conversations::sweep_once(&store, parley_common::now_ms()).await?;
    info!(closed, "window sweep finished");
    println!("Closed {closed} conversation(s).");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "parley starting");

    let config = resolve_config(&cli)?;
    match cli.command {
        None | Some(Commands::Serve) => {
            ensure_valid(&config)?;
            parley_gateway::start_gateway(config).await
        },
        Some(Commands::Sweep) => sweep(&config).await,
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action, &config),
    }
}
