mod config_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use chargegate_gateway::auth::generate_token;

#[derive(Parser)]
#[command(name = "chargegate", about = "Chargegate: OCPP 2.0.1 charging station gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server.
    Gateway {
        /// Bind address; overrides `gateway.bind`.
        #[arg(long)]
        bind: Option<String>,
        /// Listen port; overrides `gateway.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Config file to load instead of the discovered one.
        #[arg(long, env = "CHARGEGATE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Print freshly generated authentication tokens.
    Token {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: Option<config_commands::ConfigAction>,
        /// Config file to read instead of the discovered one.
        #[arg(long, env = "CHARGEGATE_CONFIG")]
        config: Option<PathBuf>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
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
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        Commands::Gateway { bind, port, config } => {
            info!(version = env!("CARGO_PKG_VERSION"), "chargegate starting");
            let mut config = config_commands::resolve_config(config.as_deref())?;
            if let Some(bind) = bind {
                config.gateway.bind = bind;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            chargegate_gateway::server::start_gateway(config).await
        },
        Commands::Token { count } => {
            for _ in 0..count {
                println!("{}", generate_token());
            }
            Ok(())
        },
        Commands::Config { action, config } => config_commands::handle_config(action, config),
    }
}
