use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chorus", about = "Chorus — real-time team music quiz server")]
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
        /// Bind address; falls back to the config file.
        #[arg(long)]
        bind: Option<String>,
        /// Port; falls back to the config file.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the builtin question themes.
    Themes,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file path.
    Path,
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
        Commands::Gateway { bind, port } => {
            info!(version = env!("CARGO_PKG_VERSION"), "chorus starting");
            let config = chorus_config::discover_and_load();
            let bind = bind.unwrap_or_else(|| config.gateway.bind.clone());
            let port = port.unwrap_or(config.gateway.port);
            chorus_gateway::server::start_gateway(&bind, port, config).await
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = chorus_config::discover_and_load();
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            },
            ConfigAction::Path => {
                println!("{}", chorus_config::find_or_default_config_path().display());
                Ok(())
            },
        },
        Commands::Themes => {
            for theme in chorus_engine::questions::SongCatalog::themes() {
                println!("{theme}");
            }
            Ok(())
        },
    }
}
