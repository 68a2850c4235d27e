use anyhow::Result;
use clap::{Parser, Subcommand};
use rekindle_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rekindle",
    version,
    about = "Rekindle - proactive chat backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(long, default_value = "3900")]
        port: u16,
    },

    /// Write a default config file if none exists
    Init,

    /// Show current gateway status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let loader = ConfigLoader::new()?;
    loader.ensure_dirs()?;
    let config = loader.load()?;

    match cli.command {
        Commands::Start { host, port } => {
            let mut config = config;
            config.gateway.host = host;
            config.gateway.port = port;

            let server = rekindle_gateway::GatewayServer::new(config, loader);
            server.run().await?;
        }
        Commands::Init => {
            let path = loader.config_dir().join("config.yml");
            if loader.config_file_exists() {
                println!("Config already exists in {}", loader.config_dir().display());
            } else {
                // Defaults only; env-derived secrets stay out of the file.
                let defaults = rekindle_config::AppConfig::default();
                std::fs::write(&path, serde_yaml::to_string(&defaults)?)?;
                println!("Wrote default config to {}", path.display());
                println!("Set OPENAI_API_KEY (or llm.api_key) to enable analysis calls.");
            }
        }
        Commands::Status => {
            let url = format!(
                "http://{}:{}/api/status",
                config.gateway.host, config.gateway.port
            );

            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body = resp.json::<serde_json::Value>().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Gateway is not running on {url}");
                }
            }
        }
    }

    Ok(())
}
