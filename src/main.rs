use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use finbrief::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch financials and report metrics for symbols
    Analyze {
        /// Ticker symbols; falls back to the configured list when omitted
        symbols: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(Commands::Analyze { symbols }) => {
            finbrief::run_command(
                finbrief::AppCommand::Analyze { symbols },
                cli.config_path.as_deref(),
            )
            .await
        }
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}

fn setup() -> anyhow::Result<()> {
    use anyhow::Context;

    let path = finbrief::config::AppConfig::default_config_path()?;

    if path.exists() {
        anyhow::bail!("Configuration file already exists at {}", path.display());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let default_config = r#"---
symbols:
  - "AAPL"

providers:
  fmp:
    base_url: "https://financialmodelingprep.com/api/v3"
    # api_key: "..."
  alphavantage:
    base_url: "https://www.alphavantage.co"
    # api_key: "..."
  finnhub:
    base_url: "https://finnhub.io/api/v1"
    # api_key: "..."
  priority: ["fmp", "alphavantage", "finnhub"]
"#;

    std::fs::write(&path, default_config)
        .with_context(|| format!("Failed to write config file to {}", path.display()))?;

    tracing::info!("Created default configuration at {}", path.display());
    Ok(())
}
