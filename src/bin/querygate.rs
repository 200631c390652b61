//! Command-line front end: run one query through the gateway and print the
//! tool-call JSON response.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use querygate::{AppConfig, QueryGateway};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "querygate", version, about = "Validate and run a read-only SQL query")]
struct Cli {
    /// Configuration file (defaults to $QUERYGATE_CONFIG or ./querygate.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Query text; read from stdin when omitted
    #[arg(long)]
    sql: Option<String>,

    /// Override the configured query timeout
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pretty-print the JSON response
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().context("failed to load configuration")?,
    };

    let sql = match cli.sql {
        Some(sql) => sql,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read query from stdin")?;
            buffer
        }
    };

    let gateway = QueryGateway::new(config)
        .await
        .context("failed to start query gateway")?;

    let response = match cli.timeout_ms {
        Some(ms) => gateway.run_tool_with_timeout(&sql, Duration::from_millis(ms)).await,
        None => gateway.run_tool(&sql).await,
    };
    gateway.close();

    let json = response.to_json();
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{}", rendered);

    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
