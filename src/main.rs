use anyhow::Context;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use validata::table::csv::read_csv_path;
use validata::{build_client, clean_table, AppConfig, AppState, HttpServer};

/// Usage: `validata [config.yaml] [dataset.csv]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let dataset_path = args.next().map(PathBuf::from);

    println!("Validata v{}", validata::version());
    println!("==========================================");

    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    let client = build_client(&config.llm).context("building LLM client")?;
    if client.is_none() {
        warn!("No API key for {:?}; question and extraction endpoints are disabled", config.llm.provider);
    }

    let port = config.http.port;
    let mut state = AppState::new(config, client);
    if let Some(path) = dataset_path {
        let raw = read_csv_path(&path).with_context(|| format!("reading {}", path.display()))?;
        let outcome = clean_table(&raw);
        info!(
            "Preloaded {} with {} row(s), {} correction(s)",
            path.display(),
            outcome.table.len(),
            outcome.audit.len()
        );
        state = state.with_table(outcome.table);
    }

    let server = HttpServer::new(state, port);
    println!("Server ready on port {}. Press Ctrl+C to stop.", port);
    if let Err(e) = server.start().await {
        anyhow::bail!("Server error: {}", e);
    }
    Ok(())
}
