use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use stockledger_cli::{Batch, apply_batch};
use stockledger_infra::{
    InMemoryLedgerStore, LedgerConfig, LedgerQueries, LedgerStore, LocalBus, PostgresLedgerStore,
    StockLedgerEngine, build_sink,
};

#[derive(Debug, Parser)]
#[command(name = "stockledger", about = "Apply a JSON batch of stock adjustments")]
struct Cli {
    /// Batch file; `-` reads standard input.
    input: PathBuf,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let cli = Cli::parse();
    let config = LedgerConfig::from_env().context("loading configuration")?;
    let batch: Batch = serde_json::from_str(&read_input(&cli.input)?)
        .with_context(|| format!("parsing batch from {}", cli.input.display()))?;

    let store: Arc<dyn LedgerStore> = match &config.database_url {
        Some(url) => {
            let pg = PostgresLedgerStore::connect(url)
                .await
                .context("connecting to postgres")?;
            pg.ensure_schema().await.context("creating schema")?;
            Arc::new(pg)
        }
        None => Arc::new(InMemoryLedgerStore::new()),
    };

    let local_bus = Arc::new(LocalBus::new());
    let sink = build_sink(&config, &local_bus)?;
    let engine = StockLedgerEngine::from_config(Arc::clone(&store), sink, &config);
    let queries = LedgerQueries::new(store);

    tracing::info!(
        products = batch.products.len(),
        adjustments = batch.adjustments.len(),
        "applying batch"
    );
    let report = tokio::task::spawn_blocking(move || apply_batch(&engine, &queries, batch))
        .await
        .context("batch worker panicked")??;
    tracing::info!(rejected = report.rejected(), "batch applied");

    let out = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading standard input")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}
