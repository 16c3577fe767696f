use anyhow::{Context, Result};
use clap::Parser;
use mats_middle::cli::{self, OutputFormat};
use mats_middle::services::verification::memory_store::{MemoryDataset, MemoryStore};
use mats_middle::services::verification::pg_store::PgStore;
use mats_middle::services::verification::store::VerificationStore;
use mats_middle::services::verification::types::VerificationQuery;
use mats_middle::services::verification::{RequestContext, VerificationService};
use mats_middle::{config, db, output};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::from_env()?;
    let mut engine = config.engine.clone();
    if let Some(ms) = args.timeout_ms.filter(|ms| *ms > 0) {
        engine.query_timeout = Some(Duration::from_millis(ms));
    }
    let query = args.load_query()?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; canceling query");
            signal_cancel.cancel();
        }
    });

    if let Some(path) = &args.fixture {
        let store = MemoryStore::from_json_file(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?;
        let Some(query) = query else {
            anyhow::bail!("--fixture requires --query");
        };
        let service = VerificationService::new(Arc::new(store), engine);
        return run_query(&service, &query, &args, cancel).await;
    }

    let database_url = config.database_url.clone().context(
        "MATS_DATABASE_URL (or DATABASE_URL) must be set unless --fixture is used",
    )?;
    let pool = db::connect_lazy(&database_url, config.db_pool_size)?;
    let store = PgStore::new(pool);
    if args.init_schema {
        store.ensure_schema().await?;
        tracing::info!("schema ready");
    }
    if let Some(path) = &args.seed {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        let dataset: MemoryDataset = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse seed file {}", path.display()))?;
        store.load_dataset(&dataset).await?;
    }
    let Some(query) = query else {
        if args.init_schema || args.seed.is_some() {
            return Ok(ExitCode::SUCCESS);
        }
        anyhow::bail!("nothing to do: pass --query, --init-schema or --seed");
    };
    let service = VerificationService::new(Arc::new(store), engine);
    run_query(&service, &query, &args, cancel).await
}

async fn run_query<S: VerificationStore>(
    service: &VerificationService<S>,
    query: &VerificationQuery,
    args: &cli::Args,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let ctx = RequestContext::new().with_cancel(cancel);
    let result = match service.execute(query, ctx).await {
        Ok(result) => result,
        Err(err) => {
            eprintln!("{}", output::render_error(&err)?);
            return Ok(ExitCode::FAILURE);
        }
    };
    match args.format {
        OutputFormat::Json => println!("{}", output::render_json(&result, args.pretty)?),
        OutputFormat::Csv => output::write_csv(&result, std::io::stdout().lock())?,
    }
    Ok(ExitCode::SUCCESS)
}
