use std::{process, sync::Arc};

use blockmirror::{
    application::{error::AppError, mirror::SiteMirror},
    cache::{CacheClient, CacheConfig, CacheError, DurableMirror, META_FILE, MetadataState},
    config::{self, Command, Settings},
    domain::NodeId,
    infra::{notion::HttpContentSource, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args.command.unwrap_or_default();

    telemetry::init(&settings.logging)?;

    match command {
        Command::Sync(_) => run_sync(settings).await,
        Command::Purge(_) => run_purge(settings).await,
        Command::Status(_) => run_status(settings).await,
    }
}

async fn run_sync(settings: Settings) -> Result<(), AppError> {
    let collection = settings
        .remote
        .collection_id
        .as_deref()
        .map(NodeId::from)
        .ok_or_else(|| {
            AppError::validation(
                "a collection id is required (use --collection or remote.collection_id)",
            )
        })?;

    let source = Arc::new(HttpContentSource::new(&settings.remote)?);
    let cache = Arc::new(CacheClient::new(source, CacheConfig::from(&settings.cache)));
    cache.load_cache().await?;

    let concurrency = settings.sync.concurrency.get() as usize;
    let mirror = SiteMirror::new(cache, concurrency);
    let report = mirror.sync_and_close(&collection).await?;

    println!(
        "{} ({}): {} pages, {} blocks, {} cache hits, {} upstream calls",
        report.title.as_deref().unwrap_or("untitled"),
        report.collection,
        report.pages,
        report.blocks,
        report.cache_hits,
        report.cache_misses,
    );
    Ok(())
}

async fn run_purge(settings: Settings) -> Result<(), AppError> {
    let directory = settings.cache.directory.clone();
    DurableMirror::new(&directory)
        .purge()
        .await
        .map_err(CacheError::from)?;

    info!(
        op = "cli::purge",
        result = "ok",
        directory = %directory.display(),
        "Cache purged"
    );
    println!("purged {}", directory.display());
    Ok(())
}

async fn run_status(settings: Settings) -> Result<(), AppError> {
    let directory = settings.cache.directory;
    let snapshot = DurableMirror::new(&directory)
        .load()
        .await
        .map_err(CacheError::from)?;

    println!("cache directory: {}", directory.display());
    match snapshot.metadata {
        MetadataState::Loaded(record) => {
            println!("entries:        {}", snapshot.entries.len());
            println!("stamped nodes:  {}", record.cached_as_of.len());
            println!("parent links:   {}", record.parents.len());
        }
        MetadataState::Missing => println!("no {META_FILE}; the next sync starts cold"),
        MetadataState::Corrupt => {
            println!("{META_FILE} is unreadable; the next sync starts cold")
        }
    }
    Ok(())
}
