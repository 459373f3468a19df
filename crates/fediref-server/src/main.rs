use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fediref_db::{DataStore, PoolSettings, SqlStore};
use fediref_federation::client::HttpTransportController;
use fediref_federation::converter::ActivityStreamsConverter;
use fediref_federation::media::LocalMediaManager;
use fediref_federation::worker::WorkerPool;
use fediref_federation::{AccountOutcome, Dereferencer, FreshnessWindow, Outcome};
use fediref_models::Status;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

use cli::{AccountTarget, Command};
use config::{Config, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config = Config::load(&args.config)?;
    init_logging(&config);

    let settings = PoolSettings {
        max_connections: config.database.max_connections,
        statement_timeout_secs: config.database.statement_timeout_secs,
    };
    let pool = fediref_db::connect(&config.database.url, &settings)
        .await
    .with_context(|| format!("connecting to {}", config.database.url))?;
    fediref_db::run_migrations(&pool).await?;
    let store = Arc::new(SqlStore::new(pool));

    match &args.command {
        Command::BlockDomain { domain, reason } => {
            store.put_domain_block(domain, reason.as_deref()).await?;
            tracing::info!("blocked {}", domain);
            return Ok(());
        }
        Command::UnblockDomain { domain } => {
            if store.delete_domain_block(domain).await? {
                tracing::info!("unblocked {}", domain);
            } else {
                tracing::warn!("{} was not blocked", domain);
            }
            return Ok(());
        }
        _ => {}
    }

    let federation = config.federation_config();
    std::fs::create_dir_all(&config.media.storage_path)
        .with_context(|| format!("creating {}", config.media.storage_path))?;

    let transports = HttpTransportController::new(&federation)?;
    let media = LocalMediaManager::new(
        store.clone(),
        Path::new(&config.media.storage_path),
        federation.media_max_size,
    )
    .with_node_id(federation.node_id);
    let worker = Arc::new(WorkerPool::start(
        federation.worker_concurrency,
        federation.worker_queue_size,
    ));
    let deref = Dereferencer::new(
        federation,
        store.clone(),
        Arc::new(transports),
        Arc::new(ActivityStreamsConverter),
        Arc::new(media),
        worker.clone(),
    );

    let result = run(&deref, store.as_ref(), &args.requesting_user, args.command).await;
    worker.shutdown().await;
    result
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(
    deref: &Dereferencer,
    store: &dyn DataStore,
    requesting_user: &str,
    command: Command,
) -> Result<()> {
    match command {
        Command::ResolveAccount { target, force } => {
            let mut outcome = resolve_account(deref, requesting_user, &target).await?;
            if force && !outcome.is_updated() {
                outcome = deref
                    .refresh_account(
                        requesting_user,
                        outcome.into_entity(),
                        None,
                        FreshnessWindow::new(Duration::ZERO),
                    )
                    .await?;
            }
            report_degraded(&outcome);
            print_json(outcome.entity())
        }
        Command::ResolveStatus { uri } => {
            let outcome = deref.get_status_by_uri(requesting_user, &uri).await?;
            if let Outcome::Degraded { entity, error } = &outcome {
                tracing::warn!("serving stored copy of {}: {}", entity.uri, error);
            }
            print_json(outcome.entity())
        }
        Command::RefreshFeatured { handle } => {
            let account = resolve_account(deref, requesting_user, &handle)
                .await?
                .into_entity();
            deref
                .dereference_account_featured(requesting_user.to_string(), account.clone())
                .await?;
            let pinned: Vec<Status> = store.get_account_pinned_statuses(account.id).await?;
            tracing::info!("{} has {} pinned statuses", account.handle(), pinned.len());
            print_json(&pinned)
        }
        Command::BlockDomain { .. } | Command::UnblockDomain { .. } => Ok(()),
    }
}

async fn resolve_account(
    deref: &Dereferencer,
    requesting_user: &str,
    target: &str,
) -> Result<AccountOutcome> {
    let outcome = match AccountTarget::parse(target) {
        Some(AccountTarget::Uri(uri)) => deref.get_account_by_uri(requesting_user, &uri).await?,
        Some(AccountTarget::Handle { username, domain }) => {
            deref
                .get_account_by_username_domain(requesting_user, &username, &domain)
                .await?
        }
        None => anyhow::bail!("'{}' is neither a URI nor a user@domain handle", target),
    };
    Ok(outcome)
}

fn report_degraded(outcome: &AccountOutcome) {
    if let Outcome::Degraded { entity, error } = outcome {
        tracing::warn!("serving stored copy of {}: {}", entity.uri, error);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
