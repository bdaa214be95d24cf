// src/main.rs

//! # Identity Hub - Daemon Entry Point
//!
//! Wires the hub together and runs the periodic root commit until Ctrl-C.
//!
//! ## Components
//! 1. **Storage**: SQLite pool with the bundled migrations applied
//! 2. **Resolution**: local `did:ethuri` documents, universal resolver for the rest
//! 3. **Coordination**: Redis locks and pub/sub when `IDHUB_REDIS_URL` is set
//! 4. **Ledger**: root-commits contract via ethers, or the in-process simulation
//!
//! ## Environment Variables
//! - `IDHUB_DATABASE_URL`: sqlx SQLite URL (default `sqlite://idhub.db`)
//! - `IDHUB_LEDGER_RPC_URL`, `IDHUB_LEDGER_PRIVATE_KEY`, `IDHUB_ROOT_COMMITS_ADDRESS`
//! - `IDHUB_UNIVERSAL_RESOLVER_HOST`: (Optional) universal resolver host
//! - `IDHUB_REDIS_URL`: (Optional) Redis for locks and events
//! - `RUST_LOG`: log filter (default `info`)

use anyhow::Context;
use dotenv::dotenv;
use idhub::blockchain::ethers_ledger::EthersLedger;
use idhub::blockchain::simulated::SimulatedLedger;
use idhub::blockchain::{CommitOptions, Ledger};
use idhub::config::Settings;
use idhub::services::did_resolver::{CompositeResolver, DidResolver, UniversalResolver, LOCAL_METHOD};
use idhub::services::events::{EventPublisher, RedisPublisher};
use idhub::services::lock::{DistributedLock, LocalLock, RedisLock};
use idhub::services::{ClaimService, RootService, Verifier};
use idhub::storage::{self, SqlDidStore};
use log::{info, warn};
use std::sync::Arc;

/// Daemon entry point
///
/// # Initialization Sequence
/// 1. Load `.env` and settings
/// 2. Open the database and apply migrations
/// 3. Build resolver, lock, publisher and ledger
/// 4. Start the periodic root commit
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("loading settings")?;

    let pool = storage::connect(&settings.database_url, settings.database_max_connections)
        .await
        .context("opening database")?;
    storage::migrate(&pool).await.context("applying migrations")?;

    let mut resolver = CompositeResolver::new()
        .with_method(LOCAL_METHOD, Arc::new(SqlDidStore::new(pool.clone())));
    if let Some(host) = &settings.universal_resolver_host {
        let universal = UniversalResolver::from_host(
            host,
            settings.universal_resolver_port,
            settings.resolver_timeout(),
        )?;
        resolver = resolver.with_fallback(Arc::new(universal));
    }
    let resolver: Arc<dyn DidResolver> = Arc::new(resolver);

    let (lock, publisher): (Arc<dyn DistributedLock>, Option<Arc<dyn EventPublisher>>) =
        match &settings.redis_url {
            Some(url) => (
                Arc::new(
                    RedisLock::connect(url, settings.lock_acquire_timeout())
                        .await
                        .context("connecting redis lock")?,
                ),
                Some(Arc::new(
                    RedisPublisher::connect(url)
                        .await
                        .context("connecting redis publisher")?,
                )),
            ),
            None => {
                warn!("no redis configured: locks are in-process and events are not published");
                (Arc::new(LocalLock::new(settings.lock_acquire_timeout())), None)
            }
        };

    let ledger: Arc<dyn Ledger> = match &settings.ledger_private_key {
        Some(key) => Arc::new(
            EthersLedger::new(&settings.ledger_rpc_url, key, &settings.root_commits_address)
                .await
                .context("connecting ledger")?,
        ),
        None => {
            warn!("no ledger key configured: committing roots to the simulated ledger");
            Arc::new(SimulatedLedger::new(1))
        }
    };

    let mut claims = ClaimService::new(pool.clone(), Verifier::new(resolver), lock.clone())
        .with_lock_ttl(settings.lock_ttl());
    if let Some(publisher) = publisher {
        claims = claims.with_publisher(publisher, &settings.subject_prefix);
    }
    let roots = Arc::new(
        RootService::new(pool, ledger, lock).with_options(CommitOptions {
            timeout: settings.receipt_timeout(),
            poll_interval: settings.receipt_poll_interval(),
        }),
    );

    let committer = roots.clone().spawn_periodic(settings.commit_interval());
    info!(
        "identity hub running, committing roots every {:?}",
        settings.commit_interval()
    );
    if let Some(latest) = roots.get_latest().await? {
        info!("last committed root {} in block {}", latest.root, latest.block_number);
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    committer.abort();
    drop(claims);
    Ok(())
}
