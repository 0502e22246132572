use accounting::models::ParsedObligation;
use accounting::refresh::{refresh_cycle, RefreshContext};
use accounting::sources::{JsonSnapshotSource, MarketSnapshot};
use accounting::{EngineConfig, RefreshCycle};
use anyhow::{anyhow, Result};
use chrono::Utc;
use common::asset_utils::CoinMetadataCache;
use common::LendingError;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};

pub mod coordinator;

pub use coordinator::{InFlightGuard, LatestViews, RefreshCoordinator, RefreshSubject};

/// Blocking supplier of full market snapshots
pub trait MarketLoader: Send + Sync + 'static {
    fn load(&self) -> Result<MarketSnapshot, LendingError>;
}

impl MarketLoader for JsonSnapshotSource {
    fn load(&self) -> Result<MarketSnapshot, LendingError> {
        JsonSnapshotSource::load(self)
    }
}

impl MarketLoader for MarketSnapshot {
    fn load(&self) -> Result<MarketSnapshot, LendingError> {
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published,
    /// A newer result was already stored
    Stale,
    /// Another refresh of the same subject was in flight
    Coalesced,
}

pub struct Worker {
    config: EngineConfig,
    loader: Arc<dyn MarketLoader>,
    metadata: CoinMetadataCache,
    coordinator: RefreshCoordinator,
    views: LatestViews,
}

fn now_ms() -> Result<u64> {
    Ok(u64::try_from(Utc::now().timestamp_millis())?)
}

// Pure compute stage, shared by market and single obligation refreshes
fn compute(snapshot: MarketSnapshot, metadata: CoinMetadataCache, max_price_staleness_s: u64, now_ms: u64) -> RefreshCycle {
    for (coin_type, coin_metadata) in snapshot.coin_metadata.clone() {
        if !metadata.contains(&coin_type) {
            metadata.insert(coin_type, coin_metadata);
        }
    }
    let ctx = RefreshContext {
        oracle: &snapshot.oracle,
        fallback: &snapshot.oracle,
        metadata: &metadata,
        max_price_staleness_s,
    };
    refresh_cycle(&snapshot.reserves, &snapshot.obligations, &ctx, now_ms)
}

impl Worker {
    pub fn new(config: EngineConfig, loader: Arc<dyn MarketLoader>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loader,
            metadata: CoinMetadataCache::new(),
            coordinator: RefreshCoordinator::new(),
            views: LatestViews::new(),
        })
    }

    /// Worker reading the snapshot file named by the config
    pub fn from_config(config: EngineConfig) -> Result<Self> {
        let snapshot_file = config
            .snapshot_file
            .clone()
            .ok_or_else(|| anyhow!("Missing SNAPSHOT_FILE environment variable"))?;
        Self::new(config, Arc::new(JsonSnapshotSource::new(snapshot_file)))
    }

    pub fn views(&self) -> &LatestViews {
        &self.views
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    async fn load_snapshot(&self) -> Result<MarketSnapshot> {
        let loader = self.loader.clone();
        Ok(tokio::task::spawn_blocking(move || loader.load()).await??)
    }

    async fn run_cycle(&self, snapshot: MarketSnapshot, now_ms: u64) -> Result<RefreshCycle> {
        let metadata = self.metadata.clone();
        let max_price_staleness_s = self.config.max_price_staleness_s;
        Ok(tokio::task::spawn_blocking(move || {
            compute(snapshot, metadata, max_price_staleness_s, now_ms)
        })
        .await?)
    }

    /// Refresh every reserve and obligation, unless a market refresh is already running
    pub async fn refresh_market(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = self.coordinator.try_begin(RefreshSubject::Market) else {
            return Ok(RefreshOutcome::Coalesced);
        };

        let snapshot = self.load_snapshot().await?;
        let cycle = self.run_cycle(snapshot, now_ms()?).await?;
        let summary = (cycle.parsed_reserves.len(), cycle.obligations.len());

        if !self.views.publish_market(cycle) {
            return Ok(RefreshOutcome::Stale);
        }
        info!("Published market refresh: {} reserves, {} obligations", summary.0, summary.1);
        Ok(RefreshOutcome::Published)
    }

    /// Refresh a single obligation on demand
    pub async fn refresh_obligation(&self, obligation_id: &str) -> Result<RefreshOutcome> {
        let subject = RefreshSubject::Obligation(obligation_id.to_string());
        let Some(_guard) = self.coordinator.try_begin(subject) else {
            return Ok(RefreshOutcome::Coalesced);
        };

        let mut snapshot = self.load_snapshot().await?;
        snapshot.obligations.retain(|obligation| obligation.id == obligation_id);
        if snapshot.obligations.is_empty() {
            return Err(anyhow!("Obligation {} not found in snapshot", obligation_id));
        }

        let cycle = self.run_cycle(snapshot, now_ms()?).await?;
        if let Some(failure) = cycle.obligation_failures.first() {
            warn!("Obligation {} failed to refresh: {}", obligation_id, failure.error);
            return Err(failure.error.clone().into());
        }

        let parsed: ParsedObligation = cycle
            .obligations
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Obligation {} produced no result", obligation_id))?;
        if !self.views.publish_obligation(cycle.snapshot_time_ms, parsed) {
            return Ok(RefreshOutcome::Stale);
        }
        Ok(RefreshOutcome::Published)
    }

    /// Schedule a market refresh every `refresh_interval_secs`
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;
        let interval = Duration::from_secs(self.config.refresh_interval_secs);

        let worker = self.clone();
        let job = Job::new_repeated_async(interval, move |_, _| {
            let worker = worker.clone();
            Box::pin(async move {
                debug!("Running scheduled market refresh...");
                match worker.refresh_market().await {
                    Ok(RefreshOutcome::Published) => {}
                    Ok(outcome) => debug!("Scheduled refresh finished as {:?}", outcome),
                    Err(e) => error!("Scheduled market refresh failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Starting refresh scheduler every {}s", self.config.refresh_interval_secs);
        scheduler.start().await?;
        Ok(scheduler)
    }
}
