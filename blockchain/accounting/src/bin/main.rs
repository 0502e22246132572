use accounting::refresh::{refresh_cycle, RefreshContext};
use accounting::report::print_cycle;
use accounting::sources::{collect_events, JsonSnapshotSource};
use accounting::EngineConfig;
use anyhow::{anyhow, Result};
use chrono::Utc;
use common::asset_utils::CoinMetadataCache;
use env_logger::Env;
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = EngineConfig::from_env()?;
    let snapshot_file =
        config.snapshot_file.clone().ok_or_else(|| anyhow!("Missing SNAPSHOT_FILE environment variable"))?;

    let source = JsonSnapshotSource::new(&snapshot_file);
    let snapshot = source.load()?;
    let metadata = CoinMetadataCache::with_entries(snapshot.coin_metadata.clone());

    let ctx = RefreshContext {
        oracle: &snapshot.oracle,
        fallback: &snapshot.oracle,
        metadata: &metadata,
        max_price_staleness_s: config.max_price_staleness_s,
    };
    let now_ms = u64::try_from(Utc::now().timestamp_millis())?;
    let cycle = refresh_cycle(&snapshot.reserves, &snapshot.obligations, &ctx, now_ms);
    print_cycle(&cycle);

    let events = collect_events(&snapshot, config.event_page_size, config.event_max_pages)?;
    info!("{} historical events in {}", events.len(), snapshot_file.display());

    Ok(())
}
