use crate::models::{Obligation, Reserve};
use crate::oracle::StaticPriceOracle;
use common::asset_utils::CoinMetadata;
use common::events::{AccountingEvent, EventPage};
use common::{CoinType, LendingError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Supplier of raw on-chain state
pub trait SnapshotSource {
    fn fetch_reserves(&self) -> Result<Vec<Reserve>, LendingError>;
    fn fetch_obligations(&self) -> Result<Vec<Obligation>, LendingError>;
}

/// Paginated, time ordered accounting history
pub trait EventFeed {
    fn fetch_events(&self, cursor: Option<&str>, limit: usize) -> Result<EventPage, LendingError>;
}

/// Walk the feed from the start, stopping at the last page or after `max_pages`.
pub fn collect_events(
    feed: &dyn EventFeed,
    page_size: usize,
    max_pages: usize,
) -> Result<Vec<AccountingEvent>, LendingError> {
    let mut events = Vec::new();
    let mut cursor: Option<String> = None;

    for page_number in 0..max_pages {
        let page = feed.fetch_events(cursor.as_deref(), page_size)?;
        debug!("fetched event page {} with {} events", page_number, page.events.len());
        events.extend(page.events);

        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return Ok(sorted(events)),
        }
    }

    if cursor.is_some() {
        info!("stopped collecting events after {} pages", max_pages);
    }
    Ok(sorted(events))
}

fn sorted(mut events: Vec<AccountingEvent>) -> Vec<AccountingEvent> {
    events.sort_by_key(|event| event.timestamp);
    events
}

/// Everything needed for one refresh, as stored on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub reserves: Vec<Reserve>,
    #[serde(default)]
    pub obligations: Vec<Obligation>,
    #[serde(default)]
    pub oracle: StaticPriceOracle,
    #[serde(default)]
    pub coin_metadata: HashMap<CoinType, CoinMetadata>,
    #[serde(default)]
    pub events: Vec<AccountingEvent>,
}

impl EventFeed for MarketSnapshot {
    fn fetch_events(&self, cursor: Option<&str>, limit: usize) -> Result<EventPage, LendingError> {
        let start = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| LendingError::SourceError(format!("invalid event cursor {cursor}")))?,
            None => 0,
        };
        let end = start.saturating_add(limit.max(1)).min(self.events.len());
        let events = self.events.get(start..end).unwrap_or_default().to_vec();
        let next_cursor = (end < self.events.len()).then(|| end.to_string());
        Ok(EventPage { events, next_cursor })
    }
}

/// Snapshot source reading a JSON [`MarketSnapshot`] file on every fetch
#[derive(Debug, Clone)]
pub struct JsonSnapshotSource {
    path: PathBuf,
}

impl JsonSnapshotSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<MarketSnapshot, LendingError> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            LendingError::SourceError(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let snapshot: MarketSnapshot = serde_json::from_str(&content).map_err(|e| {
            LendingError::SourceError(format!("failed to parse {}: {}", self.path.display(), e))
        })?;
        debug!(
            "loaded snapshot {} with {} reserves and {} obligations",
            self.path.display(),
            snapshot.reserves.len(),
            snapshot.obligations.len()
        );
        Ok(snapshot)
    }
}

impl SnapshotSource for JsonSnapshotSource {
    fn fetch_reserves(&self) -> Result<Vec<Reserve>, LendingError> {
        Ok(self.load()?.reserves)
    }

    fn fetch_obligations(&self) -> Result<Vec<Obligation>, LendingError> {
        Ok(self.load()?.obligations)
    }
}

impl SnapshotSource for MarketSnapshot {
    fn fetch_reserves(&self) -> Result<Vec<Reserve>, LendingError> {
        Ok(self.reserves.clone())
    }

    fn fetch_obligations(&self) -> Result<Vec<Obligation>, LendingError> {
        Ok(self.obligations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::events::AccountingEventKind;

    fn event(second: i64, amount: u64) -> AccountingEvent {
        AccountingEvent {
            timestamp: Utc.timestamp_opt(second, 0).single().unwrap(),
            tx_digest: format!("tx{second}"),
            kind: AccountingEventKind::Deposit {
                reserve_array_index: 0,
                coin_type: CoinType::from("0x2::sui::SUI"),
                obligation_id: "0xob1".to_string(),
                ctoken_amount: amount,
            },
        }
    }

    #[test]
    fn test_collect_events_walks_pages() {
        let snapshot = MarketSnapshot {
            events: (0..7).map(|i| event(100 - i, i as u64)).collect(),
            ..Default::default()
        };
        let events = collect_events(&snapshot, 3, 10).unwrap();
        assert_eq!(events.len(), 7);
        assert!(events.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
        assert_eq!(events[0].obligation_id(), Some("0xob1"));
    }

    #[test]
    fn test_collect_events_respects_page_cap() {
        let snapshot = MarketSnapshot {
            events: (0..10).map(|i| event(i, i as u64)).collect(),
            ..Default::default()
        };
        assert_eq!(collect_events(&snapshot, 2, 3).unwrap().len(), 6);
        assert!(snapshot.fetch_events(Some("x"), 2).is_err());
    }

    #[test]
    fn test_missing_snapshot_file_is_a_source_error() {
        let source = JsonSnapshotSource::new("/nonexistent/snapshot.json");
        assert!(matches!(source.fetch_reserves(), Err(LendingError::SourceError(_))));
    }
}
