use accounting::models::ParsedObligation;
use accounting::RefreshCycle;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// What a refresh recomputes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RefreshSubject {
    Market,
    Obligation(String),
}

impl fmt::Display for RefreshSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshSubject::Market => write!(f, "market"),
            RefreshSubject::Obligation(id) => write!(f, "obligation {}", id),
        }
    }
}

/// Tracks in-flight refreshes, at most one per subject
#[derive(Debug, Clone, Default)]
pub struct RefreshCoordinator {
    in_flight: Arc<Mutex<HashSet<RefreshSubject>>>,
}

/// Marks a subject as being refreshed until dropped
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<RefreshSubject>>>,
    subject: RefreshSubject,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `subject`, or `None` when a refresh of it is already running
    pub fn try_begin(&self, subject: RefreshSubject) -> Option<InFlightGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(subject.clone()) {
            debug!("refresh of {} already in flight, coalescing", subject);
            return None;
        }
        Some(InFlightGuard { in_flight: self.in_flight.clone(), subject })
    }

    pub fn is_in_flight(&self, subject: &RefreshSubject) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).contains(subject)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.subject);
    }
}

#[derive(Debug, Default)]
struct Views {
    market: Option<Arc<RefreshCycle>>,
    obligations: HashMap<String, (u64, ParsedObligation)>,
}

/// Latest refresh results; a result computed from an older snapshot never replaces a
/// newer one.
#[derive(Debug, Clone, Default)]
pub struct LatestViews {
    inner: Arc<RwLock<Views>>,
}

impl LatestViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a market refresh; returns false when it was older than the stored one
    pub fn publish_market(&self, cycle: RefreshCycle) -> bool {
        let mut views = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = &views.market {
            if current.snapshot_time_ms > cycle.snapshot_time_ms {
                debug!(
                    "discarding market refresh at {}ms, already have {}ms",
                    cycle.snapshot_time_ms, current.snapshot_time_ms
                );
                return false;
            }
        }
        let snapshot_time_ms = cycle.snapshot_time_ms;
        for obligation in &cycle.obligations {
            Self::store_obligation(&mut views.obligations, snapshot_time_ms, obligation.clone());
        }
        views.market = Some(Arc::new(cycle));
        true
    }

    /// Store a single obligation refresh; returns false when it was stale
    pub fn publish_obligation(&self, snapshot_time_ms: u64, obligation: ParsedObligation) -> bool {
        let mut views = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        Self::store_obligation(&mut views.obligations, snapshot_time_ms, obligation)
    }

    fn store_obligation(
        obligations: &mut HashMap<String, (u64, ParsedObligation)>,
        snapshot_time_ms: u64,
        obligation: ParsedObligation,
    ) -> bool {
        match obligations.get(&obligation.id) {
            Some((stored_ms, _)) if *stored_ms > snapshot_time_ms => false,
            _ => {
                obligations.insert(obligation.id.clone(), (snapshot_time_ms, obligation));
                true
            }
        }
    }

    pub fn market(&self) -> Option<Arc<RefreshCycle>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).market.clone()
    }

    pub fn obligation(&self, id: &str) -> Option<(u64, ParsedObligation)> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).obligations.get(id).cloned()
    }
}
