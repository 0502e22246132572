use crate::{CoinType, RewardSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Historical accounting event, used for charts only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingEvent {
    pub timestamp: DateTime<Utc>,
    pub tx_digest: String,
    pub kind: AccountingEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountingEventKind {
    InterestUpdate {
        reserve_array_index: u64,
        coin_type: CoinType,
        cumulative_borrow_rate: String,
        borrowed_amount: String,
    },
    Deposit {
        reserve_array_index: u64,
        coin_type: CoinType,
        obligation_id: String,
        ctoken_amount: u64,
    },
    Withdraw {
        reserve_array_index: u64,
        coin_type: CoinType,
        obligation_id: String,
        ctoken_amount: u64,
    },
    Borrow {
        reserve_array_index: u64,
        coin_type: CoinType,
        obligation_id: String,
        liquidity_amount: u64,
    },
    Repay {
        reserve_array_index: u64,
        coin_type: CoinType,
        obligation_id: String,
        liquidity_amount: u64,
    },
    Liquidate {
        obligation_id: String,
        repay_reserve_array_index: u64,
        withdraw_reserve_array_index: u64,
        repay_amount: u64,
        withdraw_amount: u64,
    },
    ClaimReward {
        reserve_array_index: u64,
        side: RewardSide,
        obligation_id: String,
        reward_coin_type: CoinType,
        amount: u64,
    },
}

impl AccountingEvent {
    pub fn obligation_id(&self) -> Option<&str> {
        match &self.kind {
            AccountingEventKind::InterestUpdate { .. } => None,
            AccountingEventKind::Deposit { obligation_id, .. }
            | AccountingEventKind::Withdraw { obligation_id, .. }
            | AccountingEventKind::Borrow { obligation_id, .. }
            | AccountingEventKind::Repay { obligation_id, .. }
            | AccountingEventKind::Liquidate { obligation_id, .. }
            | AccountingEventKind::ClaimReward { obligation_id, .. } => Some(obligation_id),
        }
    }
}

/// One page of a paginated event query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPage {
    pub events: Vec<AccountingEvent>,
    pub next_cursor: Option<String>,
}
