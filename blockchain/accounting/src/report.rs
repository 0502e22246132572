use crate::math::Decimal;
use crate::models::ParsedObligation;
use crate::refresh::{ParsedReserve, RefreshCycle};
use common::asset_utils::format_large_number;
use log::info;
use prettytable::{row, Table};

fn percent(value: Decimal) -> String {
    format!("{:.2}%", value.to_f64_lossy() * 100.0)
}

fn usd(value: Decimal) -> String {
    format!("${}", format_large_number(value.to_f64_lossy()))
}

pub fn reserves_table(reserves: &[ParsedReserve]) -> Table {
    let mut table = Table::new();
    table.add_row(row![
        "Index", "Token", "Price", "Source", "Supplied", "Borrowed", "Utilization", "Borrow APR",
        "Supply APR", "Rewards"
    ]);

    for reserve in reserves {
        let active_rewards = reserve
            .deposit_rewards
            .iter()
            .chain(reserve.borrow_rewards.iter())
            .filter(|reward| reward.is_active)
            .count();
        let source = if reserve.price_source.is_fallback() { "Fallback" } else { "Primary" };
        table.add_row(row![
            reserve.array_index,
            reserve.symbol,
            format!("{:.4}", reserve.price),
            source,
            usd(reserve.deposited_value_usd),
            usd(reserve.borrowed_value_usd),
            percent(reserve.utilization),
            percent(reserve.borrow_apr),
            percent(reserve.supply_apr),
            active_rewards
        ]);
    }
    table
}

pub fn obligations_table(obligations: &[ParsedObligation]) -> Table {
    let mut table = Table::new();
    table.add_row(row![
        "Obligation", "Owner", "Deposited", "Borrowed (weighted)", "Borrow Limit", "Liquidation",
        "Health"
    ]);

    for obligation in obligations {
        table.add_row(row![
            obligation.id,
            obligation.owner,
            usd(obligation.spot.deposited_value_usd),
            usd(obligation.spot.weighted_borrowed_value_usd),
            usd(obligation.conservative.allowed_borrow_value_usd),
            usd(obligation.spot.unhealthy_borrow_value_usd),
            obligation.health
        ]);
    }
    table
}

pub fn print_reserves(reserves: &[ParsedReserve]) {
    if reserves.is_empty() {
        info!("No reserves found");
        return;
    }
    reserves_table(reserves).printstd();
}

pub fn print_obligations(obligations: &[ParsedObligation]) {
    if obligations.is_empty() {
        info!("No obligations found");
        return;
    }
    obligations_table(obligations).printstd();
}

pub fn print_cycle(cycle: &RefreshCycle) {
    print_reserves(&cycle.parsed_reserves);
    print_obligations(&cycle.obligations);

    if cycle.reserve_failures.is_empty() && cycle.obligation_failures.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.add_row(row!["Entity", "Error"]);
    for failure in &cycle.reserve_failures {
        table.add_row(row![format!("reserve {} ({})", failure.array_index, failure.coin_type), failure.error]);
    }
    for failure in &cycle.obligation_failures {
        table.add_row(row![format!("obligation {}", failure.obligation_id), failure.error]);
    }
    table.printstd();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting_helpers() {
        assert_eq!(percent(Decimal::from_bps(1_234)), "12.34%");
        assert_eq!(usd(Decimal::from(2_500_000u64)), "$2.50m");
    }

    #[test]
    fn test_empty_tables_only_have_headers() {
        assert_eq!(reserves_table(&[]).len(), 1);
        assert_eq!(obligations_table(&[]).len(), 1);
    }
}
