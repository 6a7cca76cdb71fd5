// Ledger unit tests: quotas, reservations, fills, weekly/monthly rollover
// and the calendar window math.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};

use dca_bot::config::BudgetCfg;
use dca_bot::ledger::{calc_windows, BudgetCycle, LedgerError};
use dca_bot::types::{Level, Trend};

mod test_utils {
    use super::*;

    pub fn budget_cfg() -> BudgetCfg {
        // cycle_weeks=4, rollover_cap_mult=4, tz=0, default allocation table
        BudgetCfg::default()
    }

    pub fn fixed_now() -> DateTime<Utc> {
        // Tuesday 2026-03-10 12:00 UTC
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    pub fn range_cycle(monthly: i64) -> BudgetCycle {
        BudgetCycle::new("BTCUSDC", monthly, Trend::Range, &budget_cfg(), fixed_now())
    }
}

use test_utils::*;

// ============================================================================
// Window math
// ============================================================================

#[test]
fn week_window_anchors_at_sunday_ten_local() {
    let win = calc_windows(fixed_now(), 0);

    assert_eq!(win.week_start.weekday(), Weekday::Sun);
    assert_eq!(win.week_start.hour(), 10);
    assert_eq!(win.week_start, Utc.with_ymd_and_hms(2026, 3, 8, 10, 0, 0).unwrap());
    assert_eq!(win.week_end, Utc.with_ymd_and_hms(2026, 3, 15, 10, 0, 0).unwrap());
    assert_eq!(win.month_start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(win.month_end, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
}

#[test]
fn sunday_before_ten_belongs_to_previous_week() {
    let now = Utc.with_ymd_and_hms(2026, 3, 8, 9, 0, 0).unwrap();
    let win = calc_windows(now, 0);
    assert_eq!(win.week_start, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
}

#[test]
fn timezone_offset_shifts_windows() {
    // 2026-03-31 23:00 UTC is already April in UTC+3
    let now = Utc.with_ymd_and_hms(2026, 3, 31, 23, 0, 0).unwrap();
    let win = calc_windows(now, 3);
    assert_eq!(win.month_start, Utc.with_ymd_and_hms(2026, 3, 31, 21, 0, 0).unwrap());

    let cycle = BudgetCycle::new("ETHUSDC", 100, Trend::Range, &cfg_with_tz(3), now);
    assert_eq!(cycle.month_tag(3), "202604");
}

fn cfg_with_tz(tz: i32) -> BudgetCfg {
    BudgetCfg {
        tz_offset_hours: tz,
        ..BudgetCfg::default()
    }
}

// ============================================================================
// Quota seeding and reserve/fill lifecycle
// ============================================================================

#[test]
fn range_allocation_seeds_weekly_quotas() {
    // 1000 monthly, RANGE row {OCO 20, L0 20, L1 30, L2 20, L3 10}, 4 weeks
    let cycle = range_cycle(1000);

    assert_eq!(cycle.entry(Level::Oco).quota, 50);
    assert_eq!(cycle.entry(Level::L0).quota, 50);
    assert_eq!(cycle.entry(Level::L1).quota, 75);
    assert_eq!(cycle.entry(Level::L2).quota, 50);
    assert_eq!(cycle.entry(Level::L3).quota, 25);
    assert_eq!(cycle.free_budget(), 1000);
}

#[test]
fn reserve_then_overdraw_then_fill() {
    let mut cycle = range_cycle(1000);

    cycle.reserve(Level::Oco, 50).unwrap();
    assert_eq!(cycle.entry(Level::Oco).reserved, 50);

    // One unit over the weekly quota is rejected, ledger unchanged
    let err = cycle.reserve(Level::Oco, 1).unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientQuota {
            level: Level::Oco,
            requested: 1,
            available: 0,
        }
    );
    assert_eq!(cycle.entry(Level::Oco).reserved, 50);

    let applied = cycle.fill(Level::Oco, 50);
    assert_eq!(applied, 50);
    let entry = cycle.entry(Level::Oco);
    assert_eq!(entry.reserved, 0);
    assert_eq!(entry.spent, 50);
    assert_eq!(entry.week_spent, 50);
    assert_eq!(entry.last_fill_week, Some(1));
}

#[test]
fn reserve_rejects_nonpositive_amounts() {
    let mut cycle = range_cycle(1000);
    assert_eq!(
        cycle.reserve(Level::L1, 0).unwrap_err(),
        LedgerError::NonPositiveAmount(0)
    );
    assert_eq!(
        cycle.reserve(Level::L1, -5).unwrap_err(),
        LedgerError::NonPositiveAmount(-5)
    );
}

#[test]
fn reserve_respects_free_monthly_budget() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(100);

    // Fill every level except L1 for four straight weeks; L1 accumulates
    // rollover while the free monthly budget shrinks below it.
    for week in 0..4 {
        for (level, amount) in [
            (Level::Oco, 5),
            (Level::L0, 5),
            (Level::L2, 5),
            (Level::L3, 3),
        ] {
            cycle.reserve(level, amount).unwrap();
            cycle.fill(level, amount);
        }
        if week < 3 {
            cycle.weekly_rollover(Trend::Range, &cfg, fixed_now());
        }
    }

    let available = cycle.entry(Level::L1).available();
    let free = cycle.free_budget();
    assert!(available > free, "setup: available {available} <= free {free}");

    let err = cycle.reserve(Level::L1, free + 1).unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientFreeBudget {
            requested: free + 1,
            free,
        }
    );
    cycle.reserve(Level::L1, free).unwrap();
}

#[test]
fn cancel_is_idempotent_beyond_zero() {
    let mut cycle = range_cycle(1000);
    cycle.reserve(Level::L2, 30).unwrap();

    assert_eq!(cycle.cancel(Level::L2, 50), 30);
    assert_eq!(cycle.entry(Level::L2).reserved, 0);
    assert_eq!(cycle.cancel(Level::L2, 50), 0);
    assert_eq!(cycle.cancel(Level::L2, 50), 0);
    assert_eq!(cycle.entry(Level::L2).reserved, 0);
}

#[test]
fn fill_truncates_to_open_reservation() {
    // Excess beyond the open reservation is dropped, not rejected.
    let mut cycle = range_cycle(1000);
    cycle.reserve(Level::L1, 20).unwrap();

    let applied = cycle.fill(Level::L1, 75);
    assert_eq!(applied, 20);
    let entry = cycle.entry(Level::L1);
    assert_eq!(entry.reserved, 0);
    assert_eq!(entry.spent, 20);
    assert_eq!(entry.last_fill_week, Some(1));
}

#[test]
fn reserved_and_spent_never_go_negative() {
    let mut cycle = range_cycle(1000);
    cycle.reserve(Level::L0, 10).unwrap();
    cycle.cancel(Level::L0, 100);
    cycle.fill(Level::L0, 100);
    cycle.cancel_all();
    cycle.fill(Level::L3, 5);

    for level in Level::ALL {
        let entry = cycle.entry(level);
        assert!(entry.reserved >= 0, "{level} reserved negative");
        assert!(entry.spent >= 0, "{level} spent negative");
    }
}

#[test]
fn cancel_all_releases_every_level() {
    let mut cycle = range_cycle(1000);
    cycle.reserve(Level::Oco, 10).unwrap();
    cycle.reserve(Level::L1, 20).unwrap();
    cycle.reserve(Level::L3, 5).unwrap();

    assert_eq!(cycle.cancel_all(), 35);
    for level in Level::ALL {
        assert_eq!(cycle.entry(level).reserved, 0);
    }
}

// ============================================================================
// Weekly rollover
// ============================================================================

#[test]
fn weekly_rollover_after_fill_resets_to_base() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);

    cycle.reserve(Level::Oco, 50).unwrap();
    cycle.fill(Level::Oco, 50);

    cycle.weekly_rollover(Trend::Range, &cfg, fixed_now());

    let entry = cycle.entry(Level::Oco);
    assert_eq!(entry.quota, 50);
    assert_eq!(entry.rollover, 0);
    assert_eq!(entry.week_spent, 0);
    assert_eq!(cycle.week_index, 2);
}

#[test]
fn weekly_rollover_carries_unused_quota_capped() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);

    // First empty week: 50 carries over, effective 100
    cycle.weekly_rollover(Trend::Range, &cfg, fixed_now());
    let entry = cycle.entry(Level::Oco);
    assert_eq!(entry.quota, 50);
    assert_eq!(entry.rollover, 50);
    assert_eq!(entry.available(), 100);

    // Repeated empty weeks accumulate until the 4x base cap
    for _ in 0..6 {
        cycle.weekly_rollover(Trend::Range, &cfg, fixed_now());
    }
    assert_eq!(cycle.entry(Level::Oco).rollover, 200);
}

#[test]
fn weekly_rollover_is_deterministic() {
    let cfg = budget_cfg();
    let base = range_cycle(1000);

    let mut a = base.clone();
    let mut b = base.clone();
    a.weekly_rollover(Trend::Range, &cfg, fixed_now());
    b.weekly_rollover(Trend::Range, &cfg, fixed_now());

    for level in Level::ALL {
        assert_eq!(a.entry(level).quota, b.entry(level).quota);
        assert_eq!(a.entry(level).rollover, b.entry(level).rollover);
    }
}

#[test]
fn fill_between_rollovers_changes_the_carry() {
    let cfg = budget_cfg();
    let mut no_fill = range_cycle(1000);
    let mut with_fill = range_cycle(1000);

    with_fill.reserve(Level::Oco, 50).unwrap();
    with_fill.fill(Level::Oco, 50);

    no_fill.weekly_rollover(Trend::Range, &cfg, fixed_now());
    with_fill.weekly_rollover(Trend::Range, &cfg, fixed_now());

    assert_eq!(no_fill.entry(Level::Oco).rollover, 50);
    assert_eq!(with_fill.entry(Level::Oco).rollover, 0);
}

#[test]
fn trend_changes_reallocate_the_weekly_base() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);

    // DOWN row {OCO 10, L0 15, L1 25, L2 25, L3 25}
    cycle.weekly_rollover(Trend::Down, &cfg, fixed_now());
    assert_eq!(cycle.entry(Level::Oco).quota, 25);
    assert_eq!(cycle.entry(Level::L3).quota, 63); // 1000 * 25% / 4, rounded

    // UP row {OCO 30, L0 30, L1 25, L2 10, L3 5}
    cycle.weekly_rollover(Trend::Up, &cfg, fixed_now());
    assert_eq!(cycle.entry(Level::Oco).quota, 75);
    assert_eq!(cycle.entry(Level::L3).quota, 13); // 1000 * 5% / 4, rounded
}

#[test]
fn week_index_wraps_modulo_cycle_weeks() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);
    assert_eq!(cycle.week_index, 1);

    for expected in [2, 3, 4, 1, 2] {
        cycle.weekly_rollover(Trend::Range, &cfg, fixed_now());
        assert_eq!(cycle.week_index, expected);
    }
}

// ============================================================================
// Monthly rollover
// ============================================================================

#[test]
fn month_end_liquidates_weekly_legs_and_carries_ladder() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);

    // Spend part of L1, leave OCO/L0 untouched
    cycle.reserve(Level::L1, 25).unwrap();
    cycle.fill(Level::L1, 25);

    let next_month = Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap();
    let actions = cycle.monthly_rollover(1000, Trend::Range, &cfg, next_month);

    // OCO and L0 leftovers become market-buy actions and reset
    assert_eq!(actions.len(), 2);
    assert!(actions
        .iter()
        .any(|a| a.level == Level::Oco && a.amount == 50));
    assert!(actions
        .iter()
        .any(|a| a.level == Level::L0 && a.amount == 50));
    assert_eq!(cycle.entry(Level::Oco).rollover, 0);

    // L1 leftover (75 - 25 spent) carries into the new month
    let l1 = cycle.entry(Level::L1);
    assert_eq!(l1.rollover, 50);
    assert_eq!(l1.quota, 75);
    assert_eq!(l1.spent, 0);
    assert_eq!(l1.last_fill_week, None);

    assert_eq!(cycle.week_index, 1);
    assert_eq!(cycle.month_start, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
}

#[test]
fn month_end_keeps_open_reservations() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);
    cycle.reserve(Level::L2, 40).unwrap();

    let next_month = Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap();
    cycle.monthly_rollover(1000, Trend::Range, &cfg, next_month);

    assert_eq!(cycle.entry(Level::L2).reserved, 40);
}

#[test]
fn monthly_budget_change_applies_at_month_end() {
    let cfg = budget_cfg();
    let mut cycle = range_cycle(1000);

    let next_month = Utc.with_ymd_and_hms(2026, 4, 2, 12, 0, 0).unwrap();
    cycle.monthly_rollover(2000, Trend::Range, &cfg, next_month);

    assert_eq!(cycle.monthly_budget, 2000);
    assert_eq!(cycle.entry(Level::Oco).quota, 100);
}
