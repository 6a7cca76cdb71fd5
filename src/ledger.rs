// Budget ledger: per-symbol monthly cycle with per-level weekly quotas,
// reservations, fills and rollover. All amounts are whole quote-currency
// units; every operation validates before mutating anything.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::BudgetCfg;
use crate::types::{BudgetSummary, Level, LevelSummary, LiquidationAction, Trend};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),
    #[error("insufficient quota on {level}: requested {requested}, available {available}")]
    InsufficientQuota {
        level: Level,
        requested: i64,
        available: i64,
    },
    #[error("insufficient free monthly budget: requested {requested}, free {free}")]
    InsufficientFreeBudget { requested: i64, free: i64 },
    #[error("amount {amount} is below the exchange minimum notional {min_notional}")]
    BelowMinNotional { amount: i64, min_notional: i64 },
}

// ============================================================================
// Level Entry
// ============================================================================

/// Ledger state of one level within the current cycle.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelEntry {
    /// Base amount allotted for the current week.
    pub quota: i64,
    /// Unconsumed quota carried from prior weeks.
    pub rollover: i64,
    /// Open virtual order amount.
    pub reserved: i64,
    /// Amount filled month-to-date.
    pub spent: i64,
    /// Amount filled in the current week.
    pub week_spent: i64,
    /// Cycle week index of the most recent fill, None if never filled this
    /// month.
    pub last_fill_week: Option<u32>,
}

impl LevelEntry {
    /// Amount still reservable this week under the soft ceiling
    /// `reserved + week_spent <= quota + rollover`.
    pub fn available(&self) -> i64 {
        self.quota + self.rollover - self.reserved - self.week_spent
    }

    fn seeded(quota: i64) -> Self {
        Self {
            quota,
            ..Self::default()
        }
    }
}

// ============================================================================
// Cycle Windows
// ============================================================================

/// Week and month boundaries for a reference instant. Weeks are anchored at
/// Sunday 10:00 local time; months at local calendar boundaries. Stored in
/// UTC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleWindows {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
    pub month_end: DateTime<Utc>,
    pub iso_week: u32,
}

pub fn calc_windows(now: DateTime<Utc>, tz_offset_hours: i32) -> CycleWindows {
    let offset = Duration::hours(tz_offset_hours as i64);
    let local = (now + offset).naive_utc();

    let back = local.weekday().num_days_from_sunday() as i64;
    let mut week_start_local = (local.date() - Duration::days(back))
        .and_hms_opt(10, 0, 0)
        .unwrap();
    if local < week_start_local {
        week_start_local -= Duration::days(7);
    }
    let week_end_local = week_start_local + Duration::days(7);

    let month_start_local = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let month_end_local = if local.month() == 12 {
        NaiveDate::from_ymd_opt(local.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(local.year(), local.month() + 1, 1)
    }
    .unwrap()
    .and_hms_opt(0, 0, 0)
    .unwrap();

    let to_utc = |naive: chrono::NaiveDateTime| Utc.from_utc_datetime(&(naive - offset));

    CycleWindows {
        week_start: to_utc(week_start_local),
        week_end: to_utc(week_end_local),
        month_start: to_utc(month_start_local),
        month_end: to_utc(month_end_local),
        iso_week: week_start_local.iso_week().week(),
    }
}

// ============================================================================
// Budget Cycle
// ============================================================================

/// Per-symbol, per-month budget state. Created lazily on first reference to a
/// symbol within a month.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetCycle {
    pub symbol: String,
    pub monthly_budget: i64,
    /// 1..=cycle_weeks, advanced by the weekly rollover.
    pub week_index: u32,
    pub iso_week: u32,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub month_start: DateTime<Utc>,
    pub month_end: DateTime<Utc>,
    pub levels: BTreeMap<Level, LevelEntry>,
}

/// Weekly base quota for one level: monthly budget scaled by the trend
/// allocation share, split across the cycle weeks.
fn base_quota(monthly: i64, share_pct: u32, cycle_weeks: u32) -> i64 {
    (monthly as f64 * share_pct as f64 / 100.0 / cycle_weeks as f64).round() as i64
}

impl BudgetCycle {
    /// Fresh cycle for the month containing `now`, seeded from the configured
    /// monthly budget and the allocation row for the current trend.
    pub fn new(
        symbol: &str,
        monthly_budget: i64,
        trend: Trend,
        cfg: &BudgetCfg,
        now: DateTime<Utc>,
    ) -> Self {
        let win = calc_windows(now, cfg.tz_offset_hours);
        let row = cfg.allocation.row(trend);

        let levels = Level::ALL
            .iter()
            .map(|&level| {
                let base = base_quota(monthly_budget, row.share(level), cfg.cycle_weeks);
                (level, LevelEntry::seeded(base))
            })
            .collect();

        Self {
            symbol: symbol.to_string(),
            monthly_budget,
            week_index: 1,
            iso_week: win.iso_week,
            week_start: win.week_start,
            week_end: win.week_end,
            month_start: win.month_start,
            month_end: win.month_end,
            levels,
        }
    }

    /// Identifier of the local month this cycle covers, e.g. "202608".
    pub fn month_tag(&self, tz_offset_hours: i32) -> String {
        let local = (self.month_start + Duration::hours(tz_offset_hours as i64)).naive_utc();
        format!("{:04}{:02}", local.year(), local.month())
    }

    pub fn week_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.week_end
    }

    pub fn month_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.month_end
    }

    /// Unreserved, unspent monthly budget across all levels.
    pub fn free_budget(&self) -> i64 {
        let committed: i64 = self
            .levels
            .values()
            .map(|e| e.reserved + e.spent)
            .sum();
        self.monthly_budget - committed
    }

    fn entry_mut(&mut self, level: Level) -> &mut LevelEntry {
        self.levels.entry(level).or_default()
    }

    pub fn entry(&self, level: Level) -> LevelEntry {
        self.levels.get(&level).cloned().unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Mutating operations
    // ------------------------------------------------------------------

    /// Earmark budget for an open virtual order. Rejected (ledger unchanged)
    /// when the amount exceeds the level's weekly availability or the
    /// symbol's free monthly budget.
    pub fn reserve(&mut self, level: Level, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let available = self.entry(level).available();
        if amount > available {
            return Err(LedgerError::InsufficientQuota {
                level,
                requested: amount,
                available: available.max(0),
            });
        }
        let free = self.free_budget();
        if amount > free {
            return Err(LedgerError::InsufficientFreeBudget {
                requested: amount,
                free: free.max(0),
            });
        }
        self.entry_mut(level).reserved += amount;
        Ok(())
    }

    /// Release an open reservation. Clamps at zero, never fails. Returns the
    /// amount actually released.
    pub fn cancel(&mut self, level: Level, amount: i64) -> i64 {
        let entry = self.entry_mut(level);
        let released = amount.max(0).min(entry.reserved);
        entry.reserved -= released;
        released
    }

    /// Mark a reservation as filled. The fill is satisfied up to the open
    /// reservation; any excess is dropped. Marks the level consumed for the
    /// current week. Returns the amount actually applied.
    pub fn fill(&mut self, level: Level, amount: i64) -> i64 {
        let week = self.week_index;
        let entry = self.entry_mut(level);
        let applied = amount.max(0).min(entry.reserved);
        entry.reserved -= applied;
        entry.spent += applied;
        entry.week_spent += applied;
        entry.last_fill_week = Some(week);
        applied
    }

    /// Release every open reservation. Returns the total amount released.
    pub fn cancel_all(&mut self) -> i64 {
        Level::ALL
            .iter()
            .map(|&level| {
                let open = self.entry(level).reserved;
                self.cancel(level, open)
            })
            .sum()
    }

    // ------------------------------------------------------------------
    // Rollover ticks
    // ------------------------------------------------------------------

    /// Advance to the next cycle week: re-derive each level's base quota from
    /// the allocation table, carry unconsumed quota forward when the level
    /// had no fill last week, and reset the week's fill counter.
    pub fn weekly_rollover(&mut self, trend: Trend, cfg: &BudgetCfg, now: DateTime<Utc>) {
        let row = *cfg.allocation.row(trend);
        let prev_week = self.week_index;

        for &level in Level::ALL.iter() {
            let base = base_quota(self.monthly_budget, row.share(level), cfg.cycle_weeks);
            let entry = self.entry_mut(level);

            let had_fill = entry.last_fill_week == Some(prev_week);
            let carry = if had_fill {
                0
            } else {
                (entry.quota + entry.rollover).min(cfg.rollover_cap_mult * base)
            };

            entry.quota = base;
            entry.rollover = carry.max(0);
            entry.week_spent = 0;
        }

        self.week_index = self.week_index % cfg.cycle_weeks + 1;
        let win = calc_windows(now, cfg.tz_offset_hours);
        self.week_start = win.week_start;
        self.week_end = win.week_end;
        self.iso_week = win.iso_week;
    }

    /// Close out the month. OCO/L0 leftover is reported as a market-buy
    /// liquidation and zeroed; L1..L3 leftover is carried into the new month
    /// as starting rollover. Spent totals reset; the week index restarts.
    pub fn monthly_rollover(
        &mut self,
        monthly_budget: i64,
        trend: Trend,
        cfg: &BudgetCfg,
        now: DateTime<Utc>,
    ) -> Vec<LiquidationAction> {
        let row = *cfg.allocation.row(trend);
        let symbol = self.symbol.clone();
        let mut actions = Vec::new();

        self.monthly_budget = monthly_budget;

        for &level in Level::ALL.iter() {
            let base = base_quota(monthly_budget, row.share(level), cfg.cycle_weeks);
            let entry = self.entry_mut(level);
            let leftover = (entry.quota + entry.rollover - entry.week_spent).max(0);

            if level.liquidates_at_month_end() {
                if leftover > 0 {
                    actions.push(LiquidationAction {
                        symbol: symbol.clone(),
                        level,
                        amount: leftover,
                    });
                }
                entry.rollover = 0;
            } else {
                entry.rollover = leftover;
            }

            entry.quota = base;
            entry.spent = 0;
            entry.week_spent = 0;
            entry.last_fill_week = None;
        }

        self.week_index = 1;
        let win = calc_windows(now, cfg.tz_offset_hours);
        self.week_start = win.week_start;
        self.week_end = win.week_end;
        self.month_start = win.month_start;
        self.month_end = win.month_end;
        self.iso_week = win.iso_week;

        actions
    }

    /// Re-seed every level to the base allocation for the current window,
    /// dropping rollover and spent history. Open reservations survive.
    pub fn reset(&mut self, trend: Trend, cfg: &BudgetCfg, now: DateTime<Utc>) {
        let row = *cfg.allocation.row(trend);
        for &level in Level::ALL.iter() {
            let base = base_quota(self.monthly_budget, row.share(level), cfg.cycle_weeks);
            let entry = self.entry_mut(level);
            let reserved = entry.reserved;
            *entry = LevelEntry::seeded(base);
            entry.reserved = reserved;
        }
        self.week_index = 1;
        let win = calc_windows(now, cfg.tz_offset_hours);
        self.week_start = win.week_start;
        self.week_end = win.week_end;
        self.month_start = win.month_start;
        self.month_end = win.month_end;
        self.iso_week = win.iso_week;
    }

    /// Change the monthly budget and re-derive base quotas for the current
    /// trend, keeping reservations and spent totals.
    pub fn set_monthly_budget(
        &mut self,
        monthly_budget: i64,
        trend: Trend,
        cfg: &BudgetCfg,
    ) {
        self.monthly_budget = monthly_budget;
        let row = *cfg.allocation.row(trend);
        for &level in Level::ALL.iter() {
            let base = base_quota(monthly_budget, row.share(level), cfg.cycle_weeks);
            let entry = self.entry_mut(level);
            entry.quota = base;
            entry.rollover = 0;
        }
    }

    // ------------------------------------------------------------------
    // Summaries
    // ------------------------------------------------------------------

    pub fn summary(&self) -> BudgetSummary {
        let levels = Level::ALL
            .iter()
            .map(|&level| {
                let e = self.entry(level);
                (
                    level,
                    LevelSummary {
                        quota: e.quota,
                        rollover: e.rollover,
                        reserved: e.reserved,
                        spent: e.spent,
                        week_spent: e.week_spent,
                        available: e.available(),
                        filled_this_week: e.last_fill_week == Some(self.week_index),
                    },
                )
            })
            .collect();

        BudgetSummary {
            symbol: self.symbol.clone(),
            monthly_budget: self.monthly_budget,
            week_index: self.week_index,
            iso_week: self.iso_week,
            free_budget: self.free_budget(),
            levels,
        }
    }
}
