//! Windowed active supply
//!
//! `active_supply_{N}d` on day `d` is the value of outputs created within the
//! N days ending with `d` that are still unspent when `d` ends. Moving from
//! `d - 1` to `d` changes it by:
//! - plus outputs created on `d` and unspent at its end
//! - minus outputs created in `(d - N, d)` and spent on `d`
//! - minus outputs created on `d - N` and unspent when `d` starts

use super::DayWindow;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

/// Boundaries of the three delta terms for one day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyWindow {
    pub day: DayWindow,
    /// Start of the oldest day still inside the window
    pub window_start: NaiveDateTime,
    /// Start of the day leaving the window
    pub aged_start: NaiveDateTime,
}

impl SupplyWindow {
    pub fn new(days: u32, date: NaiveDate) -> Self {
        let day = DayWindow::of(date);
        let span = TimeDelta::days(i64::from(days));
        Self {
            day,
            window_start: day.end - span,
            aged_start: day.start - span,
        }
    }
}

/// Closed form. Binds `$1` window start and `$2` end of the day.
pub fn closed_form_sql(outputs_table: &str) -> String {
    format!(
        "SELECT COALESCE(SUM(output_value_satoshi), 0)::NUMERIC FROM {outputs_table} \
         WHERE output_time_created >= $1 AND output_time_created < $2 \
         AND (output_time_spent IS NULL OR output_time_spent >= $2)"
    )
}

/// Daily delta. Binds `$1` day start, `$2` day end, `$3` aged day start and
/// `$4` window start.
pub fn delta_sql(outputs_table: &str) -> String {
    format!(
        "SELECT (\
         COALESCE((SELECT SUM(output_value_satoshi) FROM {o} \
         WHERE output_time_created >= $1 AND output_time_created < $2 \
         AND (output_time_spent IS NULL OR output_time_spent >= $2)), 0) \
         - COALESCE((SELECT SUM(output_value_satoshi) FROM {o} \
         WHERE output_time_created >= $4 AND output_time_created < $1 \
         AND output_time_spent >= $1 AND output_time_spent < $2), 0) \
         - COALESCE((SELECT SUM(output_value_satoshi) FROM {o} \
         WHERE output_time_created >= $3 AND output_time_created < $4 \
         AND (output_time_spent IS NULL OR output_time_spent >= $1)), 0)\
         )::NUMERIC",
        o = outputs_table
    )
}

/// An output as seen by the supply computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupplyOutput {
    pub created: NaiveDateTime,
    pub spent: Option<NaiveDateTime>,
    pub value: u128,
}

impl SupplyOutput {
    fn unspent_at(&self, at: NaiveDateTime) -> bool {
        self.spent.is_none_or(|spent| spent >= at)
    }

    fn created_in(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        self.created >= start && self.created < end
    }
}

/// In-memory closed form, the reference the SQL mirrors
pub fn closed_form(outputs: &[SupplyOutput], days: u32, date: NaiveDate) -> i128 {
    let window = SupplyWindow::new(days, date);
    outputs
        .iter()
        .filter(|o| o.created_in(window.window_start, window.day.end))
        .filter(|o| o.unspent_at(window.day.end))
        .map(|o| o.value as i128)
        .sum()
}

/// In-memory daily delta
pub fn delta(outputs: &[SupplyOutput], days: u32, date: NaiveDate) -> i128 {
    let window = SupplyWindow::new(days, date);
    let day = window.day;
    let mut change: i128 = 0;
    for output in outputs {
        let value = output.value as i128;
        if output.created_in(day.start, day.end) && output.unspent_at(day.end) {
            change += value;
        }
        if output.created_in(window.window_start, day.start)
            && output.spent.is_some_and(|s| s >= day.start && s < day.end)
        {
            change -= value;
        }
        if output.created_in(window.aged_start, window.window_start)
            && output.unspent_at(day.start)
        {
            change -= value;
        }
    }
    change
}
