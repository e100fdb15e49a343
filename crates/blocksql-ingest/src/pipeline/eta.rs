//! Rolling-average progress estimation

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// Estimates remaining time from a bounded history of per-unit timings.
#[derive(Debug)]
pub struct ProgressEstimator {
    label: String,
    total: u64,
    done: u64,
    steps: u64,
    output_interval: u64,
    max_observations: usize,
    history: VecDeque<f64>,
    started_at: Option<Instant>,
}

impl ProgressEstimator {
    /// `max_observations` bounds the averaging window, `output_interval`
    /// controls how many finished steps pass between progress log lines.
    pub fn new(
        label: impl Into<String>,
        total: u64,
        max_observations: usize,
        output_interval: u64,
    ) -> Self {
        Self {
            label: label.into(),
            total,
            done: 0,
            steps: 0,
            output_interval: output_interval.max(1),
            max_observations: max_observations.max(1),
            history: VecDeque::with_capacity(max_observations.clamp(1, 4096)),
            started_at: None,
        }
    }

    pub fn work_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Record `units` finished since the last `work_started`. Returns `true`
    /// when this step emitted a progress line.
    pub fn work_finished(&mut self, units: u64) -> bool {
        let elapsed = self
            .started_at
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.work_measured(units, elapsed)
    }

    /// Record an externally timed step
    pub fn work_measured(&mut self, units: u64, elapsed: Duration) -> bool {
        if units == 0 {
            return false;
        }
        self.history
            .push_back(elapsed.as_secs_f64() / units as f64);
        while self.history.len() > self.max_observations {
            self.history.pop_front();
        }
        self.done += units;
        self.steps += 1;

        if self.steps % self.output_interval == 0 {
            self.report();
            true
        } else {
            false
        }
    }

    /// Average seconds per unit over the retained history
    pub fn average(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.iter().sum::<f64>() / self.history.len() as f64)
    }

    pub fn eta(&self) -> Option<Duration> {
        let remaining = self.total.saturating_sub(self.done) as f64;
        self.average()
            .map(|avg| Duration::from_secs_f64((remaining * avg).max(0.0)))
    }

    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        100.0 * self.done as f64 / self.total as f64
    }

    pub fn done(&self) -> u64 {
        self.done
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    fn report(&self) {
        let eta = self.eta().map(format_eta).unwrap_or_else(|| "unknown".to_string());
        let speed = self
            .average()
            .filter(|avg| *avg > 0.0)
            .map(|avg| 1.0 / avg)
            .unwrap_or(0.0);
        info!(
            target: "blocksql::progress",
            "{}{:.2}% done, eta is {}, speed is {:.4}/s",
            self.label,
            self.percent_done(),
            eta,
            speed
        );
    }
}

/// Render as "D days H hours M minutes S seconds"
pub fn format_eta(eta: Duration) -> String {
    let total = eta.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days} days {hours} hours {minutes} minutes {seconds} seconds")
}
