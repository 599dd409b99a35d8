use crate::collision::WriteOutcome;
use crate::resolve::ResolveReport;
use std::ops::Add;
use web_time::{Duration, Instant};

pub const CACHE_PROFILE_INTERVAL: Duration = Duration::from_secs(2);

/// Per-outcome write counts. Producers keep their own tally and merge them,
/// so nothing shared is touched on the write path.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct WriteTally {
    pub claimed: u64,
    pub accepted: u64,
    pub evicted: u64,
    pub rejected: u64,
}

impl WriteTally {
    pub fn of(outcome: WriteOutcome) -> Self {
        let mut tally = Self::default();
        tally.record(outcome);
        tally
    }

    pub fn record(&mut self, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Claimed => self.claimed += 1,
            WriteOutcome::Accepted => self.accepted += 1,
            WriteOutcome::Evicted => self.evicted += 1,
            WriteOutcome::Rejected => self.rejected += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.claimed + self.accepted + self.evicted + self.rejected
    }
}

impl Add for WriteTally {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            claimed: self.claimed + other.claimed,
            accepted: self.accepted + other.accepted,
            evicted: self.evicted + other.evicted,
            rejected: self.rejected + other.rejected,
        }
    }
}

/// Wall-clock cost of the three stages of one time step.
#[derive(Copy, Clone, Debug, Default)]
pub struct StageTimings {
    pub populate: Duration,
    pub resolve: Duration,
    pub scatter: Duration,
}

#[derive(Clone, Debug)]
pub struct CacheProfile {
    window_start: Instant,
    interval: Duration,
    steps: u64,
    writes: WriteTally,
    resolved_cells_sum: u64,
    resolved_cells_max: u64,
    released_cells_sum: u64,
    populate_ms_sum: f64,
    populate_ms_max: f64,
    resolve_ms_sum: f64,
    resolve_ms_max: f64,
    scatter_ms_sum: f64,
    scatter_ms_max: f64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CacheProfileReport {
    pub steps: u64,
    pub writes: WriteTally,
    pub resolved_cells_sum: u64,
    pub resolved_cells_max: u64,
    pub released_cells_sum: u64,
    pub populate_ms_sum: f64,
    pub populate_ms_max: f64,
    pub resolve_ms_sum: f64,
    pub resolve_ms_max: f64,
    pub scatter_ms_sum: f64,
    pub scatter_ms_max: f64,
}

impl CacheProfile {
    pub fn new(now: Instant) -> Self {
        Self::with_interval(now, CACHE_PROFILE_INTERVAL)
    }

    pub fn with_interval(now: Instant, interval: Duration) -> Self {
        Self {
            window_start: now,
            interval,
            steps: 0,
            writes: WriteTally::default(),
            resolved_cells_sum: 0,
            resolved_cells_max: 0,
            released_cells_sum: 0,
            populate_ms_sum: 0.0,
            populate_ms_max: 0.0,
            resolve_ms_sum: 0.0,
            resolve_ms_max: 0.0,
            scatter_ms_sum: 0.0,
            scatter_ms_max: 0.0,
        }
    }

    pub fn record_step(&mut self, writes: WriteTally, resolve: ResolveReport, timings: StageTimings) {
        self.steps = self.steps.saturating_add(1);
        self.writes = self.writes + writes;
        let resolved = resolve.resolved_cells as u64;
        self.resolved_cells_sum = self.resolved_cells_sum.saturating_add(resolved);
        self.resolved_cells_max = self.resolved_cells_max.max(resolved);
        self.released_cells_sum = self
            .released_cells_sum
            .saturating_add(resolve.released_cells as u64);

        let populate_ms = timings.populate.as_secs_f64() * 1000.0;
        let resolve_ms = timings.resolve.as_secs_f64() * 1000.0;
        let scatter_ms = timings.scatter.as_secs_f64() * 1000.0;
        self.populate_ms_sum += populate_ms;
        self.populate_ms_max = self.populate_ms_max.max(populate_ms);
        self.resolve_ms_sum += resolve_ms;
        self.resolve_ms_max = self.resolve_ms_max.max(resolve_ms);
        self.scatter_ms_sum += scatter_ms;
        self.scatter_ms_max = self.scatter_ms_max.max(scatter_ms);
    }

    pub fn take_report_if_due(&mut self, now: Instant) -> Option<CacheProfileReport> {
        if now.duration_since(self.window_start) < self.interval {
            return None;
        }

        let report = CacheProfileReport {
            steps: self.steps,
            writes: self.writes,
            resolved_cells_sum: self.resolved_cells_sum,
            resolved_cells_max: self.resolved_cells_max,
            released_cells_sum: self.released_cells_sum,
            populate_ms_sum: self.populate_ms_sum,
            populate_ms_max: self.populate_ms_max,
            resolve_ms_sum: self.resolve_ms_sum,
            resolve_ms_max: self.resolve_ms_max,
            scatter_ms_sum: self.scatter_ms_sum,
            scatter_ms_max: self.scatter_ms_max,
        };
        *self = Self::with_interval(now, self.interval);

        if report.steps == 0 {
            None
        } else {
            Some(report)
        }
    }
}

impl CacheProfileReport {
    /// Fraction of writes turned away by the collision policy.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.writes.total();
        if total == 0 {
            0.0
        } else {
            self.writes.rejected as f64 / total as f64
        }
    }

    pub fn log(&self) {
        let steps = self.steps.max(1) as f64;
        log::info!(
            "radiance cache: {} steps, {} writes ({} claimed, {} evicted, {:.2}% rejected), {:.0} cells/step (max {}), {} released; populate {:.2}/{:.2} ms, resolve {:.2}/{:.2} ms, scatter {:.2}/{:.2} ms (avg/max)",
            self.steps,
            self.writes.total(),
            self.writes.claimed,
            self.writes.evicted,
            self.rejection_rate() * 100.0,
            self.resolved_cells_sum as f64 / steps,
            self.resolved_cells_max,
            self.released_cells_sum,
            self.populate_ms_sum / steps,
            self.populate_ms_max,
            self.resolve_ms_sum / steps,
            self.resolve_ms_max,
            self.scatter_ms_sum / steps,
            self.scatter_ms_max,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_outcome() {
        let mut tally = WriteTally::default();
        for outcome in [
            WriteOutcome::Claimed,
            WriteOutcome::Accepted,
            WriteOutcome::Accepted,
            WriteOutcome::Rejected,
        ] {
            tally.record(outcome);
        }
        let merged = tally + WriteTally::of(WriteOutcome::Evicted);
        assert_eq!(
            merged,
            WriteTally {
                claimed: 1,
                accepted: 2,
                evicted: 1,
                rejected: 1,
            }
        );
        assert_eq!(merged.total(), 5);
    }

    #[test]
    fn report_waits_for_the_interval_and_resets_the_window() {
        let start = Instant::now();
        let mut profile = CacheProfile::with_interval(start, Duration::from_millis(100));
        profile.record_step(
            WriteTally {
                claimed: 2,
                accepted: 5,
                evicted: 0,
                rejected: 3,
            },
            ResolveReport {
                resolved_cells: 2,
                first_writes: 2,
                released_cells: 0,
                samples: 7,
            },
            StageTimings {
                populate: Duration::from_millis(4),
                resolve: Duration::from_millis(1),
                scatter: Duration::from_millis(2),
            },
        );

        assert!(profile
            .take_report_if_due(start + Duration::from_millis(50))
            .is_none());

        let report = profile
            .take_report_if_due(start + Duration::from_millis(150))
            .unwrap();
        assert_eq!(report.steps, 1);
        assert_eq!(report.resolved_cells_max, 2);
        assert!((report.rejection_rate() - 0.3).abs() < 1.0e-9);
        assert!((report.populate_ms_max - 4.0).abs() < 1.0e-9);

        // Nothing recorded since the last report.
        assert!(profile
            .take_report_if_due(start + Duration::from_millis(400))
            .is_none());
    }
}
