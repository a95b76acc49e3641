//! Progress reporting for scans and downloads
//!
//! [`ProgressTracker`] derives elapsed time, completion percentage,
//! throughput and remaining time from a running count. It only reports; the
//! pipeline never branches on it.

use std::time::{Duration, Instant};

/// Point-in-time view of a [`ProgressTracker`]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSnapshot {
    /// Items completed
    pub completed: u64,
    /// Items expected, when known
    pub total: Option<u64>,
    /// Time since the tracker started
    pub elapsed: Duration,
    /// Completion percentage (0-100), when the total is known
    pub percent: Option<f64>,
    /// Items per second
    pub rate: f64,
    /// Estimated time to completion
    pub remaining: Option<Duration>,
}

/// Running counter with derived rate and ETA
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    label: &'static str,
    total: Option<u64>,
    completed: u64,
    started: Instant,
}

impl ProgressTracker {
    /// Start tracking `total` items, described as `label` in log lines
    pub fn new(label: &'static str, total: Option<u64>) -> Self {
        Self {
            label,
            total,
            completed: 0,
            started: Instant::now(),
        }
    }

    /// Count one more completed item
    pub fn tick(&mut self) {
        self.advance(1);
    }

    /// Count `n` more completed items
    pub fn advance(&mut self, n: u64) {
        self.completed = self.completed.saturating_add(n);
    }

    /// Items completed so far
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Expected total, when known
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Time since the tracker started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.elapsed())
    }

    /// Snapshot as if `elapsed` time had passed since the start
    pub fn snapshot_at(&self, elapsed: Duration) -> ProgressSnapshot {
        let percent = self.total.map(|total| {
            if total == 0 {
                100.0
            } else {
                (self.completed as f64 / total as f64 * 100.0).min(100.0)
            }
        });

        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            self.completed as f64 / secs
        } else {
            0.0
        };

        let remaining = match self.total {
            Some(total) if rate > 0.0 => {
                let left = total.saturating_sub(self.completed);
                Some(Duration::from_secs_f64(left as f64 / rate))
            }
            _ => None,
        };

        ProgressSnapshot {
            completed: self.completed,
            total: self.total,
            elapsed,
            percent,
            rate,
            remaining,
        }
    }

    /// Human-readable progress line
    pub fn format_progress(&self) -> String {
        format_snapshot(self.label, &self.snapshot())
    }
}

fn format_snapshot(label: &str, snapshot: &ProgressSnapshot) -> String {
    let mut parts = vec![match snapshot.total {
        Some(total) => format!("{label}: {}/{total}", snapshot.completed),
        None => format!("{label}: {}", snapshot.completed),
    }];

    if let Some(pct) = snapshot.percent {
        parts.push(format!("({pct:.1}%)"));
    }
    if snapshot.rate > 0.0 {
        parts.push(format!("at {:.1}/s", snapshot.rate));
    }
    if let Some(remaining) = snapshot.remaining {
        parts.push(format!("~{} remaining", format_duration(remaining)));
    }

    parts.join(" ")
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_percent_rate_and_eta() {
        let mut tracker = ProgressTracker::new("downloads", Some(100));
        tracker.advance(25);

        let snap = tracker.snapshot_at(Duration::from_secs(5));
        assert_eq!(snap.percent, Some(25.0));
        assert_eq!(snap.rate, 5.0);
        assert_eq!(snap.remaining, Some(Duration::from_secs(15)));
        assert_eq!(snap.elapsed, Duration::from_secs(5));
    }

    #[test]
    fn unknown_total_has_no_percent_or_eta() {
        let mut tracker = ProgressTracker::new("scan", None);
        tracker.tick();
        tracker.tick();

        let snap = tracker.snapshot_at(Duration::from_secs(1));
        assert_eq!(snap.completed, 2);
        assert_eq!(snap.percent, None);
        assert_eq!(snap.remaining, None);
        assert_eq!(snap.rate, 2.0);
    }

    #[test]
    fn zero_elapsed_reports_no_rate() {
        let mut tracker = ProgressTracker::new("scan", Some(10));
        tracker.advance(3);

        let snap = tracker.snapshot_at(Duration::ZERO);
        assert_eq!(snap.rate, 0.0);
        assert_eq!(snap.remaining, None);
    }

    #[test]
    fn empty_total_is_complete_and_overshoot_is_clamped() {
        let tracker = ProgressTracker::new("scan", Some(0));
        assert_eq!(tracker.snapshot_at(Duration::from_secs(1)).percent, Some(100.0));

        let mut tracker = ProgressTracker::new("scan", Some(2));
        tracker.advance(5);
        let snap = tracker.snapshot_at(Duration::from_secs(1));
        assert_eq!(snap.percent, Some(100.0));
        assert_eq!(snap.remaining, Some(Duration::ZERO));
    }

    #[test]
    fn formats_a_compact_line() {
        let mut tracker = ProgressTracker::new("scanned", Some(200));
        tracker.advance(100);
        let line = format_snapshot("scanned", &tracker.snapshot_at(Duration::from_secs(50)));
        assert_eq!(line, "scanned: 100/200 (50.0%) at 2.0/s ~50s remaining");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5h");
    }
}
