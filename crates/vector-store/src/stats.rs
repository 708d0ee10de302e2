use ladle_protocol::SearchStats;
use std::time::Duration;

/// Mutable per-store operation counters.
///
/// Durations are appended per operation and only reduced to aggregates when a
/// snapshot is taken; the logs grow until [`PerformanceStats::reset`].
#[derive(Debug, Clone, Default)]
pub struct PerformanceStats {
    index_build_time: f64,
    search_times: Vec<f64>,
    add_times: Vec<f64>,
    total_searches: u64,
    total_adds: u64,
}

impl PerformanceStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_index_build_time(&mut self, elapsed: Duration) {
        self.index_build_time = elapsed.as_secs_f64();
    }

    pub fn record_search(&mut self, elapsed: Duration) {
        self.search_times.push(elapsed.as_secs_f64());
        self.total_searches += 1;
    }

    pub fn record_add(&mut self, elapsed: Duration) {
        self.add_times.push(elapsed.as_secs_f64());
        self.total_adds += 1;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Snapshot with derived aggregates; aggregate fields stay `None` until
    /// at least one sample exists.
    #[must_use]
    pub fn snapshot(&self) -> SearchStats {
        let mut stats = SearchStats {
            index_build_time: self.index_build_time,
            total_searches: self.total_searches,
            total_adds: self.total_adds,
            search_times: self.search_times.clone(),
            add_times: self.add_times.clone(),
            ..SearchStats::default()
        };

        if !self.search_times.is_empty() {
            stats.avg_search_time = Some(mean(&self.search_times));
            stats.min_search_time = self.search_times.iter().copied().reduce(f64::min);
            stats.max_search_time = self.search_times.iter().copied().reduce(f64::max);
            stats.p95_search_time = Some(percentile(&self.search_times, 95.0));
            stats.p99_search_time = Some(percentile(&self.search_times, 99.0));
        }

        if !self.add_times.is_empty() {
            stats.avg_add_time = Some(mean(&self.add_times));
            stats.min_add_time = self.add_times.iter().copied().reduce(f64::min);
            stats.max_add_time = self.add_times.iter().copied().reduce(f64::max);
        }

        stats
    }
}

fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Linear-interpolation percentile over an unsorted sample set, `pct` in
/// `[0, 100]`.
pub fn percentile(samples: &[f64], pct: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            if lo == hi {
                sorted[lo]
            } else {
                let weight = rank - lo as f64;
                sorted[lo] * (1.0 - weight) + sorted[hi] * weight
            }
        }
    }
}
