use crate::model::{RunRegistryEntry, RunStatus};

/// Compute (mean, median, 25th percentile, 75th percentile) from samples.
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Aggregate view over finished runs in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub finished: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Duration metrics in seconds, over succeeded runs only.
    pub duration_secs: Option<(f64, f64, f64, f64)>,
}

impl RunStats {
    pub fn success_rate(&self) -> Option<f64> {
        (self.finished > 0).then(|| self.succeeded as f64 / self.finished as f64)
    }
}

pub fn run_stats(entries: &[RunRegistryEntry]) -> RunStats {
    let mut stats = RunStats {
        finished: 0,
        succeeded: 0,
        failed: 0,
        cancelled: 0,
        duration_secs: None,
    };
    let mut durations = Vec::new();
    for e in entries {
        match e.run.status {
            RunStatus::Succeeded => {
                stats.succeeded += 1;
                if let Some(ms) = e.run.duration_ms {
                    durations.push(ms as f64 / 1000.0);
                }
            }
            RunStatus::Failed => stats.failed += 1,
            RunStatus::Cancelled => stats.cancelled += 1,
            RunStatus::Queued | RunStatus::Running => continue,
        }
        stats.finished += 1;
    }
    stats.duration_secs = compute_metrics(&durations);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RunOptions, RunRequest, RunState};
    use time::macros::datetime;

    #[test]
    fn metrics_need_two_samples() {
        assert_eq!(compute_metrics(&[1.0]), None);
        let (mean, median, p25, p75) = compute_metrics(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(mean, 2.5);
        assert_eq!(median, 3.0);
        assert_eq!(p25, 2.0);
        assert_eq!(p75, 4.0);
    }

    #[test]
    fn stats_skip_active_runs() {
        let t0 = datetime!(2025-01-01 0:00 UTC);
        let req = RunRequest::Production {
            pipeline_id: "production".into(),
            sample_id: "s".into(),
            options: RunOptions::default(),
        };
        let mut entries = Vec::new();
        for (i, status) in [
            RunStatus::Succeeded,
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::Running,
        ]
        .into_iter()
        .enumerate()
        {
            let mut run = RunState::new(format!("run-{i}"), &req, t0);
            if status.is_terminal() {
                run.finish(status, None, None, t0 + time::Duration::seconds(10 * (i as i64 + 1)));
            } else {
                run.status = status;
            }
            entries.push(RunRegistryEntry::new(run));
        }
        let stats = run_stats(&entries);
        assert_eq!(stats.finished, 3);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.duration_secs.map(|d| d.0), Some(15.0));
        assert!((stats.success_rate().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }
}
