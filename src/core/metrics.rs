use crate::domain::model::BatchReport;
use crate::domain::ports::ProgressObserver;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// 全程共用的計數器，各批次以原子操作更新
#[derive(Debug)]
pub struct MetricsTracker {
    total_eligible: usize,
    processed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    persisted: AtomicUsize,
    lost: AtomicUsize,
    started_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub total_eligible: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub persisted: usize,
    pub lost: usize,
    pub elapsed: Duration,
    /// 每秒處理筆數
    pub throughput: f64,
    /// 處理速度為 0 時尚無法估算
    pub eta: Option<Duration>,
    pub failure_rate: f64,
}

impl MetricsSnapshot {
    pub fn remaining(&self) -> usize {
        self.total_eligible.saturating_sub(self.processed)
    }

    pub fn eta_display(&self) -> String {
        match self.eta {
            Some(eta) => format_duration(eta),
            None => "computing...".to_string(),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

impl MetricsTracker {
    pub fn new(total_eligible: usize) -> Self {
        Self {
            total_eligible,
            processed: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            persisted: AtomicUsize::new(0),
            lost: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record_batch(&self, report: &BatchReport) -> MetricsSnapshot {
        self.processed.fetch_add(report.processed, Ordering::SeqCst);
        self.succeeded.fetch_add(report.succeeded, Ordering::SeqCst);
        self.failed.fetch_add(report.failed, Ordering::SeqCst);
        self.persisted.fetch_add(report.persisted, Ordering::SeqCst);
        self.lost.fetch_add(report.lost, Ordering::SeqCst);
        self.snapshot()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let processed = self.processed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let elapsed = self.started_at.elapsed();

        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        let remaining = self.total_eligible.saturating_sub(processed);
        let eta = (throughput > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / throughput));
        let failure_rate = if processed > 0 {
            failed as f64 / processed as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            total_eligible: self.total_eligible,
            processed,
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed,
            persisted: self.persisted.load(Ordering::SeqCst),
            lost: self.lost.load(Ordering::SeqCst),
            elapsed,
            throughput,
            eta,
            failure_rate,
        }
    }
}

/// 預設觀察者：每批完成時寫一行進度日誌
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_batch_done(&self, snapshot: &MetricsSnapshot) {
        tracing::info!(
            "📈 {}/{} processed | {:.2} rec/s | ETA {} | failures {} ({:.1}%)",
            snapshot.processed,
            snapshot.total_eligible,
            snapshot.throughput,
            snapshot.eta_display(),
            snapshot.failed,
            snapshot.failure_rate * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_has_no_eta() {
        let tracker = MetricsTracker::new(10);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.processed, 0);
        assert_eq!(snapshot.failure_rate, 0.0);
        assert!(snapshot.eta.is_none());
        assert_eq!(snapshot.eta_display(), "computing...");
        assert_eq!(snapshot.remaining(), 10);
    }

    #[tokio::test]
    async fn test_record_batch_accumulates() {
        let tracker = MetricsTracker::new(4);
        tokio::time::sleep(Duration::from_millis(5)).await;

        tracker.record_batch(&BatchReport {
            processed: 2,
            succeeded: 1,
            failed: 1,
            persisted: 1,
            lost: 0,
        });
        let snapshot = tracker.record_batch(&BatchReport {
            processed: 1,
            succeeded: 1,
            failed: 0,
            persisted: 0,
            lost: 1,
        });

        assert_eq!(snapshot.processed, 3);
        assert_eq!(snapshot.succeeded + snapshot.failed, snapshot.processed);
        assert_eq!(snapshot.lost, 1);
        assert!((snapshot.failure_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(snapshot.throughput > 0.0);
        assert!(snapshot.eta.is_some());
        assert_eq!(snapshot.remaining(), 1);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_duration(Duration::from_secs(59)), "0:00:59");
    }
}
