use crate::dedup::Deduplicator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    pub count: u64,
    pub closed_at: DateTime<Utc>,
}

pub struct WindowScheduler {
    dedup: Arc<Deduplicator>,
    period: Duration,
}

/// Running scheduler. Dropping the handle also stops the loop.
pub struct WindowHandle {
    stop: watch::Sender<bool>,
    reports: watch::Receiver<Option<WindowReport>>,
    task: JoinHandle<()>,
}

impl WindowScheduler {
    pub fn new(dedup: Arc<Deduplicator>, period: Duration) -> Self {
        Self { dedup, period }
    }

    pub fn spawn(self) -> WindowHandle {
        let (stop, stop_rx) = watch::channel(false);
        let (report_tx, reports) = watch::channel(None);
        let task = tokio::spawn(self.run(stop_rx, report_tx));
        WindowHandle {
            stop,
            reports,
            task,
        }
    }

    async fn run(
        self,
        mut stop: watch::Receiver<bool>,
        reports: watch::Sender<Option<WindowReport>>,
    ) {
        info!("Window scheduler started, period {:?}", self.period);
        // First tick closes the first full window rather than firing immediately.
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let count = self.dedup.reset().await;
                    let report = WindowReport {
                        count,
                        closed_at: Utc::now(),
                    };
                    info!(
                        unique_request_count = count,
                        closed_at = %report.closed_at.to_rfc3339(),
                        "Logged unique requests"
                    );
                    reports.send_replace(Some(report));
                }
            }
        }
        info!("Window scheduler stopped");
    }
}

impl WindowHandle {
    pub fn reports(&self) -> watch::Receiver<Option<WindowReport>> {
        self.reports.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Window scheduler task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn tick_reports_and_clears_window() {
        let dedup = Arc::new(Deduplicator::new());
        let handle = WindowScheduler::new(dedup.clone(), PERIOD).spawn();
        let mut reports = handle.reports();

        for id in [1, 2, 3, 2] {
            dedup.accept(id).await;
        }

        reports.changed().await.unwrap();
        let report = (*reports.borrow_and_update()).expect("report after first tick");
        assert_eq!(report.count, 3);
        assert_eq!(dedup.snapshot().await, 0);

        dedup.accept(2).await;
        reports.changed().await.unwrap();
        assert_eq!(reports.borrow_and_update().map(|r| r.count), Some(1));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_before_period_elapses() {
        let dedup = Arc::new(Deduplicator::new());
        let handle = WindowScheduler::new(dedup.clone(), PERIOD).spawn();
        let reports = handle.reports();
        dedup.accept(9).await;

        tokio::time::advance(PERIOD / 2).await;
        tokio::task::yield_now().await;

        assert!(!reports.has_changed().unwrap());
        assert_eq!(dedup.snapshot().await, 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_resetting() {
        let dedup = Arc::new(Deduplicator::new());
        let handle = WindowScheduler::new(dedup.clone(), PERIOD).spawn();
        handle.shutdown().await;

        dedup.accept(5).await;
        tokio::time::advance(PERIOD * 3).await;
        tokio::task::yield_now().await;

        assert_eq!(dedup.snapshot().await, 1);
    }
}
