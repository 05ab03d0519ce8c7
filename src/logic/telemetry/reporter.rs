//! Periodic metrics reporter
//!
//! Logs one JSON `MetricsSnapshot` per interval until shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::MetricsSnapshot;

pub fn spawn_reporter<F>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    snapshot: F,
) -> JoinHandle<()>
where
    F: Fn() -> MetricsSnapshot + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match serde_json::to_string(&snapshot()) {
                        Ok(json) => log::info!("metrics {}", json),
                        Err(e) => log::warn!("Failed to serialize metrics: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::debug!("Metrics reporter stopped");
    })
}
