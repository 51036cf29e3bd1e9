use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::application::usecases::run_delivery_pass::{PassRequest, RunDeliveryPass};

/// Pull-based fallback sources (the file drop) the loop drains between
/// passes. Returns how many events were ingested.
#[async_trait]
pub trait FallbackIngest: Send + Sync {
    async fn ingest(&self) -> anyhow::Result<u32>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_limit: u32,
    pub team_id: Option<Uuid>,
    /// Sleep after a pass that did work.
    pub active_delay: Duration,
    /// Sleep after an idle pass.
    pub idle_delay: Duration,
    /// Base sleep after an unexpected error, doubled per consecutive error.
    pub error_backoff: Duration,
    pub error_backoff_cap: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            team_id: None,
            active_delay: Duration::from_secs(5),
            idle_delay: Duration::from_secs(30),
            error_backoff: Duration::from_secs(10),
            error_backoff_cap: Duration::from_secs(10 * 60),
        }
    }
}

/// Single-threaded cooperative poll loop around [`RunDeliveryPass`]. The
/// sleep between passes is the only suspension point and is interruptible
/// by the shutdown signal; an in-flight pass always runs to completion.
pub struct DeliveryWorker {
    pass: Arc<RunDeliveryPass>,
    fallback: Option<Arc<dyn FallbackIngest>>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl DeliveryWorker {
    pub fn new(
        pass: Arc<RunDeliveryPass>,
        fallback: Option<Arc<dyn FallbackIngest>>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pass,
            fallback,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        info!(
            limit = self.config.batch_limit,
            team = ?self.config.team_id,
            "delivery worker started"
        );
        let mut consecutive_errors: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let request = PassRequest {
                limit: Some(self.config.batch_limit),
                team_id: self.config.team_id,
                manual: false,
            };
            let delay = match self.pass.execute(request).await {
                Ok(report) => {
                    consecutive_errors = 0;
                    if report.worked() {
                        self.config.active_delay
                    } else {
                        self.config.idle_delay
                    }
                }
                Err(err) => {
                    consecutive_errors += 1;
                    error!(%err, consecutive_errors, "delivery pass failed");
                    backoff_delay(
                        self.config.error_backoff,
                        self.config.error_backoff_cap,
                        consecutive_errors,
                    )
                }
            };

            if let Some(fallback) = &self.fallback {
                match fallback.ingest().await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "ingested fallback events"),
                    Err(err) => error!(%err, "fallback ingest failed"),
                }
            }

            debug!(?delay, "worker sleeping");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("delivery worker stopped");
    }
}

fn backoff_delay(base: Duration, cap: Duration, consecutive_errors: u32) -> Duration {
    let factor = 2u32.saturating_pow(consecutive_errors.saturating_sub(1).min(16));
    base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(10);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_secs(60));
        assert_eq!(backoff_delay(base, cap, 30), Duration::from_secs(60));
    }
}
