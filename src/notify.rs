//! Sync report delivery

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Delivers human-readable sync reports to an operator channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, report: &str) -> Result<()>;
}

/// Writes reports to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, report: &str) -> Result<()> {
        for line in report.lines() {
            info!(target: "proxy_sync::report", "{}", line);
        }
        Ok(())
    }
}
