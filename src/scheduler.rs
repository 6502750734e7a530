//! Background sync scheduler
//!
//! One task polls the registry for due sources and syncs them one after
//! another, reporting every outcome to the notifier. Stopping cancels the
//! wait between passes; a pass that is already running completes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::notify::Notifier;
use crate::sync::{SyncService, format_outcome};

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    service: Arc<SyncService>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    error_backoff: Duration,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(
        service: Arc<SyncService>,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            service,
            notifier,
            poll_interval,
            error_backoff,
            running: Mutex::new(None),
        }
    }

    /// Starts the loop; returns `false` when it is already running
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if running
            .as_ref()
            .is_some_and(|state| !state.handle.is_finished())
        {
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.service.clone(),
            self.notifier.clone(),
            self.poll_interval,
            self.error_backoff,
            stop_rx,
        ));
        *running = Some(Running { stop, handle });
        info!(
            "Scheduler started, polling every {}s",
            self.poll_interval.as_secs()
        );
        true
    }

    /// Stops the loop and waits for it to exit; returns `false` when not running
    pub async fn stop(&self) -> bool {
        let Some(state) = self.running.lock().await.take() else {
            return false;
        };
        let _ = state.stop.send(true);
        if let Err(e) = state.handle.await {
            error!(severity = "critical", "Scheduler task ended abnormally: {}", e);
        }
        info!("Scheduler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|state| !state.handle.is_finished())
    }

    /// Syncs every due source once, returning how many were attempted
    pub async fn run_due(&self) -> usize {
        run_pass(&self.service, self.notifier.as_ref()).await
    }
}

async fn run_loop(
    service: Arc<SyncService>,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    error_backoff: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        // A panic inside a pass surfaces as a join error instead of killing the loop
        let pass = {
            let service = service.clone();
            let notifier = notifier.clone();
            tokio::spawn(async move { run_pass(&service, notifier.as_ref()).await })
        };

        let delay = match pass.await {
            Ok(attempted) => {
                debug!("Scheduler pass finished, {} sources synced", attempted);
                poll_interval
            }
            Err(e) => {
                error!(severity = "critical", "Scheduler pass failed: {}", e);
                error_backoff
            }
        };

        if *stop.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("Scheduler loop exited");
}

async fn run_pass(service: &SyncService, notifier: &dyn Notifier) -> usize {
    let due = service.registry().lock().await.due_sources();
    if due.is_empty() {
        return 0;
    }
    info!("{} sources due for sync", due.len());

    for source in &due {
        let outcome = service.sync_one(&source.name).await;
        let report = format!("Scheduled sync: {}\n\n{}", source.name, format_outcome(&outcome));
        if let Err(e) = notifier.notify(&report).await {
            warn!(source = %source.name, "Failed to deliver sync report: {:#}", e);
        }
    }
    due.len()
}
