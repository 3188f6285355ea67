//! # Shutdown Coordinator
//!
//! Spawns one task per worker, waits for an interrupt, then cancels every
//! worker and waits (bounded by the drain timeout) for each to close.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{ListenerWorker, SubscriptionManager, WorkerReport, WorkerSpec, WorkerState};
use crate::config::CoordinatorConfig;
use crate::domain::CoordinatorResult;
use crate::ports::{MessageObserver, Namespace};

/// Handle to one spawned worker.
pub struct WorkerHandle {
    id: usize,
    spec: WorkerSpec,
    cancel: watch::Sender<bool>,
    state: watch::Receiver<WorkerState>,
    task: JoinHandle<WorkerReport>,
}

impl WorkerHandle {
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Ask the worker to stop. Repeated calls have no further effect.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait until the worker reports `target` or has gone past it.
    pub async fn wait_for(&mut self, target: WorkerState) {
        let reached = |state: &WorkerState| *state == target || *state == WorkerState::Closed;
        let _ = self.state.wait_for(reached).await.map(|_| ());
    }
}

/// Result of draining every worker.
#[derive(Debug, Default)]
pub struct ShutdownSummary {
    pub reports: Vec<WorkerReport>,
    /// Still running at the drain deadline; aborted without cleanup.
    pub timed_out: Vec<WorkerSpec>,
    /// Worker tasks that panicked.
    pub panicked: Vec<WorkerSpec>,
}

impl ShutdownSummary {
    /// Every worker closed on its own and reported no error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty()
            && self.panicked.is_empty()
            && self.reports.iter().all(|r| r.error.is_none())
    }

    #[must_use]
    pub fn taps_deleted(&self) -> usize {
        self.reports.iter().filter(|r| r.tap_deleted).count()
    }
}

/// Fans cancellation out to N workers and waits for their cleanup.
pub struct ShutdownCoordinator {
    namespace: Namespace,
    subscriptions: SubscriptionManager,
    operation_timeout: Duration,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(namespace: Namespace, config: &CoordinatorConfig) -> Self {
        Self {
            subscriptions: SubscriptionManager::new(
                namespace.clone(),
                config.operation_timeout(),
                config.tap_subscription.clone(),
            ),
            namespace,
            operation_timeout: config.operation_timeout(),
            drain_timeout: config.drain_timeout(),
        }
    }

    /// Start one task per spec. Each worker gets its own cancel channel.
    pub fn spawn(
        &self,
        specs: Vec<WorkerSpec>,
        observer: Arc<dyn MessageObserver>,
    ) -> Vec<WorkerHandle> {
        specs
            .into_iter()
            .enumerate()
            .map(|(id, spec)| {
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let (state_tx, state_rx) = watch::channel(WorkerState::Created);
                let worker = ListenerWorker::new(
                    id,
                    spec.clone(),
                    self.namespace.clone(),
                    self.operation_timeout,
                    self.subscriptions.clone(),
                    observer.clone(),
                    cancel_rx,
                    state_tx,
                );
                info!(worker = id, target = %spec, "Spawning worker");
                WorkerHandle {
                    id,
                    spec,
                    cancel: cancel_tx,
                    state: state_rx,
                    task: tokio::spawn(worker.run()),
                }
            })
            .collect()
    }

    /// Block until Ctrl-C or, on Unix, SIGTERM.
    pub async fn await_interrupt() -> CoordinatorResult<()> {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
            Ok::<(), std::io::Error>(())
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<std::io::Result<()>>();

        tokio::select! {
            result = ctrl_c => result?,
            result = terminate => result?,
        }
        info!("Interrupt received");
        Ok(())
    }

    /// Cancel every worker once, then wait for each to reach `Closed`.
    ///
    /// The whole wait is bounded by the drain timeout; workers still
    /// running at the deadline are aborted and listed as timed out.
    pub async fn cancel_all(&self, handles: Vec<WorkerHandle>) -> ShutdownSummary {
        for handle in &handles {
            handle.cancel();
        }
        info!(workers = handles.len(), "Cancellation sent, draining");

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let mut summary = ShutdownSummary::default();

        for handle in handles {
            let WorkerHandle { id, spec, task, .. } = handle;
            let abort = task.abort_handle();
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(report)) => summary.reports.push(report),
                Ok(Err(e)) => {
                    error!(worker = id, target = %spec, error = %e, "Worker task failed");
                    summary.panicked.push(spec);
                }
                Err(_) => {
                    abort.abort();
                    warn!(
                        worker = id,
                        target = %spec,
                        timeout_secs = self.drain_timeout.as_secs(),
                        "Worker did not close before the drain deadline, aborted"
                    );
                    summary.timed_out.push(spec);
                }
            }
        }

        info!(
            closed = summary.reports.len(),
            timed_out = summary.timed_out.len(),
            taps_deleted = summary.taps_deleted(),
            "Shutdown complete"
        );
        summary
    }

    /// Spawn `specs`, wait for `interrupt` or for every worker to close on
    /// its own, then drain.
    pub async fn run_until<F>(
        &self,
        specs: Vec<WorkerSpec>,
        observer: Arc<dyn MessageObserver>,
        interrupt: F,
    ) -> ShutdownSummary
    where
        F: Future<Output = ()>,
    {
        let mut handles = self.spawn(specs, observer);

        tokio::select! {
            () = interrupt => {}
            () = all_closed(&mut handles) => {
                info!("All workers closed on their own");
            }
        }

        self.cancel_all(handles).await
    }

    /// [`run_until`](Self::run_until) with the process interrupt signals.
    pub async fn run_until_interrupt(
        &self,
        specs: Vec<WorkerSpec>,
        observer: Arc<dyn MessageObserver>,
    ) -> ShutdownSummary {
        let interrupt = async {
            if let Err(e) = Self::await_interrupt().await {
                error!(error = %e, "Interrupt handler unavailable, draining now");
            }
        };
        self.run_until(specs, observer, interrupt).await
    }
}

async fn all_closed(handles: &mut [WorkerHandle]) {
    for handle in handles.iter_mut() {
        handle.wait_for(WorkerState::Closed).await;
    }
}
