//! Turns a stream of configuration changes into as few backtest computations as possible,
//! and surfaces only the outcome for the most recent configuration.
//!
//! The loop moves through `Idle -> Scheduled -> InFlight -> Idle`. A change arriving while a
//! computation is in flight does not abort it: the call keeps running, but its version loses
//! authority immediately and whatever it returns is dropped on arrival.

use crate::backtest_api_client::{ensure_non_empty, ComputeService};
use crate::config_store::{ConfigSnapshot, ConfigStore};
use crate::error::ComputationError;
use crate::models::{BacktestResult, ComputationRequest};
use crate::notifier::Notifier;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    #[default]
    Idle,
    Scheduled,
    InFlight,
}

impl OrchestratorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorPhase::Idle => "idle",
            OrchestratorPhase::Scheduled => "scheduled",
            OrchestratorPhase::InFlight => "in_flight",
        }
    }
}

/// What the rest of the system sees of the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorView {
    pub phase: OrchestratorPhase,
    pub loading: bool,
    pub result: Option<Arc<BacktestResult>>,
    pub error: Option<ComputationError>,
    /// Version of the computation whose outcome is currently shown.
    pub applied_version: Option<u64>,
    /// Highest version handed to the compute service so far.
    pub issued_version: u64,
}

type InFlightCall = BoxFuture<'static, (u64, Result<BacktestResult, ComputationError>)>;

pub struct DebouncedOrchestrator {
    view_rx: watch::Receiver<OrchestratorView>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl DebouncedOrchestrator {
    /// Start watching `store`. Nothing is computed until the store accepts a change.
    pub fn spawn(
        store: &ConfigStore,
        service: Arc<dyn ComputeService>,
        debounce: Duration,
        notifier: Notifier,
    ) -> Self {
        let (view_tx, view_rx) = watch::channel(OrchestratorView::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let config_rx = store.subscribe();
        let cleared_at = config_rx.borrow().cleared_at;
        let state = OrchestratorLoop {
            config_rx,
            service,
            debounce,
            notifier,
            view_tx,
            view: OrchestratorView::default(),
            pending: None,
            deadline: None,
            authoritative: None,
            cleared_at,
            in_flight: FuturesUnordered::new(),
        };
        let task = tokio::spawn(state.run(shutdown_rx));

        Self {
            view_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn view(&self) -> OrchestratorView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OrchestratorView> {
        self.view_rx.clone()
    }

    /// Stop the loop. Calls still running are dropped along with it.
    pub async fn shutdown(mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!("Orchestrator task ended abnormally: {}", err);
            }
        }
    }
}

impl Drop for DebouncedOrchestrator {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

struct OrchestratorLoop {
    config_rx: watch::Receiver<ConfigSnapshot>,
    service: Arc<dyn ComputeService>,
    debounce: Duration,
    notifier: Notifier,
    view_tx: watch::Sender<OrchestratorView>,
    view: OrchestratorView,
    /// Latest snapshot waiting for the quiet period to end.
    pending: Option<ConfigSnapshot>,
    deadline: Option<Instant>,
    /// The only version whose response may still be applied.
    authoritative: Option<u64>,
    /// `cleared_at` of the last snapshot handled.
    cleared_at: u64,
    in_flight: FuturesUnordered<InFlightCall>,
}

impl OrchestratorLoop {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("Orchestrator shutting down");
                    break;
                }
                changed = self.config_rx.changed() => {
                    if changed.is_err() {
                        debug!("Configuration store dropped; orchestrator stopping");
                        break;
                    }
                    let snapshot = self.config_rx.borrow_and_update().clone();
                    self.on_config_change(snapshot);
                }
                _ = wait_until(deadline) => {
                    self.on_quiet_period_elapsed();
                }
                Some((version, outcome)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    self.on_response(version, outcome);
                }
            }
        }
    }

    fn on_config_change(&mut self, snapshot: ConfigSnapshot) {
        if snapshot.cleared_at > self.cleared_at {
            self.cleared_at = snapshot.cleared_at;
            self.view.result = None;
            self.view.error = None;
            self.view.applied_version = None;
        }
        if let Some(version) = self.authoritative.take() {
            debug!(
                "Backtest version {} superseded by configuration revision {}",
                version, snapshot.revision
            );
        }

        debug!(
            "Configuration revision {} received; computing after {:?} of quiet",
            snapshot.revision, self.debounce
        );
        self.pending = Some(snapshot);
        self.deadline = Some(Instant::now() + self.debounce);
        self.publish(OrchestratorPhase::Scheduled);
    }

    fn on_quiet_period_elapsed(&mut self) {
        self.deadline = None;
        let Some(snapshot) = self.pending.take() else {
            self.publish(OrchestratorPhase::Idle);
            return;
        };

        self.view.issued_version += 1;
        let version = self.view.issued_version;
        let request = ComputationRequest {
            version,
            config: snapshot.config,
        };
        info!(
            "Issuing backtest version {} for {} {} - {} ({})",
            version,
            request.config.symbol,
            request.config.start_date,
            request.config.end_date,
            request.config.strategy
        );

        self.authoritative = Some(version);
        let service = Arc::clone(&self.service);
        self.in_flight.push(Box::pin(async move {
            let outcome = service
                .run_backtest(&request)
                .await
                .and_then(|result| ensure_non_empty(result, &request.config));
            (version, outcome)
        }));
        self.publish(OrchestratorPhase::InFlight);
    }

    fn on_response(&mut self, version: u64, outcome: Result<BacktestResult, ComputationError>) {
        if self.authoritative != Some(version) {
            debug!("Discarding stale response for backtest version {}", version);
            return;
        }
        self.authoritative = None;
        self.view.applied_version = Some(version);

        match outcome {
            Ok(result) => {
                info!(
                    "Backtest version {} completed with {} records and {} trades",
                    version,
                    result.records.len(),
                    result.trades.len()
                );
                self.view.result = Some(Arc::new(result));
                self.view.error = None;
            }
            Err(err) => {
                warn!("Backtest version {} failed: {}", version, err);
                self.notifier.error(format!("Backtest failed: {}", err));
                self.view.result = None;
                self.view.error = Some(err);
            }
        }
        self.publish(OrchestratorPhase::Idle);
    }

    fn publish(&mut self, phase: OrchestratorPhase) {
        self.view.phase = phase;
        self.view.loading = phase != OrchestratorPhase::Idle;
        self.view_tx.send_replace(self.view.clone());
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
