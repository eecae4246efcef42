use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::engine::ExecutionStateMachine;
use crate::error::Result;
use crate::models::AdvanceOutcome;

/// What one sweep did, returned by the manual trigger and logged by the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub claimed: usize,
    pub sent: usize,
    pub completed: usize,
    pub skipped: usize,
    pub deferred: usize,
    pub abandoned: usize,
    pub dispatch_failures: usize,
    pub superseded: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: AdvanceOutcome) {
        match outcome {
            AdvanceOutcome::Sent { .. } => self.sent += 1,
            AdvanceOutcome::Completed { .. } => self.completed += 1,
            AdvanceOutcome::Skipped { .. } => self.skipped += 1,
            AdvanceOutcome::Deferred => self.deferred += 1,
            AdvanceOutcome::Abandoned => self.abandoned += 1,
            AdvanceOutcome::DispatchFailed { .. } => self.dispatch_failures += 1,
            AdvanceOutcome::Superseded => self.superseded += 1,
        }
    }
}

/// Periodically claims due executions and advances each of them by one step.
pub struct Scheduler {
    machine: Arc<ExecutionStateMachine>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(machine: Arc<ExecutionStateMachine>, config: SchedulerConfig) -> Self {
        Self { machine, config }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_once_at(Utc::now()).await
    }

    /// One sweep as of `now`. Per-execution failures are logged and counted;
    /// only a failed claim query fails the sweep.
    ///
    /// Every execution in the sweep is stamped with `now`: send times and the
    /// base for the following step's delay are the sweep time, not the moment
    /// the task got a permit.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let lease = chrono::Duration::from_std(self.config.claim_lease)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let due = self
            .machine
            .stores()
            .executions
            .claim_due(now, self.config.batch_size, lease)
            .await?;

        let mut report = SweepReport {
            claimed: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut owners = HashMap::with_capacity(due.len());

        for execution in due {
            let machine = self.machine.clone();
            let permits = permits.clone();
            let execution_id = execution.id;

            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let id = execution.id;
                let result = machine.advance(execution, now).await;
                if result.is_err() {
                    release(&machine, id).await;
                }
                (id, result)
            });
            owners.insert(handle.id(), execution_id);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => report.record(outcome),
                Ok((id, Err(err))) => {
                    error!(execution_id = %id, "Failed to advance execution: {}", err);
                    report.errors += 1;
                }
                Err(err) => {
                    match owners.get(&err.id()) {
                        Some(&id) => {
                            error!(execution_id = %id, "Advance task aborted: {}", err);
                            release(&self.machine, id).await;
                        }
                        None => error!("Advance task aborted: {}", err),
                    }
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to `true`. A sweep
    /// in progress is finished before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started (interval {:?}, batch {}, concurrency {})",
            self.config.interval, self.config.batch_size, self.config.concurrency
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.claimed > 0 => info!(
                            "Sweep processed {} execution(s): {} sent, {} completed, {} failed, {} errors",
                            report.claimed, report.sent, report.completed,
                            report.dispatch_failures, report.errors
                        ),
                        Ok(_) => debug!("Sweep found nothing due"),
                        Err(err) => error!("Scheduler sweep failed: {}", err),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }
}

async fn release(machine: &ExecutionStateMachine, id: Uuid) {
    if let Err(err) = machine.stores().executions.release_claim(id).await {
        warn!(execution_id = %id, "Failed to release claim: {}", err);
    }
}
