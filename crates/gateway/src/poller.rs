// Background Poller
//
// Timer-driven trigger. Started by the server, stopped through a watch signal
// on shutdown. Only sessions that currently hold a live push channel are
// polled; everything else would be fetched only to be dropped.

use crate::orchestrator::{FetchOrchestrator, TriggerSource};
use ewerelay_session::SessionStore;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct Poller {
    sessions: SessionStore,
    orchestrator: Arc<FetchOrchestrator>,
    interval: Duration,
}

/// Running poller task
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Signal the task and wait for the in-flight round to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Poller task failed: {}", e);
        }
    }
}

impl Poller {
    pub fn new(
        sessions: SessionStore,
        orchestrator: Arc<FetchOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            sessions,
            orchestrator,
            interval,
        }
    }

    pub fn spawn(self) -> PollerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            tracing::info!("Poller started (every {}s)", self.interval.as_secs());
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let polled = self.poll_once().await;
                        tracing::debug!("Poll round finished: {} session(s)", polled);
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Poller stopped");
        });

        PollerHandle { stop_tx, task }
    }

    /// Run one round; returns how many sessions were triggered.
    pub async fn poll_once(&self) -> usize {
        let registry = self.orchestrator.registry();
        let mut targets = Vec::new();
        for target in self
            .sessions
            .push_targets(self.orchestrator.default_region())
            .await
        {
            if registry.is_connected(&target.user_id).await {
                targets.push(target);
            }
        }

        let rounds = targets
            .iter()
            .map(|target| self.orchestrator.trigger(target, TriggerSource::Timer));
        join_all(rounds).await.len()
    }
}
