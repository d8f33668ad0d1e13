// Fetch-and-Push Orchestrator
//
// One trigger = one device read for one session, followed by a push of the
// result to that session's channel. HTTP requests and the background poller
// both go through `FetchOrchestrator::trigger`.

use crate::error::GatewayError;
use crate::protocol::PushFrame;
use crate::registry::{ConnectionRegistry, Delivery};
use chrono::{DateTime, Utc};
use ewerelay_api::{DeviceFilter, DeviceState, DeviceStateSource, FetchError, FetchErrorKind};
use ewerelay_session::{PushTarget, Session};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What caused a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Request,
    Timer,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Request => write!(f, "request"),
            TriggerSource::Timer => write!(f, "timer"),
        }
    }
}

#[derive(Debug)]
pub struct TriggerOutcome {
    pub result: Result<DeviceState, FetchError>,
    pub delivery: Delivery,
}

/// Latest fetch outcome recorded for a user identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum LatestEntry {
    State(DeviceState),
    Failed {
        kind: FetchErrorKind,
        message: String,
        at: DateTime<Utc>,
    },
}

/// Most recent result per user identifier, backing `GET /api/data`.
#[derive(Clone, Default)]
pub struct LatestStore {
    entries: Arc<RwLock<HashMap<String, LatestEntry>>>,
}

impl LatestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, user_id: &str, result: &Result<DeviceState, FetchError>) {
        let entry = match result {
            Ok(state) => LatestEntry::State(state.clone()),
            Err(err) => LatestEntry::Failed {
                kind: err.kind(),
                message: err.to_string(),
                at: Utc::now(),
            },
        };
        self.entries
            .write()
            .await
            .insert(user_id.to_string(), entry);
    }

    pub async fn get(&self, user_id: &str) -> Option<LatestEntry> {
        self.entries.read().await.get(user_id).cloned()
    }

    pub async fn remove(&self, user_id: &str) -> bool {
        self.entries.write().await.remove(user_id).is_some()
    }
}

pub struct FetchOrchestrator {
    source: Arc<dyn DeviceStateSource>,
    filter: DeviceFilter,
    registry: ConnectionRegistry,
    latest: LatestStore,
    default_region: String,
}

impl FetchOrchestrator {
    pub fn new(
        source: Arc<dyn DeviceStateSource>,
        filter: DeviceFilter,
        registry: ConnectionRegistry,
        default_region: String,
    ) -> Self {
        Self {
            source,
            filter,
            registry,
            latest: LatestStore::new(),
            default_region,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn latest(&self) -> &LatestStore {
        &self.latest
    }

    pub fn default_region(&self) -> &str {
        &self.default_region
    }

    /// Check trigger preconditions for a request's session.
    ///
    /// A missing token is `AuthenticationRequired`; a token without a user
    /// identifier means no push channel was ever opened.
    pub fn target_for(&self, session: Option<&Session>) -> Result<PushTarget, GatewayError> {
        let session = session.ok_or(GatewayError::AuthenticationRequired)?;
        if !session.is_authenticated() {
            return Err(GatewayError::AuthenticationRequired);
        }
        session
            .push_target(&self.default_region)
            .ok_or(GatewayError::NoRecipient)
    }

    /// Fetch, then push the result to the target's channel.
    pub async fn trigger(&self, target: &PushTarget, source: TriggerSource) -> TriggerOutcome {
        tracing::debug!(
            "Fetch triggered by {} for user {} (region {})",
            source,
            target.user_id,
            target.region
        );

        let result = self
            .source
            .fetch_device_state(&target.access_token, &target.region, &self.filter)
            .await;

        if let Err(e) = &result {
            tracing::warn!("Device fetch for user {} failed: {}", target.user_id, e);
        }

        let frame = PushFrame::from_result(&result);
        let delivery = self.registry.send_to(&target.user_id, frame).await;
        if delivery == Delivery::NoRecipient {
            tracing::warn!(
                "No push channel for user {}; {} result dropped",
                target.user_id,
                source
            );
        }

        self.latest.record(&target.user_id, &result).await;

        TriggerOutcome { result, delivery }
    }
}
