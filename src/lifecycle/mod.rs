//! Lifecycle services, cross-entity synchronization and scheduling
//!
//! Each service owns one entity type. Status only changes through a
//! service's transition methods, which validate the edge, stamp the
//! status-dependent fields, persist with a version check and publish a
//! `<kind>.status_changed` event, in that order. A rejected edge aborts
//! before anything is written.

pub mod engine;
pub mod events;
pub mod issue;
pub mod qa_defect;
pub mod repair;
pub mod scheduler;
pub mod severity;
pub mod sync;
pub mod warranty;
pub mod warranty_defect;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::bus::{emit_json, MessageBus};
use crate::core::clock::Clock;
use crate::core::entity::Entity;
use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::EntityId;
use crate::core::store::{bounded, Repository, StoreResult};
use crate::core::workflow::{validate_transition, Lifecycle};

pub use engine::{BlueprintStatus, Engine, Repositories, Synced};
pub use events::TransitionOrigin;
pub use issue::IssueService;
pub use qa_defect::QaDefectService;
pub use repair::RepairService;
pub use scheduler::{SweepOutcome, SweepReport, WarrantySweeper};
pub use sync::{CounterReconciliation, SyncOutcome, SyncSkipped, Synchronizer};
pub use warranty::WarrantyService;
pub use warranty_defect::WarrantyDefectService;

/// One failed check from an upstream inspection or acceptance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub item_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,

    #[serde(default)]
    pub is_structural: bool,

    #[serde(default)]
    pub is_safety: bool,

    #[serde(default)]
    pub is_waterproofing: bool,

    #[serde(default)]
    pub is_electrical: bool,
}

/// Payload of an upstream failure event (acceptance, QC, safety, inspection)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamFailure {
    pub source_id: String,

    pub blueprint_id: String,

    #[serde(default)]
    pub failed_items: Vec<FailedItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contractor_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspector_id: Option<String>,
}

/// Counts for one parent aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub by_severity: BTreeMap<String, usize>,
    /// Records still needing work
    pub open: usize,
    pub overdue: usize,
}

impl Statistics {
    pub fn record(&mut self, status: String, severity: Option<String>, open: bool, overdue: bool) {
        self.total += 1;
        *self.by_status.entry(status).or_default() += 1;
        if let Some(severity) = severity {
            *self.by_severity.entry(severity).or_default() += 1;
        }
        if open {
            self.open += 1;
        }
        if overdue {
            self.overdue += 1;
        }
    }

    /// Fold another aggregate's counts into this one
    pub fn merge(&mut self, other: Statistics) {
        self.total += other.total;
        for (status, n) in other.by_status {
            *self.by_status.entry(status).or_default() += n;
        }
        for (severity, n) in other.by_severity {
            *self.by_severity.entry(severity).or_default() += n;
        }
        self.open += other.open;
        self.overdue += other.overdue;
    }
}

/// Shared collaborators handed to every service
#[derive(Clone)]
pub struct ServiceContext {
    bus: Arc<dyn MessageBus>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
    undelivered: Arc<AtomicU64>,
}

impl ServiceContext {
    pub fn new(bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>, store_timeout: Duration) -> Self {
        Self {
            bus,
            clock,
            store_timeout,
            undelivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store call under the configured deadline
    pub async fn store<T, F>(&self, fut: F) -> LifecycleResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        Ok(bounded(self.store_timeout, fut).await?)
    }

    /// Publish an event after the write it describes has committed
    ///
    /// A bus failure never undoes or fails the mutation. It is logged and
    /// counted in [`undelivered_events`](Self::undelivered_events).
    pub fn emit<T: Serialize>(&self, event_type: &str, payload: &T, source: &str) {
        if let Err(e) = emit_json(self.bus.as_ref(), event_type, payload, source) {
            let total = self.undelivered.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(event_type, source, error = %e, undelivered = total, "Event not delivered");
        }
    }

    /// Events dropped because the bus refused them, since startup
    pub fn undelivered_events(&self) -> u64 {
        self.undelivered.load(Ordering::Relaxed)
    }
}

/// Typed persistence plus the shared transition path for one entity kind
pub(crate) struct Records<E: Entity> {
    repo: Arc<dyn Repository<E>>,
    ctx: ServiceContext,
}

impl<E: Entity> Records<E> {
    pub(crate) fn new(repo: Arc<dyn Repository<E>>, ctx: ServiceContext) -> Self {
        Self { repo, ctx }
    }

    pub(crate) fn ctx(&self) -> &ServiceContext {
        &self.ctx
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.ctx.now()
    }

    pub(crate) async fn find(&self, id: &EntityId) -> LifecycleResult<Option<E>> {
        tracing::debug!(entity_id = %id, "Loading");
        self.ctx.store(self.repo.get_by_id(id)).await
    }

    pub(crate) async fn get(&self, id: &EntityId) -> LifecycleResult<E> {
        if id.prefix() != E::PREFIX {
            return Err(LifecycleError::Invalid(format!(
                "{} is not a {} id",
                id,
                E::PREFIX.kind()
            )));
        }
        self.find(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found(E::PREFIX, id))
    }

    pub(crate) async fn list(&self, parent_id: &str) -> LifecycleResult<Vec<E>> {
        self.ctx.store(self.repo.find_by_parent(parent_id)).await
    }

    pub(crate) async fn with_status(
        &self,
        parent_id: &str,
        statuses: &[E::Status],
    ) -> LifecycleResult<Vec<E>> {
        self.ctx
            .store(self.repo.find_by_status(parent_id, statuses))
            .await
    }

    pub(crate) async fn insert(&self, entity: E, actor: &str) -> LifecycleResult<E> {
        let created = self.ctx.store(self.repo.create(entity)).await?;
        tracing::info!(
            entity_id = %created.id(),
            parent_id = %created.parent_id(),
            actor,
            "Created {}",
            E::PREFIX.kind()
        );
        Ok(created)
    }

    pub(crate) async fn save(&self, entity: E) -> LifecycleResult<E> {
        self.ctx.store(self.repo.update(entity)).await
    }

    /// Validate, prepare, stamp, persist and publish one status change
    ///
    /// `prepare` runs after validation and before the status is applied;
    /// an error from it aborts the change.
    pub(crate) async fn transition<F>(
        &self,
        id: &EntityId,
        to: E::Status,
        actor: &str,
        origin: TransitionOrigin,
        prepare: F,
    ) -> LifecycleResult<E>
    where
        F: FnOnce(&mut E, DateTime<Utc>) -> LifecycleResult<()>,
    {
        let entity = self.get(id).await?;
        self.transition_loaded(entity, to, actor, origin, prepare)
            .await
    }

    /// [`transition`](Self::transition) for an entity the caller already loaded
    pub(crate) async fn transition_loaded<F>(
        &self,
        mut entity: E,
        to: E::Status,
        actor: &str,
        origin: TransitionOrigin,
        prepare: F,
    ) -> LifecycleResult<E>
    where
        F: FnOnce(&mut E, DateTime<Utc>) -> LifecycleResult<()>,
    {
        let from = entity.status();
        validate_transition(from, to)?;

        let now = self.now();
        prepare(&mut entity, now)?;
        entity.apply_status(to, actor, now);
        let saved = self.save(entity).await?;

        tracing::info!(
            entity_id = %saved.id(),
            %from,
            %to,
            actor,
            %origin,
            "Status changed"
        );
        self.emit(
            "status_changed",
            &events::StatusChanged {
                entity_id: saved.id().clone(),
                previous_status: from.to_string(),
                new_status: to.to_string(),
                actor: actor.to_string(),
                origin,
            },
        );
        Ok(saved)
    }

    /// Change non-status fields, persist with a version check, publish `<kind>.updated`
    ///
    /// `change` returns the names of the fields it changed. An edit that
    /// changes nothing is neither written nor published.
    pub(crate) async fn edit<F>(&self, id: &EntityId, actor: &str, change: F) -> LifecycleResult<E>
    where
        F: FnOnce(&mut E, DateTime<Utc>) -> LifecycleResult<Vec<&'static str>>,
    {
        let mut entity = self.get(id).await?;
        let fields = change(&mut entity, self.now())?;
        if fields.is_empty() {
            return Ok(entity);
        }
        let saved = self.save(entity).await?;

        tracing::info!(entity_id = %id, ?fields, actor, "Updated {}", E::PREFIX.kind());
        self.emit(
            "updated",
            &events::Updated {
                entity_id: id.clone(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
                actor: actor.to_string(),
            },
        );
        Ok(saved)
    }

    /// Load a record for deletion; it must never have left its initial status
    pub(crate) async fn deletable(&self, id: &EntityId) -> LifecycleResult<E> {
        let entity = self.get(id).await?;
        if entity.status() != E::Status::initial() {
            return Err(LifecycleError::NotDeletable {
                id: id.to_string(),
                reason: format!(
                    "status is '{}'; only records still '{}' can be deleted",
                    entity.status(),
                    E::Status::initial()
                ),
            });
        }
        Ok(entity)
    }

    /// Delete a record; link checks are the caller's job
    pub(crate) async fn remove(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.ctx.store(self.repo.delete(id)).await?;
        tracing::info!(entity_id = %id, actor, "Deleted {}", E::PREFIX.kind());
        Ok(())
    }

    /// Remove a record that never left its initial status
    pub(crate) async fn delete_pristine(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.deletable(id).await?;
        self.remove(id, actor).await
    }

    pub(crate) fn emit<T: Serialize>(&self, action: &str, payload: &T) {
        let kind = E::PREFIX.kind();
        self.ctx.emit(
            &format!("{}.{}", kind, action),
            payload,
            &format!("lifecycle.{}", kind),
        )
    }

    pub(crate) fn emit_created(&self, entity: &E, actor: &str) {
        self.emit(
            "created",
            &events::Created {
                entity_id: entity.id().clone(),
                parent_id: entity.parent_id(),
                actor: actor.to_string(),
            },
        )
    }
}

/// Reject blank free-text fields that the data model requires
pub(crate) fn require(field: &str, value: &str) -> LifecycleResult<()> {
    if value.trim().is_empty() {
        return Err(LifecycleError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for service tests

    use super::*;
    use crate::core::bus::{LocalBus, Subscribe, ALL_EVENTS};
    use crate::core::clock::FixedClock;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    pub struct Harness {
        pub bus: LocalBus,
        pub clock: Arc<FixedClock>,
        pub events: Arc<Mutex<Vec<crate::core::bus::BusEvent>>>,
    }

    impl Harness {
        pub fn new() -> Self {
            let bus = LocalBus::new();
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&events);
            // Leaked subscription lives as long as the bus
            let _ = bus.on(ALL_EVENTS, move |e| {
                sink.lock().push(e.clone());
                Ok(())
            });
            let clock = Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
            ));
            Self { bus, clock, events }
        }

        pub fn ctx(&self) -> ServiceContext {
            ServiceContext::new(
                Arc::new(self.bus.clone()),
                self.clock.clone(),
                Duration::from_secs(5),
            )
        }

        pub fn event_types(&self) -> Vec<String> {
            self.events
                .lock()
                .iter()
                .map(|e| e.event_type.clone())
                .collect()
        }
    }

    pub fn failure(source_id: &str, items: &[&str]) -> UpstreamFailure {
        UpstreamFailure {
            source_id: source_id.to_string(),
            blueprint_id: "BP-1".to_string(),
            failed_items: items
                .iter()
                .map(|name| FailedItem {
                    item_name: name.to_string(),
                    ..Default::default()
                })
                .collect(),
            contractor_id: Some("CTR-9".to_string()),
            inspector_id: Some("insp-1".to_string()),
        }
    }
}
