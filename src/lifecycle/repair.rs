//! Repair work-order lifecycle service

use std::sync::Arc;

use chrono::NaiveDate;

use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::store::Repository;
use crate::core::workflow::validate_transition;
use crate::entities::repair::{Completion, NewRepair, Repair, RepairStatus, RepairVerification};
use crate::entities::warranty_defect::{WarrantyDefect, WarrantyDefectStatus};
use crate::lifecycle::events::{Assigned, TransitionOrigin};
use crate::lifecycle::{require, Records, ServiceContext, Statistics};

/// Opens repair work orders against confirmed claims
pub struct RepairService {
    records: Records<Repair>,
    defects: Arc<dyn Repository<WarrantyDefect>>,
}

impl RepairService {
    pub fn new(
        repo: Arc<dyn Repository<Repair>>,
        defects: Arc<dyn Repository<WarrantyDefect>>,
        ctx: ServiceContext,
    ) -> Self {
        Self {
            records: Records::new(repo, ctx),
            defects,
        }
    }

    pub async fn get(&self, id: &EntityId) -> LifecycleResult<Repair> {
        self.records.get(id).await
    }

    /// Every repair attempted for a defect, oldest first
    pub async fn list(&self, defect_id: &EntityId) -> LifecycleResult<Vec<Repair>> {
        let mut repairs = self.records.list(&defect_id.to_string()).await?;
        repairs.sort_by_key(|r| r.audit.created_at);
        Ok(repairs)
    }

    async fn load_defect(&self, defect_id: &EntityId) -> LifecycleResult<WarrantyDefect> {
        if defect_id.prefix() != EntityPrefix::Wdf {
            return Err(LifecycleError::Invalid(format!(
                "{} is not a warranty defect id",
                defect_id
            )));
        }
        self.records
            .ctx()
            .store(self.defects.get_by_id(defect_id))
            .await?
            .ok_or_else(|| LifecycleError::not_found(EntityPrefix::Wdf, defect_id))
    }

    /// Open a repair for a confirmed defect and link it from the defect
    ///
    /// At most one repair per defect may be active at a time.
    pub async fn create(
        &self,
        defect_id: &EntityId,
        data: NewRepair,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        require("description", &data.description)?;
        let mut defect = self.load_defect(defect_id).await?;
        if !matches!(
            defect.status,
            WarrantyDefectStatus::Confirmed | WarrantyDefectStatus::UnderRepair
        ) {
            return Err(LifecycleError::precondition(format!(
                "{} is {}; repairs need a confirmed defect",
                defect_id, defect.status
            )));
        }
        let existing = self.records.list(&defect_id.to_string()).await?;
        if let Some(active) = existing.iter().find(|r| r.status.is_active()) {
            return Err(LifecycleError::precondition(format!(
                "{} already has active repair {} ({})",
                defect_id, active.id, active.status
            )));
        }

        let now = self.records.now();
        let repair = Repair::new(
            defect.id.clone(),
            defect.warranty_id.clone(),
            defect.blueprint_id.clone(),
            data,
            actor,
            now,
        );
        let repair = self.records.insert(repair, actor).await?;

        defect.repair_id = Some(repair.id.clone());
        defect.audit.touch(actor, now);
        if let Err(e) = self.records.ctx().store(self.defects.update(defect)).await {
            // Don't leave an unlinked work order behind
            if let Err(undo) = self.records.remove(&repair.id, actor).await {
                tracing::warn!(entity_id = %repair.id, error = %undo, "Failed to roll back repair");
            }
            return Err(e);
        }

        self.records.emit_created(&repair, actor);
        Ok(repair)
    }

    /// Put workers on the job
    pub async fn assign(
        &self,
        id: &EntityId,
        workers: Vec<String>,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        if workers.iter().all(|w| w.trim().is_empty()) {
            return Err(LifecycleError::Invalid("workers must not be empty".into()));
        }
        let mut repair = self.records.get(id).await?;
        if !repair.status.is_active() {
            return Err(LifecycleError::precondition(format!(
                "{} is {}; nothing left to assign",
                id, repair.status
            )));
        }
        let assignee = workers.join(",");
        repair.workers = workers;
        repair.audit.touch(actor, self.records.now());
        let repair = self.records.save(repair).await?;

        tracing::info!(entity_id = %id, workers = %assignee, actor, "Assigned repair");
        self.records.emit(
            "assigned",
            &Assigned {
                entity_id: id.clone(),
                assignee,
                actor: actor.to_string(),
            },
        );
        Ok(repair)
    }

    pub async fn schedule(
        &self,
        id: &EntityId,
        date: NaiveDate,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        self.records
            .transition(
                id,
                RepairStatus::Scheduled,
                actor,
                TransitionOrigin::Direct,
                move |r, _| {
                    r.scheduled_date = Some(date);
                    Ok(())
                },
            )
            .await
    }

    pub async fn start(&self, id: &EntityId, actor: &str) -> LifecycleResult<Repair> {
        self.transition_status(id, RepairStatus::InProgress, actor)
            .await
    }

    /// Record the completion report and move to `completed`
    pub async fn complete(
        &self,
        id: &EntityId,
        completion: Completion,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        if matches!(completion.cost, Some(c) if c < 0.0) {
            return Err(LifecycleError::Invalid("cost must not be negative".into()));
        }
        self.records
            .transition(
                id,
                RepairStatus::Completed,
                actor,
                TransitionOrigin::Direct,
                move |r, _| {
                    if completion.cost.is_some() {
                        r.cost = completion.cost;
                    }
                    r.completion = Some(completion);
                    Ok(())
                },
            )
            .await
    }

    /// Inspect a completed repair: pass goes to `verified`, fail to `failed`
    pub async fn verify(
        &self,
        id: &EntityId,
        passed: bool,
        notes: Option<String>,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        let to = if passed {
            RepairStatus::Verified
        } else {
            RepairStatus::Failed
        };
        let repair = self.records.get(id).await?;
        validate_transition(repair.status, to)?;

        let verifier = actor.to_string();
        self.records
            .transition_loaded(repair, to, actor, TransitionOrigin::Direct, move |r, now| {
                r.verification = Some(RepairVerification {
                    passed,
                    verifier,
                    notes,
                    verified_at: now,
                });
                Ok(())
            })
            .await
    }

    pub async fn cancel(&self, id: &EntityId, reason: &str, actor: &str) -> LifecycleResult<Repair> {
        require("reason", reason)?;
        let reason = reason.to_string();
        self.records
            .transition(
                id,
                RepairStatus::Cancelled,
                actor,
                TransitionOrigin::Direct,
                move |r, _| {
                    r.cancel_reason = Some(reason);
                    Ok(())
                },
            )
            .await
    }

    pub async fn transition_status(
        &self,
        id: &EntityId,
        to: RepairStatus,
        actor: &str,
    ) -> LifecycleResult<Repair> {
        self.transition_with_origin(id, to, actor, TransitionOrigin::Direct)
            .await
    }

    pub async fn transition_with_origin(
        &self,
        id: &EntityId,
        to: RepairStatus,
        actor: &str,
        origin: TransitionOrigin,
    ) -> LifecycleResult<Repair> {
        self.records
            .transition(id, to, actor, origin, |_, _| Ok(()))
            .await
    }

    /// Delete a repair that is still `pending`
    ///
    /// The defect's current-repair link falls back to its latest remaining
    /// repair, or is cleared. Returns the removed repair so the caller can
    /// adjust the warranty's counters.
    pub async fn delete(&self, id: &EntityId, actor: &str) -> LifecycleResult<Repair> {
        let repair = self.records.deletable(id).await?;
        let mut defect = self.load_defect(&repair.defect_id).await?;

        let relink = if defect.repair_id.as_ref() == Some(id) {
            let fallback = self
                .list(&repair.defect_id)
                .await?
                .into_iter()
                .filter(|r| &r.id != id)
                .last()
                .map(|r| r.id);
            defect.repair_id = fallback;
            defect.audit.touch(actor, self.records.now());
            Some(self.records.ctx().store(self.defects.update(defect)).await?)
        } else {
            None
        };

        if let Err(e) = self.records.remove(id, actor).await {
            if let Some(mut restored) = relink {
                restored.repair_id = Some(id.clone());
                if let Err(undo) = self.records.ctx().store(self.defects.update(restored)).await {
                    tracing::warn!(entity_id = %repair.defect_id, error = %undo, "Failed to restore repair link");
                }
            }
            return Err(e);
        }
        Ok(repair)
    }

    /// Counts for the repairs of one defect
    pub async fn statistics(&self, defect_id: &EntityId) -> LifecycleResult<Statistics> {
        let mut stats = Statistics::default();
        for repair in self.records.list(&defect_id.to_string()).await? {
            stats.record(repair.status.to_string(), None, repair.status.is_active(), false);
        }
        Ok(stats)
    }
}
