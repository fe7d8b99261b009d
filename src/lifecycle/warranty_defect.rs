//! Warranty defect (claim) lifecycle service

use std::sync::Arc;

use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::store::Repository;
use crate::entities::qa_defect::DefectSeverity;
use crate::entities::warranty::Warranty;
use crate::entities::warranty_defect::{
    NewWarrantyDefect, WarrantyDefect, WarrantyDefectPatch, WarrantyDefectStatus,
};
use crate::lifecycle::events::{Assigned, BatchCreated, TransitionOrigin};
use crate::lifecycle::severity::{SeverityClassifier, StructuralFlagClassifier};
use crate::lifecycle::{require, Records, ServiceContext, Statistics, UpstreamFailure};

/// Takes claims against warranties and drives them to closure
pub struct WarrantyDefectService {
    records: Records<WarrantyDefect>,
    warranties: Arc<dyn Repository<Warranty>>,
    classifier: Arc<dyn SeverityClassifier<DefectSeverity>>,
}

impl WarrantyDefectService {
    pub fn new(
        repo: Arc<dyn Repository<WarrantyDefect>>,
        warranties: Arc<dyn Repository<Warranty>>,
        ctx: ServiceContext,
    ) -> Self {
        Self {
            records: Records::new(repo, ctx),
            warranties,
            classifier: Arc::new(StructuralFlagClassifier),
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn SeverityClassifier<DefectSeverity>>,
    ) -> Self {
        self.classifier = classifier;
        self
    }

    pub async fn get(&self, id: &EntityId) -> LifecycleResult<WarrantyDefect> {
        self.records.get(id).await
    }

    /// Claims under one warranty, oldest first
    pub async fn list(&self, warranty_id: &EntityId) -> LifecycleResult<Vec<WarrantyDefect>> {
        let mut defects = self.records.list(&warranty_id.to_string()).await?;
        defects.sort_by_key(|d| d.audit.created_at);
        Ok(defects)
    }

    /// Load the warranty and make sure it still takes claims
    async fn claimable(&self, warranty_id: &EntityId) -> LifecycleResult<Warranty> {
        if warranty_id.prefix() != EntityPrefix::Wty {
            return Err(LifecycleError::Invalid(format!(
                "{} is not a warranty id",
                warranty_id
            )));
        }
        let warranty = self
            .records
            .ctx()
            .store(self.warranties.get_by_id(warranty_id))
            .await?
            .ok_or_else(|| LifecycleError::not_found(EntityPrefix::Wty, warranty_id))?;
        if !warranty.status.accepts_claims() {
            return Err(LifecycleError::precondition(format!(
                "warranty {} is {}; claims need an active or expiring warranty",
                warranty.warranty_number, warranty.status
            )));
        }
        Ok(warranty)
    }

    /// Report a claim against a live warranty
    pub async fn report(
        &self,
        warranty_id: &EntityId,
        data: NewWarrantyDefect,
        actor: &str,
    ) -> LifecycleResult<WarrantyDefect> {
        require("title", &data.title)?;
        let warranty = self.claimable(warranty_id).await?;

        let defect = WarrantyDefect::new(
            warranty.id,
            warranty.blueprint_id,
            data,
            actor,
            self.records.now(),
        );
        let defect = self.records.insert(defect, actor).await?;
        self.records.emit_created(&defect, actor);
        Ok(defect)
    }

    /// One claim per item of an owner complaint
    pub async fn auto_create_from_complaint(
        &self,
        warranty_id: &EntityId,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<WarrantyDefect>> {
        require("source_id", &payload.source_id)?;
        let warranty = self.claimable(warranty_id).await?;
        if payload.failed_items.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.records.now();
        let mut created = Vec::with_capacity(payload.failed_items.len());
        for item in &payload.failed_items {
            let data = NewWarrantyDefect {
                title: item.item_name.clone(),
                description: item.notes.clone(),
                location: item.location.clone(),
                severity: self.classifier.classify(item),
                reporter: payload.inspector_id.clone(),
                photos: item.photos.clone(),
                ..Default::default()
            };
            let defect = WarrantyDefect::new(
                warranty.id.clone(),
                warranty.blueprint_id.clone(),
                data,
                actor,
                now,
            );
            created.push(self.records.insert(defect, actor).await?);
        }

        tracing::info!(
            complaint_id = %payload.source_id,
            warranty_id = %warranty.id,
            count = created.len(),
            "Auto-created warranty defects"
        );
        self.records.emit(
            "batch_created",
            &BatchCreated {
                source: "complaint".to_string(),
                source_id: payload.source_id.clone(),
                entity_ids: created.iter().map(|d| d.id.clone()).collect(),
                actor: actor.to_string(),
            },
        );
        Ok(created)
    }

    /// Change who handles the claim; status is unchanged
    pub async fn assign(
        &self,
        id: &EntityId,
        assignee: &str,
        actor: &str,
    ) -> LifecycleResult<WarrantyDefect> {
        require("assignee", assignee)?;
        let mut defect = self.records.get(id).await?;
        if !defect.status.is_open() {
            return Err(LifecycleError::precondition(format!(
                "{} is {}; nothing left to assign",
                id, defect.status
            )));
        }
        defect.assignee = Some(assignee.to_string());
        defect.audit.touch(actor, self.records.now());
        let defect = self.records.save(defect).await?;

        tracing::info!(entity_id = %id, assignee, actor, "Assigned warranty defect");
        self.records.emit(
            "assigned",
            &Assigned {
                entity_id: id.clone(),
                assignee: assignee.to_string(),
                actor: actor.to_string(),
            },
        );
        Ok(defect)
    }

    /// Edit descriptive fields; status is left alone
    pub async fn update(
        &self,
        id: &EntityId,
        patch: WarrantyDefectPatch,
        actor: &str,
    ) -> LifecycleResult<WarrantyDefect> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        self.records
            .edit(id, actor, |defect, now| Ok(defect.apply_patch(patch, actor, now)))
            .await
    }

    pub async fn confirm(&self, id: &EntityId, actor: &str) -> LifecycleResult<WarrantyDefect> {
        self.transition_status(id, WarrantyDefectStatus::Confirmed, actor)
            .await
    }

    pub async fn reject(
        &self,
        id: &EntityId,
        reason: &str,
        actor: &str,
    ) -> LifecycleResult<WarrantyDefect> {
        require("reason", reason)?;
        let reason = reason.to_string();
        self.records
            .transition(
                id,
                WarrantyDefectStatus::Rejected,
                actor,
                TransitionOrigin::Direct,
                move |d, _| {
                    d.rejection_reason = Some(reason);
                    Ok(())
                },
            )
            .await
    }

    pub async fn transition_status(
        &self,
        id: &EntityId,
        to: WarrantyDefectStatus,
        actor: &str,
    ) -> LifecycleResult<WarrantyDefect> {
        self.transition_with_origin(id, to, actor, TransitionOrigin::Direct)
            .await
    }

    pub async fn transition_with_origin(
        &self,
        id: &EntityId,
        to: WarrantyDefectStatus,
        actor: &str,
        origin: TransitionOrigin,
    ) -> LifecycleResult<WarrantyDefect> {
        self.records
            .transition(id, to, actor, origin, |_, _| Ok(()))
            .await
    }

    /// Delete a claim that is still `reported` and has no issue or repair
    ///
    /// Returns the removed claim so the caller can adjust the warranty's
    /// counters.
    pub async fn delete(&self, id: &EntityId, actor: &str) -> LifecycleResult<WarrantyDefect> {
        let defect = self.records.deletable(id).await?;
        let link = match (&defect.issue_id, &defect.repair_id) {
            (Some(issue_id), _) => Some(format!("it is linked to issue {}", issue_id)),
            (None, Some(repair_id)) => Some(format!("it has repair {}", repair_id)),
            (None, None) => None,
        };
        if let Some(reason) = link {
            return Err(LifecycleError::NotDeletable {
                id: id.to_string(),
                reason,
            });
        }
        self.records.remove(id, actor).await?;
        Ok(defect)
    }

    /// Counts for the claims under one warranty
    pub async fn statistics(&self, warranty_id: &EntityId) -> LifecycleResult<Statistics> {
        let mut stats = Statistics::default();
        for defect in self.records.list(&warranty_id.to_string()).await? {
            stats.record(
                defect.status.to_string(),
                Some(defect.severity.to_string()),
                defect.status.is_open(),
                false,
            );
        }
        Ok(stats)
    }

    /// Persist link fields set by the repair service or the synchronizer
    pub(crate) async fn save_link(&self, defect: WarrantyDefect) -> LifecycleResult<WarrantyDefect> {
        self.records.save(defect).await
    }

    pub(crate) fn emit<T: serde::Serialize>(&self, action: &str, payload: &T) {
        self.records.emit(action, payload)
    }
}
