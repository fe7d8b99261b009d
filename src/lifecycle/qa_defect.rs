//! QA defect lifecycle service

use std::sync::Arc;

use crate::core::config::SlaPolicy;
use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::EntityId;
use crate::core::store::Repository;
use crate::core::workflow::validate_transition;
use crate::entities::qa_defect::{
    DefectSeverity, NewQaDefect, ProgressRecord, QaDefect, QaDefectPatch, QaDefectStatus,
    Reinspection,
};
use crate::lifecycle::events::{Assigned, BatchCreated, TransitionOrigin};
use crate::lifecycle::severity::{SeverityClassifier, StructuralFlagClassifier};
use crate::lifecycle::{require, Records, ServiceContext, Statistics, UpstreamFailure};

/// Creates QA defects and drives them through their workflow
pub struct QaDefectService {
    records: Records<QaDefect>,
    classifier: Arc<dyn SeverityClassifier<DefectSeverity>>,
    sla: SlaPolicy,
}

impl QaDefectService {
    pub fn new(repo: Arc<dyn Repository<QaDefect>>, ctx: ServiceContext, sla: SlaPolicy) -> Self {
        Self {
            records: Records::new(repo, ctx),
            classifier: Arc::new(StructuralFlagClassifier),
            sla,
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn SeverityClassifier<DefectSeverity>>,
    ) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn sla(&self) -> &SlaPolicy {
        &self.sla
    }

    pub async fn get(&self, id: &EntityId) -> LifecycleResult<QaDefect> {
        self.records.get(id).await
    }

    /// All defects of a blueprint, earliest deadline first
    pub async fn list(&self, blueprint_id: &str) -> LifecycleResult<Vec<QaDefect>> {
        let mut defects = self.records.list(blueprint_id).await?;
        defects.sort_by_key(|d| d.deadline);
        Ok(defects)
    }

    /// Create one defect in `open` with its SLA deadline
    pub async fn create(&self, data: NewQaDefect, actor: &str) -> LifecycleResult<QaDefect> {
        require("title", &data.title)?;
        require("blueprint_id", &data.blueprint_id)?;

        let severity = data.severity;
        let defect = QaDefect::new(data, &self.sla, actor, self.records.now())
            .ok_or_else(|| self.deadline_out_of_range(severity))?;
        let defect = self.records.insert(defect, actor).await?;
        self.records.emit_created(&defect, actor);
        Ok(defect)
    }

    /// One defect per failed inspection item, severity from structural flags
    pub async fn auto_create_from_inspection(
        &self,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<QaDefect>> {
        require("source_id", &payload.source_id)?;
        require("blueprint_id", &payload.blueprint_id)?;
        if payload.failed_items.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.records.now();
        let mut created = Vec::with_capacity(payload.failed_items.len());
        for item in &payload.failed_items {
            let data = NewQaDefect {
                blueprint_id: payload.blueprint_id.clone(),
                title: item.item_name.clone(),
                description: item.notes.clone(),
                location: item.location.clone(),
                severity: self.classifier.classify(item),
                inspection_id: Some(payload.source_id.clone()),
                photos: item.photos.clone(),
                ..Default::default()
            };
            let severity = data.severity;
            let defect = QaDefect::new(data, &self.sla, actor, now)
                .ok_or_else(|| self.deadline_out_of_range(severity))?;
            created.push(self.records.insert(defect, actor).await?);
        }

        tracing::info!(
            inspection_id = %payload.source_id,
            blueprint_id = %payload.blueprint_id,
            count = created.len(),
            "Auto-created QA defects"
        );
        self.records.emit(
            "batch_created",
            &BatchCreated {
                source: "inspection".to_string(),
                source_id: payload.source_id.clone(),
                entity_ids: created.iter().map(|d| d.id.clone()).collect(),
                actor: actor.to_string(),
            },
        );
        Ok(created)
    }

    /// Edit descriptive fields; status is left alone
    ///
    /// Changing the severity moves the deadline to creation time plus the
    /// new severity's SLA, so a downgrade can also clear an overdue flag.
    pub async fn update(
        &self,
        id: &EntityId,
        patch: QaDefectPatch,
        actor: &str,
    ) -> LifecycleResult<QaDefect> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        let severity = patch.severity;
        self.records
            .edit(id, actor, |defect, now| {
                defect
                    .apply_patch(patch, &self.sla, actor, now)
                    .ok_or_else(|| self.deadline_out_of_range(severity.unwrap_or(defect.severity)))
            })
            .await
    }

    fn deadline_out_of_range(&self, severity: DefectSeverity) -> LifecycleError {
        LifecycleError::Invalid(format!(
            "SLA of {} day(s) for {} defects puts the deadline out of range",
            severity.sla_days(&self.sla),
            severity
        ))
    }

    /// Hand the defect to someone
    ///
    /// An `open` defect moves to `assigned`; later statuses keep their
    /// status and only change hands.
    pub async fn assign(
        &self,
        id: &EntityId,
        assignee: &str,
        actor: &str,
    ) -> LifecycleResult<QaDefect> {
        require("assignee", assignee)?;
        let mut defect = self.records.get(id).await?;

        let defect = match defect.status {
            QaDefectStatus::Open => {
                let assignee = assignee.to_string();
                let by = actor.to_string();
                self.records
                    .transition_loaded(
                        defect,
                        QaDefectStatus::Assigned,
                        actor,
                        TransitionOrigin::Direct,
                        move |d, _| {
                            d.assignee = Some(assignee);
                            d.assigned_by = Some(by);
                            Ok(())
                        },
                    )
                    .await?
            }
            QaDefectStatus::Verified | QaDefectStatus::Closed => {
                return Err(LifecycleError::precondition(format!(
                    "{} is {}; nothing left to assign",
                    id, defect.status
                )));
            }
            _ => {
                defect.assignee = Some(assignee.to_string());
                defect.assigned_by = Some(actor.to_string());
                defect.audit.touch(actor, self.records.now());
                self.records.save(defect).await?
            }
        };

        tracing::info!(entity_id = %id, assignee, actor, "Assigned QA defect");
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

    pub async fn transition_status(
        &self,
        id: &EntityId,
        to: QaDefectStatus,
        actor: &str,
    ) -> LifecycleResult<QaDefect> {
        self.transition_with_origin(id, to, actor, TransitionOrigin::Direct)
            .await
    }

    pub async fn transition_with_origin(
        &self,
        id: &EntityId,
        to: QaDefectStatus,
        actor: &str,
        origin: TransitionOrigin,
    ) -> LifecycleResult<QaDefect> {
        self.records
            .transition(id, to, actor, origin, |_, _| Ok(()))
            .await
    }

    /// Append a resolution-progress report (percent clamped to 0..=100)
    pub async fn record_progress(
        &self,
        id: &EntityId,
        percent: i32,
        description: &str,
        photos: Vec<String>,
        actor: &str,
    ) -> LifecycleResult<QaDefect> {
        let mut defect = self.records.get(id).await?;
        if !matches!(
            defect.status,
            QaDefectStatus::Assigned | QaDefectStatus::InProgress
        ) {
            return Err(LifecycleError::precondition(format!(
                "progress can only be recorded while assigned or in progress ({} is {})",
                id, defect.status
            )));
        }

        let now = self.records.now();
        let percent = percent.clamp(0, 100) as u8;
        defect.metadata.progress.push(ProgressRecord {
            percent,
            description: description.to_string(),
            photos,
            recorded_by: actor.to_string(),
            recorded_at: now,
        });
        defect.audit.touch(actor, now);

        tracing::debug!(entity_id = %id, percent, actor, "Recorded progress");
        self.records.save(defect).await
    }

    /// Reinspect a resolved defect: pass goes to `verified`, fail back to work
    pub async fn record_reinspection(
        &self,
        id: &EntityId,
        passed: bool,
        inspector: &str,
        notes: Option<String>,
    ) -> LifecycleResult<QaDefect> {
        require("inspector", inspector)?;
        let to = if passed {
            QaDefectStatus::Verified
        } else {
            QaDefectStatus::InProgress
        };

        let defect = self.records.get(id).await?;
        if defect.status != QaDefectStatus::Resolved {
            // Report the edge the caller actually asked for
            validate_transition(defect.status, to)?;
            return Err(LifecycleError::precondition(format!(
                "only resolved defects can be reinspected ({} is {})",
                id, defect.status
            )));
        }

        let inspector_id = inspector.to_string();
        self.records
            .transition_loaded(
                defect,
                to,
                inspector,
                TransitionOrigin::Direct,
                move |d, now| {
                    d.metadata.reinspection_count += 1;
                    d.metadata.reinspections.push(Reinspection {
                        passed,
                        inspector: inspector_id,
                        notes,
                        inspected_at: now,
                    });
                    Ok(())
                },
            )
            .await
    }

    /// Defects of a blueprint past their deadline
    pub async fn overdue(&self, blueprint_id: &str) -> LifecycleResult<Vec<QaDefect>> {
        let now = self.records.now();
        let mut defects: Vec<QaDefect> = self
            .records
            .list(blueprint_id)
            .await?
            .into_iter()
            .filter(|d| d.is_overdue(now))
            .collect();
        defects.sort_by_key(|d| d.deadline);
        Ok(defects)
    }

    /// Delete a defect that is still `open` and was never escalated
    pub async fn delete(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        let defect = self.records.deletable(id).await?;
        if let Some(issue_id) = &defect.linked_issue_id {
            return Err(LifecycleError::NotDeletable {
                id: id.to_string(),
                reason: format!("it is linked to issue {}", issue_id),
            });
        }
        self.records.remove(id, actor).await
    }

    pub async fn statistics(&self, blueprint_id: &str) -> LifecycleResult<Statistics> {
        let now = self.records.now();
        let mut stats = Statistics::default();
        for defect in self.records.list(blueprint_id).await? {
            let open = !matches!(
                defect.status,
                QaDefectStatus::Verified | QaDefectStatus::Closed
            );
            stats.record(
                defect.status.to_string(),
                Some(defect.severity.to_string()),
                open,
                defect.is_overdue(now),
            );
        }
        Ok(stats)
    }

    /// Persist a defect the synchronizer modified (link fields only)
    pub(crate) async fn save_link(&self, defect: QaDefect) -> LifecycleResult<QaDefect> {
        self.records.save(defect).await
    }

    pub(crate) fn emit<T: serde::Serialize>(&self, action: &str, payload: &T) {
        self.records.emit(action, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Clock;
    use crate::core::store::MemoryStore;
    use crate::lifecycle::testing::{failure, Harness};
    use chrono::Duration;

    fn service(h: &Harness) -> QaDefectService {
        QaDefectService::new(
            Arc::new(MemoryStore::<QaDefect>::new()),
            h.ctx(),
            SlaPolicy::default(),
        )
    }

    fn new_defect(severity: DefectSeverity) -> NewQaDefect {
        NewQaDefect {
            blueprint_id: "BP-1".to_string(),
            title: "Exposed rebar".to_string(),
            severity,
            ..Default::default()
        }
    }

    async fn resolved(svc: &QaDefectService) -> QaDefect {
        let d = svc
            .create(new_defect(DefectSeverity::Medium), "qa")
            .await
            .unwrap();
        svc.assign(&d.id, "crew", "qa").await.unwrap();
        svc.transition_status(&d.id, QaDefectStatus::InProgress, "crew")
            .await
            .unwrap();
        svc.transition_status(&d.id, QaDefectStatus::Resolved, "crew")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_deadline_uses_clock() {
        let h = Harness::new();
        let svc = service(&h);
        let critical = svc
            .create(new_defect(DefectSeverity::Critical), "qa")
            .await
            .unwrap();
        let low = svc.create(new_defect(DefectSeverity::Low), "qa").await.unwrap();
        assert_eq!(critical.deadline, h.clock.now() + Duration::days(3));
        assert_eq!(low.deadline, critical.audit.created_at + Duration::days(14));
    }

    #[tokio::test]
    async fn test_inspection_fan_out_uses_flags() {
        let h = Harness::new();
        let svc = service(&h);
        let mut payload = failure("INSP-4", &["Beam B2", "Roof drain", "Paint"]);
        payload.failed_items[0].is_structural = true;
        payload.failed_items[1].is_waterproofing = true;

        let defects = svc
            .auto_create_from_inspection(&payload, "insp-1")
            .await
            .unwrap();
        let severities: Vec<_> = defects.iter().map(|d| d.severity).collect();
        assert_eq!(
            severities,
            vec![
                DefectSeverity::Critical,
                DefectSeverity::High,
                DefectSeverity::Medium
            ]
        );
        assert!(defects
            .iter()
            .all(|d| d.inspection_id.as_deref() == Some("INSP-4")));
        assert_eq!(h.event_types(), vec!["qa_defect.batch_created"]);
    }

    #[tokio::test]
    async fn test_assign_moves_open_to_assigned() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc
            .create(new_defect(DefectSeverity::Medium), "qa")
            .await
            .unwrap();

        let assigned = svc.assign(&d.id, "crew-1", "qa").await.unwrap();
        assert_eq!(assigned.status, QaDefectStatus::Assigned);
        assert_eq!(assigned.assignee.as_deref(), Some("crew-1"));

        let reassigned = svc.assign(&d.id, "crew-2", "qa").await.unwrap();
        assert_eq!(reassigned.status, QaDefectStatus::Assigned);
        assert_eq!(reassigned.assignee.as_deref(), Some("crew-2"));

        assert_eq!(
            h.event_types(),
            vec![
                "qa_defect.created",
                "qa_defect.status_changed",
                "qa_defect.assigned",
                "qa_defect.assigned"
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_is_terminal() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc
            .create(new_defect(DefectSeverity::Low), "qa")
            .await
            .unwrap();
        svc.transition_status(&d.id, QaDefectStatus::Closed, "qa")
            .await
            .unwrap();
        let err = svc
            .transition_status(&d.id, QaDefectStatus::Open, "qa")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_progress_is_clamped() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc
            .create(new_defect(DefectSeverity::Medium), "qa")
            .await
            .unwrap();
        assert!(svc
            .record_progress(&d.id, 10, "not started", vec![], "crew")
            .await
            .is_err());

        svc.assign(&d.id, "crew", "qa").await.unwrap();
        svc.record_progress(&d.id, -5, "mobilised", vec![], "crew")
            .await
            .unwrap();
        let d = svc
            .record_progress(&d.id, 150, "done", vec!["after.jpg".into()], "crew")
            .await
            .unwrap();
        let percents: Vec<u8> = d.metadata.progress.iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![0, 100]);
        assert_eq!(d.metadata.latest_percent(), Some(100));
    }

    #[tokio::test]
    async fn test_reinspection_outcomes() {
        let h = Harness::new();
        let svc = service(&h);

        let d = resolved(&svc).await;
        let failed = svc
            .record_reinspection(&d.id, false, "insp-2", Some("gap remains".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, QaDefectStatus::InProgress);
        assert!(failed.resolved_at.is_none());
        assert_eq!(failed.metadata.reinspection_count, 1);

        svc.transition_status(&d.id, QaDefectStatus::Resolved, "crew")
            .await
            .unwrap();
        let passed = svc
            .record_reinspection(&d.id, true, "insp-2", None)
            .await
            .unwrap();
        assert_eq!(passed.status, QaDefectStatus::Verified);
        assert_eq!(passed.metadata.reinspection_count, 2);
        assert!(passed.verified_at.is_some());
    }

    #[tokio::test]
    async fn test_reinspection_requires_resolved() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc
            .create(new_defect(DefectSeverity::Medium), "qa")
            .await
            .unwrap();
        let err = svc
            .record_reinspection(&d.id, true, "insp", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_overdue_excludes_verified() {
        let h = Harness::new();
        let svc = service(&h);
        let late = svc
            .create(new_defect(DefectSeverity::Critical), "qa")
            .await
            .unwrap();
        let done = resolved(&svc).await;
        svc.record_reinspection(&done.id, true, "insp", None)
            .await
            .unwrap();

        h.clock.advance(Duration::days(30));
        let overdue = svc.overdue("BP-1").await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, late.id);

        let stats = svc.statistics("BP-1").await.unwrap();
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.open, 1);
    }

    #[tokio::test]
    async fn test_update_severity_recomputes_deadline() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc.create(new_defect(DefectSeverity::Low), "qa").await.unwrap();
        h.clock.advance(Duration::days(5));
        assert!(!d.is_overdue(h.clock.now()));

        let raised = svc
            .update(
                &d.id,
                QaDefectPatch {
                    severity: Some(DefectSeverity::Critical),
                    ..Default::default()
                },
                "qa-lead",
            )
            .await
            .unwrap();
        assert_eq!(raised.severity, DefectSeverity::Critical);
        assert_eq!(raised.deadline, d.audit.created_at + Duration::days(3));
        assert_eq!(raised.status, QaDefectStatus::Open);
        assert!(raised.is_overdue(h.clock.now()));
        assert!(raised.should_auto_create_issue());
        assert_eq!(
            h.event_types().last().map(String::as_str),
            Some("qa_defect.updated")
        );
    }

    #[tokio::test]
    async fn test_out_of_range_sla_is_invalid_not_a_panic() {
        let h = Harness::new();
        let svc = QaDefectService::new(
            Arc::new(MemoryStore::<QaDefect>::new()),
            h.ctx(),
            SlaPolicy {
                critical: 1_000_000_000,
                ..SlaPolicy::default()
            },
        );
        let err = svc
            .create(new_defect(DefectSeverity::Critical), "qa")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Invalid(_)));

        let d = svc.create(new_defect(DefectSeverity::Low), "qa").await.unwrap();
        let err = svc
            .update(
                &d.id,
                QaDefectPatch {
                    severity: Some(DefectSeverity::Critical),
                    ..Default::default()
                },
                "qa",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Invalid(_)));
        assert_eq!(svc.get(&d.id).await.unwrap().severity, DefectSeverity::Low);
    }

    #[tokio::test]
    async fn test_linked_defect_is_not_deletable() {
        let h = Harness::new();
        let svc = service(&h);
        let d = svc.create(new_defect(DefectSeverity::Critical), "qa").await.unwrap();
        let mut linked = svc.get(&d.id).await.unwrap();
        linked.linked_issue_id = Some(EntityId::new(crate::core::identity::EntityPrefix::Iss));
        svc.save_link(linked).await.unwrap();

        let err = svc.delete(&d.id, "qa").await.unwrap_err();
        assert!(matches!(err, LifecycleError::NotDeletable { .. }));
        assert!(svc.get(&d.id).await.is_ok());

        let plain = svc.create(new_defect(DefectSeverity::Low), "qa").await.unwrap();
        svc.delete(&plain.id, "qa").await.unwrap();
    }
}
