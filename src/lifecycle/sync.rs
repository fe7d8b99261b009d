//! Cross-entity synchronizer
//!
//! Keeps linked records consistent: escalates critical defects into
//! issues, propagates status changes across the defect/issue link and up
//! the repair → warranty defect → issue chain, and maintains the warranty
//! counters.
//!
//! Every propagation reports what it did. A missing link or an unmappable
//! status is a [`SyncSkipped`] reason, never a silent no-op. Changes
//! applied here are tagged [`TransitionOrigin::Sync`] with the kind of the
//! triggering entity; QA defect ↔ issue propagation refuses to bounce a
//! change back to the side it came from.

use std::sync::Arc;

use serde::Serialize;

use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::can_transition;
use crate::entities::issue::{Issue, IssueSource, IssueStatus, NewIssue};
use crate::entities::qa_defect::{QaDefect, QaDefectStatus};
use crate::entities::repair::{Repair, RepairStatus};
use crate::entities::warranty::Warranty;
use crate::entities::warranty_defect::{WarrantyDefect, WarrantyDefectStatus};
use crate::lifecycle::events::{Escalated, TransitionOrigin};
use crate::lifecycle::issue::IssueService;
use crate::lifecycle::qa_defect::QaDefectService;
use crate::lifecycle::repair::RepairService;
use crate::lifecycle::warranty::WarrantyService;
use crate::lifecycle::warranty_defect::WarrantyDefectService;

/// Why a propagation did nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SyncSkipped {
    /// The source record has no link to follow
    NoLink,
    /// The link points at a record that no longer exists
    LinkedEntityMissing { id: String },
    /// The source status has no counterpart on the other side
    NoEquivalentStatus { status: String },
    /// The linked record is already there
    AlreadyInStatus { status: String },
    /// The change was itself propagated from the other side
    OriginIsSync,
    /// The linked record cannot take that edge from where it is
    TransitionRejected { from: String, to: String },
}

impl SyncSkipped {
    /// Skips that point at inconsistent data rather than a normal no-op
    pub fn is_anomaly(&self) -> bool {
        matches!(
            self,
            SyncSkipped::LinkedEntityMissing { .. } | SyncSkipped::TransitionRejected { .. }
        )
    }
}

impl std::fmt::Display for SyncSkipped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncSkipped::NoLink => write!(f, "no linked record"),
            SyncSkipped::LinkedEntityMissing { id } => write!(f, "linked record {} is missing", id),
            SyncSkipped::NoEquivalentStatus { status } => {
                write!(f, "status '{}' has no linked equivalent", status)
            }
            SyncSkipped::AlreadyInStatus { status } => {
                write!(f, "linked record already '{}'", status)
            }
            SyncSkipped::OriginIsSync => write!(f, "change was propagated from the linked side"),
            SyncSkipped::TransitionRejected { from, to } => {
                write!(f, "linked record cannot move {} → {}", from, to)
            }
        }
    }
}

/// Result of one synchronization step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Applied { target: EntityId, detail: String },
    Skipped(SyncSkipped),
}

impl SyncOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, SyncOutcome::Applied { .. })
    }
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOutcome::Applied { target, detail } => write!(f, "{}: {}", target, detail),
            SyncOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// Counter values before and after a reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterReconciliation {
    pub warranty_id: EntityId,
    pub defects_before: u32,
    pub defects_after: u32,
    pub repairs_before: u32,
    pub repairs_after: u32,
}

impl CounterReconciliation {
    pub fn drifted(&self) -> bool {
        self.defects_before != self.defects_after || self.repairs_before != self.repairs_after
    }
}

/// QA defect status → issue status
pub fn qa_defect_to_issue(status: QaDefectStatus) -> Option<IssueStatus> {
    match status {
        QaDefectStatus::InProgress => Some(IssueStatus::InProgress),
        QaDefectStatus::Resolved => Some(IssueStatus::Resolved),
        QaDefectStatus::Verified => Some(IssueStatus::Verified),
        QaDefectStatus::Closed => Some(IssueStatus::Closed),
        QaDefectStatus::Open | QaDefectStatus::Assigned => None,
    }
}

/// Issue status → QA defect status
pub fn issue_to_qa_defect(status: IssueStatus) -> Option<QaDefectStatus> {
    match status {
        IssueStatus::InProgress => Some(QaDefectStatus::InProgress),
        IssueStatus::Resolved => Some(QaDefectStatus::Resolved),
        IssueStatus::Verified => Some(QaDefectStatus::Verified),
        IssueStatus::Closed => Some(QaDefectStatus::Closed),
        IssueStatus::Open => None,
    }
}

/// Warranty defect status → issue status
pub fn warranty_defect_to_issue(status: WarrantyDefectStatus) -> Option<IssueStatus> {
    match status {
        WarrantyDefectStatus::UnderRepair => Some(IssueStatus::InProgress),
        WarrantyDefectStatus::Repaired => Some(IssueStatus::Resolved),
        WarrantyDefectStatus::Verified => Some(IssueStatus::Verified),
        WarrantyDefectStatus::Closed => Some(IssueStatus::Closed),
        WarrantyDefectStatus::Reported
        | WarrantyDefectStatus::Confirmed
        | WarrantyDefectStatus::Rejected => None,
    }
}

/// Repair status → warranty defect status
pub fn repair_to_warranty_defect(status: RepairStatus) -> Option<WarrantyDefectStatus> {
    match status {
        RepairStatus::InProgress | RepairStatus::Failed => Some(WarrantyDefectStatus::UnderRepair),
        RepairStatus::Completed => Some(WarrantyDefectStatus::Repaired),
        RepairStatus::Verified => Some(WarrantyDefectStatus::Verified),
        RepairStatus::Pending | RepairStatus::Scheduled | RepairStatus::Cancelled => None,
    }
}

fn skipped(reason: SyncSkipped) -> SyncOutcome {
    SyncOutcome::Skipped(reason)
}

/// Treat a dangling link as a skip instead of an error
fn missing_as_skip<T>(result: LifecycleResult<T>) -> LifecycleResult<Result<T, SyncOutcome>> {
    match result {
        Ok(entity) => Ok(Ok(entity)),
        Err(LifecycleError::NotFound { id, .. }) => {
            Ok(Err(skipped(SyncSkipped::LinkedEntityMissing { id })))
        }
        Err(e) => Err(e),
    }
}

pub struct Synchronizer {
    issues: Arc<IssueService>,
    qa_defects: Arc<QaDefectService>,
    warranties: Arc<WarrantyService>,
    warranty_defects: Arc<WarrantyDefectService>,
    repairs: Arc<RepairService>,
}

impl Synchronizer {
    pub fn new(
        issues: Arc<IssueService>,
        qa_defects: Arc<QaDefectService>,
        warranties: Arc<WarrantyService>,
        warranty_defects: Arc<WarrantyDefectService>,
        repairs: Arc<RepairService>,
    ) -> Self {
        Self {
            issues,
            qa_defects,
            warranties,
            warranty_defects,
            repairs,
        }
    }

    /// Create an issue from a QA defect and link the two
    ///
    /// Fails with `AlreadyLinked` when the defect already has an issue.
    /// If the link cannot be saved, the new issue is removed again.
    pub async fn escalate_qa_defect(&self, defect_id: &EntityId, actor: &str) -> LifecycleResult<Issue> {
        let mut defect = self.qa_defects.get(defect_id).await?;
        if let Some(issue_id) = &defect.linked_issue_id {
            return Err(LifecycleError::AlreadyLinked {
                defect_id: defect_id.to_string(),
                issue_id: issue_id.to_string(),
            });
        }

        let issue = self
            .issues
            .create(
                NewIssue {
                    blueprint_id: defect.blueprint_id.clone(),
                    title: defect.title.clone(),
                    description: defect.description.clone(),
                    location: defect.location.clone(),
                    severity: defect.severity.issue_severity(),
                    priority: Some(defect.severity.priority()),
                    category: defect.category.clone(),
                    source: IssueSource::Qc,
                    source_id: Some(defect.id.to_string()),
                    photos_before: defect.photos.clone(),
                    ..Default::default()
                },
                actor,
            )
            .await?;

        defect.linked_issue_id = Some(issue.id.clone());
        defect.metadata.linked_issue_number = Some(issue.issue_number());
        defect.audit.touch(actor, self.now());
        if let Err(e) = self.qa_defects.save_link(defect).await {
            self.undo_escalation(&issue, actor).await;
            return Err(e);
        }

        tracing::info!(
            defect_id = %defect_id,
            issue_id = %issue.id,
            issue_number = %issue.issue_number(),
            actor,
            "Escalated QA defect"
        );
        self.qa_defects.emit(
            "escalated",
            &Escalated {
                defect_id: defect_id.clone(),
                issue_id: issue.id.clone(),
                issue_number: issue.issue_number(),
                actor: actor.to_string(),
            },
        );
        Ok(issue)
    }

    /// Create an issue from a warranty defect and link the two
    pub async fn escalate_warranty_defect(
        &self,
        defect_id: &EntityId,
        actor: &str,
    ) -> LifecycleResult<Issue> {
        let mut defect = self.warranty_defects.get(defect_id).await?;
        if let Some(issue_id) = &defect.issue_id {
            return Err(LifecycleError::AlreadyLinked {
                defect_id: defect_id.to_string(),
                issue_id: issue_id.to_string(),
            });
        }

        let issue = self
            .issues
            .create(
                NewIssue {
                    blueprint_id: defect.blueprint_id.clone(),
                    title: defect.title.clone(),
                    description: defect.description.clone(),
                    location: defect.location.clone(),
                    severity: defect.severity.issue_severity(),
                    priority: Some(defect.severity.priority()),
                    category: defect.category.clone(),
                    source: IssueSource::Warranty,
                    source_id: Some(defect.id.to_string()),
                    photos_before: defect.photos.clone(),
                    ..Default::default()
                },
                actor,
            )
            .await?;

        defect.issue_id = Some(issue.id.clone());
        defect.issue_number = Some(issue.issue_number());
        defect.audit.touch(actor, self.now());
        if let Err(e) = self.warranty_defects.save_link(defect).await {
            self.undo_escalation(&issue, actor).await;
            return Err(e);
        }

        tracing::info!(
            defect_id = %defect_id,
            issue_id = %issue.id,
            actor,
            "Escalated warranty defect"
        );
        self.warranty_defects.emit(
            "escalated",
            &Escalated {
                defect_id: defect_id.clone(),
                issue_id: issue.id.clone(),
                issue_number: issue.issue_number(),
                actor: actor.to_string(),
            },
        );
        Ok(issue)
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.warranties.now()
    }

    async fn undo_escalation(&self, issue: &Issue, actor: &str) {
        match self.issues.discard(&issue.id, actor).await {
            Ok(()) => tracing::warn!(issue_id = %issue.id, "Rolled back escalated issue"),
            Err(e) => tracing::error!(
                issue_id = %issue.id,
                error = %e,
                "Failed to roll back escalated issue; it is left unlinked"
            ),
        }
    }

    /// Push a QA defect's status onto its linked issue
    pub async fn propagate_qa_defect(
        &self,
        defect: &QaDefect,
        origin: TransitionOrigin,
        actor: &str,
    ) -> LifecycleResult<SyncOutcome> {
        if origin.is_sync_from(EntityPrefix::Iss) {
            return Ok(self.report(&defect.id, skipped(SyncSkipped::OriginIsSync)));
        }
        let Some(issue_id) = &defect.linked_issue_id else {
            return Ok(self.report(&defect.id, skipped(SyncSkipped::NoLink)));
        };
        let Some(to) = qa_defect_to_issue(defect.status) else {
            return Ok(self.report(
                &defect.id,
                skipped(SyncSkipped::NoEquivalentStatus {
                    status: defect.status.to_string(),
                }),
            ));
        };
        let issue = match missing_as_skip(self.issues.get(issue_id).await)? {
            Ok(issue) => issue,
            Err(outcome) => return Ok(self.report(&defect.id, outcome)),
        };
        let outcome = self
            .move_issue(issue, to, actor, EntityPrefix::Qad)
            .await?;
        Ok(self.report(&defect.id, outcome))
    }

    /// Push an issue's status back onto the QA defect it was escalated from
    pub async fn propagate_issue(
        &self,
        issue: &Issue,
        origin: TransitionOrigin,
        actor: &str,
    ) -> LifecycleResult<SyncOutcome> {
        if origin.is_sync_from(EntityPrefix::Qad) {
            return Ok(self.report(&issue.id, skipped(SyncSkipped::OriginIsSync)));
        }
        let defect_id = match (&issue.source, issue.source_id.as_deref()) {
            (IssueSource::Qc, Some(source)) => EntityId::parse_as(source, EntityPrefix::Qad).ok(),
            _ => None,
        };
        let Some(defect_id) = defect_id else {
            return Ok(self.report(&issue.id, skipped(SyncSkipped::NoLink)));
        };
        let Some(to) = issue_to_qa_defect(issue.status) else {
            return Ok(self.report(
                &issue.id,
                skipped(SyncSkipped::NoEquivalentStatus {
                    status: issue.status.to_string(),
                }),
            ));
        };
        let defect = match missing_as_skip(self.qa_defects.get(&defect_id).await)? {
            Ok(defect) => defect,
            Err(outcome) => return Ok(self.report(&issue.id, outcome)),
        };
        // The defect must point back at this issue for the link to count
        if defect.linked_issue_id.as_ref() != Some(&issue.id) {
            return Ok(self.report(&issue.id, skipped(SyncSkipped::NoLink)));
        }

        let from = defect.status;
        let outcome = if from == to {
            skipped(SyncSkipped::AlreadyInStatus {
                status: to.to_string(),
            })
        } else if !can_transition(from, to) {
            skipped(SyncSkipped::TransitionRejected {
                from: from.to_string(),
                to: to.to_string(),
            })
        } else {
            let moved = self
                .qa_defects
                .transition_with_origin(&defect.id, to, actor, TransitionOrigin::Sync(EntityPrefix::Iss))
                .await?;
            SyncOutcome::Applied {
                target: moved.id,
                detail: format!("{} → {}", from, to),
            }
        };
        Ok(self.report(&issue.id, outcome))
    }

    /// Push a warranty defect's status onto its escalated issue
    pub async fn propagate_warranty_defect(
        &self,
        defect: &WarrantyDefect,
        origin: TransitionOrigin,
        actor: &str,
    ) -> LifecycleResult<SyncOutcome> {
        if origin.is_sync_from(EntityPrefix::Iss) {
            return Ok(self.report(&defect.id, skipped(SyncSkipped::OriginIsSync)));
        }
        let Some(issue_id) = &defect.issue_id else {
            return Ok(self.report(&defect.id, skipped(SyncSkipped::NoLink)));
        };
        let Some(to) = warranty_defect_to_issue(defect.status) else {
            return Ok(self.report(
                &defect.id,
                skipped(SyncSkipped::NoEquivalentStatus {
                    status: defect.status.to_string(),
                }),
            ));
        };
        let issue = match missing_as_skip(self.issues.get(issue_id).await)? {
            Ok(issue) => issue,
            Err(outcome) => return Ok(self.report(&defect.id, outcome)),
        };
        let outcome = self
            .move_issue(issue, to, actor, EntityPrefix::Wdf)
            .await?;
        Ok(self.report(&defect.id, outcome))
    }

    /// Push a repair's status onto the warranty defect it works on
    ///
    /// Returns the outcome and, when applied, the updated defect so the
    /// caller can continue up the chain.
    pub async fn propagate_repair(
        &self,
        repair: &Repair,
        actor: &str,
    ) -> LifecycleResult<(SyncOutcome, Option<WarrantyDefect>)> {
        let Some(to) = repair_to_warranty_defect(repair.status) else {
            let outcome = skipped(SyncSkipped::NoEquivalentStatus {
                status: repair.status.to_string(),
            });
            return Ok((self.report(&repair.id, outcome), None));
        };
        let defect = match missing_as_skip(self.warranty_defects.get(&repair.defect_id).await)? {
            Ok(defect) => defect,
            Err(outcome) => return Ok((self.report(&repair.id, outcome), None)),
        };
        if defect.repair_id.as_ref() != Some(&repair.id) {
            return Ok((self.report(&repair.id, skipped(SyncSkipped::NoLink)), None));
        }

        let from = defect.status;
        if from == to {
            let outcome = skipped(SyncSkipped::AlreadyInStatus {
                status: to.to_string(),
            });
            return Ok((self.report(&repair.id, outcome), None));
        }
        if !can_transition(from, to) {
            let outcome = skipped(SyncSkipped::TransitionRejected {
                from: from.to_string(),
                to: to.to_string(),
            });
            return Ok((self.report(&repair.id, outcome), None));
        }

        let moved = self
            .warranty_defects
            .transition_with_origin(&defect.id, to, actor, TransitionOrigin::Sync(EntityPrefix::Rep))
            .await?;
        let outcome = SyncOutcome::Applied {
            target: moved.id.clone(),
            detail: format!("{} → {}", from, to),
        };
        Ok((self.report(&repair.id, outcome), Some(moved)))
    }

    async fn move_issue(
        &self,
        issue: Issue,
        to: IssueStatus,
        actor: &str,
        trigger: EntityPrefix,
    ) -> LifecycleResult<SyncOutcome> {
        let from = issue.status;
        if from == to {
            return Ok(skipped(SyncSkipped::AlreadyInStatus {
                status: to.to_string(),
            }));
        }
        if !can_transition(from, to) {
            return Ok(skipped(SyncSkipped::TransitionRejected {
                from: from.to_string(),
                to: to.to_string(),
            }));
        }
        let moved = self
            .issues
            .transition_with_origin(&issue.id, to, actor, TransitionOrigin::Sync(trigger))
            .await?;
        Ok(SyncOutcome::Applied {
            target: moved.id,
            detail: format!("{} → {}", from, to),
        })
    }

    fn report(&self, source: &EntityId, outcome: SyncOutcome) -> SyncOutcome {
        match &outcome {
            SyncOutcome::Applied { target, detail } => {
                tracing::info!(source_id = %source, target_id = %target, %detail, "Synchronized");
            }
            SyncOutcome::Skipped(reason) if reason.is_anomaly() => {
                tracing::warn!(source_id = %source, %reason, "Sync skipped");
            }
            SyncOutcome::Skipped(reason) => {
                tracing::debug!(source_id = %source, %reason, "Sync skipped");
            }
        }
        outcome
    }

    /// Count a newly reported claim on its warranty
    pub async fn on_defect_reported(
        &self,
        defect: &WarrantyDefect,
        actor: &str,
    ) -> LifecycleResult<SyncOutcome> {
        let warranty = self
            .warranties
            .update_counters(&defect.warranty_id, actor, |w| {
                w.defect_count = w.defect_count.saturating_add(1)
            })
            .await?;
        Ok(SyncOutcome::Applied {
            target: warranty.id,
            detail: format!("defect_count = {}", warranty.defect_count),
        })
    }

    /// Count a newly opened repair on its warranty
    pub async fn on_repair_created(&self, repair: &Repair, actor: &str) -> LifecycleResult<SyncOutcome> {
        let warranty = self
            .warranties
            .update_counters(&repair.warranty_id, actor, |w| {
                w.repair_count = w.repair_count.saturating_add(1)
            })
            .await?;
        Ok(SyncOutcome::Applied {
            target: warranty.id,
            detail: format!("repair_count = {}", warranty.repair_count),
        })
    }

    /// Uncount a deleted claim
    pub async fn on_defect_deleted(
        &self,
        defect: &WarrantyDefect,
        actor: &str,
    ) -> LifecycleResult<SyncOutcome> {
        let warranty = self
            .warranties
            .update_counters(&defect.warranty_id, actor, |w| {
                w.defect_count = w.defect_count.saturating_sub(1)
            })
            .await?;
        Ok(SyncOutcome::Applied {
            target: warranty.id,
            detail: format!("defect_count = {}", warranty.defect_count),
        })
    }

    /// Uncount a deleted repair
    pub async fn on_repair_deleted(&self, repair: &Repair, actor: &str) -> LifecycleResult<SyncOutcome> {
        let warranty = self
            .warranties
            .update_counters(&repair.warranty_id, actor, |w| {
                w.repair_count = w.repair_count.saturating_sub(1)
            })
            .await?;
        Ok(SyncOutcome::Applied {
            target: warranty.id,
            detail: format!("repair_count = {}", warranty.repair_count),
        })
    }

    /// Recompute both counters from the live child records
    pub async fn reconcile_counters(
        &self,
        warranty_id: &EntityId,
        actor: &str,
    ) -> LifecycleResult<CounterReconciliation> {
        let warranty: Warranty = self.warranties.get(warranty_id).await?;
        let defects = self.warranty_defects.list(warranty_id).await?;
        let mut repairs = 0usize;
        for defect in &defects {
            repairs += self.repairs.list(&defect.id).await?.len();
        }

        let result = CounterReconciliation {
            warranty_id: warranty_id.clone(),
            defects_before: warranty.defect_count,
            defects_after: u32::try_from(defects.len()).unwrap_or(u32::MAX),
            repairs_before: warranty.repair_count,
            repairs_after: u32::try_from(repairs).unwrap_or(u32::MAX),
        };

        if result.drifted() {
            tracing::warn!(
                warranty_id = %warranty_id,
                defects_before = result.defects_before,
                defects_after = result.defects_after,
                repairs_before = result.repairs_before,
                repairs_after = result.repairs_after,
                "Warranty counters drifted; correcting"
            );
            let (defect_count, repair_count) = (result.defects_after, result.repairs_after);
            self.warranties
                .update_counters(warranty_id, actor, move |w| {
                    w.defect_count = defect_count;
                    w.repair_count = repair_count;
                })
                .await?;
        } else {
            tracing::debug!(warranty_id = %warranty_id, "Warranty counters consistent");
        }
        Ok(result)
    }
}
