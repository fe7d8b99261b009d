//! Issue lifecycle service

use std::sync::Arc;

use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::store::{Repository, Sequences};
use crate::entities::issue::{
    Issue, IssuePatch, IssueSeverity, IssueSource, IssueStatus, NewIssue, Resolution,
    Verification, VerificationResult,
};
use crate::lifecycle::events::{Assigned, BatchCreated, TransitionOrigin};
use crate::lifecycle::severity::{KeywordClassifier, SeverityClassifier};
use crate::lifecycle::{require, Records, ServiceContext, Statistics, UpstreamFailure};

/// Creates issues and drives them through their workflow
pub struct IssueService {
    records: Records<Issue>,
    sequences: Arc<dyn Sequences>,
    classifier: Arc<dyn SeverityClassifier<IssueSeverity>>,
}

impl IssueService {
    pub fn new(
        repo: Arc<dyn Repository<Issue>>,
        sequences: Arc<dyn Sequences>,
        ctx: ServiceContext,
    ) -> Self {
        Self {
            records: Records::new(repo, ctx),
            sequences,
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }

    /// Replace the free-text severity heuristic used by auto-creation
    pub fn with_classifier(mut self, classifier: Arc<dyn SeverityClassifier<IssueSeverity>>) -> Self {
        self.classifier = classifier;
        self
    }

    pub async fn get(&self, id: &EntityId) -> LifecycleResult<Issue> {
        self.records.get(id).await
    }

    /// All issues of a blueprint, by sequence number
    pub async fn list(&self, blueprint_id: &str) -> LifecycleResult<Vec<Issue>> {
        let mut issues = self.records.list(blueprint_id).await?;
        issues.sort_by_key(|i| i.sequence);
        Ok(issues)
    }

    /// Reserve the next issue number of a blueprint
    ///
    /// Numbers come from the blueprint's counter, so concurrent creates
    /// never share one and a deleted issue's number is not handed out
    /// again. Issues stored before the counter existed lift it past their
    /// highest number.
    async fn next_sequence(&self, blueprint_id: &str) -> LifecycleResult<u32> {
        let floor = self
            .records
            .list(blueprint_id)
            .await?
            .iter()
            .map(|i| i.sequence)
            .max()
            .unwrap_or(0);
        let scope = format!("{}/{}", EntityPrefix::Iss, blueprint_id);
        self.records
            .ctx()
            .store(self.sequences.next(&scope, floor))
            .await
    }

    /// Create one issue in `open`
    pub async fn create(&self, data: NewIssue, actor: &str) -> LifecycleResult<Issue> {
        require("title", &data.title)?;
        require("blueprint_id", &data.blueprint_id)?;

        let sequence = self.next_sequence(&data.blueprint_id).await?;
        let issue = Issue::new(data, sequence, actor, self.records.now());
        let issue = self.records.insert(issue, actor).await?;
        self.records.emit_created(&issue, actor);
        Ok(issue)
    }

    /// One issue per failed item, all sharing `source` and the upstream id
    ///
    /// Publishes a single `issue.batch_created` for the whole batch.
    pub async fn auto_create_from(
        &self,
        source: IssueSource,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Issue>> {
        if source == IssueSource::Manual {
            return Err(LifecycleError::Invalid(
                "auto-creation needs an upstream source, not manual".to_string(),
            ));
        }
        require("source_id", &payload.source_id)?;
        require("blueprint_id", &payload.blueprint_id)?;
        if payload.failed_items.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.records.now();
        let mut created = Vec::with_capacity(payload.failed_items.len());

        for item in &payload.failed_items {
            let sequence = self.next_sequence(&payload.blueprint_id).await?;
            let data = NewIssue {
                blueprint_id: payload.blueprint_id.clone(),
                title: item.item_name.clone(),
                description: item.notes.clone(),
                location: item.location.clone(),
                severity: self.classifier.classify(item),
                responsible_party: payload.contractor_id.clone(),
                source,
                source_id: Some(payload.source_id.clone()),
                photos_before: item.photos.clone(),
                ..Default::default()
            };
            let issue = Issue::new(data, sequence, actor, now);
            created.push(self.records.insert(issue, actor).await?);
        }

        tracing::info!(
            %source,
            source_id = %payload.source_id,
            blueprint_id = %payload.blueprint_id,
            count = created.len(),
            "Auto-created issues"
        );
        self.records.emit(
            "batch_created",
            &BatchCreated {
                source: source.to_string(),
                source_id: payload.source_id.clone(),
                entity_ids: created.iter().map(|i| i.id.clone()).collect(),
                actor: actor.to_string(),
            },
        );
        Ok(created)
    }

    pub async fn auto_create_from_acceptance(
        &self,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Issue>> {
        self.auto_create_from(IssueSource::Acceptance, payload, actor)
            .await
    }

    pub async fn auto_create_from_qc(
        &self,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Issue>> {
        self.auto_create_from(IssueSource::Qc, payload, actor).await
    }

    pub async fn auto_create_from_safety(
        &self,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Issue>> {
        self.auto_create_from(IssueSource::Safety, payload, actor)
            .await
    }

    /// Edit descriptive fields; status is left alone
    pub async fn update(&self, id: &EntityId, patch: IssuePatch, actor: &str) -> LifecycleResult<Issue> {
        if let Some(title) = &patch.title {
            require("title", title)?;
        }
        self.records
            .edit(id, actor, |issue, now| Ok(issue.apply_patch(patch, actor, now)))
            .await
    }

    /// Set the assignee; status is left alone
    pub async fn assign(&self, id: &EntityId, assignee: &str, actor: &str) -> LifecycleResult<Issue> {
        require("assignee", assignee)?;
        let mut issue = self.records.get(id).await?;
        if issue.status == IssueStatus::Closed {
            return Err(LifecycleError::precondition(format!(
                "{} is closed; reopen it before assigning",
                issue.issue_number()
            )));
        }

        issue.assignee = Some(assignee.to_string());
        issue.assigned_by = Some(actor.to_string());
        issue.audit.touch(actor, self.records.now());
        let issue = self.records.save(issue).await?;

        tracing::info!(entity_id = %id, assignee, actor, "Assigned issue");
        self.records.emit(
            "assigned",
            &Assigned {
                entity_id: id.clone(),
                assignee: assignee.to_string(),
                actor: actor.to_string(),
            },
        );
        Ok(issue)
    }

    pub async fn transition_status(
        &self,
        id: &EntityId,
        to: IssueStatus,
        actor: &str,
    ) -> LifecycleResult<Issue> {
        self.transition_with_origin(id, to, actor, TransitionOrigin::Direct)
            .await
    }

    pub async fn transition_with_origin(
        &self,
        id: &EntityId,
        to: IssueStatus,
        actor: &str,
        origin: TransitionOrigin,
    ) -> LifecycleResult<Issue> {
        self.records
            .transition(id, to, actor, origin, |_, _| Ok(()))
            .await
    }

    /// Record how the issue was fixed and move it to `resolved`
    pub async fn resolve(
        &self,
        id: &EntityId,
        resolution: Resolution,
        actor: &str,
    ) -> LifecycleResult<Issue> {
        require("resolution method", &resolution.method)?;
        self.records
            .transition(
                id,
                IssueStatus::Resolved,
                actor,
                TransitionOrigin::Direct,
                |issue, _| {
                    issue.resolution = Some(resolution);
                    // A new resolution needs a new verification
                    issue.verification = None;
                    Ok(())
                },
            )
            .await
    }

    /// Check a resolution: pass goes to `verified`, fail back to `in_progress`
    pub async fn verify(
        &self,
        id: &EntityId,
        verification: Verification,
        actor: &str,
    ) -> LifecycleResult<Issue> {
        let issue = self.records.get(id).await?;
        if issue.resolution.is_none() {
            return Err(LifecycleError::precondition(format!(
                "{} has no resolution to verify",
                issue.issue_number()
            )));
        }

        let to = match verification.result {
            VerificationResult::Pass => IssueStatus::Verified,
            VerificationResult::Fail => IssueStatus::InProgress,
        };
        self.records
            .transition_loaded(issue, to, actor, TransitionOrigin::Direct, |issue, _| {
                issue.verification = Some(verification);
                Ok(())
            })
            .await
    }

    pub async fn close(&self, id: &EntityId, actor: &str) -> LifecycleResult<Issue> {
        self.transition_status(id, IssueStatus::Closed, actor).await
    }

    pub async fn reopen(&self, id: &EntityId, actor: &str) -> LifecycleResult<Issue> {
        self.transition_status(id, IssueStatus::Open, actor).await
    }

    /// Delete an issue that is still `open`
    ///
    /// An issue escalated from a QA defect or warranty defect stays, since
    /// the defect keeps pointing at it.
    pub async fn delete(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        let issue = self.records.deletable(id).await?;
        if let Some(defect_id) = escalated_from(&issue) {
            return Err(LifecycleError::NotDeletable {
                id: issue.issue_number(),
                reason: format!("it was escalated from {}", defect_id),
            });
        }
        self.records.remove(id, actor).await
    }

    /// Drop an escalated issue whose defect link could not be written
    pub(crate) async fn discard(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.records.deletable(id).await?;
        self.records.remove(id, actor).await
    }

    pub async fn statistics(&self, blueprint_id: &str) -> LifecycleResult<Statistics> {
        let mut stats = Statistics::default();
        for issue in self.records.list(blueprint_id).await? {
            let open = !matches!(issue.status, IssueStatus::Verified | IssueStatus::Closed);
            stats.record(
                issue.status.to_string(),
                Some(issue.severity.to_string()),
                open,
                false,
            );
        }
        Ok(stats)
    }
}

/// The defect an issue was escalated from, if any
fn escalated_from(issue: &Issue) -> Option<EntityId> {
    let id = EntityId::parse(issue.source_id.as_deref()?).ok()?;
    matches!(id.prefix(), EntityPrefix::Qad | EntityPrefix::Wdf).then_some(id)
}
