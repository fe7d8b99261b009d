//! Engine wiring and the synchronized facade
//!
//! [`Engine::new`] assembles the five services, the synchronizer and the
//! sweeper by hand over one set of repositories. The facade methods run an
//! operation and then the synchronization it implies, returning both the
//! updated record and every [`SyncOutcome`]. The services stay usable on
//! their own for callers that want to drive synchronization themselves.

use std::sync::Arc;

use serde::Serialize;

use crate::core::bus::MessageBus;
use crate::core::clock::Clock;
use crate::core::config::Config;
use crate::core::error::LifecycleResult;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::sqlite::SqliteStore;
use crate::core::store::{MemorySequences, MemoryStore, Repository, Sequences};
use crate::entities::issue::{Issue, IssuePatch, IssueStatus, Resolution, Verification};
use crate::entities::qa_defect::{NewQaDefect, QaDefect, QaDefectPatch, QaDefectStatus};
use crate::entities::repair::{Completion, NewRepair, Repair, RepairStatus};
use crate::entities::warranty::{NewWarranty, Warranty, WarrantyStatus};
use crate::entities::warranty_defect::{
    NewWarrantyDefect, WarrantyDefect, WarrantyDefectPatch, WarrantyDefectStatus,
};
use crate::lifecycle::events::TransitionOrigin;
use crate::lifecycle::issue::IssueService;
use crate::lifecycle::qa_defect::QaDefectService;
use crate::lifecycle::repair::RepairService;
use crate::lifecycle::scheduler::{SweepOutcome, WarrantySweeper};
use crate::lifecycle::sync::{CounterReconciliation, SyncOutcome, Synchronizer};
use crate::lifecycle::warranty::WarrantyService;
use crate::lifecycle::warranty_defect::WarrantyDefectService;
use crate::lifecycle::{ServiceContext, Statistics, UpstreamFailure};

/// One repository per entity kind, plus the issue number counters
#[derive(Clone)]
pub struct Repositories {
    pub issues: Arc<dyn Repository<Issue>>,
    pub qa_defects: Arc<dyn Repository<QaDefect>>,
    pub warranties: Arc<dyn Repository<Warranty>>,
    pub warranty_defects: Arc<dyn Repository<WarrantyDefect>>,
    pub repairs: Arc<dyn Repository<Repair>>,
    pub sequences: Arc<dyn Sequences>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            issues: Arc::new(MemoryStore::<Issue>::new()),
            qa_defects: Arc::new(MemoryStore::<QaDefect>::new()),
            warranties: Arc::new(MemoryStore::<Warranty>::new()),
            warranty_defects: Arc::new(MemoryStore::<WarrantyDefect>::new()),
            repairs: Arc::new(MemoryStore::<Repair>::new()),
            sequences: Arc::new(MemorySequences::new()),
        }
    }

    pub fn sqlite(store: &SqliteStore) -> Self {
        Self {
            issues: Arc::new(store.collection::<Issue>()),
            qa_defects: Arc::new(store.collection::<QaDefect>()),
            warranties: Arc::new(store.collection::<Warranty>()),
            warranty_defects: Arc::new(store.collection::<WarrantyDefect>()),
            repairs: Arc::new(store.collection::<Repair>()),
            sequences: Arc::new(store.clone()),
        }
    }
}

/// A record after an operation, plus what synchronization did with it
#[derive(Debug, Clone, Serialize)]
pub struct Synced<T> {
    pub entity: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sync: Vec<SyncOutcome>,
}

impl<T> Synced<T> {
    /// A record whose operation triggered no synchronization
    pub fn new(entity: T) -> Self {
        Self {
            entity,
            sync: Vec::new(),
        }
    }

    fn with(entity: T, sync: Vec<SyncOutcome>) -> Self {
        Self { entity, sync }
    }
}

/// Dashboard counts for one blueprint
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlueprintStatus {
    pub blueprint_id: String,
    pub issues: Statistics,
    pub qa_defects: Statistics,
    pub warranties: Statistics,
    pub claims: Statistics,
    pub expiring_warranties: usize,
}

pub struct Engine {
    issues: Arc<IssueService>,
    qa_defects: Arc<QaDefectService>,
    warranties: Arc<WarrantyService>,
    warranty_defects: Arc<WarrantyDefectService>,
    repairs: Arc<RepairService>,
    sync: Synchronizer,
    sweeper: WarrantySweeper,
    ctx: ServiceContext,
    expiry_threshold_days: i64,
}

impl Engine {
    pub fn new(
        repos: Repositories,
        bus: Arc<dyn MessageBus>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let ctx = ServiceContext::new(bus, clock, config.store_timeout());

        let issues = Arc::new(IssueService::new(
            repos.issues,
            repos.sequences,
            ctx.clone(),
        ));
        let qa_defects = Arc::new(QaDefectService::new(
            repos.qa_defects,
            ctx.clone(),
            config.sla,
        ));
        let warranties = Arc::new(WarrantyService::new(
            repos.warranties.clone(),
            repos.warranty_defects.clone(),
            ctx.clone(),
        ));
        let warranty_defects = Arc::new(WarrantyDefectService::new(
            repos.warranty_defects.clone(),
            repos.warranties,
            ctx.clone(),
        ));
        let repairs = Arc::new(RepairService::new(
            repos.repairs,
            repos.warranty_defects,
            ctx.clone(),
        ));

        let sync = Synchronizer::new(
            issues.clone(),
            qa_defects.clone(),
            warranties.clone(),
            warranty_defects.clone(),
            repairs.clone(),
        );
        let sweeper = WarrantySweeper::new(warranties.clone(), config.expiry_threshold_days);

        Self {
            issues,
            qa_defects,
            warranties,
            warranty_defects,
            repairs,
            sync,
            sweeper,
            ctx,
            expiry_threshold_days: config.expiry_threshold_days,
        }
    }

    /// Events the bus refused since the engine started
    ///
    /// Every such event belongs to a write that did commit.
    pub fn undelivered_events(&self) -> u64 {
        self.ctx.undelivered_events()
    }

    pub fn issues(&self) -> &IssueService {
        &self.issues
    }

    pub fn qa_defects(&self) -> &QaDefectService {
        &self.qa_defects
    }

    pub fn warranties(&self) -> &WarrantyService {
        &self.warranties
    }

    pub fn warranty_defects(&self) -> &WarrantyDefectService {
        &self.warranty_defects
    }

    pub fn repairs(&self) -> &RepairService {
        &self.repairs
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    pub fn sweeper(&self) -> &WarrantySweeper {
        &self.sweeper
    }

    // Issues

    pub async fn transition_issue(
        &self,
        id: &EntityId,
        to: IssueStatus,
        actor: &str,
    ) -> LifecycleResult<Synced<Issue>> {
        let issue = self.issues.transition_status(id, to, actor).await?;
        self.after_issue(issue, actor).await
    }

    pub async fn resolve_issue(
        &self,
        id: &EntityId,
        resolution: Resolution,
        actor: &str,
    ) -> LifecycleResult<Synced<Issue>> {
        let issue = self.issues.resolve(id, resolution, actor).await?;
        self.after_issue(issue, actor).await
    }

    pub async fn verify_issue(
        &self,
        id: &EntityId,
        verification: Verification,
        actor: &str,
    ) -> LifecycleResult<Synced<Issue>> {
        let issue = self.issues.verify(id, verification, actor).await?;
        self.after_issue(issue, actor).await
    }

    pub async fn update_issue(
        &self,
        id: &EntityId,
        patch: IssuePatch,
        actor: &str,
    ) -> LifecycleResult<Issue> {
        self.issues.update(id, patch, actor).await
    }

    pub async fn delete_issue(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.issues.delete(id, actor).await
    }

    async fn after_issue(&self, issue: Issue, actor: &str) -> LifecycleResult<Synced<Issue>> {
        let outcome = self
            .sync
            .propagate_issue(&issue, TransitionOrigin::Direct, actor)
            .await?;
        Ok(Synced::with(issue, vec![outcome]))
    }

    // QA defects

    /// Create a QA defect; a critical one is escalated straight away
    pub async fn create_qa_defect(
        &self,
        data: NewQaDefect,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let defect = self.qa_defects.create(data, actor).await?;
        self.escalate_if_critical(defect, actor).await
    }

    /// Auto-create QA defects from an inspection and escalate the critical ones
    pub async fn qa_defects_from_inspection(
        &self,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Synced<QaDefect>>> {
        let created = self
            .qa_defects
            .auto_create_from_inspection(payload, actor)
            .await?;
        let mut out = Vec::with_capacity(created.len());
        for defect in created {
            out.push(self.escalate_if_critical(defect, actor).await?);
        }
        Ok(out)
    }

    async fn escalate_if_critical(
        &self,
        defect: QaDefect,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        if !defect.should_auto_create_issue() {
            return Ok(Synced::new(defect));
        }
        let issue = self.sync.escalate_qa_defect(&defect.id, actor).await?;
        let defect = self.qa_defects.get(&defect.id).await?;
        Ok(Synced::with(
            defect,
            vec![SyncOutcome::Applied {
                target: issue.id.clone(),
                detail: format!("escalated to {}", issue.issue_number()),
            }],
        ))
    }

    /// Edit a QA defect; raising it to critical escalates it
    pub async fn update_qa_defect(
        &self,
        id: &EntityId,
        patch: QaDefectPatch,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let defect = self.qa_defects.update(id, patch, actor).await?;
        self.escalate_if_critical(defect, actor).await
    }

    pub async fn delete_qa_defect(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.qa_defects.delete(id, actor).await
    }

    pub async fn escalate_qa_defect(&self, id: &EntityId, actor: &str) -> LifecycleResult<Issue> {
        self.sync.escalate_qa_defect(id, actor).await
    }

    pub async fn assign_qa_defect(
        &self,
        id: &EntityId,
        assignee: &str,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let defect = self.qa_defects.assign(id, assignee, actor).await?;
        self.after_qa_defect(defect, actor).await
    }

    pub async fn transition_qa_defect(
        &self,
        id: &EntityId,
        to: QaDefectStatus,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let defect = self.qa_defects.transition_status(id, to, actor).await?;
        self.after_qa_defect(defect, actor).await
    }

    pub async fn reinspect_qa_defect(
        &self,
        id: &EntityId,
        passed: bool,
        inspector: &str,
        notes: Option<String>,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let defect = self
            .qa_defects
            .record_reinspection(id, passed, inspector, notes)
            .await?;
        self.after_qa_defect(defect, inspector).await
    }

    async fn after_qa_defect(
        &self,
        defect: QaDefect,
        actor: &str,
    ) -> LifecycleResult<Synced<QaDefect>> {
        let outcome = self
            .sync
            .propagate_qa_defect(&defect, TransitionOrigin::Direct, actor)
            .await?;
        Ok(Synced::with(defect, vec![outcome]))
    }

    // Warranties

    pub async fn create_warranty(&self, data: NewWarranty, actor: &str) -> LifecycleResult<Warranty> {
        self.warranties.create(data, actor).await
    }

    pub async fn delete_warranty(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.warranties.delete(id, actor).await
    }

    pub async fn transition_warranty(
        &self,
        id: &EntityId,
        to: WarrantyStatus,
        actor: &str,
    ) -> LifecycleResult<Warranty> {
        self.warranties.transition_status(id, to, actor).await
    }

    /// Warranties ending within the configured threshold
    pub async fn expiring_warranties(&self, blueprint_id: &str) -> LifecycleResult<Vec<Warranty>> {
        self.warranties
            .expiring(blueprint_id, self.expiry_threshold_days)
            .await
    }

    pub async fn sweep(&self, blueprint_id: &str, actor: &str) -> LifecycleResult<SweepOutcome> {
        self.sweeper.sweep(blueprint_id, actor).await
    }

    pub async fn reconcile(
        &self,
        warranty_id: &EntityId,
        actor: &str,
    ) -> LifecycleResult<CounterReconciliation> {
        self.sync.reconcile_counters(warranty_id, actor).await
    }

    // Warranty defects

    /// Report a claim, count it on the warranty and escalate it if critical
    pub async fn report_claim(
        &self,
        warranty_id: &EntityId,
        data: NewWarrantyDefect,
        actor: &str,
    ) -> LifecycleResult<Synced<WarrantyDefect>> {
        let defect = self.warranty_defects.report(warranty_id, data, actor).await?;
        self.after_claim_reported(defect, actor).await
    }

    pub async fn claims_from_complaint(
        &self,
        warranty_id: &EntityId,
        payload: &UpstreamFailure,
        actor: &str,
    ) -> LifecycleResult<Vec<Synced<WarrantyDefect>>> {
        let created = self
            .warranty_defects
            .auto_create_from_complaint(warranty_id, payload, actor)
            .await?;
        let mut out = Vec::with_capacity(created.len());
        for defect in created {
            out.push(self.after_claim_reported(defect, actor).await?);
        }
        Ok(out)
    }

    async fn after_claim_reported(
        &self,
        defect: WarrantyDefect,
        actor: &str,
    ) -> LifecycleResult<Synced<WarrantyDefect>> {
        let mut sync = vec![self.sync.on_defect_reported(&defect, actor).await?];
        if !defect.should_auto_create_issue() {
            return Ok(Synced::with(defect, sync));
        }
        let issue = self.sync.escalate_warranty_defect(&defect.id, actor).await?;
        sync.push(SyncOutcome::Applied {
            target: issue.id.clone(),
            detail: format!("escalated to {}", issue.issue_number()),
        });
        let defect = self.warranty_defects.get(&defect.id).await?;
        Ok(Synced::with(defect, sync))
    }

    /// Edit a claim; raising it to critical escalates it
    pub async fn update_claim(
        &self,
        id: &EntityId,
        patch: WarrantyDefectPatch,
        actor: &str,
    ) -> LifecycleResult<Synced<WarrantyDefect>> {
        let defect = self.warranty_defects.update(id, patch, actor).await?;
        if !defect.should_auto_create_issue() {
            return Ok(Synced::new(defect));
        }
        let issue = self.sync.escalate_warranty_defect(&defect.id, actor).await?;
        let defect = self.warranty_defects.get(&defect.id).await?;
        Ok(Synced::with(
            defect,
            vec![SyncOutcome::Applied {
                target: issue.id.clone(),
                detail: format!("escalated to {}", issue.issue_number()),
            }],
        ))
    }

    /// Delete an unlinked `reported` claim and uncount it on its warranty
    pub async fn delete_claim(&self, id: &EntityId, actor: &str) -> LifecycleResult<SyncOutcome> {
        let defect = self.warranty_defects.delete(id, actor).await?;
        self.sync.on_defect_deleted(&defect, actor).await
    }

    pub async fn escalate_claim(&self, id: &EntityId, actor: &str) -> LifecycleResult<Issue> {
        self.sync.escalate_warranty_defect(id, actor).await
    }

    pub async fn transition_claim(
        &self,
        id: &EntityId,
        to: WarrantyDefectStatus,
        actor: &str,
    ) -> LifecycleResult<Synced<WarrantyDefect>> {
        let defect = self.warranty_defects.transition_status(id, to, actor).await?;
        let outcome = self
            .sync
            .propagate_warranty_defect(&defect, TransitionOrigin::Direct, actor)
            .await?;
        Ok(Synced::with(defect, vec![outcome]))
    }

    // Repairs

    pub async fn create_repair(
        &self,
        defect_id: &EntityId,
        data: NewRepair,
        actor: &str,
    ) -> LifecycleResult<Synced<Repair>> {
        let repair = self.repairs.create(defect_id, data, actor).await?;
        let outcome = self.sync.on_repair_created(&repair, actor).await?;
        Ok(Synced::with(repair, vec![outcome]))
    }

    /// Delete a `pending` repair, relink its claim and uncount it
    pub async fn delete_repair(&self, id: &EntityId, actor: &str) -> LifecycleResult<SyncOutcome> {
        let repair = self.repairs.delete(id, actor).await?;
        self.sync.on_repair_deleted(&repair, actor).await
    }

    pub async fn transition_repair(
        &self,
        id: &EntityId,
        to: RepairStatus,
        actor: &str,
    ) -> LifecycleResult<Synced<Repair>> {
        let repair = self.repairs.transition_status(id, to, actor).await?;
        self.after_repair(repair, actor).await
    }

    pub async fn start_repair(&self, id: &EntityId, actor: &str) -> LifecycleResult<Synced<Repair>> {
        let repair = self.repairs.start(id, actor).await?;
        self.after_repair(repair, actor).await
    }

    pub async fn complete_repair(
        &self,
        id: &EntityId,
        completion: Completion,
        actor: &str,
    ) -> LifecycleResult<Synced<Repair>> {
        let repair = self.repairs.complete(id, completion, actor).await?;
        self.after_repair(repair, actor).await
    }

    pub async fn verify_repair(
        &self,
        id: &EntityId,
        passed: bool,
        notes: Option<String>,
        actor: &str,
    ) -> LifecycleResult<Synced<Repair>> {
        let repair = self.repairs.verify(id, passed, notes, actor).await?;
        self.after_repair(repair, actor).await
    }

    /// Repair → warranty defect, then warranty defect → issue
    async fn after_repair(&self, repair: Repair, actor: &str) -> LifecycleResult<Synced<Repair>> {
        let (outcome, moved) = self.sync.propagate_repair(&repair, actor).await?;
        let mut sync = vec![outcome];
        if let Some(defect) = moved {
            let origin = TransitionOrigin::Sync(EntityPrefix::Rep);
            sync.push(
                self.sync
                    .propagate_warranty_defect(&defect, origin, actor)
                    .await?,
            );
        }
        Ok(Synced::with(repair, sync))
    }

    // Reporting

    pub async fn status(&self, blueprint_id: &str) -> LifecycleResult<BlueprintStatus> {
        let mut claims = Statistics::default();
        for warranty in self.warranties.list(blueprint_id).await? {
            claims.merge(self.warranty_defects.statistics(&warranty.id).await?);
        }
        let expiring = self
            .warranties
            .expiring(blueprint_id, self.expiry_threshold_days)
            .await?;

        Ok(BlueprintStatus {
            blueprint_id: blueprint_id.to_string(),
            issues: self.issues.statistics(blueprint_id).await?,
            qa_defects: self.qa_defects.statistics(blueprint_id).await?,
            warranties: self.warranties.statistics(blueprint_id).await?,
            claims,
            expiring_warranties: expiring.len(),
        })
    }
}
