//! Warranty lifecycle service

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::error::{LifecycleError, LifecycleResult};
use crate::core::identity::EntityId;
use crate::core::store::Repository;
use crate::core::workflow::Lifecycle;
use crate::entities::warranty::{NewWarranty, Warranty, WarrantyStatus};
use crate::entities::warranty_defect::WarrantyDefect;
use crate::lifecycle::events::TransitionOrigin;
use crate::lifecycle::scheduler::is_near_expiry;
use crate::lifecycle::{require, Records, ServiceContext, Statistics};

/// Creates warranties and drives them through their lifecycle
pub struct WarrantyService {
    records: Records<Warranty>,
    defects: Arc<dyn Repository<WarrantyDefect>>,
}

impl WarrantyService {
    pub fn new(
        repo: Arc<dyn Repository<Warranty>>,
        defects: Arc<dyn Repository<WarrantyDefect>>,
        ctx: ServiceContext,
    ) -> Self {
        Self {
            records: Records::new(repo, ctx),
            defects,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.records.now()
    }

    pub async fn get(&self, id: &EntityId) -> LifecycleResult<Warranty> {
        self.records.get(id).await
    }

    /// All warranties of a blueprint, soonest end date first
    pub async fn list(&self, blueprint_id: &str) -> LifecycleResult<Vec<Warranty>> {
        let mut warranties = self.records.list(blueprint_id).await?;
        warranties.sort_by_key(|w| w.end_date);
        Ok(warranties)
    }

    pub async fn find_by_status(
        &self,
        blueprint_id: &str,
        statuses: &[WarrantyStatus],
    ) -> LifecycleResult<Vec<Warranty>> {
        self.records.with_status(blueprint_id, statuses).await
    }

    /// Create a `pending` warranty; `end_date` is derived from the period
    pub async fn create(&self, data: NewWarranty, actor: &str) -> LifecycleResult<Warranty> {
        require("blueprint_id", &data.blueprint_id)?;
        require("warrantor name", &data.warrantor.name)?;
        let period = data.period_months;
        let start = data.start_date;

        let warranty = Warranty::new(data, actor, self.records.now()).ok_or_else(|| {
            LifecycleError::Invalid(format!(
                "cannot derive an end date from {} + {} month(s)",
                start, period
            ))
        })?;
        let warranty = self.records.insert(warranty, actor).await?;
        self.records.emit_created(&warranty, actor);
        Ok(warranty)
    }

    pub async fn activate(&self, id: &EntityId, actor: &str) -> LifecycleResult<Warranty> {
        self.transition_status(id, WarrantyStatus::Active, actor)
            .await
    }

    pub async fn void(&self, id: &EntityId, reason: &str, actor: &str) -> LifecycleResult<Warranty> {
        require("reason", reason)?;
        let reason = reason.to_string();
        self.records
            .transition(
                id,
                WarrantyStatus::Voided,
                actor,
                TransitionOrigin::Direct,
                move |w, _| {
                    w.void_reason = Some(reason);
                    Ok(())
                },
            )
            .await
    }

    /// Close out a warranty; fails while any of its defects is still open
    pub async fn complete(&self, id: &EntityId, actor: &str) -> LifecycleResult<Warranty> {
        self.transition_status(id, WarrantyStatus::Completed, actor)
            .await
    }

    pub async fn transition_status(
        &self,
        id: &EntityId,
        to: WarrantyStatus,
        actor: &str,
    ) -> LifecycleResult<Warranty> {
        self.transition_with_origin(id, to, actor, TransitionOrigin::Direct)
            .await
    }

    pub async fn transition_with_origin(
        &self,
        id: &EntityId,
        to: WarrantyStatus,
        actor: &str,
        origin: TransitionOrigin,
    ) -> LifecycleResult<Warranty> {
        let warranty = self.records.get(id).await?;
        if to == WarrantyStatus::Completed
            && crate::core::workflow::can_transition(warranty.status, to)
        {
            let open = self.open_defect_count(id).await?;
            if open > 0 {
                return Err(LifecycleError::precondition(format!(
                    "{} still has {} open defect(s)",
                    warranty.warranty_number, open
                )));
            }
        }
        self.records
            .transition_loaded(warranty, to, actor, origin, |_, _| Ok(()))
            .await
    }

    async fn open_defect_count(&self, id: &EntityId) -> LifecycleResult<usize> {
        let defects = self
            .records
            .ctx()
            .store(self.defects.find_by_parent(&id.to_string()))
            .await?;
        Ok(defects.iter().filter(|d| d.status.is_open()).count())
    }

    /// Live warranties of a blueprint ending within `threshold_days`
    pub async fn expiring(
        &self,
        blueprint_id: &str,
        threshold_days: i64,
    ) -> LifecycleResult<Vec<Warranty>> {
        let now = self.records.now();
        let mut warranties: Vec<Warranty> = self
            .records
            .with_status(
                blueprint_id,
                &[WarrantyStatus::Active, WarrantyStatus::Expiring],
            )
            .await?
            .into_iter()
            .filter(|w| is_near_expiry(w.end_at(), now, threshold_days))
            .collect();
        warranties.sort_by_key(|w| w.end_date);
        Ok(warranties)
    }

    pub async fn delete(&self, id: &EntityId, actor: &str) -> LifecycleResult<()> {
        self.records.delete_pristine(id, actor).await
    }

    pub async fn statistics(&self, blueprint_id: &str) -> LifecycleResult<Statistics> {
        let mut stats = Statistics::default();
        for warranty in self.records.list(blueprint_id).await? {
            let open = !warranty.status.is_terminal() && warranty.status != WarrantyStatus::Expired;
            stats.record(warranty.status.to_string(), None, open, false);
        }
        Ok(stats)
    }

    /// Apply a counter change; used by the synchronizer
    pub(crate) async fn update_counters<F>(
        &self,
        id: &EntityId,
        actor: &str,
        change: F,
    ) -> LifecycleResult<Warranty>
    where
        F: FnOnce(&mut Warranty),
    {
        let mut warranty = self.records.get(id).await?;
        change(&mut warranty);
        warranty.audit.touch(actor, self.records.now());
        let warranty = self.records.save(warranty).await?;
        tracing::debug!(
            entity_id = %id,
            defect_count = warranty.defect_count,
            repair_count = warranty.repair_count,
            "Updated warranty counters"
        );
        Ok(warranty)
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
    use crate::entities::warranty::Warrantor;
    use crate::entities::warranty_defect::{NewWarrantyDefect, WarrantyDefectStatus};
    use crate::lifecycle::testing::Harness;
    use chrono::NaiveDate;

    struct Fixture {
        svc: WarrantyService,
        defects: Arc<MemoryStore<WarrantyDefect>>,
    }

    fn fixture(h: &Harness) -> Fixture {
        let defects = Arc::new(MemoryStore::<WarrantyDefect>::new());
        let svc = WarrantyService::new(
            Arc::new(MemoryStore::<Warranty>::new()),
            defects.clone(),
            h.ctx(),
        );
        Fixture { svc, defects }
    }

    fn new_warranty(start: NaiveDate, months: u32) -> NewWarranty {
        NewWarranty {
            blueprint_id: "BP-1".to_string(),
            start_date: start,
            period_months: months,
            warrantor: Warrantor {
                name: "Acme Builders".to_string(),
                contact: Some("+1 555 0100".to_string()),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_activate() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = f.svc.create(new_warranty(start, 12), "pm").await.unwrap();
        assert_eq!(w.end_date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());

        let w = f.svc.activate(&w.id, "pm").await.unwrap();
        assert_eq!(w.status, WarrantyStatus::Active);
        assert!(w.activated_at.is_some());
    }

    #[tokio::test]
    async fn test_create_rejects_zero_period() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let err = f.svc.create(new_warranty(start, 0), "pm").await.unwrap_err();
        assert!(matches!(err, LifecycleError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_active_cannot_jump_to_expired() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = f.svc.create(new_warranty(start, 12), "pm").await.unwrap();
        f.svc.activate(&w.id, "pm").await.unwrap();

        let err = f
            .svc
            .transition_status(&w.id, WarrantyStatus::Expired, "pm")
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition(_)));

        f.svc
            .transition_status(&w.id, WarrantyStatus::Expiring, "pm")
            .await
            .unwrap();
        let w = f
            .svc
            .transition_status(&w.id, WarrantyStatus::Expired, "pm")
            .await
            .unwrap();
        assert_eq!(w.status, WarrantyStatus::Expired);
    }

    #[tokio::test]
    async fn test_complete_blocked_by_open_defects() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = f.svc.create(new_warranty(start, 12), "pm").await.unwrap();
        f.svc.activate(&w.id, "pm").await.unwrap();

        let mut claim = WarrantyDefect::new(
            w.id.clone(),
            "BP-1".to_string(),
            NewWarrantyDefect {
                title: "Cracked render".to_string(),
                ..Default::default()
            },
            "owner",
            h.clock.now(),
        );
        let claim_id = claim.id.clone();
        f.defects.create(claim.clone()).await.unwrap();

        let err = f.svc.complete(&w.id, "pm").await.unwrap_err();
        match err {
            LifecycleError::PreconditionFailed { message } => {
                assert!(message.contains("1 open defect"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        claim = f.defects.get_by_id(&claim_id).await.unwrap().unwrap();
        claim.status = WarrantyDefectStatus::Rejected;
        f.defects.update(claim).await.unwrap();

        let w = f.svc.complete(&w.id, "pm").await.unwrap();
        assert_eq!(w.status, WarrantyStatus::Completed);
        assert!(w.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_void_records_reason() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = f.svc.create(new_warranty(start, 24), "pm").await.unwrap();
        let w = f.svc.void(&w.id, "contract cancelled", "pm").await.unwrap();
        assert_eq!(w.status, WarrantyStatus::Voided);
        assert_eq!(w.void_reason.as_deref(), Some("contract cancelled"));
        assert!(f.svc.activate(&w.id, "pm").await.is_err());
    }

    #[tokio::test]
    async fn test_expiring_query() {
        let h = Harness::new();
        let f = fixture(&h);
        // Clock is 2025-01-01; these end 2025-01-21 and 2026-01-01
        let soon = f
            .svc
            .create(
                new_warranty(NaiveDate::from_ymd_opt(2024, 12, 21).unwrap(), 1),
                "pm",
            )
            .await
            .unwrap();
        let later = f
            .svc
            .create(
                new_warranty(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), 12),
                "pm",
            )
            .await
            .unwrap();
        f.svc.activate(&soon.id, "pm").await.unwrap();
        f.svc.activate(&later.id, "pm").await.unwrap();

        let expiring = f.svc.expiring("BP-1", 30).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].id, soon.id);
    }

    #[tokio::test]
    async fn test_delete_only_pending() {
        let h = Harness::new();
        let f = fixture(&h);
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = f.svc.create(new_warranty(start, 12), "pm").await.unwrap();
        f.svc.activate(&w.id, "pm").await.unwrap();
        assert!(matches!(
            f.svc.delete(&w.id, "pm").await.unwrap_err(),
            LifecycleError::NotDeletable { .. }
        ));
    }
}
