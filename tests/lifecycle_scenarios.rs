//! End-to-end lifecycle scenarios against the library API
//!
//! Each test wires a full engine over in-memory repositories, a local bus
//! and a fixed clock.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use sitecare::core::{Config, FixedClock, LifecycleError, LocalBus, Subscribe};
use sitecare::entities::issue::{IssueSource, IssueStatus};
use sitecare::entities::qa_defect::{DefectSeverity, NewQaDefect, QaDefectStatus};
use sitecare::entities::repair::{Contractor, NewRepair};
use sitecare::entities::warranty::{NewWarranty, Warranty, Warrantor, WarrantyStatus};
use sitecare::entities::warranty_defect::{
    NewWarrantyDefect, WarrantyDefectPatch, WarrantyDefectStatus,
};
use sitecare::lifecycle::{Engine, FailedItem, Repositories, SyncOutcome, UpstreamFailure};

struct Fixture {
    engine: Engine,
    bus: LocalBus,
    clock: Arc<FixedClock>,
}

fn fixture() -> Fixture {
    let bus = LocalBus::new();
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
    ));
    let engine = Engine::new(
        Repositories::in_memory(),
        Arc::new(bus.clone()),
        clock.clone(),
        &Config::default(),
    );
    Fixture { engine, bus, clock }
}

fn warranty_input(start: NaiveDate, months: u32) -> NewWarranty {
    NewWarranty {
        blueprint_id: "BP-1".to_string(),
        start_date: start,
        period_months: months,
        warrantor: Warrantor {
            name: "Acme Build".to_string(),
            contact: None,
        },
        ..Default::default()
    }
}

fn qa_defect(severity: DefectSeverity) -> NewQaDefect {
    NewQaDefect {
        blueprint_id: "BP-1".to_string(),
        title: "Honeycombing on column C4".to_string(),
        severity,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_acceptance_failure_fans_out_one_issue_per_item() {
    let f = fixture();
    let batches = Arc::new(Mutex::new(0usize));
    let seen = Arc::clone(&batches);
    let _sub = f.bus.on("issue.batch_created", move |_| {
        *seen.lock() += 1;
        Ok(())
    });

    let payload = UpstreamFailure {
        source_id: "ACC-42".to_string(),
        blueprint_id: "BP-1".to_string(),
        failed_items: ["Handrail height", "Door closer", "Fire seal"]
            .iter()
            .map(|name| FailedItem {
                item_name: name.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let issues = f
        .engine
        .issues()
        .auto_create_from_acceptance(&payload, "system")
        .await
        .unwrap();

    assert_eq!(issues.len(), 3);
    assert!(issues
        .iter()
        .all(|i| i.source == IssueSource::Acceptance && i.source_id.as_deref() == Some("ACC-42")));
    assert_eq!(*batches.lock(), 1);
    assert_eq!(f.engine.issues().list("BP-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_second_escalation_is_refused() {
    let f = fixture();
    let defect = f
        .engine
        .qa_defects()
        .create(qa_defect(DefectSeverity::High), "qc-1")
        .await
        .unwrap();

    let issue = f.engine.escalate_qa_defect(&defect.id, "qc-1").await.unwrap();
    let linked = f.engine.qa_defects().get(&defect.id).await.unwrap();
    assert_eq!(linked.linked_issue_id, Some(issue.id.clone()));

    let err = f
        .engine
        .escalate_qa_defect(&defect.id, "qc-1")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyLinked { .. }));
    assert_eq!(f.engine.issues().list("BP-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_warranty_must_pass_through_expiring() {
    let f = fixture();
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let warranty = f
        .engine
        .create_warranty(warranty_input(start, 12), "pm")
        .await
        .unwrap();
    assert_eq!(warranty.end_date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
    assert_eq!(warranty.status, WarrantyStatus::Pending);

    let id = warranty.id;
    f.engine
        .transition_warranty(&id, WarrantyStatus::Active, "pm")
        .await
        .unwrap();

    let err = f
        .engine
        .transition_warranty(&id, WarrantyStatus::Expired, "pm")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidTransition(_)));

    f.engine
        .transition_warranty(&id, WarrantyStatus::Expiring, "pm")
        .await
        .unwrap();
    let expired = f
        .engine
        .transition_warranty(&id, WarrantyStatus::Expired, "pm")
        .await
        .unwrap();
    assert_eq!(expired.status, WarrantyStatus::Expired);
}

#[tokio::test]
async fn test_sweep_follows_the_clock() {
    let f = fixture();
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let warranty = f
        .engine
        .create_warranty(warranty_input(start, 12), "pm")
        .await
        .unwrap();
    f.engine
        .transition_warranty(&warranty.id, WarrantyStatus::Active, "pm")
        .await
        .unwrap();

    // Ten days before the end date
    f.clock
        .set(Utc.with_ymd_and_hms(2025, 12, 22, 0, 0, 0).unwrap());
    f.engine.sweep("BP-1", "scheduler").await.unwrap();
    let w = f.engine.warranties().get(&warranty.id).await.unwrap();
    assert_eq!(w.status, WarrantyStatus::Expiring);

    f.clock.advance(Duration::days(30));
    f.engine.sweep("BP-1", "scheduler").await.unwrap();
    let w = f.engine.warranties().get(&warranty.id).await.unwrap();
    assert_eq!(w.status, WarrantyStatus::Expired);
}

#[tokio::test]
async fn test_sla_deadline_by_severity() {
    let f = fixture();
    let critical = f
        .engine
        .qa_defects()
        .create(qa_defect(DefectSeverity::Critical), "qc-1")
        .await
        .unwrap();
    let low = f
        .engine
        .qa_defects()
        .create(qa_defect(DefectSeverity::Low), "qc-1")
        .await
        .unwrap();

    assert_eq!(critical.deadline, critical.audit.created_at + Duration::days(3));
    assert_eq!(low.deadline, low.audit.created_at + Duration::days(14));
}

#[tokio::test]
async fn test_critical_claim_escalates_once() {
    let f = fixture();
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let warranty = f
        .engine
        .create_warranty(warranty_input(start, 24), "pm")
        .await
        .unwrap();
    f.engine
        .transition_warranty(&warranty.id, WarrantyStatus::Active, "pm")
        .await
        .unwrap();

    let claim = f
        .engine
        .warranty_defects()
        .report(
            &warranty.id,
            NewWarrantyDefect {
                title: "Basement water ingress".to_string(),
                severity: DefectSeverity::Critical,
                ..Default::default()
            },
            "owner",
        )
        .await
        .unwrap();
    assert!(claim.should_auto_create_issue());

    let issue = f.engine.escalate_claim(&claim.id, "pm").await.unwrap();
    assert_eq!(issue.source, IssueSource::Warranty);

    let claim = f.engine.warranty_defects().get(&claim.id).await.unwrap();
    assert!(!claim.should_auto_create_issue());
    assert_eq!(claim.issue_id, Some(issue.id));
}

#[tokio::test]
async fn test_reported_critical_claim_is_escalated_and_counted() {
    let f = fixture();
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let warranty = f
        .engine
        .create_warranty(warranty_input(start, 24), "pm")
        .await
        .unwrap();
    f.engine
        .transition_warranty(&warranty.id, WarrantyStatus::Active, "pm")
        .await
        .unwrap();

    let synced = f
        .engine
        .report_claim(
            &warranty.id,
            NewWarrantyDefect {
                title: "Cracked beam".to_string(),
                severity: DefectSeverity::Critical,
                ..Default::default()
            },
            "owner",
        )
        .await
        .unwrap();

    assert!(synced.entity.issue_id.is_some());
    assert_eq!(synced.sync.len(), 2);
    assert!(synced
        .sync
        .iter()
        .all(|o| matches!(o, SyncOutcome::Applied { .. })));

    let w = f.engine.warranties().get(&warranty.id).await.unwrap();
    assert_eq!(w.defect_count, 1);

    // Claim moves are mirrored on the escalated issue
    f.engine
        .transition_claim(&synced.entity.id, WarrantyDefectStatus::Confirmed, "pm")
        .await
        .unwrap();
    f.engine
        .transition_claim(&synced.entity.id, WarrantyDefectStatus::UnderRepair, "pm")
        .await
        .unwrap();
    let issue_id = synced.entity.issue_id.clone().unwrap();
    let issue = f.engine.issues().get(&issue_id).await.unwrap();
    assert_eq!(issue.status, IssueStatus::InProgress);
}

#[tokio::test]
async fn test_qa_defect_and_issue_close_together() {
    let f = fixture();
    let synced = f
        .engine
        .create_qa_defect(qa_defect(DefectSeverity::Critical), "qc-1")
        .await
        .unwrap();
    let defect_id = synced.entity.id.clone();
    let issue_id = synced.entity.linked_issue_id.clone().unwrap();

    f.engine
        .assign_qa_defect(&defect_id, "crew-3", "qc-1")
        .await
        .unwrap();
    for to in [
        QaDefectStatus::InProgress,
        QaDefectStatus::Resolved,
        QaDefectStatus::Verified,
        QaDefectStatus::Closed,
    ] {
        f.engine
            .transition_qa_defect(&defect_id, to, "qc-1")
            .await
            .unwrap();
    }

    let issue = f.engine.issues().get(&issue_id).await.unwrap();
    assert_eq!(issue.status, IssueStatus::Closed);
    assert!(issue.closed_at.is_some());
}

async fn active_warranty(f: &Fixture) -> Warranty {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    let warranty = f
        .engine
        .create_warranty(warranty_input(start, 24), "pm")
        .await
        .unwrap();
    f.engine
        .transition_warranty(&warranty.id, WarrantyStatus::Active, "pm")
        .await
        .unwrap()
}

fn claim(title: &str) -> NewWarrantyDefect {
    NewWarrantyDefect {
        title: title.to_string(),
        severity: DefectSeverity::Medium,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_claim_edited_to_critical_is_escalated() {
    let f = fixture();
    let warranty = active_warranty(&f).await;
    let reported = f
        .engine
        .report_claim(&warranty.id, claim("Sticking door"), "owner")
        .await
        .unwrap()
        .entity;
    assert!(reported.issue_id.is_none());

    let synced = f
        .engine
        .update_claim(
            &reported.id,
            WarrantyDefectPatch {
                severity: Some(DefectSeverity::Critical),
                ..Default::default()
            },
            "pm",
        )
        .await
        .unwrap();
    assert_eq!(synced.entity.status, WarrantyDefectStatus::Reported);
    assert!(synced.entity.issue_id.is_some());
}

#[tokio::test]
async fn test_deleting_claim_uncounts_it() {
    let f = fixture();
    let warranty = active_warranty(&f).await;
    let reported = f
        .engine
        .report_claim(&warranty.id, claim("Scuffed skirting"), "owner")
        .await
        .unwrap()
        .entity;
    assert_eq!(
        f.engine.warranties().get(&warranty.id).await.unwrap().defect_count,
        1
    );

    let outcome = f.engine.delete_claim(&reported.id, "pm").await.unwrap();
    assert!(outcome.is_applied());
    assert_eq!(
        f.engine.warranties().get(&warranty.id).await.unwrap().defect_count,
        0
    );
    assert!(matches!(
        f.engine.warranty_defects().get(&reported.id).await,
        Err(LifecycleError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_deleting_pending_repair_unlinks_and_uncounts_it() {
    let f = fixture();
    let warranty = active_warranty(&f).await;
    let reported = f
        .engine
        .report_claim(&warranty.id, claim("Dripping tap"), "owner")
        .await
        .unwrap()
        .entity;
    f.engine
        .transition_claim(&reported.id, WarrantyDefectStatus::Confirmed, "pm")
        .await
        .unwrap();
    let repair = f
        .engine
        .create_repair(
            &reported.id,
            NewRepair {
                description: "Replace washer".to_string(),
                contractor: Contractor {
                    name: "Plumb Co".to_string(),
                    contact: None,
                },
                ..Default::default()
            },
            "pm",
        )
        .await
        .unwrap()
        .entity;
    assert_eq!(
        f.engine.warranties().get(&warranty.id).await.unwrap().repair_count,
        1
    );

    f.engine.delete_repair(&repair.id, "pm").await.unwrap();
    assert_eq!(
        f.engine.warranties().get(&warranty.id).await.unwrap().repair_count,
        0
    );
    let defect = f.engine.warranty_defects().get(&reported.id).await.unwrap();
    assert!(defect.repair_id.is_none());
}
