//! Deadline scheduler
//!
//! Pure deadline math plus the warranty expiry sweep. Every function takes
//! `now` explicitly so the boundaries can be tested with a fixed clock.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::core::config::SlaPolicy;
use crate::core::error::LifecycleResult;
use crate::core::identity::EntityId;
use crate::core::workflow::path_to;
use crate::entities::qa_defect::{DefectSeverity, QaDefectStatus};
use crate::entities::warranty::WarrantyStatus;
use crate::lifecycle::events::{Swept, TransitionOrigin};
use crate::lifecycle::warranty::WarrantyService;

/// `0 < end - now <= threshold_days`
///
/// A threshold too large to represent covers every future end date.
pub fn is_near_expiry(end: DateTime<Utc>, now: DateTime<Utc>, threshold_days: i64) -> bool {
    let remaining = end - now;
    if remaining <= Duration::zero() {
        return false;
    }
    match Duration::try_days(threshold_days) {
        Some(window) => remaining <= window,
        None => threshold_days > 0,
    }
}

/// `now > end`
pub fn is_expired(end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now > end
}

/// Remediation due date for a defect created at `created`
///
/// `None` when the policy's day count does not fit the calendar.
pub fn sla_deadline(
    severity: DefectSeverity,
    created: DateTime<Utc>,
    policy: &SlaPolicy,
) -> Option<DateTime<Utc>> {
    Duration::try_days(severity.sla_days(policy)).and_then(|days| created.checked_add_signed(days))
}

/// Past its deadline and still needing work
pub fn is_overdue(status: QaDefectStatus, deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    !matches!(status, QaDefectStatus::Verified | QaDefectStatus::Closed) && deadline < now
}

/// What one sweep changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub blueprint_id: String,
    pub examined: usize,
    pub expiring: Vec<EntityId>,
    pub expired: Vec<EntityId>,
    /// Warranties left untouched because a step failed
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn changed(&self) -> usize {
        self.expiring.len() + self.expired.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub warranty_id: EntityId,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SweepOutcome {
    /// Another sweep holds the blueprint
    Busy,
    Completed(SweepReport),
}

/// Moves live warranties to `expiring` and `expired` as time passes
///
/// Sweeps are idempotent: a warranty already in its target status is left
/// alone. Concurrent sweeps of the same blueprint are refused with
/// [`SweepOutcome::Busy`].
pub struct WarrantySweeper {
    warranties: Arc<WarrantyService>,
    threshold_days: i64,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the blueprint when the sweep ends, however it ends
struct SweepLock<'a> {
    held: &'a Mutex<HashSet<String>>,
    blueprint_id: String,
}

impl Drop for SweepLock<'_> {
    fn drop(&mut self) {
        self.held.lock().remove(&self.blueprint_id);
    }
}

impl WarrantySweeper {
    pub fn new(warranties: Arc<WarrantyService>, threshold_days: i64) -> Self {
        Self {
            warranties,
            threshold_days,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    fn try_lock(&self, blueprint_id: &str) -> Option<SweepLock<'_>> {
        let mut held = self.in_flight.lock();
        if !held.insert(blueprint_id.to_string()) {
            return None;
        }
        Some(SweepLock {
            held: &self.in_flight,
            blueprint_id: blueprint_id.to_string(),
        })
    }

    /// Where a live warranty should be at `now`, if it should move at all
    fn target(&self, end: DateTime<Utc>, now: DateTime<Utc>) -> Option<WarrantyStatus> {
        if is_expired(end, now) {
            Some(WarrantyStatus::Expired)
        } else if is_near_expiry(end, now, self.threshold_days) {
            Some(WarrantyStatus::Expiring)
        } else {
            None
        }
    }

    pub async fn sweep(&self, blueprint_id: &str, actor: &str) -> LifecycleResult<SweepOutcome> {
        let Some(_lock) = self.try_lock(blueprint_id) else {
            tracing::debug!(blueprint_id, "Sweep already running");
            return Ok(SweepOutcome::Busy);
        };

        let now = self.warranties.now();
        let live = self
            .warranties
            .find_by_status(
                blueprint_id,
                &[WarrantyStatus::Active, WarrantyStatus::Expiring],
            )
            .await?;

        let mut report = SweepReport {
            blueprint_id: blueprint_id.to_string(),
            examined: live.len(),
            ..Default::default()
        };

        for warranty in live {
            let Some(target) = self.target(warranty.end_at(), now) else {
                continue;
            };
            if warranty.status == target {
                continue;
            }
            // Only live statuses are loaded, so a path always exists
            let Some(steps) = path_to(warranty.status, target) else {
                continue;
            };

            let mut failed = false;
            for step in steps {
                if let Err(e) = self
                    .warranties
                    .transition_with_origin(&warranty.id, step, actor, TransitionOrigin::Direct)
                    .await
                {
                    tracing::warn!(
                        entity_id = %warranty.id,
                        to = %step,
                        error = %e,
                        "Sweep step failed"
                    );
                    report.failures.push(SweepFailure {
                        warranty_id: warranty.id.clone(),
                        error: e.to_string(),
                    });
                    failed = true;
                    break;
                }
            }
            if failed {
                continue;
            }
            match target {
                WarrantyStatus::Expired => report.expired.push(warranty.id),
                _ => report.expiring.push(warranty.id),
            }
        }

        tracing::info!(
            blueprint_id,
            examined = report.examined,
            expiring = report.expiring.len(),
            expired = report.expired.len(),
            failures = report.failures.len(),
            "Warranty sweep finished"
        );
        if report.changed() > 0 {
            self.warranties.emit(
                "swept",
                &Swept {
                    blueprint_id: blueprint_id.to_string(),
                    expiring: report.expiring.clone(),
                    expired: report.expired.clone(),
                    actor: actor.to_string(),
                },
            );
        }
        Ok(SweepOutcome::Completed(report))
    }

    /// Sweep `blueprints` every `interval` until `shutdown` turns true
    ///
    /// A zero interval is raised to one second.
    pub async fn run(
        &self,
        blueprints: Vec<String>,
        interval: StdDuration,
        actor: String,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = if interval.is_zero() {
            tracing::warn!("Sweep interval is zero; using 1s");
            StdDuration::from_secs(1)
        } else {
            interval
        };
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for blueprint_id in &blueprints {
                        if let Err(e) = self.sweep(blueprint_id, &actor).await {
                            tracing::warn!(blueprint_id = %blueprint_id, error = %e, "Sweep failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::Clock;
    use crate::core::store::MemoryStore;
    use crate::entities::warranty::{NewWarranty, Warranty, Warrantor};
    use crate::entities::warranty_defect::WarrantyDefect;
    use crate::lifecycle::testing::Harness;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn test_near_expiry_boundaries() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(is_near_expiry(now + Duration::days(30), now, 30));
        assert!(!is_near_expiry(now + Duration::days(31), now, 30));
        assert!(!is_near_expiry(now, now, 30));
        assert!(!is_near_expiry(now - Duration::days(1), now, 30));
    }

    #[test]
    fn test_near_expiry_with_unrepresentable_threshold() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(is_near_expiry(now + Duration::days(400), now, i64::MAX));
        assert!(!is_near_expiry(now - Duration::days(1), now, i64::MAX));
        assert!(!is_near_expiry(now + Duration::days(1), now, i64::MIN));
    }

    #[test]
    fn test_expired_boundaries() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert!(is_expired(now - Duration::milliseconds(1), now));
        assert!(!is_expired(now + Duration::milliseconds(1), now));
        assert!(!is_expired(now, now));
    }

    #[test]
    fn test_sla_deadline() {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let policy = SlaPolicy::default();
        assert_eq!(
            sla_deadline(DefectSeverity::Critical, created, &policy),
            Some(created + Duration::days(3))
        );
        assert_eq!(
            sla_deadline(DefectSeverity::Low, created, &policy),
            Some(created + Duration::days(14))
        );
    }

    #[test]
    fn test_sla_deadline_out_of_calendar() {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let huge = SlaPolicy {
            high: i64::MAX,
            medium: 1_000_000_000,
            low: -1_000_000_000,
            ..SlaPolicy::default()
        };
        assert_eq!(sla_deadline(DefectSeverity::High, created, &huge), None);
        assert_eq!(sla_deadline(DefectSeverity::Medium, created, &huge), None);
        assert_eq!(sla_deadline(DefectSeverity::Low, created, &huge), None);
    }

    #[test]
    fn test_overdue_ignores_finished_defects() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let past = now - Duration::days(1);
        assert!(is_overdue(QaDefectStatus::InProgress, past, now));
        assert!(!is_overdue(QaDefectStatus::Verified, past, now));
        assert!(!is_overdue(QaDefectStatus::Closed, past, now));
        assert!(!is_overdue(QaDefectStatus::Open, now + Duration::days(1), now));
    }

    struct Fixture {
        warranties: Arc<WarrantyService>,
        sweeper: WarrantySweeper,
    }

    fn fixture(h: &Harness) -> Fixture {
        let warranties = Arc::new(WarrantyService::new(
            Arc::new(MemoryStore::<Warranty>::new()),
            Arc::new(MemoryStore::<WarrantyDefect>::new()),
            h.ctx(),
        ));
        let sweeper = WarrantySweeper::new(warranties.clone(), 30);
        Fixture {
            warranties,
            sweeper,
        }
    }

    async fn active(f: &Fixture, start: NaiveDate, months: u32) -> Warranty {
        let w = f
            .warranties
            .create(
                NewWarranty {
                    blueprint_id: "BP-1".to_string(),
                    start_date: start,
                    period_months: months,
                    warrantor: Warrantor {
                        name: "Acme Builders".to_string(),
                        contact: None,
                    },
                    ..Default::default()
                },
                "pm",
            )
            .await
            .unwrap();
        f.warranties.activate(&w.id, "pm").await.unwrap()
    }

    fn completed(outcome: SweepOutcome) -> SweepReport {
        match outcome {
            SweepOutcome::Completed(report) => report,
            SweepOutcome::Busy => panic!("sweep unexpectedly busy"),
        }
    }

    #[tokio::test]
    async fn test_sweep_moves_through_expiring_to_expired() {
        let h = Harness::new();
        let f = fixture(&h);
        // Clock starts at 2025-01-01 09:00
        let soon = active(&f, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(), 12).await;
        let past = active(&f, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(), 12).await;
        let later = active(&f, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 12).await;

        let report = completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        assert_eq!(report.examined, 3);
        assert_eq!(report.expiring, vec![soon.id.clone()]);
        assert_eq!(report.expired, vec![past.id.clone()]);

        let past = f.warranties.get(&past.id).await.unwrap();
        assert_eq!(past.status, WarrantyStatus::Expired);
        assert_eq!(
            f.warranties.get(&later.id).await.unwrap().status,
            WarrantyStatus::Active
        );
        assert!(h.event_types().contains(&"warranty.swept".to_string()));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let h = Harness::new();
        let f = fixture(&h);
        active(&f, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(), 12).await;

        let first = completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        assert_eq!(first.changed(), 1);
        let second = completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        assert_eq!(second.changed(), 0);
        assert!(second.failures.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_follows_clock() {
        let h = Harness::new();
        let f = fixture(&h);
        let w = active(&f, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(), 12).await;

        completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        h.clock.advance(Duration::days(30));
        assert!(h.clock.now() > w.end_at());

        let report = completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        assert_eq!(report.expired, vec![w.id.clone()]);
        assert_eq!(
            f.warranties.get(&w.id).await.unwrap().status,
            WarrantyStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_sweep_skips_closed_warranties() {
        let h = Harness::new();
        let f = fixture(&h);
        let w = active(&f, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(), 12).await;
        f.warranties.complete(&w.id, "pm").await.unwrap();

        let report = completed(f.sweeper.sweep("BP-1", "scheduler").await.unwrap());
        assert_eq!(report.examined, 0);
        assert_eq!(
            f.warranties.get(&w.id).await.unwrap().status,
            WarrantyStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_concurrent_sweep_is_busy() {
        let h = Harness::new();
        let f = fixture(&h);
        let _held = f.sweeper.try_lock("BP-1").unwrap();
        assert!(matches!(
            f.sweeper.sweep("BP-1", "scheduler").await.unwrap(),
            SweepOutcome::Busy
        ));
        // Other blueprints are unaffected
        assert!(matches!(
            f.sweeper.sweep("BP-2", "scheduler").await.unwrap(),
            SweepOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = Harness::new();
        let f = fixture(&h);
        active(&f, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(), 12).await;

        let (tx, rx) = watch::channel(false);
        let run = f.sweeper.run(
            vec!["BP-1".to_string()],
            StdDuration::from_millis(10),
            "scheduler".to_string(),
            rx,
        );
        let stop = async {
            tokio::time::sleep(StdDuration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(run, stop);
        assert!(h.event_types().contains(&"warranty.swept".to_string()));
    }

    #[tokio::test]
    async fn test_run_with_zero_interval_does_not_panic() {
        let h = Harness::new();
        let f = fixture(&h);
        let (tx, rx) = watch::channel(false);
        let run = f.sweeper.run(
            vec!["BP-1".to_string()],
            StdDuration::ZERO,
            "scheduler".to_string(),
            rx,
        );
        let stop = async {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(run, stop);
    }
}
