//! Repair entity type - work orders against warranty defects

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{Audit, Entity};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;

/// Repair workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    #[default]
    Pending,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Verified,
    Cancelled,
}

impl RepairStatus {
    /// Whether the repair still occupies its defect
    pub fn is_active(&self) -> bool {
        !matches!(self, RepairStatus::Verified | RepairStatus::Cancelled)
    }
}

impl Lifecycle for RepairStatus {
    const ENTITY: &'static str = "repair";

    fn all() -> &'static [Self] {
        use RepairStatus::*;
        &[
            Pending, Scheduled, InProgress, Completed, Failed, Verified, Cancelled,
        ]
    }

    fn initial() -> Self {
        RepairStatus::Pending
    }

    fn successors(self) -> &'static [Self] {
        use RepairStatus::*;
        match self {
            Pending => &[Scheduled, InProgress, Cancelled],
            Scheduled => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed => &[Verified, Failed],
            Failed => &[InProgress],
            Verified => &[],
            Cancelled => &[],
        }
    }
}

impl std::fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepairStatus::Pending => write!(f, "pending"),
            RepairStatus::Scheduled => write!(f, "scheduled"),
            RepairStatus::InProgress => write!(f, "in_progress"),
            RepairStatus::Completed => write!(f, "completed"),
            RepairStatus::Failed => write!(f, "failed"),
            RepairStatus::Verified => write!(f, "verified"),
            RepairStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for RepairStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(RepairStatus::Pending),
            "scheduled" => Ok(RepairStatus::Scheduled),
            "in_progress" => Ok(RepairStatus::InProgress),
            "completed" => Ok(RepairStatus::Completed),
            "failed" => Ok(RepairStatus::Failed),
            "verified" => Ok(RepairStatus::Verified),
            "cancelled" | "canceled" => Ok(RepairStatus::Cancelled),
            _ => Err(format!(
                "Invalid repair status: {}. Use pending, scheduled, in_progress, completed, failed, verified, or cancelled",
                s
            )),
        }
    }
}

/// Who pays for the repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CostResponsibility {
    #[default]
    Contractor,
    Owner,
    Shared,
}

impl std::fmt::Display for CostResponsibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostResponsibility::Contractor => write!(f, "contractor"),
            CostResponsibility::Owner => write!(f, "owner"),
            CostResponsibility::Shared => write!(f, "shared"),
        }
    }
}

impl std::str::FromStr for CostResponsibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contractor" => Ok(CostResponsibility::Contractor),
            "owner" => Ok(CostResponsibility::Owner),
            "shared" => Ok(CostResponsibility::Shared),
            _ => Err(format!(
                "Invalid cost responsibility: {}. Use contractor, owner, or shared",
                s
            )),
        }
    }
}

/// Contractor doing the work
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contractor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Completion report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Outcome of the post-repair inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairVerification {
    pub passed: bool,

    pub verifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub verified_at: DateTime<Utc>,
}

/// Input for a new repair
#[derive(Debug, Clone, Default)]
pub struct NewRepair {
    pub description: String,
    pub contractor: Contractor,
    pub workers: Vec<String>,
    pub scheduled_date: Option<NaiveDate>,
    pub cost_responsibility: CostResponsibility,
}

/// A repair work order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repair {
    /// Unique identifier
    pub id: EntityId,

    /// Defect being repaired
    pub defect_id: EntityId,

    pub warranty_id: EntityId,

    pub blueprint_id: String,

    /// Work to be done
    pub description: String,

    pub contractor: Contractor,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<String>,

    #[serde(default)]
    pub status: RepairStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default)]
    pub cost_responsibility: CostResponsibility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Completion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<RepairVerification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,

    #[serde(flatten)]
    pub audit: Audit,

    #[serde(default)]
    pub version: u64,
}

impl Repair {
    pub fn new(
        defect_id: EntityId,
        warranty_id: EntityId,
        blueprint_id: String,
        data: NewRepair,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Rep),
            defect_id,
            warranty_id,
            blueprint_id,
            description: data.description,
            contractor: data.contractor,
            workers: data.workers,
            status: RepairStatus::initial(),
            scheduled_date: data.scheduled_date,
            started_at: None,
            completed_at: None,
            verified_at: None,
            cost: None,
            cost_responsibility: data.cost_responsibility,
            completion: None,
            verification: None,
            cancel_reason: None,
            audit: Audit::new(actor, now),
            version: 0,
        }
    }
}

impl Entity for Repair {
    const PREFIX: EntityPrefix = EntityPrefix::Rep;
    type Status = RepairStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn parent_id(&self) -> String {
        self.defect_id.to_string()
    }

    fn status(&self) -> RepairStatus {
        self.status
    }

    fn title(&self) -> &str {
        &self.description
    }

    fn created(&self) -> DateTime<Utc> {
        self.audit.created_at
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    fn apply_status(&mut self, to: RepairStatus, actor: &str, now: DateTime<Utc>) {
        match to {
            RepairStatus::InProgress => {
                self.started_at = Some(now);
                // A retried repair starts a fresh attempt
                self.completed_at = None;
            }
            RepairStatus::Completed => self.completed_at = Some(now),
            RepairStatus::Verified => self.verified_at = Some(now),
            _ => {}
        }
        self.status = to;
        self.audit.touch(actor, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repair() -> Repair {
        Repair::new(
            EntityId::new(EntityPrefix::Wdf),
            EntityId::new(EntityPrefix::Wty),
            "BP-1".to_string(),
            NewRepair {
                description: "Reseal roof membrane".to_string(),
                ..Default::default()
            },
            "pm",
            Utc::now(),
        )
    }

    #[test]
    fn test_new_repair() {
        let r = repair();
        assert_eq!(r.status, RepairStatus::Pending);
        assert_eq!(r.parent_id(), r.defect_id.to_string());
        assert_eq!(r.cost_responsibility, CostResponsibility::Contractor);
    }

    #[test]
    fn test_active_statuses() {
        assert!(RepairStatus::Pending.is_active());
        assert!(RepairStatus::Failed.is_active());
        assert!(!RepairStatus::Verified.is_active());
        assert!(!RepairStatus::Cancelled.is_active());
    }

    #[test]
    fn test_retry_resets_completion() {
        let mut r = repair();
        let now = Utc::now();
        r.apply_status(RepairStatus::InProgress, "crew", now);
        r.apply_status(RepairStatus::Completed, "crew", now);
        r.apply_status(RepairStatus::Failed, "qa", now);
        r.apply_status(RepairStatus::InProgress, "crew", now);
        assert!(r.completed_at.is_none());
        assert!(r.started_at.is_some());
    }

    #[test]
    fn test_transition_table() {
        use RepairStatus::*;
        crate::core::workflow::assert_table_matches(
            &[
                (Pending, Scheduled),
                (Pending, InProgress),
                (Pending, Cancelled),
                (Scheduled, InProgress),
                (Scheduled, Cancelled),
                (InProgress, Completed),
                (InProgress, Cancelled),
                (Completed, Verified),
                (Completed, Failed),
                (Failed, InProgress),
            ],
            &[Verified, Cancelled],
        );
    }

    #[test]
    fn test_cancel_spelling() {
        assert_eq!(
            "canceled".parse::<RepairStatus>().unwrap(),
            RepairStatus::Cancelled
        );
    }
}
