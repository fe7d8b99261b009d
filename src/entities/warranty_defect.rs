//! Warranty defect entity type - claims reported against a warranty

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{set_field, Audit, Entity};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;
use crate::entities::qa_defect::DefectSeverity;

/// Warranty defect workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyDefectStatus {
    #[default]
    Reported,
    Confirmed,
    UnderRepair,
    Repaired,
    Verified,
    Closed,
    Rejected,
}

impl WarrantyDefectStatus {
    /// Whether the claim still needs work (blocks warranty completion)
    pub fn is_open(&self) -> bool {
        !matches!(
            self,
            WarrantyDefectStatus::Closed | WarrantyDefectStatus::Rejected
        )
    }
}

impl Lifecycle for WarrantyDefectStatus {
    const ENTITY: &'static str = "warranty_defect";

    fn all() -> &'static [Self] {
        use WarrantyDefectStatus::*;
        &[
            Reported,
            Confirmed,
            UnderRepair,
            Repaired,
            Verified,
            Closed,
            Rejected,
        ]
    }

    fn initial() -> Self {
        WarrantyDefectStatus::Reported
    }

    fn successors(self) -> &'static [Self] {
        use WarrantyDefectStatus::*;
        match self {
            Reported => &[Confirmed, Rejected],
            Confirmed => &[UnderRepair],
            UnderRepair => &[Repaired],
            Repaired => &[Verified, UnderRepair],
            Verified => &[Closed],
            Closed => &[],
            Rejected => &[],
        }
    }
}

impl std::fmt::Display for WarrantyDefectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarrantyDefectStatus::Reported => write!(f, "reported"),
            WarrantyDefectStatus::Confirmed => write!(f, "confirmed"),
            WarrantyDefectStatus::UnderRepair => write!(f, "under_repair"),
            WarrantyDefectStatus::Repaired => write!(f, "repaired"),
            WarrantyDefectStatus::Verified => write!(f, "verified"),
            WarrantyDefectStatus::Closed => write!(f, "closed"),
            WarrantyDefectStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for WarrantyDefectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "reported" => Ok(WarrantyDefectStatus::Reported),
            "confirmed" => Ok(WarrantyDefectStatus::Confirmed),
            "under_repair" => Ok(WarrantyDefectStatus::UnderRepair),
            "repaired" => Ok(WarrantyDefectStatus::Repaired),
            "verified" => Ok(WarrantyDefectStatus::Verified),
            "closed" => Ok(WarrantyDefectStatus::Closed),
            "rejected" => Ok(WarrantyDefectStatus::Rejected),
            _ => Err(format!(
                "Invalid warranty defect status: {}. Use reported, confirmed, under_repair, repaired, verified, closed, or rejected",
                s
            )),
        }
    }
}

/// Input for a new warranty defect
#[derive(Debug, Clone, Default)]
pub struct NewWarrantyDefect {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub severity: DefectSeverity,
    pub discovered_date: Option<NaiveDate>,
    pub reporter: Option<String>,
    pub photos: Vec<String>,
    pub documents: Vec<String>,
}

/// Edit of a claim's descriptive fields; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct WarrantyDefectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub severity: Option<DefectSeverity>,
}

/// A defect claimed under a warranty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarrantyDefect {
    /// Unique identifier
    pub id: EntityId,

    /// Owning warranty
    pub warranty_id: EntityId,

    pub blueprint_id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub severity: DefectSeverity,

    pub discovered_date: NaiveDate,

    pub reporter: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documents: Vec<String>,

    #[serde(default)]
    pub status: WarrantyDefectStatus,

    /// Current repair work order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_id: Option<EntityId>,

    /// Escalated issue, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub audit: Audit,

    #[serde(default)]
    pub version: u64,
}

impl WarrantyDefect {
    /// Create a freshly reported defect under `warranty_id`
    pub fn new(
        warranty_id: EntityId,
        blueprint_id: String,
        data: NewWarrantyDefect,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Wdf),
            warranty_id,
            blueprint_id,
            title: data.title,
            description: data.description,
            location: data.location,
            category: data.category,
            severity: data.severity,
            discovered_date: data.discovered_date.unwrap_or_else(|| now.date_naive()),
            reporter: data.reporter.unwrap_or_else(|| actor.to_string()),
            assignee: None,
            photos: data.photos,
            documents: data.documents,
            status: WarrantyDefectStatus::initial(),
            repair_id: None,
            issue_id: None,
            issue_number: None,
            rejection_reason: None,
            confirmed_at: None,
            closed_at: None,
            audit: Audit::new(actor, now),
            version: 0,
        }
    }

    /// Apply an edit, returning the names of the fields that changed
    pub fn apply_patch(
        &mut self,
        patch: WarrantyDefectPatch,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Vec<&'static str> {
        let mut changed = Vec::new();
        set_field(&mut changed, "title", &mut self.title, patch.title);
        set_field(&mut changed, "description", &mut self.description, patch.description.map(Some));
        set_field(&mut changed, "location", &mut self.location, patch.location.map(Some));
        set_field(&mut changed, "category", &mut self.category, patch.category.map(Some));
        set_field(&mut changed, "severity", &mut self.severity, patch.severity);
        if !changed.is_empty() {
            self.audit.touch(actor, now);
        }
        changed
    }

    /// Whether this defect should spawn a linked issue
    pub fn should_auto_create_issue(&self) -> bool {
        self.severity == DefectSeverity::Critical && self.issue_id.is_none()
    }
}

impl Entity for WarrantyDefect {
    const PREFIX: EntityPrefix = EntityPrefix::Wdf;
    type Status = WarrantyDefectStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn parent_id(&self) -> String {
        self.warranty_id.to_string()
    }

    fn status(&self) -> WarrantyDefectStatus {
        self.status
    }

    fn title(&self) -> &str {
        &self.title
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

    fn apply_status(&mut self, to: WarrantyDefectStatus, actor: &str, now: DateTime<Utc>) {
        match to {
            WarrantyDefectStatus::Confirmed => self.confirmed_at = Some(now),
            WarrantyDefectStatus::Closed | WarrantyDefectStatus::Rejected => {
                self.closed_at = Some(now)
            }
            _ => {}
        }
        self.status = to;
        self.audit.touch(actor, now);
    }
}
