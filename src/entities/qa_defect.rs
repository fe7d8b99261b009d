//! QA defect entity type - quality-control findings with SLA deadlines

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::config::SlaPolicy;
use crate::core::entity::{set_field, Audit, Entity, Priority};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;
use crate::entities::issue::IssueSeverity;
use crate::lifecycle::scheduler::{is_overdue, sla_deadline};

/// QA defect workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QaDefectStatus {
    #[default]
    Open,
    Assigned,
    InProgress,
    Resolved,
    Verified,
    Closed,
}

impl Lifecycle for QaDefectStatus {
    const ENTITY: &'static str = "qa_defect";

    fn all() -> &'static [Self] {
        use QaDefectStatus::*;
        &[Open, Assigned, InProgress, Resolved, Verified, Closed]
    }

    fn initial() -> Self {
        QaDefectStatus::Open
    }

    fn successors(self) -> &'static [Self] {
        use QaDefectStatus::*;
        match self {
            Open => &[Assigned, Closed],
            Assigned => &[InProgress, Open],
            InProgress => &[Resolved, Assigned],
            Resolved => &[Verified, InProgress],
            Verified => &[Closed, Resolved],
            Closed => &[],
        }
    }
}

impl std::fmt::Display for QaDefectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QaDefectStatus::Open => write!(f, "open"),
            QaDefectStatus::Assigned => write!(f, "assigned"),
            QaDefectStatus::InProgress => write!(f, "in_progress"),
            QaDefectStatus::Resolved => write!(f, "resolved"),
            QaDefectStatus::Verified => write!(f, "verified"),
            QaDefectStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for QaDefectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(QaDefectStatus::Open),
            "assigned" => Ok(QaDefectStatus::Assigned),
            "in_progress" => Ok(QaDefectStatus::InProgress),
            "resolved" => Ok(QaDefectStatus::Resolved),
            "verified" => Ok(QaDefectStatus::Verified),
            "closed" => Ok(QaDefectStatus::Closed),
            _ => Err(format!(
                "Invalid QA defect status: {}. Use open, assigned, in_progress, resolved, verified, or closed",
                s
            )),
        }
    }
}

/// Defect severity, shared by QA defects and warranty defects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefectSeverity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl DefectSeverity {
    /// Days allowed for remediation
    pub fn sla_days(&self, policy: &SlaPolicy) -> i64 {
        match self {
            DefectSeverity::Critical => policy.critical,
            DefectSeverity::High => policy.high,
            DefectSeverity::Medium => policy.medium,
            DefectSeverity::Low => policy.low,
        }
    }

    /// Priority of an issue escalated from a defect of this severity
    pub fn priority(&self) -> Priority {
        match self {
            DefectSeverity::Critical => Priority::Critical,
            DefectSeverity::High => Priority::High,
            DefectSeverity::Medium => Priority::Medium,
            DefectSeverity::Low => Priority::Low,
        }
    }

    /// Issue severity bucket for an escalated defect
    pub fn issue_severity(&self) -> IssueSeverity {
        match self {
            DefectSeverity::Critical => IssueSeverity::Critical,
            DefectSeverity::High => IssueSeverity::Major,
            DefectSeverity::Medium | DefectSeverity::Low => IssueSeverity::Minor,
        }
    }
}

impl std::fmt::Display for DefectSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefectSeverity::Critical => write!(f, "critical"),
            DefectSeverity::High => write!(f, "high"),
            DefectSeverity::Medium => write!(f, "medium"),
            DefectSeverity::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for DefectSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(DefectSeverity::Critical),
            "high" => Ok(DefectSeverity::High),
            "medium" => Ok(DefectSeverity::Medium),
            "low" => Ok(DefectSeverity::Low),
            _ => Err(format!(
                "Invalid defect severity: {}. Use critical, high, medium, or low",
                s
            )),
        }
    }
}

/// One resolution-progress report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Completion, 0..=100
    pub percent: u8,

    pub description: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,

    pub recorded_by: String,

    pub recorded_at: DateTime<Utc>,
}

/// One reinspection of a resolved defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reinspection {
    pub passed: bool,

    pub inspector: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    pub inspected_at: DateTime<Utc>,
}

/// Bookkeeping carried alongside a defect
///
/// Known keys are typed; anything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub progress: Vec<ProgressRecord>,

    #[serde(default)]
    pub reinspection_count: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reinspections: Vec<Reinspection>,

    /// Number of the escalated issue, e.g. `ISS-0012`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_issue_number: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DefectMetadata {
    /// Most recent reported completion
    pub fn latest_percent(&self) -> Option<u8> {
        self.progress.last().map(|p| p.percent)
    }
}

/// Input for a new QA defect
#[derive(Debug, Clone, Default)]
pub struct NewQaDefect {
    pub blueprint_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub severity: DefectSeverity,
    pub inspection_id: Option<String>,
    pub task_id: Option<String>,
    pub photos: Vec<String>,
}

/// Edit of a defect's descriptive fields; `None` leaves a field alone
#[derive(Debug, Clone, Default)]
pub struct QaDefectPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub severity: Option<DefectSeverity>,
}

/// A QA defect found during quality inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaDefect {
    /// Unique identifier
    pub id: EntityId,

    pub blueprint_id: String,

    /// Inspection that found the defect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspection_id: Option<String>,

    /// Task / work item the defect belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub severity: DefectSeverity,

    #[serde(default)]
    pub status: QaDefectStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,

    /// Remediation due date: creation time plus the severity's SLA days
    pub deadline: DateTime<Utc>,

    /// Escalated issue, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_issue_id: Option<EntityId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos: Vec<String>,

    #[serde(default)]
    pub metadata: DefectMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub audit: Audit,

    #[serde(default)]
    pub version: u64,
}

impl QaDefect {
    /// Create a new open defect with its SLA deadline
    ///
    /// `None` when the SLA pushes the deadline off the calendar.
    pub fn new(
        data: NewQaDefect,
        sla: &SlaPolicy,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let deadline = sla_deadline(data.severity, now, sla)?;
        Some(Self {
            id: EntityId::new(EntityPrefix::Qad),
            blueprint_id: data.blueprint_id,
            inspection_id: data.inspection_id,
            task_id: data.task_id,
            title: data.title,
            description: data.description,
            location: data.location,
            category: data.category,
            severity: data.severity,
            status: QaDefectStatus::initial(),
            assignee: None,
            assigned_by: None,
            deadline,
            linked_issue_id: None,
            photos: data.photos,
            metadata: DefectMetadata::default(),
            resolved_at: None,
            verified_at: None,
            closed_at: None,
            audit: Audit::new(actor, now),
            version: 0,
        })
    }

    /// Apply an edit, returning the names of the fields that changed
    ///
    /// A severity change moves the deadline to creation time plus the new
    /// severity's SLA. `None` when that deadline is off the calendar; the
    /// defect is left untouched then.
    pub fn apply_patch(
        &mut self,
        patch: QaDefectPatch,
        sla: &SlaPolicy,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Option<Vec<&'static str>> {
        let deadline = match patch.severity {
            Some(severity) if severity != self.severity => {
                Some(sla_deadline(severity, self.audit.created_at, sla)?)
            }
            _ => None,
        };

        let mut changed = Vec::new();
        set_field(&mut changed, "title", &mut self.title, patch.title);
        set_field(&mut changed, "description", &mut self.description, patch.description.map(Some));
        set_field(&mut changed, "location", &mut self.location, patch.location.map(Some));
        set_field(&mut changed, "category", &mut self.category, patch.category.map(Some));
        set_field(&mut changed, "severity", &mut self.severity, patch.severity);
        set_field(&mut changed, "deadline", &mut self.deadline, deadline);
        if !changed.is_empty() {
            self.audit.touch(actor, now);
        }
        Some(changed)
    }

    /// Whether this defect should spawn a linked issue
    pub fn should_auto_create_issue(&self) -> bool {
        self.severity == DefectSeverity::Critical && self.linked_issue_id.is_none()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        is_overdue(self.status, self.deadline, now)
    }
}

impl Entity for QaDefect {
    const PREFIX: EntityPrefix = EntityPrefix::Qad;
    type Status = QaDefectStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn parent_id(&self) -> String {
        self.blueprint_id.clone()
    }

    fn status(&self) -> QaDefectStatus {
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

    fn apply_status(&mut self, to: QaDefectStatus, actor: &str, now: DateTime<Utc>) {
        match (self.status, to) {
            (_, QaDefectStatus::Resolved) => self.resolved_at = Some(now),
            (_, QaDefectStatus::Verified) => self.verified_at = Some(now),
            (_, QaDefectStatus::Closed) => self.closed_at = Some(now),
            // Rework after resolution invalidates it
            (QaDefectStatus::Resolved, QaDefectStatus::InProgress) => self.resolved_at = None,
            (_, QaDefectStatus::Open) => {
                self.assignee = None;
                self.assigned_by = None;
            }
            _ => {}
        }
        self.status = to;
        self.audit.touch(actor, now);
    }
}
