//! Issue entity type - trackable site problems

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{set_field, Audit, Entity, Priority};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;

/// Issue workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
    Verified,
    Closed,
}

impl Lifecycle for IssueStatus {
    const ENTITY: &'static str = "issue";

    fn all() -> &'static [Self] {
        use IssueStatus::*;
        &[Open, InProgress, Resolved, Verified, Closed]
    }

    fn initial() -> Self {
        IssueStatus::Open
    }

    fn successors(self) -> &'static [Self] {
        use IssueStatus::*;
        match self {
            Open => &[InProgress, Closed],
            InProgress => &[Open, Resolved, Closed],
            Resolved => &[InProgress, Verified, Closed],
            Verified => &[InProgress, Closed],
            // Reopen only
            Closed => &[Open],
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueStatus::Open => write!(f, "open"),
            IssueStatus::InProgress => write!(f, "in_progress"),
            IssueStatus::Resolved => write!(f, "resolved"),
            IssueStatus::Verified => write!(f, "verified"),
            IssueStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "open" => Ok(IssueStatus::Open),
            "in_progress" => Ok(IssueStatus::InProgress),
            "resolved" => Ok(IssueStatus::Resolved),
            "verified" => Ok(IssueStatus::Verified),
            "closed" => Ok(IssueStatus::Closed),
            _ => Err(format!(
                "Invalid issue status: {}. Use open, in_progress, resolved, verified, or closed",
                s
            )),
        }
    }
}

/// Issue severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    #[default]
    Minor,
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSeverity::Critical => write!(f, "critical"),
            IssueSeverity::Major => write!(f, "major"),
            IssueSeverity::Minor => write!(f, "minor"),
        }
    }
}

impl std::str::FromStr for IssueSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(IssueSeverity::Critical),
            "major" => Ok(IssueSeverity::Major),
            "minor" => Ok(IssueSeverity::Minor),
            _ => Err(format!(
                "Invalid issue severity: {}. Use critical, major, or minor",
                s
            )),
        }
    }
}

/// Where an issue came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    #[default]
    Manual,
    Acceptance,
    Qc,
    Warranty,
    Safety,
}

impl std::fmt::Display for IssueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueSource::Manual => write!(f, "manual"),
            IssueSource::Acceptance => write!(f, "acceptance"),
            IssueSource::Qc => write!(f, "qc"),
            IssueSource::Warranty => write!(f, "warranty"),
            IssueSource::Safety => write!(f, "safety"),
        }
    }
}

impl std::str::FromStr for IssueSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(IssueSource::Manual),
            "acceptance" => Ok(IssueSource::Acceptance),
            "qc" => Ok(IssueSource::Qc),
            "warranty" => Ok(IssueSource::Warranty),
            "safety" => Ok(IssueSource::Safety),
            _ => Err(format!(
                "Invalid issue source: {}. Use manual, acceptance, qc, warranty, or safety",
                s
            )),
        }
    }
}

/// How an issue was fixed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Remediation method (e.g. "replaced tiles")
    pub method: String,

    /// Who performed the fix
    pub resolver: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    #[default]
    Pass,
    Fail,
}

impl std::fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationResult::Pass => write!(f, "pass"),
            VerificationResult::Fail => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for VerificationResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pass" | "passed" => Ok(VerificationResult::Pass),
            "fail" | "failed" => Ok(VerificationResult::Fail),
            _ => Err(format!("Invalid verification result: {}. Use pass or fail", s)),
        }
    }
}

/// Verification of a resolution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub result: VerificationResult,

    pub verifier: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Input for a new issue
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub blueprint_id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub severity: IssueSeverity,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub responsible_party: Option<String>,
    pub source: IssueSource,
    pub source_id: Option<String>,
    pub photos_before: Vec<String>,
}

/// Edit of an issue's descriptive fields; `None` leaves a field alone
///
/// Status is not editable here; it only moves through transitions.
#[derive(Debug, Clone, Default)]
pub struct IssuePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub severity: Option<IssueSeverity>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub responsible_party: Option<String>,
}

/// An issue - a tracked defect or problem on a blueprint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier
    pub id: EntityId,

    /// Owning blueprint (project)
    pub blueprint_id: String,

    /// Per-blueprint sequence number
    pub sequence: u32,

    pub source: IssueSource,

    /// Upstream event id, or the escalated defect id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    pub severity: IssueSeverity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Party responsible for the fix (usually the contractor)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible_party: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,

    #[serde(default)]
    pub status: IssueStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos_before: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photos_after: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub audit: Audit,

    #[serde(default)]
    pub version: u64,
}

impl Issue {
    /// Create a new open issue
    pub fn new(data: NewIssue, sequence: u32, actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: EntityId::new(EntityPrefix::Iss),
            blueprint_id: data.blueprint_id,
            sequence,
            source: data.source,
            source_id: data.source_id,
            title: data.title,
            description: data.description,
            location: data.location,
            severity: data.severity,
            priority: data.priority,
            category: data.category,
            responsible_party: data.responsible_party,
            assignee: None,
            assigned_by: None,
            status: IssueStatus::initial(),
            photos_before: data.photos_before,
            photos_after: Vec::new(),
            resolution: None,
            verification: None,
            resolved_at: None,
            closed_at: None,
            audit: Audit::new(actor, now),
            version: 0,
        }
    }

    /// Apply an edit, returning the names of the fields that changed
    pub fn apply_patch(
        &mut self,
        patch: IssuePatch,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Vec<&'static str> {
        let mut changed = Vec::new();
        set_field(&mut changed, "title", &mut self.title, patch.title);
        set_field(&mut changed, "description", &mut self.description, patch.description.map(Some));
        set_field(&mut changed, "location", &mut self.location, patch.location.map(Some));
        set_field(&mut changed, "severity", &mut self.severity, patch.severity);
        set_field(&mut changed, "priority", &mut self.priority, patch.priority.map(Some));
        set_field(&mut changed, "category", &mut self.category, patch.category.map(Some));
        set_field(
            &mut changed,
            "responsible_party",
            &mut self.responsible_party,
            patch.responsible_party.map(Some),
        );
        if !changed.is_empty() {
            self.audit.touch(actor, now);
        }
        changed
    }

    /// Human-facing number, e.g. `ISS-0007`
    pub fn issue_number(&self) -> String {
        format!("{}-{:04}", EntityPrefix::Iss, self.sequence)
    }
}

impl Entity for Issue {
    const PREFIX: EntityPrefix = EntityPrefix::Iss;
    type Status = IssueStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn parent_id(&self) -> String {
        self.blueprint_id.clone()
    }

    fn status(&self) -> IssueStatus {
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

    fn apply_status(&mut self, to: IssueStatus, actor: &str, now: DateTime<Utc>) {
        match to {
            IssueStatus::Resolved => self.resolved_at = Some(now),
            IssueStatus::Closed => self.closed_at = Some(now),
            IssueStatus::Open => {
                self.resolved_at = None;
                self.closed_at = None;
            }
            IssueStatus::InProgress | IssueStatus::Verified => {}
        }
        self.status = to;
        self.audit.touch(actor, now);
    }
}
