//! Warranty entity type - time-bounded guarantees after acceptance

use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::entity::{Audit, Entity};
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;

/// Warranty lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyStatus {
    #[default]
    Pending,
    Active,
    Expiring,
    Expired,
    Completed,
    Voided,
}

impl WarrantyStatus {
    /// Whether defects may be reported against the warranty
    pub fn accepts_claims(&self) -> bool {
        matches!(self, WarrantyStatus::Active | WarrantyStatus::Expiring)
    }
}

impl Lifecycle for WarrantyStatus {
    const ENTITY: &'static str = "warranty";

    fn all() -> &'static [Self] {
        use WarrantyStatus::*;
        &[Pending, Active, Expiring, Expired, Completed, Voided]
    }

    fn initial() -> Self {
        WarrantyStatus::Pending
    }

    fn successors(self) -> &'static [Self] {
        use WarrantyStatus::*;
        match self {
            Pending => &[Active, Voided],
            Active => &[Expiring, Completed, Voided],
            Expiring => &[Active, Expired, Completed],
            Expired => &[Completed],
            Completed => &[],
            Voided => &[],
        }
    }
}

impl std::fmt::Display for WarrantyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarrantyStatus::Pending => write!(f, "pending"),
            WarrantyStatus::Active => write!(f, "active"),
            WarrantyStatus::Expiring => write!(f, "expiring"),
            WarrantyStatus::Expired => write!(f, "expired"),
            WarrantyStatus::Completed => write!(f, "completed"),
            WarrantyStatus::Voided => write!(f, "voided"),
        }
    }
}

impl std::str::FromStr for WarrantyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(WarrantyStatus::Pending),
            "active" => Ok(WarrantyStatus::Active),
            "expiring" => Ok(WarrantyStatus::Expiring),
            "expired" => Ok(WarrantyStatus::Expired),
            "completed" => Ok(WarrantyStatus::Completed),
            "voided" => Ok(WarrantyStatus::Voided),
            _ => Err(format!(
                "Invalid warranty status: {}. Use pending, active, expiring, expired, completed, or voided",
                s
            )),
        }
    }
}

/// Warranty coverage type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WarrantyType {
    #[default]
    General,
    Structural,
    Waterproofing,
    Equipment,
}

impl std::fmt::Display for WarrantyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarrantyType::General => write!(f, "general"),
            WarrantyType::Structural => write!(f, "structural"),
            WarrantyType::Waterproofing => write!(f, "waterproofing"),
            WarrantyType::Equipment => write!(f, "equipment"),
        }
    }
}

impl std::str::FromStr for WarrantyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(WarrantyType::General),
            "structural" => Ok(WarrantyType::Structural),
            "waterproofing" => Ok(WarrantyType::Waterproofing),
            "equipment" => Ok(WarrantyType::Equipment),
            _ => Err(format!(
                "Invalid warranty type: {}. Use general, structural, waterproofing, or equipment",
                s
            )),
        }
    }
}

/// Party giving the guarantee
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warrantor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

/// Expiry reminder settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub enabled: bool,

    /// Days before the end date at which to notify
    #[serde(default)]
    pub days_before: Vec<u32>,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            days_before: vec![30, 7],
        }
    }
}

/// Input for a new warranty
#[derive(Debug, Clone, Default)]
pub struct NewWarranty {
    pub blueprint_id: String,
    pub contract_id: Option<String>,
    pub acceptance_id: Option<String>,
    pub task_ids: Vec<String>,
    pub warranty_number: Option<String>,
    pub warranty_type: WarrantyType,
    pub start_date: NaiveDate,
    pub period_months: u32,
    pub warrantor: Warrantor,
    pub notifications: Option<NotificationSettings>,
    pub notes: Option<String>,
}

/// A warranty over delivered work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warranty {
    /// Unique identifier
    pub id: EntityId,

    pub blueprint_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,

    /// Acceptance event the warranty starts from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<String>,

    pub warranty_number: String,

    #[serde(default)]
    pub warranty_type: WarrantyType,

    pub start_date: NaiveDate,

    /// Always `start_date + period_months`
    pub end_date: NaiveDate,

    pub period_months: u32,

    pub warrantor: Warrantor,

    #[serde(default)]
    pub status: WarrantyStatus,

    /// Incrementally maintained count of warranty defects
    #[serde(default)]
    pub defect_count: u32,

    /// Incrementally maintained count of repairs
    #[serde(default)]
    pub repair_count: u32,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void_reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub audit: Audit,

    #[serde(default)]
    pub version: u64,
}

/// `start + months`, clamped to the end of shorter months
///
/// `None` on calendar overflow.
pub fn compute_end_date(start: NaiveDate, period_months: u32) -> Option<NaiveDate> {
    start.checked_add_months(Months::new(period_months))
}

impl Warranty {
    /// Create a pending warranty
    ///
    /// Returns `None` when the period is zero or the end date overflows.
    pub fn new(data: NewWarranty, actor: &str, now: DateTime<Utc>) -> Option<Self> {
        if data.period_months == 0 {
            return None;
        }
        let end_date = compute_end_date(data.start_date, data.period_months)?;
        let id = EntityId::new(EntityPrefix::Wty);
        let warranty_number = data
            .warranty_number
            .unwrap_or_else(|| format!("W-{}-{}", data.start_date.format("%Y%m%d"), short(&id)));

        Some(Self {
            id,
            blueprint_id: data.blueprint_id,
            contract_id: data.contract_id,
            acceptance_id: data.acceptance_id,
            task_ids: data.task_ids,
            warranty_number,
            warranty_type: data.warranty_type,
            start_date: data.start_date,
            end_date,
            period_months: data.period_months,
            warrantor: data.warrantor,
            status: WarrantyStatus::initial(),
            defect_count: 0,
            repair_count: 0,
            notifications: data.notifications.unwrap_or_default(),
            notes: data.notes,
            void_reason: None,
            activated_at: None,
            closed_at: None,
            audit: Audit::new(actor, now),
            version: 0,
        })
    }

    /// End of coverage as an instant (midnight UTC of the end date)
    pub fn end_at(&self) -> DateTime<Utc> {
        self.end_date.and_time(NaiveTime::MIN).and_utc()
    }
}

fn short(id: &EntityId) -> String {
    let ulid = id.ulid().to_string();
    ulid[ulid.len() - 6..].to_string()
}

impl Entity for Warranty {
    const PREFIX: EntityPrefix = EntityPrefix::Wty;
    type Status = WarrantyStatus;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn parent_id(&self) -> String {
        self.blueprint_id.clone()
    }

    fn status(&self) -> WarrantyStatus {
        self.status
    }

    fn title(&self) -> &str {
        &self.warranty_number
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

    fn apply_status(&mut self, to: WarrantyStatus, actor: &str, now: DateTime<Utc>) {
        match to {
            WarrantyStatus::Active if self.activated_at.is_none() => self.activated_at = Some(now),
            WarrantyStatus::Completed | WarrantyStatus::Voided => self.closed_at = Some(now),
            _ => {}
        }
        self.status = to;
        self.audit.touch(actor, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_warranty(start: NaiveDate, months: u32) -> NewWarranty {
        NewWarranty {
            blueprint_id: "BP-1".to_string(),
            start_date: start,
            period_months: months,
            warrantor: Warrantor {
                name: "Acme Builders".to_string(),
                contact: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_end_date_is_start_plus_period() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let w = Warranty::new(new_warranty(start, 12), "pm", Utc::now()).unwrap();
        assert_eq!(w.end_date, NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        assert_eq!(w.status, WarrantyStatus::Pending);
        assert!(w.warranty_number.starts_with("W-20250101-"));
    }

    #[test]
    fn test_end_date_clamps_month_end() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            compute_end_date(start, 1),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
    }

    #[test]
    fn test_zero_period_rejected() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert!(Warranty::new(new_warranty(start, 0), "pm", Utc::now()).is_none());
    }

    #[test]
    fn test_accepts_claims() {
        assert!(WarrantyStatus::Active.accepts_claims());
        assert!(WarrantyStatus::Expiring.accepts_claims());
        assert!(!WarrantyStatus::Pending.accepts_claims());
        assert!(!WarrantyStatus::Expired.accepts_claims());
    }

    #[test]
    fn test_activation_stamp_kept_on_reactivation() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut w = Warranty::new(new_warranty(start, 12), "pm", Utc::now()).unwrap();
        let t0 = Utc::now();
        w.apply_status(WarrantyStatus::Active, "pm", t0);
        w.apply_status(WarrantyStatus::Expiring, "sweep", t0 + chrono::Duration::days(1));
        w.apply_status(WarrantyStatus::Active, "pm", t0 + chrono::Duration::days(2));
        assert_eq!(w.activated_at, Some(t0));
    }
}
