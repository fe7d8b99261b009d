//! Entity trait - common interface for all entity types

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::workflow::Lifecycle;

/// Common trait for all SiteCare entities
///
/// `parent_id` is the owning aggregate: the blueprint for issues, QA
/// defects and warranties, the warranty for warranty defects, and the
/// warranty defect for repairs. Stores index on it for
/// `find_by_parent`.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The entity type prefix
    const PREFIX: EntityPrefix;

    /// Status enum carrying this entity's transition table
    type Status: Lifecycle;

    /// Get the entity's unique ID
    fn id(&self) -> &EntityId;

    /// Get the owning aggregate id
    fn parent_id(&self) -> String;

    /// Get the entity's current status
    fn status(&self) -> Self::Status;

    /// Get the entity's title
    fn title(&self) -> &str;

    /// Get the creation timestamp
    fn created(&self) -> DateTime<Utc>;

    /// Optimistic concurrency version (bumped by the store on every write)
    fn version(&self) -> u64;

    /// Overwrite the version; only stores call this
    fn set_version(&mut self, version: u64);

    /// Move to `to` and stamp the status-dependent fields
    ///
    /// Does not validate the edge; callers go through
    /// [`validate_transition`](crate::core::workflow::validate_transition) first.
    fn apply_status(&mut self, to: Self::Status, actor: &str, now: DateTime<Utc>);
}

/// Audit fields stamped by every mutating call
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Audit {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl Audit {
    pub fn new(actor: &str, now: DateTime<Utc>) -> Self {
        Self {
            created_by: actor.to_string(),
            created_at: now,
            updated_by: actor.to_string(),
            updated_at: now,
        }
    }

    /// Record a modification
    pub fn touch(&mut self, actor: &str, now: DateTime<Utc>) {
        self.updated_by = actor.to_string();
        self.updated_at = now;
    }
}

/// Overwrite `slot` when an edit supplies a different value
///
/// The field name is pushed onto `changed` only when the value moved.
pub fn set_field<T: PartialEq>(
    changed: &mut Vec<&'static str>,
    field: &'static str,
    slot: &mut T,
    value: Option<T>,
) {
    if let Some(value) = value {
        if *slot != value {
            *slot = value;
            changed.push(field);
        }
    }
}

/// Priority values common across entity types
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[derive(Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}
