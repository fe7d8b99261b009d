//! Domain event payloads published on the message bus
//!
//! Event types are `<kind>.<action>`, e.g. `issue.status_changed` or
//! `warranty_defect.escalated`.

use serde::{Deserialize, Serialize};

use crate::core::identity::{EntityId, EntityPrefix};

/// Where a status change came from
///
/// A change applied by the synchronizer carries the kind of the entity
/// whose change triggered it, so the reverse propagation can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "trigger", rename_all = "snake_case")]
pub enum TransitionOrigin {
    /// An actor asked for it
    #[default]
    Direct,
    /// Propagated from a linked entity of the given kind
    Sync(EntityPrefix),
}

impl TransitionOrigin {
    /// Whether this change was propagated from an entity of `kind`
    pub fn is_sync_from(&self, kind: EntityPrefix) -> bool {
        *self == TransitionOrigin::Sync(kind)
    }
}

impl std::fmt::Display for TransitionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionOrigin::Direct => write!(f, "direct"),
            TransitionOrigin::Sync(kind) => write!(f, "sync:{}", kind.kind()),
        }
    }
}

/// `<kind>.status_changed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub entity_id: EntityId,
    pub previous_status: String,
    pub new_status: String,
    pub actor: String,
    pub origin: TransitionOrigin,
}

/// `<kind>.created`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub entity_id: EntityId,
    pub parent_id: String,
    pub actor: String,
}

/// `<kind>.updated`, after an edit of non-status fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Updated {
    pub entity_id: EntityId,
    pub fields: Vec<String>,
    pub actor: String,
}

/// `<kind>.batch_created`, one per auto-creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCreated {
    pub source: String,
    pub source_id: String,
    pub entity_ids: Vec<EntityId>,
    pub actor: String,
}

/// `<kind>.assigned`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assigned {
    pub entity_id: EntityId,
    pub assignee: String,
    pub actor: String,
}

/// `<kind>.escalated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalated {
    pub defect_id: EntityId,
    pub issue_id: EntityId,
    pub issue_number: String,
    pub actor: String,
}

/// `warranty.swept`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swept {
    pub blueprint_id: String,
    pub expiring: Vec<EntityId>,
    pub expired: Vec<EntityId>,
    pub actor: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_serializes_with_trigger() {
        let json = serde_json::to_value(TransitionOrigin::Sync(EntityPrefix::Qad)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "sync", "trigger": "QAD"}));
        let json = serde_json::to_value(TransitionOrigin::Direct).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "direct"}));
    }

    #[test]
    fn test_is_sync_from() {
        let origin = TransitionOrigin::Sync(EntityPrefix::Iss);
        assert!(origin.is_sync_from(EntityPrefix::Iss));
        assert!(!origin.is_sync_from(EntityPrefix::Qad));
        assert!(!TransitionOrigin::Direct.is_sync_from(EntityPrefix::Iss));
        assert_eq!(origin.to_string(), "sync:issue");
    }
}
