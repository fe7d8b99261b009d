//! Workflow engine for status transitions
//!
//! Every lifecycle-managed entity has a status enum implementing
//! [`Lifecycle`]. The enum carries its own static transition table via
//! [`Lifecycle::successors`]; the free functions in this module are the
//! only validators the services use, so all five entity types share one
//! set of rules:
//!
//! - an edge absent from the table is forbidden
//! - a status with no successors is terminal
//! - validation is pure (no I/O, no side effects)

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use thiserror::Error;

/// A status enum with a static transition table
pub trait Lifecycle:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = String> + Send + Sync + 'static
{
    /// Entity kind name used in error messages (e.g. "issue")
    const ENTITY: &'static str;

    /// Every status value, in declaration order
    fn all() -> &'static [Self];

    /// Status a freshly created entity starts in
    fn initial() -> Self;

    /// Statuses reachable in one step from `self`
    fn successors(self) -> &'static [Self];

    /// Whether no transition leaves this status
    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Rejected status change, carrying the legal alternatives
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {entity} status transition: {from} → {to} (allowed: {})", format_allowed(.allowed))]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub to: String,
    pub allowed: Vec<String>,
}

fn format_allowed(allowed: &[String]) -> String {
    if allowed.is_empty() {
        "none, status is terminal".to_string()
    } else {
        allowed.join(", ")
    }
}

/// Check if a status transition is valid
pub fn can_transition<S: Lifecycle>(from: S, to: S) -> bool {
    from.successors().contains(&to)
}

/// Validate a transition, returning the allowed set on failure
pub fn validate_transition<S: Lifecycle>(from: S, to: S) -> Result<(), TransitionError> {
    if can_transition(from, to) {
        return Ok(());
    }
    Err(TransitionError {
        entity: S::ENTITY,
        from: from.to_string(),
        to: to.to_string(),
        allowed: from.successors().iter().map(|s| s.to_string()).collect(),
    })
}

/// Get allowed transitions from the current status
pub fn next_states<S: Lifecycle>(from: S) -> Vec<S> {
    from.successors().to_vec()
}

/// All directed edges of a table, in declaration order
pub fn edges<S: Lifecycle>() -> Vec<(S, S)> {
    S::all()
        .iter()
        .flat_map(|from| from.successors().iter().map(move |to| (*from, *to)))
        .collect()
}

/// Shortest sequence of legal steps from `from` to `to` (excluding `from`)
///
/// Returns `Some(vec![])` when already there and `None` when `to` is
/// unreachable. Used by batch jobs that must walk intermediate statuses
/// instead of jumping across a forbidden edge.
pub fn path_to<S: Lifecycle>(from: S, to: S) -> Option<Vec<S>> {
    if from == to {
        return Some(Vec::new());
    }

    let mut previous: HashMap<S, S> = HashMap::new();
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        for next in current.successors() {
            if *next == from || previous.contains_key(next) {
                continue;
            }
            previous.insert(*next, current);
            if *next == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(prev) = previous.get(&cursor) {
                    if *prev == from {
                        break;
                    }
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(*next);
        }
    }

    None
}

/// Check a transition table against an independently written edge list
///
/// Every `(from, to)` pair over all statuses must be allowed exactly when
/// it is listed, and a status must be terminal exactly when it is listed
/// in `terminal`.
#[cfg(test)]
pub(crate) fn assert_table_matches<S: Lifecycle>(expected: &[(S, S)], terminal: &[S]) {
    for from in S::all() {
        for to in S::all() {
            let listed = expected.contains(&(*from, *to));
            assert_eq!(
                validate_transition(*from, *to).is_ok(),
                listed,
                "{} {} -> {}",
                S::ENTITY,
                from,
                to
            );
        }
        assert_eq!(
            from.is_terminal(),
            terminal.contains(from),
            "{} {} terminal",
            S::ENTITY,
            from
        );
    }
    assert_eq!(edges::<S>().len(), expected.len(), "{} edge count", S::ENTITY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::issue::IssueStatus;
    use crate::entities::warranty::WarrantyStatus;

    #[test]
    fn test_valid_transitions() {
        assert!(can_transition(IssueStatus::Open, IssueStatus::InProgress));
        assert!(can_transition(IssueStatus::Closed, IssueStatus::Open));
        assert!(!can_transition(IssueStatus::Open, IssueStatus::Resolved));
        assert!(!can_transition(IssueStatus::Closed, IssueStatus::InProgress));
    }

    #[test]
    fn test_validate_reports_allowed() {
        let err = validate_transition(WarrantyStatus::Active, WarrantyStatus::Expired).unwrap_err();
        assert_eq!(err.entity, "warranty");
        assert_eq!(err.from, "active");
        assert_eq!(err.to, "expired");
        assert_eq!(err.allowed, vec!["expiring", "completed", "voided"]);
        assert!(err.to_string().contains("active → expired"));
    }

    #[test]
    fn test_terminal_message() {
        let err =
            validate_transition(WarrantyStatus::Voided, WarrantyStatus::Active).unwrap_err();
        assert!(err.allowed.is_empty());
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_next_states() {
        assert_eq!(
            next_states(IssueStatus::Resolved),
            vec![
                IssueStatus::InProgress,
                IssueStatus::Verified,
                IssueStatus::Closed
            ]
        );
        assert!(next_states(WarrantyStatus::Completed).is_empty());
    }

    #[test]
    fn test_path_to_walks_intermediate_status() {
        assert_eq!(
            path_to(WarrantyStatus::Active, WarrantyStatus::Expired),
            Some(vec![WarrantyStatus::Expiring, WarrantyStatus::Expired])
        );
        assert_eq!(
            path_to(WarrantyStatus::Expiring, WarrantyStatus::Expired),
            Some(vec![WarrantyStatus::Expired])
        );
        assert_eq!(
            path_to(WarrantyStatus::Active, WarrantyStatus::Active),
            Some(vec![])
        );
        assert_eq!(path_to(WarrantyStatus::Voided, WarrantyStatus::Active), None);
    }

    #[test]
    fn test_edges_match_successors() {
        let edges = edges::<WarrantyStatus>();
        assert_eq!(edges.len(), 9);
        assert!(edges.contains(&(WarrantyStatus::Pending, WarrantyStatus::Active)));
        assert!(!edges.contains(&(WarrantyStatus::Active, WarrantyStatus::Expired)));
    }
}
