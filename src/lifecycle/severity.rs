//! Severity classification for auto-created records
//!
//! Both heuristics are best effort and sit behind [`SeverityClassifier`].
//! A picked severity can be corrected afterwards with the owning
//! service's `update` (`IssueService::update`, `QaDefectService::update`).

use crate::entities::issue::IssueSeverity;
use crate::entities::qa_defect::DefectSeverity;
use crate::lifecycle::FailedItem;

/// Pick a severity for one failed item
pub trait SeverityClassifier<S>: Send + Sync {
    fn classify(&self, item: &FailedItem) -> S;
}

/// Keyword match on free-text notes (issues)
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    pub critical: Vec<String>,
    pub major: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            critical: vec!["critical".into(), "嚴重".into(), "危險".into()],
            major: vec!["major".into(), "重大".into()],
        }
    }
}

impl SeverityClassifier<IssueSeverity> for KeywordClassifier {
    fn classify(&self, item: &FailedItem) -> IssueSeverity {
        let Some(notes) = item.notes.as_deref() else {
            return IssueSeverity::Minor;
        };
        let notes = notes.to_lowercase();
        let hit = |words: &[String]| words.iter().any(|w| notes.contains(&w.to_lowercase()));

        if hit(&self.critical) {
            IssueSeverity::Critical
        } else if hit(&self.major) {
            IssueSeverity::Major
        } else {
            IssueSeverity::Minor
        }
    }
}

/// Structural flags on the failed item (QA defects)
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralFlagClassifier;

impl SeverityClassifier<DefectSeverity> for StructuralFlagClassifier {
    fn classify(&self, item: &FailedItem) -> DefectSeverity {
        if item.is_structural || item.is_safety {
            DefectSeverity::Critical
        } else if item.is_waterproofing || item.is_electrical {
            DefectSeverity::High
        } else {
            DefectSeverity::Medium
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(notes: &str) -> FailedItem {
        FailedItem {
            item_name: "Balcony railing".to_string(),
            notes: Some(notes.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_keyword_classifier() {
        let c = KeywordClassifier::default();
        assert_eq!(c.classify(&item("CRITICAL: loose anchor")), IssueSeverity::Critical);
        assert_eq!(c.classify(&item("欄杆鬆動,危險")), IssueSeverity::Critical);
        assert_eq!(c.classify(&item("major scratch")), IssueSeverity::Major);
        assert_eq!(c.classify(&item("重大瑕疵")), IssueSeverity::Major);
        assert_eq!(c.classify(&item("paint touch-up")), IssueSeverity::Minor);
        assert_eq!(c.classify(&FailedItem::default()), IssueSeverity::Minor);
    }

    #[test]
    fn test_critical_wins_over_major() {
        let c = KeywordClassifier::default();
        assert_eq!(
            c.classify(&item("major crack, critical load path")),
            IssueSeverity::Critical
        );
    }

    #[test]
    fn test_structural_flags() {
        let c = StructuralFlagClassifier;
        let mut i = FailedItem::default();
        assert_eq!(c.classify(&i), DefectSeverity::Medium);
        i.is_electrical = true;
        assert_eq!(c.classify(&i), DefectSeverity::High);
        i.is_safety = true;
        assert_eq!(c.classify(&i), DefectSeverity::Critical);
    }
}
