//! Entity type definitions
//!
//! SiteCare tracks the following entity types:
//!
//! - [`Issue`] - Trackable site problems, manual or auto-created
//! - [`QaDefect`] - Quality-control findings with SLA deadlines
//! - [`Warranty`] - Time-bounded guarantees with defect/repair counters
//! - [`WarrantyDefect`] - Claims reported against a warranty
//! - [`Repair`] - Work orders against a warranty defect

pub mod issue;
pub mod qa_defect;
pub mod repair;
pub mod warranty;
pub mod warranty_defect;

pub use issue::Issue;
pub use qa_defect::QaDefect;
pub use repair::Repair;
pub use warranty::Warranty;
pub use warranty_defect::WarrantyDefect;
