//! SiteCare: quality, defect and warranty lifecycle engine
//!
//! Finite-state lifecycles for site issues, QA defects, warranties,
//! warranty defects and repairs, kept in sync with each other and
//! monitored against severity-driven deadlines.

pub mod cli;
pub mod core;
pub mod entities;
pub mod lifecycle;
