//! Command implementations

pub mod claim;
pub mod completions;
pub mod defect;
pub mod init;
pub mod issue;
pub mod reconcile;
pub mod repair;
pub mod status;
pub mod sweep;
pub mod warranty;
