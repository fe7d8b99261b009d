//! Shared helper functions for CLI commands
//!
//! Every command except `init` and `completions` opens a [`Session`]:
//! the discovered project, its config, the SQLite store and an engine
//! wired to a local bus and the system clock.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;
use miette::{IntoDiagnostic, Result};

use crate::cli::GlobalOpts;
use crate::core::bus::LocalBus;
use crate::core::clock::SystemClock;
use crate::core::config::Config;
use crate::core::identity::{EntityId, EntityPrefix};
use crate::core::logging::init_logging;
use crate::core::project::Project;
use crate::core::sqlite::SqliteStore;
use crate::lifecycle::{Engine, Repositories};

/// An opened project ready to run lifecycle operations
pub struct Session {
    pub engine: Engine,
    pub actor: String,
    pub config: Config,
    runtime: tokio::runtime::Runtime,
}

impl Session {
    pub fn open(global: &GlobalOpts) -> Result<Self> {
        let project = match &global.project {
            Some(root) => Project::discover_from(root),
            None => Project::discover(),
        }
        .map_err(|e| miette::miette!("{}", e))?;

        let config = Config::load_for(&project)?;
        let level = if global.verbose {
            "debug"
        } else {
            config.log_level.as_str()
        };
        init_logging(level, config.log_json);

        let store = SqliteStore::open(&project.store_path())
            .map_err(|e| miette::miette!("Failed to open store: {}", e))?;
        tracing::debug!(store = %project.store_path().display(), "Opened store");

        let engine = Engine::new(
            Repositories::sqlite(&store),
            Arc::new(LocalBus::new()),
            Arc::new(SystemClock),
            &config,
        );

        let actor = global.actor.clone().unwrap_or_else(|| config.actor());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .into_diagnostic()?;

        Ok(Self {
            engine,
            actor,
            config,
            runtime,
        })
    }

    /// Drive one engine call to completion
    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

/// Parse an id on the command line, requiring the given prefix
pub fn parse_id(s: &str, prefix: EntityPrefix) -> Result<EntityId> {
    EntityId::parse_as(s.trim(), prefix).map_err(|e| miette::miette!("{}", e))
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| miette::miette!("Invalid date '{}'. Expected YYYY-MM-DD", s))
}

/// Truncate a string to max_len, adding "..." if truncated
///
/// Useful for table columns that need fixed-width output.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Escape a field for TSV output
pub fn escape_tsv(s: &str) -> String {
    s.replace(['\t', '\n', '\r'], " ")
}
