//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    claim::ClaimCommands,
    completions::CompletionsArgs,
    defect::DefectCommands,
    init::InitArgs,
    issue::IssueCommands,
    reconcile::ReconcileArgs,
    repair::RepairCommands,
    status::StatusArgs,
    sweep::SweepArgs,
    warranty::WarrantyCommands,
};

#[derive(Parser)]
#[command(name = "sitecare")]
#[command(author, version, about = "SiteCare quality, defect and warranty tracker")]
#[command(long_about = "Tracks site issues, QA defects, warranties, warranty claims and repairs \
through their lifecycles, keeping linked records in sync and watching deadlines.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug)]
pub struct GlobalOpts {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "auto")]
    pub format: OutputFormat,

    /// Enable verbose output (debug logging on stderr)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Actor recorded on audit fields (default: config, then $USER)
    #[arg(long, global = true, env = "SITECARE_ACTOR")]
    pub actor: Option<String>,

    /// Project root (default: auto-detect by finding .sitecare/)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new SiteCare project
    Init(InitArgs),

    /// Site issue management
    #[command(subcommand)]
    Issue(IssueCommands),

    /// QA defect management
    #[command(subcommand)]
    Defect(DefectCommands),

    /// Warranty management
    #[command(subcommand)]
    Warranty(WarrantyCommands),

    /// Warranty claims (defects reported against a warranty)
    #[command(subcommand)]
    Claim(ClaimCommands),

    /// Repair work orders
    #[command(subcommand)]
    Repair(RepairCommands),

    /// Move warranties of a blueprint to expiring/expired as of now
    Sweep(SweepArgs),

    /// Recount a warranty's defect and repair counters
    Reconcile(ReconcileArgs),

    /// Show blueprint status dashboard
    Status(StatusArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Automatically detect based on context (yaml for show, tsv for list)
    #[default]
    Auto,
    /// YAML format (full fidelity)
    Yaml,
    /// JSON format (for programming)
    Json,
    /// Tab-separated values (for piping)
    Tsv,
    /// Just IDs, one per line
    Id,
}
