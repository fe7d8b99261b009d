//! `sitecare claim` command - Defects reported against a warranty

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{parse_date, parse_id, Session};
use crate::cli::output::{print_changed, print_record, print_value};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::EntityPrefix;
use crate::entities::qa_defect::DefectSeverity;
use crate::entities::warranty_defect::{
    NewWarrantyDefect, WarrantyDefectPatch, WarrantyDefectStatus,
};
use crate::lifecycle::Synced;

#[derive(Subcommand, Debug)]
pub enum ClaimCommands {
    /// Report a defect against an active or expiring warranty
    Report(ReportArgs),

    /// Show a claim's details
    Show(IdArgs),

    /// Edit a claim's details (raising it to critical escalates it)
    Edit(EditArgs),

    /// Move a claim to another status
    Transition(TransitionArgs),

    /// Assign a claim for follow-up
    Assign(AssignArgs),

    /// Reject a claim, recording why
    Reject(RejectArgs),

    /// Create a linked issue for a claim
    Escalate(IdArgs),
}

#[derive(clap::Args, Debug)]
pub struct ReportArgs {
    /// Warranty ID (WTY-...)
    #[arg(long, short = 'w')]
    pub warranty: String,

    #[arg(long, short = 't')]
    pub title: String,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'l')]
    pub location: Option<String>,

    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Severity (critical, high, medium, low)
    #[arg(long, short = 'S', default_value = "medium")]
    pub severity: DefectSeverity,

    /// Date the defect was discovered (YYYY-MM-DD, default: today)
    #[arg(long)]
    pub discovered: Option<String>,

    /// Who reported it (default: actor)
    #[arg(long)]
    pub reporter: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct IdArgs {
    /// Claim ID (WDF-...)
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct EditArgs {
    /// Claim ID (WDF-...)
    pub id: String,

    #[arg(long, short = 't')]
    pub title: Option<String>,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'l')]
    pub location: Option<String>,

    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Severity (critical, high, medium, low)
    #[arg(long, short = 'S')]
    pub severity: Option<DefectSeverity>,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// Claim ID (WDF-...)
    pub id: String,

    /// Target status (reported, confirmed, under_repair, repaired, verified, closed, rejected)
    pub to: WarrantyDefectStatus,
}

#[derive(clap::Args, Debug)]
pub struct AssignArgs {
    /// Claim ID (WDF-...)
    pub id: String,

    pub assignee: String,
}

#[derive(clap::Args, Debug)]
pub struct RejectArgs {
    /// Claim ID (WDF-...)
    pub id: String,

    #[arg(long, short = 'r')]
    pub reason: String,
}

pub fn run(cmd: ClaimCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let engine = &session.engine;
    let actor = session.actor.as_str();
    match cmd {
        ClaimCommands::Report(args) => {
            let warranty_id = parse_id(&args.warranty, EntityPrefix::Wty)?;
            let discovered_date = args.discovered.as_deref().map(parse_date).transpose()?;
            let data = NewWarrantyDefect {
                title: args.title,
                description: args.description,
                location: args.location,
                category: args.category,
                severity: args.severity,
                discovered_date,
                reporter: args.reporter,
                ..Default::default()
            };
            let synced = session.block_on(engine.report_claim(&warranty_id, data, actor))?;
            print_changed(&synced, "Reported claim", global.format)
        }
        ClaimCommands::Show(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let defect = session.block_on(engine.warranty_defects().get(&id))?;
            print_record(&defect, global.format)
        }
        ClaimCommands::Edit(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let patch = WarrantyDefectPatch {
                title: args.title,
                description: args.description,
                location: args.location,
                category: args.category,
                severity: args.severity,
            };
            let synced = session.block_on(engine.update_claim(&id, patch, actor))?;
            print_changed(&synced, "Updated claim", global.format)
        }
        ClaimCommands::Transition(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let synced = session.block_on(engine.transition_claim(&id, args.to, actor))?;
            print_changed(&synced, "Moved claim", global.format)
        }
        ClaimCommands::Assign(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let defect =
                session.block_on(engine.warranty_defects().assign(&id, &args.assignee, actor))?;
            print_changed(&Synced::new(defect), "Assigned claim", global.format)
        }
        ClaimCommands::Reject(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let defect =
                session.block_on(engine.warranty_defects().reject(&id, &args.reason, actor))?;
            print_changed(&Synced::new(defect), "Rejected claim", global.format)
        }
        ClaimCommands::Escalate(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wdf)?;
            let issue = session.block_on(engine.escalate_claim(&id, actor))?;
            match global.format {
                OutputFormat::Auto => {
                    println!(
                        "{} Escalated {} to {} ({})",
                        style("✓").green(),
                        style(&id).cyan(),
                        style(issue.issue_number()).yellow(),
                        issue.id
                    );
                    Ok(())
                }
                OutputFormat::Id => {
                    println!("{}", issue.id);
                    Ok(())
                }
                format => print_value(&issue, format),
            }
        }
    }
}
