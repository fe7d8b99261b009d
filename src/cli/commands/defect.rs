//! `sitecare defect` command - QA defect management

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{parse_id, Session};
use crate::cli::output::{print_changed, print_list, print_record, print_value, Column};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::EntityPrefix;
use crate::entities::qa_defect::{
    DefectSeverity, NewQaDefect, QaDefect, QaDefectPatch, QaDefectStatus,
};
use crate::lifecycle::Synced;

#[derive(Subcommand, Debug)]
pub enum DefectCommands {
    /// Record a new QA defect (critical defects escalate to an issue)
    New(NewArgs),

    /// List QA defects of a blueprint
    List(ListArgs),

    /// Show a QA defect's details
    Show(ShowArgs),

    /// Edit a QA defect's details (raising it to critical escalates it)
    Edit(EditArgs),

    /// Move a QA defect to another status
    Transition(TransitionArgs),

    /// Assign a QA defect (an open defect moves to assigned)
    Assign(AssignArgs),

    /// Record progress on an assigned or in-progress defect
    Progress(ProgressArgs),

    /// Reinspect a resolved defect
    Reinspect(ReinspectArgs),

    /// Create a linked issue for a QA defect
    Escalate(ShowArgs),

    /// List defects past their SLA deadline
    Overdue(BlueprintArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Blueprint the defect belongs to
    #[arg(long, short = 'b')]
    pub blueprint: String,

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

    /// Inspection that found the defect
    #[arg(long)]
    pub inspection: Option<String>,

    #[arg(long)]
    pub task: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Only defects in this status
    #[arg(long, short = 's')]
    pub status: Option<QaDefectStatus>,

    /// Only defects of this severity
    #[arg(long)]
    pub severity: Option<DefectSeverity>,
}

#[derive(clap::Args, Debug)]
pub struct BlueprintArgs {
    #[arg(long, short = 'b')]
    pub blueprint: String,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// QA defect ID (QAD-...)
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct EditArgs {
    /// QA defect ID (QAD-...)
    pub id: String,

    #[arg(long, short = 't')]
    pub title: Option<String>,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'l')]
    pub location: Option<String>,

    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// New severity; the SLA deadline follows it
    #[arg(long, short = 'S')]
    pub severity: Option<DefectSeverity>,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// QA defect ID (QAD-...)
    pub id: String,

    /// Target status (open, assigned, in_progress, resolved, verified, closed)
    pub to: QaDefectStatus,
}

#[derive(clap::Args, Debug)]
pub struct AssignArgs {
    /// QA defect ID (QAD-...)
    pub id: String,

    pub assignee: String,
}

#[derive(clap::Args, Debug)]
pub struct ProgressArgs {
    /// QA defect ID (QAD-...)
    pub id: String,

    /// Percent complete (clamped to 0-100)
    #[arg(long, allow_hyphen_values = true)]
    pub percent: i32,

    #[arg(long, short = 'd')]
    pub description: String,
}

#[derive(clap::Args, Debug)]
pub struct ReinspectArgs {
    /// QA defect ID (QAD-...)
    pub id: String,

    /// Reinspection failed; work resumes
    #[arg(long)]
    pub fail: bool,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

const COLUMNS: &[Column<QaDefect>] = &[
    Column::new("SEVERITY", 8, |d: &QaDefect| d.severity.to_string()),
    Column::new("DEADLINE", 10, |d: &QaDefect| d.deadline.format("%Y-%m-%d").to_string()),
    Column::new("ASSIGNEE", 14, |d: &QaDefect| d.assignee.clone().unwrap_or_default()),
];

pub fn run(cmd: DefectCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let engine = &session.engine;
    let actor = session.actor.as_str();
    match cmd {
        DefectCommands::New(args) => {
            let data = NewQaDefect {
                blueprint_id: args.blueprint,
                title: args.title,
                description: args.description,
                location: args.location,
                category: args.category,
                severity: args.severity,
                inspection_id: args.inspection,
                task_id: args.task,
                ..Default::default()
            };
            let synced = session.block_on(engine.create_qa_defect(data, actor))?;
            print_changed(&synced, "Created QA defect", global.format)
        }
        DefectCommands::List(args) => {
            let mut defects = session.block_on(engine.qa_defects().list(&args.blueprint))?;
            if let Some(status) = args.status {
                defects.retain(|d| d.status == status);
            }
            if let Some(severity) = args.severity {
                defects.retain(|d| d.severity == severity);
            }
            print_list(&defects, global.format, "QA defect", COLUMNS)
        }
        DefectCommands::Show(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let defect = session.block_on(engine.qa_defects().get(&id))?;
            print_record(&defect, global.format)
        }
        DefectCommands::Edit(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let patch = QaDefectPatch {
                title: args.title,
                description: args.description,
                location: args.location,
                category: args.category,
                severity: args.severity,
            };
            let synced = session.block_on(engine.update_qa_defect(&id, patch, actor))?;
            print_changed(&synced, "Updated QA defect", global.format)
        }
        DefectCommands::Transition(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let synced = session.block_on(engine.transition_qa_defect(&id, args.to, actor))?;
            print_changed(&synced, "Moved QA defect", global.format)
        }
        DefectCommands::Assign(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let synced = session.block_on(engine.assign_qa_defect(&id, &args.assignee, actor))?;
            print_changed(&synced, "Assigned QA defect", global.format)
        }
        DefectCommands::Progress(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let defect = session.block_on(engine.qa_defects().record_progress(
                &id,
                args.percent,
                &args.description,
                Vec::new(),
                actor,
            ))?;
            print_changed(&Synced::new(defect), "Recorded progress on", global.format)
        }
        DefectCommands::Reinspect(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let synced =
                session.block_on(engine.reinspect_qa_defect(&id, !args.fail, actor, args.notes))?;
            print_changed(&synced, "Reinspected QA defect", global.format)
        }
        DefectCommands::Escalate(args) => {
            let id = parse_id(&args.id, EntityPrefix::Qad)?;
            let issue = session.block_on(engine.escalate_qa_defect(&id, actor))?;
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
        DefectCommands::Overdue(args) => {
            let defects = session.block_on(engine.qa_defects().overdue(&args.blueprint))?;
            print_list(&defects, global.format, "overdue QA defect", COLUMNS)
        }
    }
}
