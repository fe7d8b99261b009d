//! `sitecare issue` command - Site issue management

use clap::Subcommand;
use miette::Result;

use crate::cli::helpers::{parse_id, Session};
use crate::cli::output::{print_changed, print_list, print_record, Column};
use crate::cli::GlobalOpts;
use crate::core::entity::Priority;
use crate::core::identity::EntityPrefix;
use crate::entities::issue::{
    Issue, IssuePatch, IssueSeverity, IssueSource, IssueStatus, NewIssue, Resolution,
    Verification, VerificationResult,
};
use crate::lifecycle::Synced;

#[derive(Subcommand, Debug)]
pub enum IssueCommands {
    /// Record a new issue
    New(NewArgs),

    /// List issues of a blueprint
    List(ListArgs),

    /// Show an issue's details
    Show(ShowArgs),

    /// Edit an issue's details (status only moves through transitions)
    Edit(EditArgs),

    /// Move an issue to another status
    Transition(TransitionArgs),

    /// Assign an issue to someone
    Assign(AssignArgs),

    /// Record how an issue was fixed (moves it to resolved)
    Resolve(ResolveArgs),

    /// Verify a resolved issue (pass closes the loop, fail reopens work)
    Verify(VerifyArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Blueprint the issue belongs to
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Short title
    #[arg(long, short = 't')]
    pub title: String,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'l')]
    pub location: Option<String>,

    /// Severity (critical, major, minor)
    #[arg(long, short = 'S', default_value = "minor")]
    pub severity: IssueSeverity,

    /// Priority (low, medium, high, critical)
    #[arg(long, short = 'p')]
    pub priority: Option<Priority>,

    #[arg(long, short = 'c')]
    pub category: Option<String>,

    /// Party responsible for the fix
    #[arg(long)]
    pub responsible: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Blueprint to list
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Only issues in this status
    #[arg(long, short = 's')]
    pub status: Option<IssueStatus>,

    /// Only issues assigned to this person
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Issue ID (ISS-...)
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct EditArgs {
    /// Issue ID (ISS-...)
    pub id: String,

    #[arg(long, short = 't')]
    pub title: Option<String>,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    #[arg(long, short = 'l')]
    pub location: Option<String>,

    /// Severity (critical, major, minor)
    #[arg(long, short = 'S')]
    pub severity: Option<IssueSeverity>,

    /// Priority (low, medium, high, critical)
    #[arg(long, short = 'p')]
    pub priority: Option<Priority>,

    #[arg(long, short = 'c')]
    pub category: Option<String>,

    #[arg(long)]
    pub responsible: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// Issue ID (ISS-...)
    pub id: String,

    /// Target status (open, in_progress, resolved, verified, closed)
    pub to: IssueStatus,
}

#[derive(clap::Args, Debug)]
pub struct AssignArgs {
    /// Issue ID (ISS-...)
    pub id: String,

    /// Person to assign
    pub assignee: String,
}

#[derive(clap::Args, Debug)]
pub struct ResolveArgs {
    /// Issue ID (ISS-...)
    pub id: String,

    /// Remediation method
    #[arg(long, short = 'm')]
    pub method: String,

    /// Who performed the fix (default: actor)
    #[arg(long)]
    pub resolver: Option<String>,

    #[arg(long)]
    pub cost: Option<f64>,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// Issue ID (ISS-...)
    pub id: String,

    /// Verification result (pass, fail)
    #[arg(long, short = 'r')]
    pub result: VerificationResult,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

const COLUMNS: &[Column<Issue>] = &[
    Column::new("NUMBER", 9, |i: &Issue| i.issue_number()),
    Column::new("SEVERITY", 8, |i: &Issue| i.severity.to_string()),
    Column::new("ASSIGNEE", 14, |i: &Issue| i.assignee.clone().unwrap_or_default()),
];

pub fn run(cmd: IssueCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    match cmd {
        IssueCommands::New(args) => run_new(&session, args, global),
        IssueCommands::List(args) => run_list(&session, args, global),
        IssueCommands::Show(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let issue = session.block_on(session.engine.issues().get(&id))?;
            print_record(&issue, global.format)
        }
        IssueCommands::Edit(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let patch = IssuePatch {
                title: args.title,
                description: args.description,
                location: args.location,
                severity: args.severity,
                priority: args.priority,
                category: args.category,
                responsible_party: args.responsible,
            };
            let issue =
                session.block_on(session.engine.update_issue(&id, patch, &session.actor))?;
            print_changed(&Synced::new(issue), "Updated issue", global.format)
        }
        IssueCommands::Transition(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let synced =
                session.block_on(session.engine.transition_issue(&id, args.to, &session.actor))?;
            print_changed(&synced, "Moved issue", global.format)
        }
        IssueCommands::Assign(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let issue = session.block_on(session.engine.issues().assign(
                &id,
                &args.assignee,
                &session.actor,
            ))?;
            print_changed(&Synced::new(issue), "Assigned issue", global.format)
        }
        IssueCommands::Resolve(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let resolution = Resolution {
                method: args.method,
                resolver: args.resolver.unwrap_or_else(|| session.actor.clone()),
                cost: args.cost,
                notes: args.notes,
            };
            let synced =
                session.block_on(session.engine.resolve_issue(&id, resolution, &session.actor))?;
            print_changed(&synced, "Resolved issue", global.format)
        }
        IssueCommands::Verify(args) => {
            let id = parse_id(&args.id, EntityPrefix::Iss)?;
            let verification = Verification {
                result: args.result,
                verifier: session.actor.clone(),
                notes: args.notes,
            };
            let synced =
                session.block_on(session.engine.verify_issue(&id, verification, &session.actor))?;
            print_changed(&synced, "Verified issue", global.format)
        }
    }
}

fn run_new(session: &Session, args: NewArgs, global: &GlobalOpts) -> Result<()> {
    let data = NewIssue {
        blueprint_id: args.blueprint,
        title: args.title,
        description: args.description,
        location: args.location,
        severity: args.severity,
        priority: args.priority,
        category: args.category,
        responsible_party: args.responsible,
        source: IssueSource::Manual,
        ..Default::default()
    };
    let issue = session.block_on(session.engine.issues().create(data, &session.actor))?;
    print_changed(&Synced::new(issue), "Created issue", global.format)
}

fn run_list(session: &Session, args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let mut issues = session.block_on(session.engine.issues().list(&args.blueprint))?;
    if let Some(status) = args.status {
        issues.retain(|i| i.status == status);
    }
    if let Some(ref assignee) = args.assignee {
        issues.retain(|i| i.assignee.as_deref() == Some(assignee.as_str()));
    }
    print_list(&issues, global.format, "issue", COLUMNS)
}
