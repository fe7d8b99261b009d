//! `sitecare repair` command - Repair work orders

use clap::Subcommand;
use miette::Result;

use crate::cli::helpers::{parse_date, parse_id, Session};
use crate::cli::output::{print_changed, print_list, print_record, Column};
use crate::cli::GlobalOpts;
use crate::core::identity::EntityPrefix;
use crate::entities::repair::{Completion, Contractor, CostResponsibility, NewRepair, Repair, RepairStatus};
use crate::lifecycle::Synced;

#[derive(Subcommand, Debug)]
pub enum RepairCommands {
    /// Open a repair for a confirmed claim
    New(NewArgs),

    /// List the repairs of a claim
    List(ClaimArgs),

    /// Show a repair's details
    Show(IdArgs),

    /// Move a repair to another status
    Transition(TransitionArgs),

    /// Start work on a repair
    Start(IdArgs),

    /// Record completion of the work
    Complete(CompleteArgs),

    /// Verify completed work (pass or --fail)
    Verify(VerifyArgs),

    /// Cancel a repair, recording why
    Cancel(CancelArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    /// Claim ID (WDF-...)
    #[arg(long)]
    pub claim: String,

    #[arg(long, short = 'd')]
    pub description: String,

    /// Contractor carrying out the repair
    #[arg(long)]
    pub contractor: String,

    #[arg(long)]
    pub contact: Option<String>,

    /// Worker names (repeatable)
    #[arg(long = "worker")]
    pub workers: Vec<String>,

    /// Planned date (YYYY-MM-DD)
    #[arg(long)]
    pub scheduled: Option<String>,

    /// Who pays (contractor, owner, shared)
    #[arg(long, default_value = "contractor")]
    pub cost_responsibility: CostResponsibility,
}

#[derive(clap::Args, Debug)]
pub struct ClaimArgs {
    /// Claim ID (WDF-...)
    #[arg(long)]
    pub claim: String,
}

#[derive(clap::Args, Debug)]
pub struct IdArgs {
    /// Repair ID (REP-...)
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// Repair ID (REP-...)
    pub id: String,

    /// Target status (pending, scheduled, in_progress, completed, failed, verified, cancelled)
    pub to: RepairStatus,
}

#[derive(clap::Args, Debug)]
pub struct CompleteArgs {
    /// Repair ID (REP-...)
    pub id: String,

    #[arg(long)]
    pub cost: Option<f64>,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// Repair ID (REP-...)
    pub id: String,

    /// Verification failed; the repair must be redone
    #[arg(long)]
    pub fail: bool,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CancelArgs {
    /// Repair ID (REP-...)
    pub id: String,

    #[arg(long, short = 'r')]
    pub reason: String,
}

const COLUMNS: &[Column<Repair>] = &[
    Column::new("CONTRACTOR", 16, |r: &Repair| r.contractor.name.clone()),
    Column::new("SCHEDULED", 10, |r: &Repair| {
        r.scheduled_date.map(|d| d.to_string()).unwrap_or_default()
    }),
];

pub fn run(cmd: RepairCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let engine = &session.engine;
    let actor = session.actor.as_str();
    match cmd {
        RepairCommands::New(args) => {
            let defect_id = parse_id(&args.claim, EntityPrefix::Wdf)?;
            let scheduled_date = args.scheduled.as_deref().map(parse_date).transpose()?;
            let data = NewRepair {
                description: args.description,
                contractor: Contractor {
                    name: args.contractor,
                    contact: args.contact,
                },
                workers: args.workers,
                scheduled_date,
                cost_responsibility: args.cost_responsibility,
            };
            let synced = session.block_on(engine.create_repair(&defect_id, data, actor))?;
            print_changed(&synced, "Created repair", global.format)
        }
        RepairCommands::List(args) => {
            let defect_id = parse_id(&args.claim, EntityPrefix::Wdf)?;
            let repairs = session.block_on(engine.repairs().list(&defect_id))?;
            print_list(&repairs, global.format, "repair", COLUMNS)
        }
        RepairCommands::Show(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let repair = session.block_on(engine.repairs().get(&id))?;
            print_record(&repair, global.format)
        }
        RepairCommands::Transition(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let synced = session.block_on(engine.transition_repair(&id, args.to, actor))?;
            print_changed(&synced, "Moved repair", global.format)
        }
        RepairCommands::Start(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let synced = session.block_on(engine.start_repair(&id, actor))?;
            print_changed(&synced, "Started repair", global.format)
        }
        RepairCommands::Complete(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let completion = Completion {
                notes: args.notes,
                cost: args.cost,
                ..Default::default()
            };
            let synced = session.block_on(engine.complete_repair(&id, completion, actor))?;
            print_changed(&synced, "Completed repair", global.format)
        }
        RepairCommands::Verify(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let synced = session.block_on(engine.verify_repair(&id, !args.fail, args.notes, actor))?;
            print_changed(&synced, "Verified repair", global.format)
        }
        RepairCommands::Cancel(args) => {
            let id = parse_id(&args.id, EntityPrefix::Rep)?;
            let repair = session.block_on(engine.repairs().cancel(&id, &args.reason, actor))?;
            print_changed(&Synced::new(repair), "Cancelled repair", global.format)
        }
    }
}
