//! `sitecare warranty` command - Warranty management

use clap::Subcommand;
use miette::Result;

use crate::cli::helpers::{parse_date, parse_id, Session};
use crate::cli::output::{print_changed, print_list, print_record, Column};
use crate::cli::GlobalOpts;
use crate::core::identity::EntityPrefix;
use crate::entities::warranty::{NewWarranty, Warrantor, Warranty, WarrantyStatus, WarrantyType};
use crate::entities::warranty_defect::WarrantyDefect;
use crate::lifecycle::Synced;

#[derive(Subcommand, Debug)]
pub enum WarrantyCommands {
    /// Register a new warranty (starts pending)
    New(NewArgs),

    /// List warranties of a blueprint, soonest end date first
    List(ListArgs),

    /// Show a warranty's details
    Show(ShowArgs),

    /// Move a warranty to another status
    Transition(TransitionArgs),

    /// Void a warranty, recording why
    Void(VoidArgs),

    /// List warranties ending within the configured threshold
    Expiring(BlueprintArgs),

    /// List the claims reported against a warranty
    Defects(ShowArgs),
}

#[derive(clap::Args, Debug)]
pub struct NewArgs {
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Coverage start (YYYY-MM-DD)
    #[arg(long)]
    pub start: String,

    /// Coverage period in months
    #[arg(long)]
    pub months: u32,

    /// Coverage type (general, structural, waterproofing, equipment)
    #[arg(long = "type", short = 'T', default_value = "general")]
    pub warranty_type: WarrantyType,

    /// Party giving the guarantee
    #[arg(long, short = 'w')]
    pub warrantor: String,

    #[arg(long)]
    pub contact: Option<String>,

    /// Human-facing number (generated when omitted)
    #[arg(long)]
    pub number: Option<String>,

    #[arg(long)]
    pub contract: Option<String>,

    #[arg(long, short = 'n')]
    pub notes: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Only warranties in this status
    #[arg(long, short = 's')]
    pub status: Option<WarrantyStatus>,
}

#[derive(clap::Args, Debug)]
pub struct BlueprintArgs {
    #[arg(long, short = 'b')]
    pub blueprint: String,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Warranty ID (WTY-...)
    pub id: String,
}

#[derive(clap::Args, Debug)]
pub struct TransitionArgs {
    /// Warranty ID (WTY-...)
    pub id: String,

    /// Target status (pending, active, expiring, expired, completed, voided)
    pub to: WarrantyStatus,
}

#[derive(clap::Args, Debug)]
pub struct VoidArgs {
    /// Warranty ID (WTY-...)
    pub id: String,

    #[arg(long, short = 'r')]
    pub reason: String,
}

const COLUMNS: &[Column<Warranty>] = &[
    Column::new("NUMBER", 14, |w: &Warranty| w.warranty_number.clone()),
    Column::new("ENDS", 10, |w: &Warranty| w.end_date.to_string()),
    Column::new("DEFECTS", 7, |w: &Warranty| w.defect_count.to_string()),
    Column::new("REPAIRS", 7, |w: &Warranty| w.repair_count.to_string()),
];

const DEFECT_COLUMNS: &[Column<WarrantyDefect>] = &[
    Column::new("SEVERITY", 8, |d: &WarrantyDefect| d.severity.to_string()),
    Column::new("REPORTED", 10, |d: &WarrantyDefect| d.discovered_date.to_string()),
    Column::new("ISSUE", 9, |d: &WarrantyDefect| d.issue_number.clone().unwrap_or_default()),
];

pub fn run(cmd: WarrantyCommands, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let engine = &session.engine;
    let actor = session.actor.as_str();
    match cmd {
        WarrantyCommands::New(args) => {
            let data = NewWarranty {
                blueprint_id: args.blueprint,
                contract_id: args.contract,
                warranty_number: args.number,
                warranty_type: args.warranty_type,
                start_date: parse_date(&args.start)?,
                period_months: args.months,
                warrantor: Warrantor {
                    name: args.warrantor,
                    contact: args.contact,
                },
                notes: args.notes,
                ..Default::default()
            };
            let warranty = session.block_on(engine.create_warranty(data, actor))?;
            print_changed(&Synced::new(warranty), "Created warranty", global.format)
        }
        WarrantyCommands::List(args) => {
            let mut warranties = session.block_on(engine.warranties().list(&args.blueprint))?;
            if let Some(status) = args.status {
                warranties.retain(|w| w.status == status);
            }
            print_list(&warranties, global.format, "warranty", COLUMNS)
        }
        WarrantyCommands::Show(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wty)?;
            let warranty = session.block_on(engine.warranties().get(&id))?;
            print_record(&warranty, global.format)
        }
        WarrantyCommands::Transition(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wty)?;
            let warranty = session.block_on(engine.transition_warranty(&id, args.to, actor))?;
            print_changed(&Synced::new(warranty), "Moved warranty", global.format)
        }
        WarrantyCommands::Void(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wty)?;
            let warranty = session.block_on(engine.warranties().void(&id, &args.reason, actor))?;
            print_changed(&Synced::new(warranty), "Voided warranty", global.format)
        }
        WarrantyCommands::Expiring(args) => {
            let warranties = session.block_on(engine.expiring_warranties(&args.blueprint))?;
            print_list(&warranties, global.format, "expiring warranty", COLUMNS)
        }
        WarrantyCommands::Defects(args) => {
            let id = parse_id(&args.id, EntityPrefix::Wty)?;
            let defects = session.block_on(engine.warranty_defects().list(&id))?;
            print_list(&defects, global.format, "claim", DEFECT_COLUMNS)
        }
    }
}
