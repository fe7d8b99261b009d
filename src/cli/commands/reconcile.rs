//! `sitecare reconcile` command - Recount warranty counters

use console::style;
use miette::Result;

use crate::cli::helpers::{parse_id, Session};
use crate::cli::output::print_value;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::identity::EntityPrefix;

#[derive(clap::Args, Debug)]
pub struct ReconcileArgs {
    /// Warranty ID (WTY-...)
    #[arg(long, short = 'w')]
    pub warranty: String,
}

pub fn run(args: ReconcileArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let id = parse_id(&args.warranty, EntityPrefix::Wty)?;
    let report = session.block_on(session.engine.reconcile(&id, &session.actor))?;

    match global.format {
        OutputFormat::Auto => {
            if report.drifted() {
                println!(
                    "{} Corrected {}: defects {} → {}, repairs {} → {}",
                    style("✓").green(),
                    style(&report.warranty_id).cyan(),
                    report.defects_before,
                    report.defects_after,
                    report.repairs_before,
                    report.repairs_after
                );
            } else {
                println!(
                    "{} Counters of {} are consistent ({} defect(s), {} repair(s))",
                    style("✓").green(),
                    style(&report.warranty_id).cyan(),
                    report.defects_after,
                    report.repairs_after
                );
            }
            Ok(())
        }
        OutputFormat::Id => {
            println!("{}", report.warranty_id);
            Ok(())
        }
        format => print_value(&report, format),
    }
}
