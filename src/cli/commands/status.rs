//! `sitecare status` command - Blueprint status dashboard

use console::style;
use miette::Result;
use tabled::{builder::Builder, settings::Style};

use crate::cli::helpers::Session;
use crate::cli::output::print_value;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::lifecycle::{BlueprintStatus, Statistics};

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Blueprint to summarize
    #[arg(long, short = 'b')]
    pub blueprint: String,

    /// Show per-status breakdown
    #[arg(long)]
    pub detailed: bool,
}

pub fn run(args: StatusArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;
    let status = session.block_on(session.engine.status(&args.blueprint))?;

    match global.format {
        OutputFormat::Auto | OutputFormat::Tsv | OutputFormat::Id => {
            print_dashboard(&status, args.detailed);
            Ok(())
        }
        format => print_value(&status, format),
    }
}

fn print_dashboard(status: &BlueprintStatus, detailed: bool) {
    println!(
        "{} {}",
        style("Blueprint").bold().underlined(),
        style(&status.blueprint_id).cyan().bold()
    );
    println!();

    let sections: [(&str, &Statistics); 4] = [
        ("Issues", &status.issues),
        ("QA defects", &status.qa_defects),
        ("Warranties", &status.warranties),
        ("Claims", &status.claims),
    ];

    let mut summary = Builder::default();
    summary.push_record(["Category", "Total", "Open", "Overdue"]);
    for (name, stats) in &sections {
        summary.push_record([
            name.to_string(),
            stats.total.to_string(),
            stats.open.to_string(),
            stats.overdue.to_string(),
        ]);
    }
    println!("{}", summary.build().with(Style::rounded()));

    if status.expiring_warranties > 0 {
        println!(
            "{} {} warranty(ies) ending soon",
            style("!").yellow(),
            style(status.expiring_warranties).yellow().bold()
        );
    }

    if detailed {
        for (name, stats) in &sections {
            if stats.total == 0 {
                continue;
            }
            println!();
            println!("{}", style(name).bold());
            let mut table = Builder::default();
            table.push_record(["Status", "Count"]);
            for (state, count) in &stats.by_status {
                table.push_record([state.clone(), count.to_string()]);
            }
            println!("{}", table.build().with(Style::markdown()));
        }
    }
}
