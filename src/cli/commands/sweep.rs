//! `sitecare sweep` command - Warranty expiry sweep

use console::style;
use miette::Result;
use tokio::sync::watch;

use crate::cli::helpers::Session;
use crate::cli::output::print_value;
use crate::cli::{GlobalOpts, OutputFormat};
use crate::lifecycle::SweepOutcome;

#[derive(clap::Args, Debug)]
pub struct SweepArgs {
    /// Blueprint to sweep (repeatable)
    #[arg(long, short = 'b', required = true)]
    pub blueprint: Vec<String>,

    /// Keep sweeping every `sweep_interval_secs` until interrupted
    #[arg(long)]
    pub watch: bool,
}

pub fn run(args: SweepArgs, global: &GlobalOpts) -> Result<()> {
    let session = Session::open(global)?;

    if args.watch {
        let interval = session.config.sweep_interval();
        println!(
            "{} Sweeping {} blueprint(s) every {}s, Ctrl-C to stop",
            style("→").cyan(),
            args.blueprint.len(),
            interval.as_secs()
        );
        let (tx, rx) = watch::channel(false);
        session.block_on(async {
            let sweeper = session.engine.sweeper();
            let run = sweeper.run(args.blueprint.clone(), interval, session.actor.clone(), rx);
            tokio::pin!(run);
            tokio::select! {
                _ = &mut run => {}
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(true);
                    run.await;
                }
            }
        });
        return Ok(());
    }

    for blueprint_id in &args.blueprint {
        let outcome = session.block_on(session.engine.sweep(blueprint_id, &session.actor))?;
        match global.format {
            OutputFormat::Auto => print_outcome(blueprint_id, &outcome),
            OutputFormat::Id => {
                if let SweepOutcome::Completed(report) = &outcome {
                    for id in report.expiring.iter().chain(&report.expired) {
                        println!("{}", id);
                    }
                }
            }
            format => print_value(&outcome, format)?,
        }
    }
    Ok(())
}

fn print_outcome(blueprint_id: &str, outcome: &SweepOutcome) {
    let report = match outcome {
        SweepOutcome::Busy => {
            println!(
                "{} {} is already being swept",
                style("!").yellow(),
                style(blueprint_id).cyan()
            );
            return;
        }
        SweepOutcome::Completed(report) => report,
    };

    println!(
        "{} Swept {}: {} examined, {} now expiring, {} expired",
        style("✓").green(),
        style(blueprint_id).cyan(),
        report.examined,
        style(report.expiring.len()).yellow(),
        style(report.expired.len()).red()
    );
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            style("✗").red(),
            failure.warranty_id,
            failure.error
        );
    }
}
