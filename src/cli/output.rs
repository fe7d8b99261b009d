//! Rendering of records, lists and sync outcomes

use console::style;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use crate::cli::helpers::{escape_tsv, truncate_str};
use crate::cli::OutputFormat;
use crate::core::entity::Entity;
use crate::lifecycle::{SyncOutcome, Synced};

/// One list column after ID and STATUS
pub struct Column<E> {
    pub header: &'static str,
    pub width: usize,
    pub value: fn(&E) -> String,
}

impl<E> Column<E> {
    pub const fn new(header: &'static str, width: usize, value: fn(&E) -> String) -> Self {
        Self {
            header,
            width,
            value,
        }
    }
}

/// Print a list of records; `auto` means a styled table
pub fn print_list<E: Entity>(
    records: &[E],
    format: OutputFormat,
    noun: &str,
    columns: &[Column<E>],
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(records).into_diagnostic()?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yml::to_string(records).into_diagnostic()?;
            print!("{}", yaml);
        }
        OutputFormat::Id => {
            for record in records {
                println!("{}", record.id());
            }
        }
        OutputFormat::Tsv => {
            let mut header = vec!["id", "status"];
            header.extend(columns.iter().map(|c| c.header));
            header.push("title");
            println!("{}", header.join("\t").to_lowercase());
            for record in records {
                let mut row = vec![record.id().to_string(), record.status().to_string()];
                row.extend(columns.iter().map(|c| escape_tsv(&(c.value)(record))));
                row.push(escape_tsv(record.title()));
                println!("{}", row.join("\t"));
            }
        }
        OutputFormat::Auto => {
            let mut line = format!(
                "{:<30} {:<14}",
                style("ID").bold(),
                style("STATUS").bold()
            );
            for column in columns {
                line.push_str(&format!(
                    " {:<width$}",
                    style(column.header).bold(),
                    width = column.width
                ));
            }
            line.push_str(&format!(" {}", style("TITLE").bold()));
            println!("{}", line);
            println!("{}", "-".repeat(90));

            for record in records {
                let mut line = format!(
                    "{:<30} {:<14}",
                    style(record.id()).cyan(),
                    record.status()
                );
                for column in columns {
                    line.push_str(&format!(
                        " {:<width$}",
                        truncate_str(&(column.value)(record), column.width),
                        width = column.width
                    ));
                }
                line.push_str(&format!(" {}", truncate_str(record.title(), 40)));
                println!("{}", line);
            }

            println!();
            println!("{} {}(s) found.", style(records.len()).cyan(), noun);
        }
    }
    Ok(())
}

/// Print one record; `auto` means YAML
pub fn print_record<E: Entity>(record: &E, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(record).into_diagnostic()?;
            println!("{}", json);
        }
        OutputFormat::Id => println!("{}", record.id()),
        OutputFormat::Yaml | OutputFormat::Tsv | OutputFormat::Auto => {
            let yaml = serde_yml::to_string(record).into_diagnostic()?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

/// Print the result of a write: a confirmation line for humans, the
/// record (and its sync outcomes) for machines
pub fn print_changed<E: Entity>(synced: &Synced<E>, verb: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Auto => {
            println!(
                "{} {} {} ({})",
                style("✓").green(),
                verb,
                style(synced.entity.id()).cyan(),
                synced.entity.status()
            );
            print_sync(&synced.sync);
            Ok(())
        }
        OutputFormat::Id => {
            println!("{}", synced.entity.id());
            Ok(())
        }
        _ => print_value(synced, format),
    }
}

/// Serialize any report in the machine formats
pub fn print_value<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).into_diagnostic()?;
            println!("{}", json);
        }
        _ => {
            let yaml = serde_yml::to_string(value).into_diagnostic()?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

fn print_sync(outcomes: &[SyncOutcome]) {
    for outcome in outcomes {
        match outcome {
            SyncOutcome::Applied { target, detail } => {
                println!("  {} {}: {}", style("→").cyan(), target, detail);
            }
            SyncOutcome::Skipped(reason) if reason.is_anomaly() => {
                println!("  {} sync skipped: {}", style("!").yellow(), reason);
            }
            SyncOutcome::Skipped(_) => {}
        }
    }
}
