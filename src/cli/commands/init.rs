//! `sitecare init` command - Initialize a new SiteCare project

use console::style;
use miette::{IntoDiagnostic, Result};

use crate::core::project::{Project, ProjectError};
use crate::core::sqlite::SqliteStore;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,

    /// Rewrite the default config even if .sitecare/ already exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    // Create directory if it doesn't exist
    if !path.exists() {
        std::fs::create_dir_all(&path).into_diagnostic()?;
        println!(
            "{} Created directory {}",
            style("✓").green(),
            style(path.display()).cyan()
        );
    }

    let project = if args.force {
        Project::init_force(&path)
    } else {
        Project::init(&path)
    };

    match project {
        Ok(project) => {
            SqliteStore::open(&project.store_path())
                .map_err(|e| miette::miette!("Failed to create store: {}", e))?;

            println!(
                "{} Initialized SiteCare project at {}",
                style("✓").green(),
                style(project.root().display()).cyan()
            );
            println!();
            println!("Created:");
            println!("  {}", style(".sitecare/config.yaml").dim());
            println!("  {}", style(".sitecare/store.db").dim());
            println!();
            println!("Next steps:");
            println!(
                "  {} Record a site issue",
                style("sitecare issue new --blueprint <BP> --title <TITLE>").yellow()
            );
            println!(
                "  {} Register a warranty",
                style("sitecare warranty new --blueprint <BP> --start <DATE> --months <N>").yellow()
            );
            Ok(())
        }
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} SiteCare project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!();
            println!(
                "Use {} to reinitialize",
                style("sitecare init --force").yellow()
            );
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}
