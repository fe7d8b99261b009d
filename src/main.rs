use clap::Parser;
use miette::Result;
use sitecare::cli::{Cli, Commands};

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head`, `grep -q`, etc. causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;

    match cli.command {
        Commands::Init(args) => sitecare::cli::commands::init::run(args),
        Commands::Issue(cmd) => sitecare::cli::commands::issue::run(cmd, &global),
        Commands::Defect(cmd) => sitecare::cli::commands::defect::run(cmd, &global),
        Commands::Warranty(cmd) => sitecare::cli::commands::warranty::run(cmd, &global),
        Commands::Claim(cmd) => sitecare::cli::commands::claim::run(cmd, &global),
        Commands::Repair(cmd) => sitecare::cli::commands::repair::run(cmd, &global),
        Commands::Sweep(args) => sitecare::cli::commands::sweep::run(args, &global),
        Commands::Reconcile(args) => sitecare::cli::commands::reconcile::run(args, &global),
        Commands::Status(args) => sitecare::cli::commands::status::run(args, &global),
        Commands::Completions(args) => sitecare::cli::commands::completions::run(args),
    }
}
