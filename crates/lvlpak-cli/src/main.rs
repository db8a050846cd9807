//! Lvlpak command-line tool
//!
//! Builds section scripts into chunked bundles, inspects bundle files and
//! simulates loading them at chosen chunk addresses.

mod commands;
mod logging;
mod output;

use clap::{ArgAction, Parser, Subcommand};

use commands::{build::BuildArgs, inspect::InspectArgs, load::LoadArgs};
use output::StyledOutput;

#[derive(Parser)]
#[command(name = "lvlpak")]
#[command(about = "Relocatable chunked resource bundle builder", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// When to use colors
    #[arg(long, global = true, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a section script into a bundle
    Build(BuildArgs),

    /// Decode the header and fixup table of a bundle
    Inspect(InspectArgs),

    /// Load a bundle into simulated chunk memory and resolve it
    Load(LoadArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let choice = output::resolve_color_choice(cli.color.as_deref());
    let mut out = StyledOutput::new(choice);

    match cli.command {
        Commands::Build(args) => commands::build::execute(args, &mut out),
        Commands::Inspect(args) => commands::inspect::execute(args, &mut out),
        Commands::Load(args) => commands::load::execute(args, &mut out),
    }
}
