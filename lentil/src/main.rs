mod run_fit;
mod run_sim;

use crate::run_fit::*;
use crate::run_sim::*;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Shrink confounded effect estimates by variational EM
    Fit(FitArgs),

    /// Simulate confounded effect estimates
    Simulate(SimArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            run_fit(args.clone())?;
        }
        Commands::Simulate(args) => {
            run_sim(args.clone())?;
        }
    }

    Ok(())
}
