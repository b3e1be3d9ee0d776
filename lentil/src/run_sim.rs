use lentil::common::*;
use lentil::simulate::{simulate_confounded, SimOptions};

use matrix_util::common_io::{mkdir, write_types};
use matrix_util::traits::IoOps;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct SimArgs {
    /// number of features
    #[arg(short = 'p', long, default_value_t = 1000)]
    num_features: usize,

    /// number of confounders
    #[arg(short = 'k', long, default_value_t = 3)]
    num_factors: usize,

    /// fraction of features without an effect
    #[arg(long, default_value_t = 0.8)]
    null_frac: f64,

    /// standard deviation of the non-null effects
    #[arg(long, default_value_t = 2.0)]
    effect_sd: f64,

    /// standard deviation of the confounder scores
    #[arg(long, default_value_t = 1.0)]
    confounder_sd: f64,

    /// scale of the standard errors
    #[arg(long, default_value_t = 1.0)]
    se_scale: f64,

    /// random seed
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

/// Write `{out}.betahat.gz`, `{out}.sebetahat.gz`,
/// `{out}.loadings.tsv.gz`, `{out}.beta.gz` and `{out}.z.gz`
pub fn run_sim(args: SimArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let options = SimOptions {
        num_features: args.num_features,
        num_factors: args.num_factors,
        null_frac: args.null_frac,
        effect_sd: args.effect_sd,
        confounder_sd: args.confounder_sd,
        se_scale: args.se_scale,
        seed: args.rseed,
    };

    info!("Simulating confounded effects...");
    let sim = simulate_confounded(&options)?;

    let output = args.out.clone();
    mkdir(&output)?;

    write_types(sim.betahat.as_slice(), &(output.to_string() + ".betahat.gz"))?;
    write_types(sim.sebetahat.as_slice(), &(output.to_string() + ".sebetahat.gz"))?;
    write_types(sim.beta.as_slice(), &(output.to_string() + ".beta.gz"))?;
    write_types(sim.z.as_slice(), &(output.to_string() + ".z.gz"))?;
    sim.loadings
        .to_tsv(&(output.to_string() + ".loadings.tsv.gz"))?;

    info!("done");
    Ok(())
}
