use lentil::common::*;
use lentil::factor::{FactorAnalysis, PcaNaive};
use lentil::fit::{fit_lentil, LentilFit, LentilOptions, RotatedInput};
use lentil::grid::{GridSpec, PenaltyType};
use lentil::seed::PiInit;
use lentil::squarem::SquaremOptions;
use lentil::summary::SummaryTable;

use matrix_util::common_io::{mkdir, open_buf_writer, read_vector};
use matrix_util::traits::IoOps;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::io::Write;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum PiInitArg {
    ZeroConc,
    Uniform,
    Random,
}

#[derive(Parser, Debug, Clone)]
pub struct FitArgs {
    /// rotated OLS effect estimates, one per feature
    #[arg(long, short = 'b', required = true)]
    betahat: Box<str>,

    /// standard errors of the effect estimates (requires `--loadings`)
    #[arg(long, short = 's')]
    sebetahat: Option<Box<str>>,

    /// `feature x factor` confounder loadings (requires `--sebetahat`)
    #[arg(long, short = 'l')]
    loadings: Option<Box<str>>,

    /// `sample x feature` residual block; loadings and noise variances
    /// are then estimated by factor analysis
    #[arg(long, short = 'r')]
    residuals: Option<Box<str>>,

    /// number of confounders to estimate from `--residuals`
    #[arg(long, short = 'k')]
    num_factors: Option<usize>,

    /// scale of the residual variances relative to the effect variances
    #[arg(long, default_value_t = 1.0)]
    design_scale: f64,

    /// ratio between consecutive standard deviations of the automatic grid
    #[arg(long, default_value_t = std::f64::consts::SQRT_2)]
    grid_mult: f64,

    /// custom grid of prior variances (comma-separated, one must be 0)
    #[arg(long, value_delimiter(','))]
    grid: Option<Vec<f64>>,

    /// pseudo-count on the point mass at zero
    #[arg(long, default_value_t = 10.0)]
    lambda0: f64,

    /// no penalty on the mixing proportions
    #[arg(long, default_value_t = false)]
    uniform_penalty: bool,

    /// starting mixing proportions
    #[arg(long, value_enum, default_value = "zero-conc")]
    pi_init: PiInitArg,

    /// random seed (random starting proportions and factor analysis)
    #[arg(long, default_value_t = 42)]
    rseed: u64,

    /// keep the noise inflation fixed at 1
    #[arg(long, default_value_t = false)]
    no_scale_var: bool,

    /// penalty keeping the noise inflation away from zero
    #[arg(long, default_value_t = 0.0)]
    var_inflate_pen: f64,

    /// effects are exchangeable on the scale `betahat / se^sprop`
    #[arg(long, default_value_t = 0.0)]
    sprop: f64,

    /// convergence tolerance on the ELBO
    #[arg(long, default_value_t = 1e-4)]
    tol: f64,

    /// maximum number of fixed-point evaluations
    #[arg(long, default_value_t = 1500)]
    max_iter: usize,

    /// output header
    #[arg(long, short, required = true)]
    out: Box<str>,

    /// verbosity
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Serialize)]
struct FitScalars {
    elbo: f64,
    xi: f64,
    phi: f64,
    pi0: f64,
    fevals: usize,
    converged: bool,
}

fn read_rotated_input(args: &FitArgs) -> anyhow::Result<RotatedInput> {
    let betahat = DVec::from_vec(read_vector::<f64>(&args.betahat, -1)?);

    let (s_diag, loadings) = match (&args.sebetahat, &args.loadings, &args.residuals) {
        (Some(se_file), Some(loadings_file), None) => {
            let se = DVec::from_vec(read_vector::<f64>(se_file, -1)?);
            (se.map(|s| s * s), Mat::from_tsv(loadings_file, None)?)
        }
        (None, None, Some(resid_file)) => {
            let k = args
                .num_factors
                .ok_or(anyhow::anyhow!("--residuals needs --num-factors"))?;
            anyhow::ensure!(
                args.design_scale > 0.0,
                "design scale must be positive: {}",
                args.design_scale
            );

            let y = Mat::from_tsv(resid_file, None)?;
            info!("read [{} x {}] residuals", y.nrows(), y.ncols());

            let pca = PcaNaive {
                seed: args.rseed,
                ..Default::default()
            };
            let fa = pca.fit(&y, k)?;
            let c = args.design_scale;
            (fa.sig_diag * c, fa.loadings * c.sqrt())
        }
        _ => anyhow::bail!("give either --sebetahat with --loadings, or --residuals"),
    };

    Ok(RotatedInput {
        betahat_ols: betahat,
        s_diag,
        loadings,
    })
}

fn options_from_args(args: &FitArgs) -> LentilOptions {
    let grid = match &args.grid {
        Some(tau2) => GridSpec::Custom(tau2.clone()),
        None => GridSpec::Auto {
            mult: args.grid_mult,
        },
    };

    let penalty = if args.uniform_penalty {
        PenaltyType::Uniform
    } else {
        PenaltyType::ZeroConc {
            lambda0: args.lambda0,
        }
    };

    let pi_init = match args.pi_init {
        PiInitArg::ZeroConc => PiInit::ZeroConc,
        PiInitArg::Uniform => PiInit::Uniform,
        PiInitArg::Random => PiInit::Random { seed: args.rseed },
    };

    LentilOptions {
        grid,
        penalty,
        pi_init,
        scale_var: !args.no_scale_var,
        var_inflate_pen: args.var_inflate_pen,
        sprop: args.sprop,
        squarem: SquaremOptions {
            tol: args.tol,
            max_iter: args.max_iter,
            ..Default::default()
        },
    }
}

/// Write `{out}.summary.tsv.gz`, `{out}.prior.tsv.gz`,
/// `{out}.confounder.tsv.gz` and `{out}.scalars.json`
pub fn write_fit(fit: &LentilFit, out: &str) -> anyhow::Result<()> {
    mkdir(out)?;

    let summary_file = format!("{}.summary.tsv.gz", out);
    fit.summary.to_matrix().write_file_delim_with_names(
        &summary_file,
        "\t",
        None,
        &SummaryTable::column_names(),
    )?;

    let prior = &fit.prior;
    let mm = prior.tau2_seq.len();
    let prior_mat = Mat::from_fn(mm, 3, |m, c| match c {
        0 => prior.tau2_seq[m],
        1 => prior.lambda_seq[m],
        _ => prior.pivec[m],
    });
    let prior_columns: Vec<Box<str>> = vec!["tau2".into(), "lambda".into(), "pi".into()];
    let prior_file = format!("{}.prior.tsv.gz", out);
    prior_mat.write_file_delim_with_names(&prior_file, "\t", None, &prior_columns)?;

    let z_columns: Vec<Box<str>> = vec!["z_hat".into()];
    let confounder_file = format!("{}.confounder.tsv.gz", out);
    Mat::from_column_slice(fit.z_hat.len(), 1, fit.z_hat.as_slice())
        .write_file_delim_with_names(&confounder_file, "\t", None, &z_columns)?;

    let scalars = FitScalars {
        elbo: fit.elbo,
        xi: fit.xi,
        phi: fit.phi,
        pi0: prior.pi0(),
        fevals: fit.fevals,
        converged: fit.converged,
    };
    let scalars_file = format!("{}.scalars.json", out);
    let mut writer = open_buf_writer(&scalars_file)?;
    serde_json::to_writer_pretty(&mut writer, &scalars)?;
    writer.flush()?;

    info!("wrote {}, {}, {} and {}", summary_file, prior_file, confounder_file, scalars_file);
    Ok(())
}

pub fn run_fit(args: FitArgs) -> anyhow::Result<()> {
    if args.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let input = read_rotated_input(&args)?;
    info!(
        "{} features, {} confounders",
        input.betahat_ols.len(),
        input.loadings.ncols()
    );

    let options = options_from_args(&args);
    let fit = fit_lentil(&input, &options)?;

    write_fit(&fit, &args.out)?;
    info!("done");
    Ok(())
}
