use crate::common::*;
use crate::elbo::{elbo, Objective};
use crate::grid::{GridSpec, MixtureGrid, PenaltyType};
use crate::params::{ParamLayout, VemParams};
use crate::seed::{initial_state, normal_means_seed, PiInit};
use crate::squarem::{squarem, FixedPointProblem, SquaremOptions};
use crate::sufficient::VemData;
use crate::summary::{summarize, FittedPrior, SummaryTable};
use crate::update::vem_sweep;
use crate::whiten::Whitening;

use matrix_util::traits::MatOps;

#[derive(Debug, Clone)]
pub struct LentilOptions {
    /// prior variance grid
    pub grid: GridSpec,
    /// penalties on the mixing proportions
    pub penalty: PenaltyType,
    /// starting mixing proportions
    pub pi_init: PiInit,
    /// estimate the noise inflation `xi`
    pub scale_var: bool,
    /// penalty keeping `xi` away from zero
    pub var_inflate_pen: f64,
    /// effects are exchangeable on the scale `betahat / se^sprop`
    pub sprop: f64,
    pub squarem: SquaremOptions,
}

impl Default for LentilOptions {
    fn default() -> Self {
        Self {
            grid: GridSpec::default(),
            penalty: PenaltyType::default(),
            pi_init: PiInit::default(),
            scale_var: true,
            var_inflate_pen: 0.0,
            sprop: 0.0,
            squarem: SquaremOptions::default(),
        }
    }
}

/// Output of the rotation step consumed by the engine
#[derive(Debug, Clone)]
pub struct RotatedInput {
    /// `p` OLS effects of the covariate of interest
    pub betahat_ols: DVec,
    /// `p` noise variances
    pub s_diag: DVec,
    /// `p x k` confounder loadings, before whitening
    pub loadings: Mat,
}

#[derive(Debug, Clone)]
pub struct LentilFit {
    pub summary: SummaryTable,
    pub prior: FittedPrior,
    pub elbo: f64,
    pub xi: f64,
    pub phi: f64,
    /// Confounder scores on the scale of the input loadings
    pub z_hat: DVec,
    pub fevals: usize,
    pub converged: bool,
}

/// The sweep and the negated ELBO over the flat parameter vector
pub struct VemProblem<'a> {
    data: &'a VemData,
    layout: ParamLayout,
}

impl<'a> VemProblem<'a> {
    pub fn new(data: &'a VemData) -> Self {
        let layout = ParamLayout {
            num_features: data.num_features(),
            num_grid: data.grid.len(),
            num_factors: data.num_factors(),
        };
        Self { data, layout }
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }
}

impl FixedPointProblem for VemProblem<'_> {
    fn fixed_point(&self, par: &DVec) -> anyhow::Result<DVec> {
        let params = self.layout.decode(par)?;
        Ok(self.layout.encode(&vem_sweep(self.data, &params)))
    }

    fn objective(&self, par: &DVec) -> Objective {
        match self.layout.decode(par) {
            Ok(params) => elbo(self.data, &params).negate(),
            Err(_) => Objective::Rejected,
        }
    }
}

/// Converged state of [`fit_vem`]
#[derive(Debug, Clone)]
pub struct VemFit {
    pub params: VemParams,
    pub elbo: f64,
    pub fevals: usize,
    pub converged: bool,
}

/// Drive the sweep to a stationary point from `init` with SQUAREM
pub fn fit_vem(
    data: &VemData,
    init: &VemParams,
    options: &SquaremOptions,
) -> anyhow::Result<VemFit> {
    let problem = VemProblem::new(data);
    anyhow::ensure!(
        &init.layout() == problem.layout(),
        "initial state {:?} does not fit the data {:?}",
        init.layout(),
        problem.layout()
    );

    let out = squarem(&problem, problem.layout().encode(init), options)?;

    let Some(neg_elbo) = out.value.value() else {
        anyhow::bail!(
            "all retries exhausted: no valid state after {} fixed-point evaluations",
            out.fevals
        );
    };

    if !out.converged {
        warn!(
            "variational EM did not converge in {} fixed-point evaluations",
            out.fevals
        );
    }

    Ok(VemFit {
        params: problem.layout().decode(&out.par)?,
        elbo: -neg_elbo,
        fevals: out.fevals,
        converged: out.converged,
    })
}

fn validate(input: &RotatedInput, options: &LentilOptions) -> anyhow::Result<()> {
    let p = input.betahat_ols.len();

    anyhow::ensure!(p > 0, "no features");
    anyhow::ensure!(
        input.s_diag.len() == p && input.loadings.nrows() == p,
        "dimension mismatch: {} effects, {} variances, {} loading rows",
        p,
        input.s_diag.len(),
        input.loadings.nrows()
    );
    anyhow::ensure!(
        input.s_diag.iter().all(|&s| s.is_finite() && s > 0.0),
        "noise variances must be finite and positive"
    );
    anyhow::ensure!(
        (0.0..=1.0).contains(&options.sprop),
        "sprop must lie in [0, 1]: {}",
        options.sprop
    );
    anyhow::ensure!(
        !(options.scale_var && options.sprop == 1.0 && options.var_inflate_pen == 0.0),
        "xi is not identifiable with scale_var, sprop = 1 and no variance inflation penalty"
    );
    Ok(())
}

/// Shrink the rotated effects while jointly estimating the confounders.
///
/// 1. reweight by `se^sprop`
/// 2. build the grid and whiten the loadings
/// 3. seed the factor scores with a confounder-free fit
/// 4. run the accelerated variational EM
/// 5. summarize on the scales described in [`LentilFit`]
pub fn fit_lentil(input: &RotatedInput, options: &LentilOptions) -> anyhow::Result<LentilFit> {
    validate(input, options)?;

    let sebetahat = input.s_diag.map(|s| s.sqrt());
    let weights = sebetahat.map(|s| s.powf(options.sprop));
    let inv_weights: Vec<f64> = weights.iter().map(|w| 1.0 / w).collect();

    let betahat = input.betahat_ols.component_div(&weights);
    let s_diag = input.s_diag.zip_map(&weights, |s, w| s / (w * w));
    let loadings = input.loadings.scale_rows_by(&inv_weights);

    let grid = MixtureGrid::build(
        betahat.as_slice(),
        s_diag.as_slice(),
        &options.grid,
        &options.penalty,
    )?;
    info!(
        "grid of {} variances (max {:.4}), point mass at {}",
        grid.len(),
        grid.tau2_seq.iter().cloned().fold(0.0, f64::max),
        grid.zero_spot
    );

    let white = Whitening::new(&loadings)?;

    let seed_mean = normal_means_seed(&betahat, &s_diag, &grid);
    info!("seeded the factor scores with a normal-means fit");

    let data = VemData::new(
        betahat,
        s_diag,
        white.amat.clone(),
        grid,
        options.scale_var,
        options.var_inflate_pen,
    )?;

    let init = initial_state(&data, &seed_mean, &options.pi_init)?;
    let vem = fit_vem(&data, &init, &options.squarem)?;
    let params = &vem.params;

    info!(
        "elbo = {:.4}, xi = {:.4}, phi = {:.4}, pi0 = {:.4}",
        vem.elbo,
        params.xi,
        params.phi,
        params.pivec[data.grid.zero_spot]
    );

    let mut summary = summarize(params, &data.grid, &input.betahat_ols, &sebetahat);
    summary.posterior_mean.component_mul_assign(&weights);
    summary.posterior_sd.component_mul_assign(&weights);

    Ok(LentilFit {
        summary,
        prior: FittedPrior::new(params, &data.grid),
        elbo: vem.elbo,
        xi: params.xi,
        phi: params.phi,
        z_hat: white.unwhiten(&params.muv),
        fevals: vem.fevals,
        converged: vem.converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> RotatedInput {
        RotatedInput {
            betahat_ols: DVec::from_vec(vec![0.1, -0.2, 3.0, -2.5, 0.05, 0.0]),
            s_diag: DVec::from_element(6, 0.25),
            loadings: Mat::from_fn(6, 1, |i, _| i as f64 - 2.5),
        }
    }

    #[test]
    fn preconditions_are_checked() {
        let mut bad = input();
        bad.s_diag[2] = 0.0;
        assert!(fit_lentil(&bad, &LentilOptions::default()).is_err());

        let options = LentilOptions {
            sprop: 1.5,
            ..Default::default()
        };
        assert!(fit_lentil(&input(), &options).is_err());

        let options = LentilOptions {
            sprop: 1.0,
            ..Default::default()
        };
        assert!(fit_lentil(&input(), &options).is_err());

        let mut short = input();
        short.loadings = Mat::from_element(5, 1, 1.0);
        assert!(fit_lentil(&short, &LentilOptions::default()).is_err());
    }

    #[test]
    fn flat_problem_matches_sweep() -> anyhow::Result<()> {
        let input = input();
        let grid = MixtureGrid::build(
            input.betahat_ols.as_slice(),
            input.s_diag.as_slice(),
            &GridSpec::default(),
            &PenaltyType::default(),
        )?;
        let white = Whitening::new(&input.loadings)?;
        let data = VemData::new(
            input.betahat_ols.clone(),
            input.s_diag.clone(),
            white.amat,
            grid,
            true,
            0.0,
        )?;
        let seed = normal_means_seed(&data.betahat, &data.s_diag, &data.grid);
        let init = initial_state(&data, &seed, &PiInit::ZeroConc)?;

        let problem = VemProblem::new(&data);
        let par = problem.layout().encode(&init);
        let next = problem.layout().decode(&problem.fixed_point(&par)?)?;
        assert_eq!(next, vem_sweep(&data, &init));

        let neg = problem.objective(&par).value();
        let pos = elbo(&data, &init).value();
        assert_eq!(neg.map(|x| -x), pos);

        let wrong_len = DVec::zeros(par.len() + 1);
        assert!(problem.objective(&wrong_len).is_rejected());
        Ok(())
    }

    #[test]
    fn fit_runs_with_reweighting() -> anyhow::Result<()> {
        let mut input = input();
        input.s_diag = DVec::from_vec(vec![0.25, 0.5, 0.25, 1.0, 0.36, 0.25]);
        let options = LentilOptions {
            sprop: 0.5,
            ..Default::default()
        };
        let fit = fit_lentil(&input, &options)?;

        assert_eq!(fit.summary.num_features(), 6);
        assert!(fit.xi > 0.0);
        // betahat and sebetahat stay on the input scale
        assert_eq!(fit.summary.betahat, input.betahat_ols);
        approx::assert_abs_diff_eq!(fit.summary.sebetahat[3], 1.0, epsilon = 1e-12);
        assert!(fit.summary.lfdr.iter().all(|&x| (0.0..=1.0).contains(&x)));
        Ok(())
    }
}
