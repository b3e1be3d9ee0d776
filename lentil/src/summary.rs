//! Per-feature posterior summaries of a converged state

use crate::common::*;
use crate::grid::MixtureGrid;
use crate::params::VemParams;

use statrs::function::erf::erfc;

/// Column names of [`SummaryTable::to_matrix`]
pub const COLUMNS: [&str; 10] = [
    "betahat",
    "sebetahat",
    "NegativeProb",
    "PositiveProb",
    "lfsr",
    "svalue",
    "lfdr",
    "qvalue",
    "PosteriorMean",
    "PosteriorSD",
];

/// One row per feature
#[derive(Debug, Clone)]
pub struct SummaryTable {
    pub betahat: DVec,
    pub sebetahat: DVec,
    pub negative_prob: DVec,
    pub positive_prob: DVec,
    pub lfsr: DVec,
    pub svalue: DVec,
    pub lfdr: DVec,
    pub qvalue: DVec,
    pub posterior_mean: DVec,
    pub posterior_sd: DVec,
}

impl SummaryTable {
    pub fn num_features(&self) -> usize {
        self.betahat.len()
    }

    /// `p x 10` matrix in the order of [`COLUMNS`]
    pub fn to_matrix(&self) -> Mat {
        Mat::from_columns(&[
            self.betahat.clone(),
            self.sebetahat.clone(),
            self.negative_prob.clone(),
            self.positive_prob.clone(),
            self.lfsr.clone(),
            self.svalue.clone(),
            self.lfdr.clone(),
            self.qvalue.clone(),
            self.posterior_mean.clone(),
            self.posterior_sd.clone(),
        ])
    }

    pub fn column_names() -> Vec<Box<str>> {
        COLUMNS.iter().map(|&c| c.into()).collect()
    }
}

/// The fitted mixture prior and the per-feature variational posterior
#[derive(Debug, Clone)]
pub struct FittedPrior {
    pub pivec: DVec,
    pub tau2_seq: Vec<f64>,
    pub lambda_seq: Vec<f64>,
    pub zero_spot: usize,
    /// `p x M` component posterior means
    pub means: Mat,
    /// `p x M` component posterior variances
    pub variances: Mat,
    /// `p x M` responsibilities
    pub proportions: Mat,
}

impl FittedPrior {
    pub fn new(params: &VemParams, grid: &MixtureGrid) -> Self {
        Self {
            pivec: params.pivec.clone(),
            tau2_seq: grid.tau2_seq.clone(),
            lambda_seq: grid.lambda_seq.clone(),
            zero_spot: grid.zero_spot,
            means: params.mubeta_matrix.clone(),
            variances: params.sig2beta_matrix.clone(),
            proportions: params.gamma_mat.clone(),
        }
    }

    pub fn pi0(&self) -> f64 {
        self.pivec[self.zero_spot]
    }
}

/// `P(X > 0)` for `X ~ N(mu, sig2)`; a point mass when `sig2 == 0`
fn prob_positive(mu: f64, sig2: f64) -> f64 {
    if sig2 > 0.0 {
        0.5 * erfc(-mu / (2.0 * sig2).sqrt())
    } else if mu > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Running mean of the local rates sorted in increasing order, mapped
/// back to the input order. NaN rates are left out and stay NaN.
pub fn qval_from_local(local: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..local.len()).filter(|&j| !local[j].is_nan()).collect();
    order.sort_by(|&a, &b| local[a].total_cmp(&local[b]));

    let mut ret = vec![f64::NAN; local.len()];
    let mut cum = 0.0;
    for (r, &j) in order.iter().enumerate() {
        cum += local[j];
        ret[j] = cum / (r + 1) as f64;
    }
    ret
}

/// Build the output table from a converged state.
///
/// `betahat` and `sebetahat` are copied into the table as given.
pub fn summarize(
    params: &VemParams,
    grid: &MixtureGrid,
    betahat: &DVec,
    sebetahat: &DVec,
) -> SummaryTable {
    let p = params.num_features();
    let zero = grid.zero_spot;

    let lfdr = params.gamma_mat.column(zero).clone_owned();

    let positive_prob = DVec::from_fn(p, |j, _| {
        params
            .gamma_mat
            .row(j)
            .iter()
            .zip(params.mubeta_matrix.row(j).iter())
            .zip(params.sig2beta_matrix.row(j).iter())
            .map(|((&g, &mu), &s2)| g * prob_positive(mu, s2))
            .sum::<f64>()
    });

    let negative_prob = DVec::from_fn(p, |j, _| (1.0 - positive_prob[j] - lfdr[j]).max(0.0));

    let lfsr = DVec::from_fn(p, |j, _| positive_prob[j].min(negative_prob[j]) + lfdr[j]);

    let posterior_mean = params.posterior_mean();
    let second = params.posterior_second_moment();
    let posterior_sd = second.zip_map(&posterior_mean, |m2, m| (m2 - m * m).max(0.0).sqrt());

    let qvalue = DVec::from_vec(qval_from_local(lfdr.as_slice()));
    let svalue = DVec::from_vec(qval_from_local(lfsr.as_slice()));

    SummaryTable {
        betahat: betahat.clone(),
        sebetahat: sebetahat.clone(),
        negative_prob,
        positive_prob,
        lfsr,
        svalue,
        lfdr,
        qvalue,
        posterior_mean,
        posterior_sd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn qvalues_are_running_means() {
        let q = qval_from_local(&[0.5, 0.1, f64::NAN, 0.3]);
        assert_abs_diff_eq!(q[1], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(q[3], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(q[0], 0.3, epsilon = 1e-12);
        assert!(q[2].is_nan());
    }

    #[test]
    fn sign_probabilities_add_up() -> anyhow::Result<()> {
        let grid = MixtureGrid::from_parts(vec![0.0, 1.0], vec![1.0, 1.0])?;
        let params = VemParams {
            pivec: DVec::from_vec(vec![0.5, 0.5]),
            mubeta_matrix: Mat::from_row_slice(2, 2, &[0.0, 2.0, 0.0, -0.5]),
            sig2beta_matrix: Mat::from_row_slice(2, 2, &[0.0, 0.25, 0.0, 0.25]),
            gamma_mat: Mat::from_row_slice(2, 2, &[0.1, 0.9, 0.6, 0.4]),
            muv: DVec::zeros(1),
            sigma_v: Mat::identity(1, 1),
            phi: 1.0,
            xi: 1.0,
        };
        let betahat = DVec::from_vec(vec![2.1, -0.4]);
        let se = DVec::from_vec(vec![1.0, 1.0]);
        let table = summarize(&params, &grid, &betahat, &se);

        assert_abs_diff_eq!(table.lfdr[0], 0.1, epsilon = 1e-12);
        // P(N(2, 0.25) > 0) = Phi(4)
        assert_abs_diff_eq!(table.positive_prob[0], 0.9 * 0.999968329, epsilon = 1e-8);
        // P(N(-0.5, 0.25) > 0) = Phi(-1)
        assert_abs_diff_eq!(table.positive_prob[1], 0.4 * 0.158655254, epsilon = 1e-8);

        for j in 0..2 {
            let total = table.positive_prob[j] + table.negative_prob[j] + table.lfdr[j];
            assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
            assert!(table.lfsr[j] >= table.lfdr[j]);
        }

        // E[b^2] - E[b]^2 for the first feature
        let m: f64 = 0.9 * 2.0;
        let m2: f64 = 0.9 * (4.0 + 0.25);
        assert_abs_diff_eq!(table.posterior_sd[0], (m2 - m * m).sqrt(), epsilon = 1e-12);

        assert_eq!(table.to_matrix().shape(), (2, COLUMNS.len()));
        Ok(())
    }
}
