//! Fixed inputs of the engine and the quadratic-form primitives shared
//! by the noise-scale update and the ELBO.

use crate::common::*;
use crate::grid::MixtureGrid;
use crate::params::VemParams;

/// Fixed inputs of the variational EM, never updated by a sweep
#[derive(Debug, Clone)]
pub struct VemData {
    /// OLS effect estimates in rotated coordinates
    pub betahat: DVec,
    /// Per-feature noise variances
    pub s_diag: DVec,
    /// `1 / s_diag`
    pub inv_s: DVec,
    /// Whitened confounder loadings, `p x k`
    pub amat: Mat,
    /// `A' diag(1/S) A`, `k x k`
    pub asa: Mat,
    pub grid: MixtureGrid,
    /// Estimate `xi`; otherwise it stays at its initial value
    pub scale_var: bool,
    /// Non-negative penalty keeping `xi` away from zero
    pub var_inflate_pen: f64,
}

impl VemData {
    pub fn new(
        betahat: DVec,
        s_diag: DVec,
        amat: Mat,
        grid: MixtureGrid,
        scale_var: bool,
        var_inflate_pen: f64,
    ) -> anyhow::Result<Self> {
        let p = betahat.len();

        anyhow::ensure!(p > 0, "no features");
        anyhow::ensure!(
            s_diag.len() == p && amat.nrows() == p,
            "dimension mismatch: {} effects, {} variances, {} loading rows",
            p,
            s_diag.len(),
            amat.nrows()
        );
        anyhow::ensure!(amat.ncols() > 0, "need at least one confounder");
        anyhow::ensure!(
            betahat.iter().all(|b| b.is_finite()),
            "effect estimates must be finite"
        );
        anyhow::ensure!(
            s_diag.iter().all(|&s| s.is_finite() && s > 0.0),
            "noise variances must be finite and positive"
        );
        anyhow::ensure!(
            amat.iter().all(|a| a.is_finite()),
            "confounder loadings must be finite"
        );
        anyhow::ensure!(
            var_inflate_pen.is_finite() && var_inflate_pen >= 0.0,
            "variance inflation penalty must be non-negative: {}",
            var_inflate_pen
        );

        let inv_s = s_diag.map(|s| 1.0 / s);
        let weighted = Mat::from_fn(p, amat.ncols(), |i, j| amat[(i, j)] * inv_s[i]);
        let asa = amat.transpose() * weighted;
        let asa = (&asa + asa.transpose()) * 0.5;

        Ok(Self {
            betahat,
            s_diag,
            inv_s,
            amat,
            asa,
            grid,
            scale_var,
            var_inflate_pen,
        })
    }

    pub fn num_features(&self) -> usize {
        self.betahat.len()
    }

    pub fn num_factors(&self) -> usize {
        self.amat.ncols()
    }

    /// `sum_j x[j] y[j] / S[j]`
    pub fn weighted_dot(&self, x: &DVec, y: &DVec) -> f64 {
        x.iter()
            .zip(y.iter())
            .zip(self.inv_s.iter())
            .map(|((a, b), w)| a * b * w)
            .sum()
    }

    /// `E[v' ASA v] = muv' ASA muv + tr(ASA Sigma_v)`
    pub fn factor_second_moment(&self, muv: &DVec, sigma_v: &Mat) -> f64 {
        let quad = muv.dot(&(&self.asa * muv));
        let trace = self.asa.component_mul(sigma_v).sum();
        quad + trace
    }
}

/// The six terms of the expected weighted residual sum of squares
/// `E[sum_j (betahat_j - beta_j - phi (A v)_j)^2 / S_j] = t1 + t2 + t3 - t4 - t5 + t6`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadTerms {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub t4: f64,
    pub t5: f64,
    pub t6: f64,
}

impl QuadTerms {
    pub fn compute(data: &VemData, params: &VemParams) -> Self {
        let mubeta = params.posterior_mean();
        let second = params.posterior_second_moment();
        let amuv = &data.amat * &params.muv;
        let phi = params.phi;

        Self {
            t1: data.weighted_dot(&data.betahat, &data.betahat),
            t2: second.dot(&data.inv_s),
            t3: phi * phi * data.factor_second_moment(&params.muv, &params.sigma_v),
            t4: 2.0 * data.weighted_dot(&data.betahat, &mubeta),
            t5: 2.0 * phi * data.weighted_dot(&data.betahat, &amuv),
            t6: 2.0 * phi * data.weighted_dot(&mubeta, &amuv),
        }
    }

    pub fn total(&self) -> f64 {
        self.t1 + self.t2 + self.t3 - self.t4 - self.t5 + self.t6
    }
}
