use crate::common::*;
use crate::params::VemParams;
use crate::sufficient::{QuadTerms, VemData};

use matrix_util::traits::SymmetricOps;

/// Value of an objective at a possibly invalid state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Objective {
    Finite(f64),
    /// The state is outside the parameter space (or evaluates to a
    /// non-finite number); an accelerator must not keep it
    Rejected,
}

impl Objective {
    pub fn from_value(x: f64) -> Self {
        if x.is_finite() {
            Objective::Finite(x)
        } else {
            Objective::Rejected
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Objective::Finite(x) => Some(*x),
            Objective::Rejected => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Objective::Rejected)
    }

    pub fn negate(self) -> Self {
        match self {
            Objective::Finite(x) => Objective::Finite(-x),
            Objective::Rejected => Objective::Rejected,
        }
    }
}

/// Evidence lower bound of `params`, up to constants that do not depend
/// on the variational parameters (`-p/2 log(2 pi)`, `-1/2 sum log S`).
///
/// Returns [`Objective::Rejected`] when `pivec` or a row of `gamma_mat`
/// is not a simplex, `xi` is not positive, `sigma_v` is not positive
/// definite, or the total is not finite.
pub fn elbo(data: &VemData, params: &VemParams) -> Objective {
    let tau2_seq = &data.grid.tau2_seq;
    let lambda_seq = &data.grid.lambda_seq;
    let p = data.num_features() as f64;
    let xi = params.xi;

    if !is_simplex(params.pivec.iter()) {
        debug!("rejected: pivec is not a simplex");
        return Objective::Rejected;
    }

    if !params
        .gamma_mat
        .row_iter()
        .all(|row| is_simplex(row.iter()))
    {
        debug!("rejected: responsibilities are not simplices");
        return Objective::Rejected;
    }

    if !(xi.is_finite() && xi > 0.0) {
        debug!("rejected: xi = {}", xi);
        return Objective::Rejected;
    }

    let Ok(log_det_sigma_v) = params.sigma_v.log_det_pd() else {
        debug!("rejected: Sigma_v is not positive definite");
        return Objective::Rejected;
    };

    let quad = QuadTerms::compute(data, params).total();
    let data_fit = -0.5 * p * xi.ln() - quad / (2.0 * xi);

    let two_pi = 2.0 * std::f64::consts::PI;
    let mut cross_entropy = 0.0;
    let mut entropy = 0.0;

    for (m, (&tau2, &pi_m)) in tau2_seq.iter().zip(params.pivec.iter()).enumerate() {
        let gamma_m = params.gamma_mat.column(m);
        let mu_m = params.mubeta_matrix.column(m);
        let sig2_m = params.sig2beta_matrix.column(m);
        let slab = tau2 > ZERO_GRID_TOL;
        let log_pi = pi_m.ln();

        for ((&g, &mu), &s2) in gamma_m.iter().zip(mu_m.iter()).zip(sig2_m.iter()) {
            if g <= 0.0 {
                continue;
            }

            if pi_m > NEGLIGIBLE_PI {
                let log_prior = if slab {
                    -0.5 * (two_pi * tau2).ln() - (mu * mu + s2) / (2.0 * tau2)
                } else {
                    0.0
                };
                cross_entropy += g * (log_pi + log_prior);
            }

            entropy -= g * g.ln();
            if slab {
                entropy += g * 0.5 * (two_pi * std::f64::consts::E * s2).ln();
            }
        }
    }

    let factor_prior = -0.5 * params.muv.norm_squared() - 0.5 * params.sigma_v.trace();

    let dirichlet: f64 = lambda_seq
        .iter()
        .zip(params.pivec.iter())
        .filter(|(_, &pi_m)| pi_m > NEGLIGIBLE_PI)
        .map(|(&lambda, &pi_m)| (lambda - 1.0) * pi_m.ln())
        .sum();

    let penalty = -data.var_inflate_pen / xi;

    Objective::from_value(
        data_fit
            + cross_entropy
            + factor_prior
            + dirichlet
            + 0.5 * log_det_sigma_v
            + entropy
            + penalty,
    )
}
