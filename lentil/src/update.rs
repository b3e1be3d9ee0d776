//! One coordinate-ascent sweep of the variational EM.
//!
//! The sweep updates, in order, the per-feature mixture posterior, the
//! mixing proportions, the factor posterior, the g-prior scale `phi` and,
//! when enabled, the noise scale `xi`. Each step is the exact maximizer
//! of the ELBO given the others, so plain sweeps never decrease it.
//!
//! Invalid states are not repaired: a non-simplex `pivec` gives NaN
//! responsibilities, and NaN travels through the remaining steps so that
//! the objective rejects the state.

use crate::common::*;
use crate::grid::MixtureGrid;
use crate::params::VemParams;
use crate::sufficient::{QuadTerms, VemData};

/// Smallest noise scale a sweep will return
pub const MIN_XI: f64 = 1e-10;

/// Per-feature mixture posterior `(means, variances, responsibilities)`
pub struct FeaturePosterior {
    pub mu: Mat,
    pub sig2: Mat,
    pub gamma: Mat,
}

/// Posterior of `beta_j` under the mixture prior given the residual
/// `resid[j] ~ N(beta_j, noise_var[j])`.
///
/// * `resid` - residual effects after removing confounding
/// * `noise_var` - likelihood variances (`xi * S`)
/// * `tau2_seq` - prior variances; the point mass yields `mu = sig2 = 0`
/// * `pivec` - mixing proportions; NaN responsibilities unless a simplex
pub fn feature_posterior(
    resid: &DVec,
    noise_var: &DVec,
    tau2_seq: &[f64],
    pivec: &DVec,
) -> FeaturePosterior {
    let p = resid.len();
    let mm = tau2_seq.len();

    let mut mu = Mat::zeros(p, mm);
    let mut sig2 = Mat::zeros(p, mm);
    let mut gamma = Mat::zeros(p, mm);

    let valid_pi = pivec.len() == mm && is_simplex(pivec.iter());
    // entries within rounding below zero are absent components
    let log_pi = pivec.map(|x| if x > 0.0 { x.ln() } else { f64::NEG_INFINITY });

    let mut log_resp = vec![0.0; mm];

    for j in 0..p {
        let r = resid[j];
        let nv = noise_var[j];

        for (m, &tau2) in tau2_seq.iter().enumerate() {
            if tau2 > ZERO_GRID_TOL {
                let s2 = 1.0 / (1.0 / nv + 1.0 / tau2);
                sig2[(j, m)] = s2;
                mu[(j, m)] = r / nv * s2;
            }
            let marg = nv + tau2;
            log_resp[m] = if valid_pi {
                log_pi[m] - 0.5 * (2.0 * std::f64::consts::PI * marg).ln() - 0.5 * r * r / marg
            } else {
                f64::NAN
            };
        }

        let max_log = log_resp.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut tot = 0.0;
        for m in 0..mm {
            let g = if valid_pi {
                (log_resp[m] - max_log).exp()
            } else {
                f64::NAN
            };
            gamma[(j, m)] = g;
            tot += g;
        }
        for m in 0..mm {
            gamma[(j, m)] /= tot;
        }
    }

    FeaturePosterior { mu, sig2, gamma }
}

/// Step (a): mixture posterior of each feature given the confounder fit
pub fn update_feature_posterior(data: &VemData, params: &mut VemParams) {
    let amuv = &data.amat * &params.muv;
    let resid = &data.betahat - amuv * params.phi;
    let noise_var = &data.s_diag * params.xi;

    let post = feature_posterior(&resid, &noise_var, &data.grid.tau2_seq, &params.pivec);

    params.mubeta_matrix = post.mu;
    params.sig2beta_matrix = post.sig2;
    params.gamma_mat = post.gamma;
}

/// Step (b): penalized MAP mixing proportions,
/// `pi[m] ∝ max(0, sum_j gamma[j,m] + lambda[m] - 1)`
pub fn update_pivec(grid: &MixtureGrid, gamma_mat: &Mat) -> DVec {
    let counts = gamma_mat.row_sum().transpose();

    let raw = DVec::from_iterator(
        grid.len(),
        counts
            .iter()
            .zip(grid.lambda_seq.iter())
            .map(|(&n, &lambda)| {
                let x = n + lambda - 1.0;
                // f64::max would turn NaN into 0
                if x.is_nan() {
                    x
                } else {
                    x.max(0.0)
                }
            }),
    );

    let tot = raw.sum();
    raw / tot
}

/// Step (c): conjugate Gaussian posterior of the factor scores.
///
/// `Sigma_v = (I + phi^2/xi ASA)^-1` and
/// `muv = phi/xi Sigma_v A' diag(1/S) (betahat - mubeta)`.
/// A precision that fails Cholesky (only possible for a non-finite trial
/// state) leaves NaN in `muv` and `sigma_v`.
pub fn update_factor_posterior(data: &VemData, params: &mut VemParams) {
    let k = data.num_factors();
    let (phi, xi) = (params.phi, params.xi);

    let precision = Mat::identity(k, k) + &data.asa * (phi * phi / xi);

    let chol = if xi > 0.0 && precision.iter().all(|x| x.is_finite()) {
        precision.cholesky()
    } else {
        None
    };

    let Some(chol) = chol else {
        debug!("factor precision is not positive definite");
        params.muv = DVec::from_element(k, f64::NAN);
        params.sigma_v = Mat::from_element(k, k, f64::NAN);
        return;
    };

    let sigma_v = chol.inverse();
    let resid = &data.betahat - params.posterior_mean();
    let weighted = resid.component_mul(&data.inv_s);
    let ats = data.amat.transpose() * weighted;

    params.muv = (&sigma_v * ats) * (phi / xi);
    params.sigma_v = (&sigma_v + sigma_v.transpose()) * 0.5;
}

/// Step (d): `phi = muv' A' diag(1/S) (betahat - mubeta) / E[v' ASA v]`
pub fn update_phi(data: &VemData, params: &mut VemParams) {
    let amuv = &data.amat * &params.muv;
    let resid = &data.betahat - params.posterior_mean();
    let numer = data.weighted_dot(&amuv, &resid);
    let denom = data.factor_second_moment(&params.muv, &params.sigma_v);

    // no confounding signal at all; keep the current scale
    if denom != 0.0 {
        params.phi = numer / denom;
    }
}

/// Step (e): `xi = (t1 + t2 + t3 - t4 - t5 + t6 + 2 pen) / p`, floored at
/// [`MIN_XI`]
pub fn update_xi(data: &VemData, params: &mut VemParams) {
    if !data.scale_var {
        return;
    }
    let p = data.num_features() as f64;
    let quad = QuadTerms::compute(data, params).total();
    let xi = (quad + 2.0 * data.var_inflate_pen) / p;
    params.xi = if xi.is_nan() { xi } else { xi.max(MIN_XI) };
}

/// The fixed-point map: one full sweep from `params`
pub fn vem_sweep(data: &VemData, params: &VemParams) -> VemParams {
    let mut next = params.clone();
    update_feature_posterior(data, &mut next);
    next.pivec = update_pivec(&data.grid, &next.gamma_mat);
    update_factor_posterior(data, &mut next);
    update_phi(data, &mut next);
    update_xi(data, &mut next);
    next
}
