//! Starting values: a confounder-free normal-means fit seeds the factor
//! scores, and the mixing proportions start from a chosen scheme.

use crate::common::*;
use crate::grid::MixtureGrid;
use crate::params::VemParams;
use crate::sufficient::VemData;
use crate::update::{feature_posterior, update_feature_posterior, update_pivec};

use rand::{Rng, SeedableRng};

const SEED_TOL: f64 = 1e-8;
const SEED_MAX_ITER: usize = 500;

/// Starting mixing proportions
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PiInit {
    /// `0.9` on the point mass, the rest spread evenly
    #[default]
    ZeroConc,
    Uniform,
    /// Uniform draws, renormalized
    Random { seed: u64 },
}

pub fn initial_pivec(grid: &MixtureGrid, pi_init: &PiInit) -> DVec {
    let mm = grid.len();
    match pi_init {
        PiInit::ZeroConc => {
            let mut pivec = DVec::from_element(mm, 0.1 / (mm - 1) as f64);
            pivec[grid.zero_spot] = 0.9;
            pivec
        }
        PiInit::Uniform => DVec::from_element(mm, 1.0 / mm as f64),
        PiInit::Random { seed } => {
            let mut rng = rand::rngs::StdRng::seed_from_u64(*seed);
            let draws = DVec::from_fn(mm, |_, _| rng.random::<f64>());
            let tot = draws.sum();
            draws / tot
        }
    }
}

/// Posterior means of the plain normal-means model
/// `betahat_j ~ N(beta_j, S_j)`, `beta_j ~ sum_m pi_m N(0, tau2_m)`, with
/// `pi` fitted by penalized EM
pub fn normal_means_seed(betahat: &DVec, s_diag: &DVec, grid: &MixtureGrid) -> DVec {
    let mut pivec = initial_pivec(grid, &PiInit::Uniform);

    for iter in 0..SEED_MAX_ITER {
        let post = feature_posterior(betahat, s_diag, &grid.tau2_seq, &pivec);
        let next = update_pivec(grid, &post.gamma);
        let change = (&next - &pivec).amax();
        pivec = next;
        if change < SEED_TOL {
            debug!("normal-means seed converged at iteration {}", iter);
            break;
        }
    }

    let post = feature_posterior(betahat, s_diag, &grid.tau2_seq, &pivec);
    post.gamma.component_mul(&post.mu).column_sum()
}

/// Weighted least squares of `betahat - seed_mean` on `A` with weights
/// `1/S`
pub fn initial_factor_mean(data: &VemData, seed_mean: &DVec) -> anyhow::Result<DVec> {
    anyhow::ensure!(
        seed_mean.len() == data.num_features(),
        "seed of length {} for {} features",
        seed_mean.len(),
        data.num_features()
    );

    let resid = (&data.betahat - seed_mean).component_mul(&data.inv_s);
    let rhs = data.amat.transpose() * resid;

    let chol = data
        .asa
        .clone()
        .cholesky()
        .ok_or(anyhow::anyhow!("singular matrix: A' diag(1/S) A"))?;

    Ok(chol.solve(&rhs))
}

/// A valid starting state: `muv` from [`initial_factor_mean`],
/// `Sigma_v = I`, `phi = xi = 1`, and the per-feature posterior filled in
/// by one feature update
pub fn initial_state(
    data: &VemData,
    seed_mean: &DVec,
    pi_init: &PiInit,
) -> anyhow::Result<VemParams> {
    let (p, mm, k) = (data.num_features(), data.grid.len(), data.num_factors());

    let mut params = VemParams {
        pivec: initial_pivec(&data.grid, pi_init),
        mubeta_matrix: Mat::zeros(p, mm),
        sig2beta_matrix: Mat::zeros(p, mm),
        gamma_mat: Mat::zeros(p, mm),
        muv: initial_factor_mean(data, seed_mean)?,
        sigma_v: Mat::identity(k, k),
        phi: 1.0,
        xi: 1.0,
    };

    update_feature_posterior(data, &mut params);

    anyhow::ensure!(
        params.gamma_mat.iter().all(|g| g.is_finite()),
        "non-finite responsibilities in the initial state"
    );

    Ok(params)
}
