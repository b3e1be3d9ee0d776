use crate::common::*;
use matrix_util::traits::SampleOps;

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

#[derive(Debug, Clone)]
pub struct SimOptions {
    pub num_features: usize,
    pub num_factors: usize,
    /// fraction of features without an effect
    pub null_frac: f64,
    /// standard deviation of the non-null effects
    pub effect_sd: f64,
    /// standard deviation of the confounder scores
    pub confounder_sd: f64,
    /// standard errors are drawn from `U(0.5, 1.5) * se_scale`
    pub se_scale: f64,
    pub seed: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            num_features: 1000,
            num_factors: 3,
            null_frac: 0.8,
            effect_sd: 2.0,
            confounder_sd: 1.0,
            se_scale: 1.0,
            seed: 42,
        }
    }
}

/// `betahat = beta + L z + e`, `e_j ~ N(0, se_j^2)`
#[derive(Debug, Clone)]
pub struct SimData {
    pub betahat: DVec,
    pub sebetahat: DVec,
    pub loadings: Mat,
    /// true effects
    pub beta: DVec,
    /// true confounder scores
    pub z: DVec,
}

pub fn simulate_confounded(options: &SimOptions) -> anyhow::Result<SimData> {
    let (p, k) = (options.num_features, options.num_factors);

    anyhow::ensure!(p > 0 && k > 0, "need features and factors");
    anyhow::ensure!(
        (0.0..=1.0).contains(&options.null_frac),
        "null fraction must lie in [0, 1]: {}",
        options.null_frac
    );
    anyhow::ensure!(
        options.se_scale > 0.0,
        "standard error scale must be positive"
    );

    let mut rng = rand::rngs::StdRng::seed_from_u64(options.seed);

    let effect = Normal::new(0.0, options.effect_sd)?;
    let score = Normal::new(0.0, options.confounder_sd)?;

    let loadings = Mat::rnorm_rng(p, k, &mut rng);
    let z = DVec::from_fn(k, |_, _| score.sample(&mut rng));

    let beta = DVec::from_fn(p, |_, _| {
        if rng.random::<f64>() < options.null_frac {
            0.0
        } else {
            effect.sample(&mut rng)
        }
    });

    let sebetahat = DVec::from_fn(p, |_, _| (0.5 + rng.random::<f64>()) * options.se_scale);

    let noise = Mat::rnorm_rng(p, 1, &mut rng).column(0).component_mul(&sebetahat);
    let betahat = &beta + &loadings * &z + noise;

    info!(
        "simulated {} features ({} non-null) with {} confounders",
        p,
        beta.iter().filter(|&&b| b != 0.0).count(),
        k
    );

    Ok(SimData {
        betahat,
        sebetahat,
        loadings,
        beta,
        z,
    })
}
