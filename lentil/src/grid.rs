//! Grid of prior variances for the mixture-of-normals prior on effect
//! sizes, and the Dirichlet-like penalties on the mixing proportions.

use crate::common::*;

/// How to choose the prior-variance grid
#[derive(Debug, Clone, PartialEq)]
pub enum GridSpec {
    /// Geometric grid of standard deviations, `mult^(-n..=0) * sd_max`,
    /// spanning the observed effect magnitudes, plus a point mass
    Auto { mult: f64 },
    /// User-supplied variances; exactly one must be zero
    Custom(Vec<f64>),
}

impl Default for GridSpec {
    fn default() -> Self {
        GridSpec::Auto {
            mult: std::f64::consts::SQRT_2,
        }
    }
}

/// Penalties `lambda_seq` added as pseudo-counts to the mixing
/// proportion update
#[derive(Debug, Clone, PartialEq)]
pub enum PenaltyType {
    /// All ones except `lambda0` at the point mass
    ZeroConc { lambda0: f64 },
    /// All ones (no penalty)
    Uniform,
    /// One penalty per grid component, each `>= 1`
    Custom(Vec<f64>),
}

impl Default for PenaltyType {
    fn default() -> Self {
        PenaltyType::ZeroConc { lambda0: 10.0 }
    }
}

/// Fixed prior support shared by every feature
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureGrid {
    /// Prior variances; `tau2_seq[zero_spot] == 0`
    pub tau2_seq: Vec<f64>,
    /// Concentration penalties, each `>= 1`
    pub lambda_seq: Vec<f64>,
    /// Index of the point mass at zero
    pub zero_spot: usize,
}

impl MixtureGrid {
    /// Build the grid from first-pass estimates.
    ///
    /// * `betahat` - effect estimates
    /// * `s_diag` - their (positive) variances
    /// * `grid` - grid specification
    /// * `penalty` - penalty specification
    pub fn build(
        betahat: &[f64],
        s_diag: &[f64],
        grid: &GridSpec,
        penalty: &PenaltyType,
    ) -> anyhow::Result<Self> {
        let tau2_seq = match grid {
            GridSpec::Auto { mult } => auto_grid_sd(betahat, s_diag, *mult)?
                .into_iter()
                .map(|sd| sd * sd)
                .collect::<Vec<_>>(),
            GridSpec::Custom(tau2) => tau2.clone(),
        };

        let zero_spot = find_zero_spot(&tau2_seq)?;

        let lambda_seq = match penalty {
            PenaltyType::ZeroConc { lambda0 } => {
                let mut lambda = vec![1.0; tau2_seq.len()];
                lambda[zero_spot] = *lambda0;
                lambda
            }
            PenaltyType::Uniform => vec![1.0; tau2_seq.len()],
            PenaltyType::Custom(lambda) => lambda.clone(),
        };

        Self::from_parts(tau2_seq, lambda_seq)
    }

    /// Validate and assemble a grid from its parts
    pub fn from_parts(tau2_seq: Vec<f64>, lambda_seq: Vec<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(
            tau2_seq.len() >= 2,
            "the variance grid needs the point mass and at least one other component"
        );

        anyhow::ensure!(
            tau2_seq.len() == lambda_seq.len(),
            "{} penalties for {} grid components",
            lambda_seq.len(),
            tau2_seq.len()
        );

        anyhow::ensure!(
            tau2_seq.iter().all(|&t| t.is_finite() && t >= 0.0),
            "grid variances must be finite and non-negative"
        );

        anyhow::ensure!(
            lambda_seq.iter().all(|&l| l.is_finite() && l >= 1.0),
            "penalties must be finite and at least 1: {:?}",
            lambda_seq
        );

        let zero_spot = find_zero_spot(&tau2_seq)?;

        let mut tau2_seq = tau2_seq;
        tau2_seq[zero_spot] = 0.0;

        Ok(Self {
            tau2_seq,
            lambda_seq,
            zero_spot,
        })
    }

    pub fn len(&self) -> usize {
        self.tau2_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tau2_seq.is_empty()
    }
}

/// Locate the single grid entry within [`ZERO_GRID_TOL`] of zero
pub fn find_zero_spot(tau2_seq: &[f64]) -> anyhow::Result<usize> {
    let zeros: Vec<usize> = tau2_seq
        .iter()
        .enumerate()
        .filter(|(_, &t)| t.abs() < ZERO_GRID_TOL)
        .map(|(m, _)| m)
        .collect();

    match zeros.as_slice() {
        [m] => Ok(*m),
        [] => Err(anyhow::anyhow!("the variance grid has no zero entry")),
        _ => Err(anyhow::anyhow!(
            "the variance grid has {} zero entries at {:?}, expected exactly one",
            zeros.len(),
            zeros
        )),
    }
}

/// Standard deviations of the automatic grid, point mass first.
///
/// The largest standard deviation is the signed square root
/// `2 * sqrt(max(betahat^2 - s))` (falls back to `8 * sd_min` when no
/// feature exceeds its noise level), the smallest is `min(sqrt(s))/10`.
pub fn auto_grid_sd(betahat: &[f64], s_diag: &[f64], mult: f64) -> anyhow::Result<Vec<f64>> {
    anyhow::ensure!(
        betahat.len() == s_diag.len() && !betahat.is_empty(),
        "betahat ({}) and s_diag ({}) must be non-empty and of equal length",
        betahat.len(),
        s_diag.len()
    );
    anyhow::ensure!(
        mult.is_finite() && mult > 1.0,
        "grid multiplier must exceed 1: {}",
        mult
    );
    anyhow::ensure!(
        s_diag.iter().all(|&s| s.is_finite() && s > 0.0),
        "variances must be positive"
    );

    let sd_min = s_diag.iter().map(|s| s.sqrt()).fold(f64::INFINITY, f64::min) / 10.0;

    let excess = betahat
        .iter()
        .zip(s_diag)
        .map(|(&b, &s)| b * b - s)
        .fold(f64::NEG_INFINITY, f64::max);

    let sd_max = if excess <= 0.0 {
        8.0 * sd_min
    } else {
        2.0 * excess.sqrt()
    };

    let npoint = ((sd_max / sd_min).log2() / mult.log2()).ceil().max(0.0) as i32;

    let sd_smallest = mult.powi(-npoint) * sd_max;
    anyhow::ensure!(
        sd_smallest * sd_smallest >= ZERO_GRID_TOL,
        "input variances are too small for the automatic grid: min(s) = {:e} puts \
         the smallest grid variance {:e} below the zero tolerance {:e}; rescale the effects",
        s_diag.iter().cloned().fold(f64::INFINITY, f64::min),
        sd_smallest * sd_smallest,
        ZERO_GRID_TOL
    );

    let mut ret = Vec::with_capacity(npoint as usize + 2);
    ret.push(0.0);
    ret.extend((-npoint..=0).map(|e| mult.powi(e) * sd_max));
    Ok(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_grid_spans_effects() -> anyhow::Result<()> {
        let betahat = vec![0.1, -3.0, 0.5, 1.0];
        let s_diag = vec![1.0, 1.0, 0.25, 1.0];
        let grid = MixtureGrid::build(
            &betahat,
            &s_diag,
            &GridSpec::default(),
            &PenaltyType::default(),
        )?;

        assert_eq!(grid.zero_spot, 0);
        assert_eq!(grid.tau2_seq[0], 0.0);
        assert_eq!(grid.lambda_seq[0], 10.0);
        assert!(grid.lambda_seq[1..].iter().all(|&l| l == 1.0));

        // strictly increasing after the point mass
        for w in grid.tau2_seq[1..].windows(2) {
            assert!(w[0] < w[1]);
        }

        let sd_max = 2.0 * (9.0_f64 - 1.0).sqrt();
        approx::assert_relative_eq!(
            *grid.tau2_seq.last().unwrap(),
            sd_max * sd_max,
            max_relative = 1e-12
        );
        assert!(grid.tau2_seq[1] <= 0.05 * 0.05 * 2.0);
        Ok(())
    }

    #[test]
    fn auto_grid_without_signal() -> anyhow::Result<()> {
        let sd = auto_grid_sd(&[0.1, -0.2], &[1.0, 1.0], 2.0)?;
        // 0.1 ... 0.8 in powers of two
        assert_eq!(sd.len(), 5);
        approx::assert_relative_eq!(sd[4], 0.8, max_relative = 1e-12);
        approx::assert_relative_eq!(sd[1], 0.1, max_relative = 1e-12);
        Ok(())
    }

    #[test]
    fn tiny_variances_blame_the_input_scale() {
        let err = auto_grid_sd(&[0.0; 5], &[1e-16; 5], std::f64::consts::SQRT_2)
            .expect_err("grid below the zero tolerance");
        assert!(err.to_string().contains("input variances are too small"));

        // still fine just above the tolerance
        assert!(auto_grid_sd(&[0.0; 5], &[1e-8; 5], std::f64::consts::SQRT_2).is_ok());
    }

    #[test]
    fn custom_grid_needs_one_zero() {
        let two_zeros = GridSpec::Custom(vec![0.0, 1e-16, 1.0]);
        let err = MixtureGrid::build(&[1.0], &[1.0], &two_zeros, &PenaltyType::Uniform);
        assert!(err.is_err());

        let no_zero = GridSpec::Custom(vec![0.5, 1.0]);
        assert!(MixtureGrid::build(&[1.0], &[1.0], &no_zero, &PenaltyType::Uniform).is_err());
    }

    #[test]
    fn custom_penalty_must_match_grid() {
        let grid = GridSpec::Custom(vec![0.0, 0.25, 1.0]);
        let short = PenaltyType::Custom(vec![1.0, 1.0]);
        assert!(MixtureGrid::build(&[1.0], &[1.0], &grid, &short).is_err());

        let below_one = PenaltyType::Custom(vec![1.0, 0.5, 1.0]);
        assert!(MixtureGrid::build(&[1.0], &[1.0], &grid, &below_one).is_err());
    }

    #[test]
    fn custom_grid_finds_interior_zero() -> anyhow::Result<()> {
        let grid = MixtureGrid::build(
            &[1.0],
            &[1.0],
            &GridSpec::Custom(vec![0.25, 0.0, 1.0]),
            &PenaltyType::ZeroConc { lambda0: 5.0 },
        )?;
        assert_eq!(grid.zero_spot, 1);
        assert_eq!(grid.lambda_seq, vec![1.0, 5.0, 1.0]);
        Ok(())
    }
}
