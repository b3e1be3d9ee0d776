use crate::common::*;
use matrix_util::dmatrix_rsvd::RandomizedSVD;

/// Loadings and residual variances estimated from an `n x p` block of
/// residuals
#[derive(Debug, Clone)]
pub struct FactorFit {
    /// `p x k`
    pub loadings: Mat,
    /// `p`
    pub sig_diag: DVec,
}

/// Estimate `k` confounder loadings from residuals `Y (n x p)`
pub trait FactorAnalysis {
    fn fit(&self, y: &Mat, k: usize) -> anyhow::Result<FactorFit>;
}

/// Truncated SVD `Y = U D V'`: loadings `V D / sqrt(n)`, scores
/// `sqrt(n) U`, and column-wise residual variances with `n - k` degrees
/// of freedom
#[derive(Debug, Clone)]
pub struct PcaNaive {
    pub svd_iter: usize,
    pub seed: u64,
}

impl Default for PcaNaive {
    fn default() -> Self {
        Self {
            svd_iter: 5,
            seed: 42,
        }
    }
}

impl FactorAnalysis for PcaNaive {
    fn fit(&self, y: &Mat, k: usize) -> anyhow::Result<FactorFit> {
        let (n, p) = (y.nrows(), y.ncols());

        anyhow::ensure!(k > 0, "number of factors must be positive");
        anyhow::ensure!(
            k < n,
            "{} factors need more than {} residual samples",
            k,
            n
        );
        anyhow::ensure!(k <= p, "{} factors for {} features", k, p);

        let mut svd = RandomizedSVD::new(k, self.svd_iter).with_seed(self.seed);
        svd.compute(y)?;

        let sqrt_n = (n as f64).sqrt();
        let d = svd.singular_values();
        let mut loadings = svd.matrix_v().clone();
        for (j, mut col) in loadings.column_iter_mut().enumerate() {
            col *= d[j] / sqrt_n;
        }
        let scores = svd.matrix_u() * sqrt_n;

        let resid = y - &scores * loadings.transpose();
        let dof = (n - k) as f64;
        let sig_diag = DVec::from_iterator(p, resid.column_iter().map(|c| c.norm_squared() / dof));

        anyhow::ensure!(
            sig_diag.iter().all(|&s| s > 0.0),
            "zero residual variance after removing {} factors",
            k
        );

        info!("factor analysis: {} factors from [{} x {}] residuals", k, n, p);

        Ok(FactorFit { loadings, sig_diag })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::SampleOps;
    use rand::SeedableRng;

    #[test]
    fn recovers_low_rank_structure() -> anyhow::Result<()> {
        let (n, p, k) = (40, 15, 2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let z = Mat::rnorm_rng(n, k, &mut rng);
        let l = Mat::rnorm_rng(p, k, &mut rng);
        let noise = Mat::rnorm_rng(n, p, &mut rng) * 0.1;
        let y = &z * l.transpose() + noise;

        let fit = PcaNaive::default().fit(&y, k)?;
        assert_eq!(fit.loadings.shape(), (p, k));

        // same column space of L L'
        let lhat = &fit.loadings * fit.loadings.transpose();
        let proj = &l * (l.transpose() * &l).try_inverse().unwrap() * l.transpose();
        assert_abs_diff_eq!(&proj * &lhat, lhat.clone(), epsilon = 0.5);

        for &s in fit.sig_diag.iter() {
            assert!(s > 0.0 && s < 0.1);
        }
        Ok(())
    }

    #[test]
    fn needs_enough_samples() {
        let y = Mat::from_element(3, 5, 1.0);
        assert!(PcaNaive::default().fit(&y, 3).is_err());
        assert!(PcaNaive::default().fit(&y, 0).is_err());
    }
}
