use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};
use rand_distr::{Distribution, StandardNormal};

type Mat = DMatrix<f64>;

impl SampleOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn rnorm_rng(dd: usize, nn: usize, rng: &mut impl rand::Rng) -> Self::Mat {
        Mat::from_fn(dd, nn, |_, _| StandardNormal.sample(&mut *rng))
    }
}

impl MatOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn scale_rows_by(&self, weights: &[f64]) -> Self::Mat {
        debug_assert_eq!(weights.len(), self.nrows());
        Mat::from_fn(self.nrows(), self.ncols(), |i, j| self[(i, j)] * weights[i])
    }
}

impl SymmetricOps for Mat {
    type Mat = Mat;
    type Scalar = f64;

    fn inv_sqrt_symmetric(&self, rel_tol: f64) -> anyhow::Result<Self::Mat> {
        let eig = self.symmetrize().symmetric_eigen();
        let emax = eig.eigenvalues.max();
        let degenerate = eig.eigenvalues.iter().any(|&e| e <= rel_tol * emax);
        if emax.is_nan() || emax <= 0.0 || degenerate {
            return Err(anyhow::anyhow!(
                "singular matrix: eigenvalues {:?}",
                eig.eigenvalues.as_slice()
            ));
        }
        let d = eig.eigenvalues.map(|e| 1.0 / e.sqrt());
        let q = &eig.eigenvectors;
        Ok(q * Mat::from_diagonal(&d) * q.transpose())
    }

    fn log_det_pd(&self) -> anyhow::Result<f64> {
        let chol = self
            .symmetrize()
            .cholesky()
            .ok_or(anyhow::anyhow!("singular matrix: Cholesky failed"))?;
        Ok(2.0 * chol.l().diagonal().iter().map(|x| x.ln()).sum::<f64>())
    }

    fn symmetrize(&self) -> Self::Mat {
        (self + self.transpose()) * 0.5
    }
}
