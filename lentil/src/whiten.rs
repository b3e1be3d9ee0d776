use crate::common::*;
use matrix_util::traits::SymmetricOps;

/// Relative eigenvalue threshold below which the loading cross-product
/// counts as singular
pub const WHITEN_REL_TOL: f64 = 1e-10;

/// Whitened loadings `A = L W` with `W = (L'L)^{-1/2}`, so that `A'A = I`
/// and `A v = L (W v)`
#[derive(Debug, Clone)]
pub struct Whitening {
    pub amat: Mat,
    /// `W`, symmetric `k x k`
    pub transform: Mat,
}

impl Whitening {
    pub fn new(loadings: &Mat) -> anyhow::Result<Self> {
        let (p, k) = (loadings.nrows(), loadings.ncols());
        anyhow::ensure!(k > 0, "need at least one confounder");
        anyhow::ensure!(
            k <= p,
            "{} confounders cannot be identified from {} features",
            k,
            p
        );

        let cross = loadings.transpose() * loadings;
        let transform = cross.inv_sqrt_symmetric(WHITEN_REL_TOL).map_err(|e| {
            anyhow::anyhow!("confounder loadings are not of full column rank: {}", e)
        })?;

        Ok(Self {
            amat: loadings * &transform,
            transform,
        })
    }

    /// Map factor scores of the whitened loadings back to the scale of
    /// the input loadings
    pub fn unwhiten(&self, v: &DVec) -> DVec {
        &self.transform * v
    }
}
