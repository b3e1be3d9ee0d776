use crate::common::*;

/// Bump when the field order or shapes of [`ParamLayout`] change
pub const PARAM_LAYOUT_VERSION: u32 = 1;

/// All variational parameters of the model
#[derive(Debug, Clone, PartialEq)]
pub struct VemParams {
    /// Mixing proportions over the grid, `M`
    pub pivec: DVec,
    /// Component posterior means, `p x M`
    pub mubeta_matrix: Mat,
    /// Component posterior variances, `p x M`
    pub sig2beta_matrix: Mat,
    /// Responsibilities, `p x M`, rows sum to one
    pub gamma_mat: Mat,
    /// Posterior mean of the factor scores, `k`
    pub muv: DVec,
    /// Posterior covariance of the factor scores, `k x k`
    pub sigma_v: Mat,
    /// g-prior scale
    pub phi: f64,
    /// Noise variance inflation
    pub xi: f64,
}

impl VemParams {
    pub fn num_features(&self) -> usize {
        self.gamma_mat.nrows()
    }

    pub fn num_grid(&self) -> usize {
        self.pivec.len()
    }

    pub fn num_factors(&self) -> usize {
        self.muv.len()
    }

    /// Marginal posterior mean `E[beta_j] = sum_m gamma[j,m] mu[j,m]`
    pub fn posterior_mean(&self) -> DVec {
        self.gamma_mat.component_mul(&self.mubeta_matrix).column_sum()
    }

    /// Marginal posterior second moment `E[beta_j^2]`
    pub fn posterior_second_moment(&self) -> DVec {
        let second = self
            .mubeta_matrix
            .zip_map(&self.sig2beta_matrix, |mu, sig2| mu * mu + sig2);
        self.gamma_mat.component_mul(&second).column_sum()
    }

    pub fn layout(&self) -> ParamLayout {
        ParamLayout {
            num_features: self.num_features(),
            num_grid: self.num_grid(),
            num_factors: self.num_factors(),
        }
    }
}

/// Flat-vector codec for [`VemParams`] so that a generic fixed-point
/// accelerator can treat the whole state as one vector.
///
/// Field order: `pivec`, `mubeta_matrix`, `sig2beta_matrix`,
/// `gamma_mat`, `muv`, `sigma_v`, `phi`, `xi`; matrices column-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamLayout {
    pub num_features: usize,
    pub num_grid: usize,
    pub num_factors: usize,
}

impl ParamLayout {
    pub fn len(&self) -> usize {
        let pm = self.num_features * self.num_grid;
        let k = self.num_factors;
        self.num_grid + 3 * pm + k + k * k + 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&self, params: &VemParams) -> DVec {
        debug_assert_eq!(self, &params.layout());

        let mut ret = Vec::with_capacity(self.len());
        ret.extend(params.pivec.iter());
        ret.extend(params.mubeta_matrix.iter());
        ret.extend(params.sig2beta_matrix.iter());
        ret.extend(params.gamma_mat.iter());
        ret.extend(params.muv.iter());
        ret.extend(params.sigma_v.iter());
        ret.push(params.phi);
        ret.push(params.xi);
        DVec::from_vec(ret)
    }

    pub fn decode(&self, par: &DVec) -> anyhow::Result<VemParams> {
        anyhow::ensure!(
            par.len() == self.len(),
            "parameter vector of length {} does not match layout v{} of length {}",
            par.len(),
            PARAM_LAYOUT_VERSION,
            self.len()
        );

        let (p, mm, k) = (self.num_features, self.num_grid, self.num_factors);
        let rest = par.as_slice();
        let (pivec, rest) = rest.split_at(mm);
        let (mubeta, rest) = rest.split_at(p * mm);
        let (sig2beta, rest) = rest.split_at(p * mm);
        let (gamma, rest) = rest.split_at(p * mm);
        let (muv, rest) = rest.split_at(k);
        let (sigma_v, scalars) = rest.split_at(k * k);

        Ok(VemParams {
            pivec: DVec::from_column_slice(pivec),
            mubeta_matrix: Mat::from_column_slice(p, mm, mubeta),
            sig2beta_matrix: Mat::from_column_slice(p, mm, sig2beta),
            gamma_mat: Mat::from_column_slice(p, mm, gamma),
            muv: DVec::from_column_slice(muv),
            sigma_v: Mat::from_column_slice(k, k, sigma_v),
            phi: scalars[0],
            xi: scalars[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_params() -> VemParams {
        let (p, mm, k) = (3, 2, 2);
        VemParams {
            pivec: DVec::from_vec(vec![0.4, 0.6]),
            mubeta_matrix: Mat::from_fn(p, mm, |i, j| (i + 10 * j) as f64),
            sig2beta_matrix: Mat::from_fn(p, mm, |i, j| 0.1 * (i + j) as f64),
            gamma_mat: Mat::from_fn(p, mm, |_, j| if j == 0 { 0.25 } else { 0.75 }),
            muv: DVec::from_vec(vec![1.0, -1.0]),
            sigma_v: Mat::from_row_slice(k, k, &[1.0, 0.2, 0.2, 2.0]),
            phi: 0.7,
            xi: 1.3,
        }
    }

    #[test]
    fn codec_keeps_field_order() -> anyhow::Result<()> {
        let params = toy_params();
        let layout = params.layout();
        let par = layout.encode(&params);

        assert_eq!(par.len(), 2 + 3 * 6 + 2 + 4 + 2);
        assert_eq!(par.len(), layout.len());
        assert_eq!(par[0], 0.4);
        assert_eq!(par[par.len() - 2], 0.7);
        assert_eq!(par[par.len() - 1], 1.3);

        assert_eq!(layout.decode(&par)?, params);
        Ok(())
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let params = toy_params();
        let layout = params.layout();
        let par = DVec::zeros(layout.len() - 1);
        assert!(layout.decode(&par).is_err());
    }

    #[test]
    fn marginal_moments() {
        let params = toy_params();
        let mean = params.posterior_mean();
        // row 0: 0.25 * 0 + 0.75 * 10
        approx::assert_abs_diff_eq!(mean[0], 7.5, epsilon = 1e-12);
        let second = params.posterior_second_moment();
        // row 0: 0.25 * (0 + 0) + 0.75 * (100 + 0.1)
        approx::assert_abs_diff_eq!(second[0], 75.075, epsilon = 1e-12);
    }
}
