use crate::traits::SampleOps;
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;

type Mat = DMatrix<f64>;
type DVec = DVector<f64>;

pub trait RSVD {
    /// Truncated `(U, d, V)` with at most `rank` components
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, DVec, Mat)> {
        let default_iter = 5;
        let mut rsvd = RandomizedSVD::new(rank, default_iter);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Implement Alg 4.4 of Halko et al. (2009) with power iterations
/// stabilized by QR. Falls back to the exact thin SVD when the
/// requested rank is close to the smaller dimension.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: DVec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            seed: 42,
            u_vectors: Mat::zeros(0, 0),
            singular_values: DVec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &DVec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();
        let full = nr.min(nc);

        if full == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        let rank = if self.max_rank > 0 {
            self.max_rank.min(full)
        } else {
            full
        };
        let oversample = 5;

        let (svd_u, svd_d, svd_vt, qq) = if rank + oversample >= full {
            let svd = xx.clone().svd(true, true);
            (svd.u, svd.singular_values, svd.v_t, None)
        } else {
            let qq = self.rand_subspace_iteration(xx, rank + oversample);
            let bb = qq.transpose() * xx;
            let svd = bb.svd(true, true);
            (svd.u, svd.singular_values, svd.v_t, Some(qq))
        };

        let (Some(svd_u), Some(svd_vt)) = (svd_u, svd_vt) else {
            anyhow::bail!("SVD failed");
        };

        // nalgebra does not sort singular values
        let mut order: Vec<usize> = (0..svd_d.len()).collect();
        order.sort_by(|&a, &b| svd_d[b].total_cmp(&svd_d[a]));
        order.truncate(rank);

        let uu = Mat::from_columns(&order.iter().map(|&j| svd_u.column(j)).collect::<Vec<_>>());
        self.u_vectors = match qq {
            Some(qq) => qq * uu,
            None => uu,
        };
        self.v_vectors = Mat::from_columns(
            &order
                .iter()
                .map(|&j| svd_vt.row(j).transpose())
                .collect::<Vec<_>>(),
        );
        self.singular_values = DVec::from_iterator(rank, order.iter().map(|&j| svd_d[j]));

        Ok(())
    }

    /// Find an orthonormal matrix whose range approximates the range of `xx`
    fn rand_subspace_iteration(&self, xx: &Mat, rank_and_oversample: usize) -> Mat {
        let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
        let omega = Mat::rnorm_rng(xx.ncols(), rank_and_oversample, &mut rng);

        let mut qq = (xx * omega).qr().q();
        for _ in 0..self.iter {
            let ww = (xx.transpose() * &qq).qr().q();
            qq = (xx * ww).qr().q();
        }
        qq
    }
}
