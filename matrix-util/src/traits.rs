use crate::common_io::Delimiter;

/// Row-wise rescaling
pub trait MatOps {
    type Mat;
    type Scalar;

    /// Multiply each row `i` by `weights[i]`
    fn scale_rows_by(&self, weights: &[Self::Scalar]) -> Self::Mat;
}

/// Operations to sample random matrices from a seeded generator
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from a normal distribution `N(0,1)`
    fn rnorm_rng(dd: usize, nn: usize, rng: &mut impl rand::Rng) -> Self::Mat;
}

/// Functions of symmetric matrices through the eigen-decomposition
/// `X = Q diag(e) Q'`
pub trait SymmetricOps {
    type Mat;
    type Scalar;

    /// `Q diag(1/sqrt(e)) Q'`; fails if any eigenvalue is below
    /// `rel_tol * max(e)`
    fn inv_sqrt_symmetric(&self, rel_tol: Self::Scalar) -> anyhow::Result<Self::Mat>;

    /// `log det(X)` of a symmetric positive definite matrix via Cholesky
    fn log_det_pd(&self) -> anyhow::Result<Self::Scalar>;

    /// `(X + X')/2`
    fn symmetrize(&self) -> Self::Mat;
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    /// Write with a header line of column names and, optionally, a
    /// leading column of row names
    fn write_file_delim_with_names(
        &self,
        file: &str,
        delim: &str,
        row_names: Option<&[Box<str>]>,
        column_names: &[Box<str>],
    ) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}
