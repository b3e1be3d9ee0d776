pub use log::{debug, info, warn};

pub type Mat = nalgebra::DMatrix<f64>;
pub type DVec = nalgebra::DVector<f64>;

/// Tolerance on `|sum - 1|` for a vector to count as a probability simplex
pub const SIMPLEX_TOL: f64 = 1e-8;

/// Grid variances within this distance of zero are the point mass
pub const ZERO_GRID_TOL: f64 = 1e-14;

/// Mixing proportions at or below this are treated as absent components
pub const NEGLIGIBLE_PI: f64 = 1e-300;

/// Check `x >= 0` (up to rounding) and `sum(x) == 1` within [`SIMPLEX_TOL`]
pub fn is_simplex<'a>(x: impl IntoIterator<Item = &'a f64>) -> bool {
    let mut tot = 0.0;
    for &v in x {
        if !v.is_finite() || v < -1e-12 {
            return false;
        }
        tot += v;
    }
    (tot - 1.0).abs() <= SIMPLEX_TOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simplex_check() {
        assert!(is_simplex(&[0.25, 0.75]));
        assert!(is_simplex(&[1.0, 0.0, 0.0]));
        assert!(!is_simplex(&[0.5, 0.4]));
        assert!(!is_simplex(&[1.5, -0.5]));
        assert!(!is_simplex(&[f64::NAN, 1.0]));
    }
}
