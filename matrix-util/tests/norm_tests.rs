use matrix_util::traits::MatOps;
use nalgebra::DMatrix;

#[test]
fn dmatrix_scale_rows_test() {
    let xx = DMatrix::<f64>::from_element(3, 2, 2.0);
    let yy = xx.scale_rows_by(&[1.0, 0.5, 0.0]);
    assert_eq!(yy.row(0).sum(), 4.0);
    assert_eq!(yy.row(1).sum(), 2.0);
    assert_eq!(yy.row(2).sum(), 0.0);
}

#[test]
fn dmatrix_scale_rows_keeps_columns() {
    let xx = DMatrix::<f64>::from_fn(4, 3, |i, j| (i + j) as f64);
    let yy = xx.scale_rows_by(&[2.0; 4]);
    assert_eq!(yy.shape(), (4, 3));
    assert_eq!(yy, xx * 2.0);
}
