pub mod kl_gradient;
pub mod momentum;
pub mod umap_forces;

use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

/// `out_i = sum_j m_ij * (y_i - y_j)` for every row at once, computed as
/// `diag(rowsum(m)) * y - m * y`.
pub(crate) fn pairwise_pull(m: ArrayView2<f64>, y: ArrayView2<f64>) -> Array2<f64> {
  let row_sums = m.sum_axis(Axis(1));
  let mut out = &y * &row_sums.view().insert_axis(Axis(1));
  out -= &m.dot(&y);
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn pull_matches_the_pairwise_sum() {
    let m = array![[0.0, 0.5, 2.0], [0.5, 0.0, -1.0], [2.0, -1.0, 0.0]];
    let y = array![[1.0, 0.0], [0.0, 2.0], [-1.0, -1.0]];
    let out = pairwise_pull(m.view(), y.view());
    for i in 0..3 {
      for k in 0..2 {
        let direct: f64 = (0..3).map(|j| m[(i, j)] * (y[(i, k)] - y[(j, k)])).sum();
        assert!((out[(i, k)] - direct).abs() < 1e-12);
      }
    }
  }
}
