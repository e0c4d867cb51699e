use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Axis;

/// Fixed-bandwidth Gaussian similarity, `exp(-d^2 / (2 sigma^2))`, with a
/// unit diagonal.
pub fn fixed_gaussian(squared_distances: ArrayView2<f64>, sigma: f64) -> Array2<f64> {
  let denom = 2.0 * sigma * sigma;
  let mut sim = squared_distances.mapv(|d| (-d / denom).exp());
  sim.diag_mut().fill(1.0);
  sim
}

/// Cosine similarity between rows, clamped at zero, with a unit diagonal.
///
/// Rows are scaled to unit norm first; an all-zero row has no direction and
/// gets zero similarity to every other row.
pub fn cosine_similarity(data: ArrayView2<f64>) -> Array2<f64> {
  let mut normalized = data.to_owned();
  for mut row in normalized.axis_iter_mut(Axis(0)) {
    let norm = row.dot(&row).sqrt();
    if norm > 0.0 {
      row /= norm;
    }
  }
  let mut sim = normalized.dot(&normalized.t());
  sim.mapv_inplace(|v| v.clamp(0.0, 1.0));
  sim.diag_mut().fill(1.0);
  sim
}

/// Symmetrise conditional probabilities: `p_ij = (p_j|i + p_i|j) / (2n)`.
pub fn symmetrize(conditional: ArrayView2<f64>) -> Array2<f64> {
  let n = conditional.nrows() as f64;
  let mut joint = &conditional + &conditional.t();
  joint /= 2.0 * n;
  joint
}
