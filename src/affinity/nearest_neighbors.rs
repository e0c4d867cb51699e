use ndarray::Array2;
use ndarray::ArrayView2;
use rayon::prelude::*;

/// Exact k-nearest neighbours read off a dense distance matrix.
///
/// Each point is its own first neighbour at distance 0, followed by the
/// `k - 1` closest other points in ascending order. NaN distances sort last.
/// Returns `(knn_indices, knn_dists)`, both of shape `(n_samples, k)`.
pub fn nearest_neighbors(distances: ArrayView2<f64>, k: usize) -> (Array2<u32>, Array2<f64>) {
  let n_samples = distances.nrows();

  let rows: Vec<(Vec<u32>, Vec<f64>)> = (0..n_samples)
    .into_par_iter()
    .map(|i| {
      let row = distances.row(i);
      let mut others: Vec<usize> = (0..n_samples).filter(|&j| j != i).collect();
      others.sort_by(|&a, &b| row[a].total_cmp(&row[b]));

      let mut indices = Vec::with_capacity(k);
      let mut dists = Vec::with_capacity(k);
      indices.push(i as u32);
      dists.push(0.0);
      for &j in others.iter().take(k - 1) {
        indices.push(j as u32);
        dists.push(row[j]);
      }
      (indices, dists)
    })
    .collect();

  let mut knn_indices = Array2::<u32>::zeros((n_samples, k));
  let mut knn_dists = Array2::<f64>::zeros((n_samples, k));
  for (i, (indices, dists)) in rows.into_iter().enumerate() {
    for (j, (idx, d)) in indices.into_iter().zip(dists).enumerate() {
      knn_indices[(i, j)] = idx;
      knn_dists[(i, j)] = d;
    }
  }
  (knn_indices, knn_dists)
}
