use dashmap::DashSet;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use rayon::prelude::*;
use typed_builder::TypedBuilder;

/*
  Construct the membership strength data for the 1-skeleton of each local
  fuzzy simplicial set, as COO triplets: each row is a local fuzzy
  simplicial set with a membership strength for the 1-simplex to each of
  its nearest neighbours.

  Parameters
  ----------
  knn_indices: array of shape (n_samples, n_neighbors)
      The indices of the ``n_neighbors`` closest points.

  knn_dists: array of shape (n_samples, n_neighbors)
      The distances to the ``n_neighbors`` closest points.

  knn_disconnections: set of (row, neighbor slot)
      Slots whose distance is unusable; they produce no triplet.

  sigmas: array of shape (n_samples,)
      The normalization factor from the smooth kNN distance.

  rhos: array of shape (n_samples,)
      The local connectivity adjustment.

  Returns
  -------
  Triplets (row, col, strength); the self edge has strength 0.
*/
#[derive(TypedBuilder)]
pub struct ComputeMembershipStrengths<'a, 's, 'r, 'd> {
  knn_indices: ArrayView2<'a, u32>,
  knn_dists: ArrayView2<'a, f64>,
  knn_disconnections: &'d DashSet<(usize, usize)>,
  sigmas: &'s ArrayView1<'s, f64>,
  rhos: &'r ArrayView1<'r, f64>,
}

impl<'a, 's, 'r, 'd> ComputeMembershipStrengths<'a, 's, 'r, 'd> {
  pub fn exec(self) -> Vec<(usize, usize, f64)> {
    let Self {
      knn_indices,
      knn_dists,
      knn_disconnections,
      sigmas,
      rhos,
    } = self;

    let n_samples = knn_indices.nrows();
    let n_neighbors = knn_indices.ncols();

    (0..n_samples)
      .into_par_iter()
      .flat_map_iter(|i| {
        (0..n_neighbors).filter_map(move |j| {
          if knn_disconnections.contains(&(i, j)) {
            return None;
          }
          let knn_idx = knn_indices[(i, j)] as usize;
          let val = if knn_idx == i {
            0.0
          } else if knn_dists[(i, j)] - rhos[i] <= 0.0 || sigmas[i] == 0.0 {
            1.0
          } else {
            (-(knn_dists[(i, j)] - rhos[i]) / sigmas[i]).exp()
          };
          Some((i, knn_idx, val))
        })
      })
      .collect()
  }
}
