pub mod compute_membership_strengths;
pub mod constants;
pub mod entropy_search;
pub mod find_ab_params;
pub mod fuzzy_simplicial_set;
pub mod kernels;
pub mod nearest_neighbors;
pub mod raise_disconnected_warning;
pub mod smooth_knn_dist;

use crate::utils::clip::PROB_FLOOR;
use ndarray::ArrayViewMut2;

/// Floor every off-diagonal entry at 1e-12 and zero the diagonal.
pub(crate) fn floor_off_diagonal(mut m: ArrayViewMut2<f64>) {
  for ((i, j), v) in m.indexed_iter_mut() {
    if i == j {
      *v = 0.0;
    } else if *v < PROB_FLOOR {
      *v = PROB_FLOOR;
    }
  }
}
