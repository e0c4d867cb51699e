use super::compute_membership_strengths::ComputeMembershipStrengths;
use super::nearest_neighbors::nearest_neighbors;
use super::raise_disconnected_warning::raise_disconnected_warning;
use super::smooth_knn_dist::SmoothKnnDist;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use dashmap::DashSet;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use rayon::prelude::*;
use sprs::CsMat;
use sprs::CsMatView;
use sprs::TriMat;
use std::iter::zip;
use std::time::Instant;
use tracing::info;
use typed_builder::TypedBuilder;

/// Result of the fuzzy-membership construction.
#[derive(Debug, Clone)]
pub struct FuzzyGraph {
  /// Dense n x n membership strengths in [0, 1], zero diagonal.
  pub graph: Array2<f64>,
  /// Per-point scale.
  pub sigmas: Array1<f64>,
  /// Per-point distance to the nearest connected neighbour.
  pub rhos: Array1<f64>,
}

/*
  Given a dense distance matrix and a neighbourhood size, compute the fuzzy
  simplicial set (here a fuzzy graph) associated to the data: locally
  approximate geodesic distance at each point, create a fuzzy simplicial set
  for each point, and combine them into a global one via a fuzzy union.

  Parameters
  ----------
  distances: array of shape (n_samples, n_samples)
      Pairwise distances in the input space.

  n_neighbors: int
      Neighbourhood size; the point itself counts as its first neighbour.
      Must be >= 2 and < n_samples.

  set_op_mix_ratio: float (optional, default 1.0)
      Interpolate between fuzzy union (1.0) and fuzzy intersection (0.0).

  local_connectivity: float (optional, default 1.0)
      The number of nearest neighbours assumed connected locally.

  Returns
  -------
  FuzzyGraph with the densified membership matrix.
*/
#[derive(TypedBuilder, Debug)]
pub struct FuzzySimplicialSet<'a> {
  distances: ArrayView2<'a, f64>,
  n_neighbors: usize,
  #[builder(default = 1.0)]
  set_op_mix_ratio: f64,
  #[builder(default = 1.0)]
  local_connectivity: f64,
}

impl<'a> FuzzySimplicialSet<'a> {
  pub fn exec(self) -> EmbedResult<FuzzyGraph> {
    let FuzzySimplicialSet {
      distances,
      n_neighbors,
      set_op_mix_ratio,
      local_connectivity,
    } = self;

    let n_samples = distances.nrows();
    if n_samples < 2 {
      return Err(EmbedError::invalid(format!(
        "at least 2 samples are required, got {n_samples}"
      )));
    }
    if n_neighbors < 2 {
      return Err(EmbedError::invalid(format!(
        "n_neighbors must be >= 2, got {n_neighbors}"
      )));
    }
    if n_samples <= n_neighbors {
      return Err(EmbedError::invalid(format!(
        "Number of samples ({n_samples}) must be > n_neighbors ({n_neighbors})"
      )));
    }
    if n_samples >= u32::MAX as usize {
      return Err(EmbedError::invalid("n_samples must be < 2^32"));
    }

    let started = Instant::now();
    let (knn_indices, knn_dists) = nearest_neighbors(distances, n_neighbors);

    // Non-finite distances (overflowed or poisoned features) cannot carry
    // a membership strength.
    let knn_disconnections = DashSet::new();
    (0..n_samples).into_par_iter().for_each(|row_no| {
      for (col_no, dist) in knn_dists.row(row_no).iter().enumerate() {
        if !dist.is_finite() {
          knn_disconnections.insert((row_no, col_no));
        }
      }
    });
    let edges_removed = knn_disconnections.len();
    info!(
      duration_ms = started.elapsed().as_millis(),
      n_samples, n_neighbors, edges_removed, "nearest neighbours complete"
    );

    let started = Instant::now();
    let (sigmas, rhos) = SmoothKnnDist::builder()
      .distances(knn_dists.view())
      .k(n_neighbors)
      .local_connectivity(local_connectivity)
      .build()
      .exec();
    info!(
      duration_ms = started.elapsed().as_millis(),
      "smooth_knn_dist complete"
    );

    let triplets = ComputeMembershipStrengths::builder()
      .knn_indices(knn_indices.view())
      .knn_dists(knn_dists.view())
      .knn_disconnections(&knn_disconnections)
      .sigmas(&sigmas.view())
      .rhos(&rhos.view())
      .build()
      .exec();

    let started = Instant::now();
    let membership = {
      let mut tri = TriMat::new((n_samples, n_samples));
      for (r, c, v) in triplets {
        if v != 0.0 {
          tri.add_triplet(r, c, v);
        }
      }
      tri.to_csr::<usize>()
    };
    let combined = fuzzy_set_union(&membership, set_op_mix_ratio);
    let mut graph = combined.to_dense();
    graph.diag_mut().fill(0.0);
    graph.mapv_inplace(|v| v.clamp(0.0, 1.0));
    info!(
      duration_ms = started.elapsed().as_millis(),
      nnz = combined.nnz(),
      "set_operations complete"
    );

    let vertices_disconnected = graph
      .outer_iter()
      .filter(|row| row.sum() == 0.0)
      .count();
    raise_disconnected_warning(edges_removed, vertices_disconnected, n_samples, 0.1);

    Ok(FuzzyGraph {
      graph,
      sigmas,
      rhos,
    })
  }
}

/// `mix * (A + A^T - A o A^T) + (1 - mix) * (A o A^T)`, which expands to
/// `mix * (A + A^T) + (1 - 2 mix) * (A o A^T)`.
fn fuzzy_set_union(result: &CsMat<f64>, set_op_mix_ratio: f64) -> CsMat<f64> {
  let transpose = result.transpose_view().to_csr();
  let prod_matrix = hadamard(&result.view(), &transpose.view());

  let mut tri = TriMat::new(result.shape());
  for (val, (row, col)) in result.iter() {
    tri.add_triplet(row, col, set_op_mix_ratio * val);
  }
  for (val, (row, col)) in transpose.iter() {
    tri.add_triplet(row, col, set_op_mix_ratio * val);
  }
  let prod_coeff = 1.0 - 2.0 * set_op_mix_ratio;
  if prod_coeff != 0.0 {
    for (val, (row, col)) in prod_matrix.iter() {
      tri.add_triplet(row, col, prod_coeff * val);
    }
  }
  tri.to_csr::<usize>()
}

/// Elementwise (Hadamard) product of two same-shape CSRs.
fn hadamard(a: &CsMatView<f64>, b: &CsMatView<f64>) -> CsMat<f64> {
  let mut tri = TriMat::new(a.shape());
  for (row, vec) in a.outer_iterator().enumerate() {
    for (&col, &av) in zip(vec.indices().iter(), vec.data()) {
      if let Some(&bv) = b.get(row, col) {
        let prod = av * bv;
        if prod != 0.0 {
          tri.add_triplet(row, col, prod);
        }
      }
    }
  }
  tri.to_csr::<usize>()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::distances::pairwise_distances;
  use crate::distances::EuclideanMetric;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  fn random_distances(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((n, 4), |_| rng.random::<f64>());
    pairwise_distances(x.view(), &EuclideanMetric)
  }

  #[test]
  fn union_graph_is_symmetric_membership() {
    let d = random_distances(20, 3);
    let fuzzy = FuzzySimplicialSet::builder()
      .distances(d.view())
      .n_neighbors(5)
      .build()
      .exec()
      .unwrap();

    let g = &fuzzy.graph;
    assert_eq!(g.shape(), &[20, 20]);
    for i in 0..20 {
      assert_eq!(g[(i, i)], 0.0);
      // The nearest other point is always fully connected.
      assert!(g.row(i).iter().any(|v| (*v - 1.0).abs() < 1e-12));
      for j in 0..20 {
        assert!((0.0..=1.0).contains(&g[(i, j)]));
        assert!((g[(i, j)] - g[(j, i)]).abs() < 1e-12);
      }
    }
  }

  #[test]
  fn intersection_keeps_only_mutual_edges() {
    let d = random_distances(15, 11);
    let union = FuzzySimplicialSet::builder()
      .distances(d.view())
      .n_neighbors(4)
      .build()
      .exec()
      .unwrap();
    let intersection = FuzzySimplicialSet::builder()
      .distances(d.view())
      .n_neighbors(4)
      .set_op_mix_ratio(0.0)
      .build()
      .exec()
      .unwrap();
    let union_edges = union.graph.iter().filter(|v| **v > 0.0).count();
    let mutual_edges = intersection.graph.iter().filter(|v| **v > 0.0).count();
    assert!(mutual_edges <= union_edges);
  }

  #[test]
  fn too_few_samples_for_neighbourhood() {
    let d = random_distances(5, 1);
    let result = FuzzySimplicialSet::builder()
      .distances(d.view())
      .n_neighbors(5)
      .build()
      .exec();
    assert!(matches!(result, Err(EmbedError::InputValidation(_))));
  }
}
