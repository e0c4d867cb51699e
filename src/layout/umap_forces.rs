use super::pairwise_pull;
use crate::distances::squared_euclidean_distances;
use crate::utils::clip::clamp_probability;
use crate::utils::sanitize::finite_or_zero;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Zip;
use typed_builder::TypedBuilder;

/// Added to every distance before it divides a direction vector.
const DIRECTION_EPS: f64 = 1e-10;

/*
  Net attractive/repulsive force on every embedded point for the
  calibrated kernel w = 1 / (1 + a * d^(2b)), over all pairs at once.

  For each pair (i, j), with v the target membership and u the unit
  direction from y_j to y_i:
    attraction  -v (1 - w) u   (only when v > 0)
    repulsion   (1 - v) w u

  Parameters
  ----------
  target: array of shape (n_samples, n_samples)
      Prepared membership strengths in [0, 1], zero diagonal.

  embedding: array of shape (n_samples, n_components)
      The current embedding.

  a, b: float
      Kernel parameters.

  Returns
  -------
  forces: array of shape (n_samples, n_components)
      The position delta per unit learning rate.
*/
#[derive(TypedBuilder)]
pub struct UmapForces<'a> {
  target: ArrayView2<'a, f64>,
  embedding: ArrayView2<'a, f64>,
  a: f64,
  b: f64,
}

impl<'a> UmapForces<'a> {
  pub fn exec(self) -> Array2<f64> {
    let UmapForces {
      target,
      embedding,
      a,
      b,
    } = self;

    let mut distances = squared_euclidean_distances(embedding).mapv(f64::sqrt);
    distances.diag_mut().fill(1.0);

    let mut coefficients = Array2::<f64>::zeros(target.raw_dim());
    Zip::from(&mut coefficients)
      .and(target)
      .and(&distances)
      .for_each(|c, &v, &d| {
        let w = 1.0 / (1.0 + a * d.powf(2.0 * b));
        let attraction = if v > 0.0 { v * (1.0 - w) } else { 0.0 };
        let repulsion = (1.0 - v) * w;
        *c = finite_or_zero((repulsion - attraction) / (d + DIRECTION_EPS));
      });
    coefficients.diag_mut().fill(0.0);

    pairwise_pull(coefficients.view(), embedding)
  }
}

/// `-sum_{i < j} [v ln w + (1 - v) ln(1 - w)]` with both `v` and `w`
/// clamped into `[1e-12, 1 - 1e-12]`.
pub fn binary_cross_entropy(target: ArrayView2<f64>, weights: ArrayView2<f64>) -> f64 {
  let mut cost = 0.0;
  Zip::indexed(target)
    .and(weights)
    .for_each(|(i, j), &v, &w| {
      if i < j {
        let v = clamp_probability(v);
        let w = clamp_probability(w);
        cost -= finite_or_zero(v * w.ln() + (1.0 - v) * (1.0 - w).ln());
      }
    });
  cost
}
