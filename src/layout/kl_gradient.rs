use super::pairwise_pull;
use crate::utils::clip::clamp_probability;
use crate::utils::sanitize::finite_or_zero;
use crate::utils::sanitize::nan_to_num;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::Zip;
use typed_builder::TypedBuilder;

/*
  Gradient of KL(P || Q) with respect to the embedding for the
  probability-normalised kernels.

  Parameters
  ----------
  target: array of shape (n_samples, n_samples)
      The prepared high-dimensional joint probabilities P.

  affinity: array of shape (n_samples, n_samples)
      The normalised low-dimensional affinities Q of `embedding`.

  embedding: array of shape (n_samples, n_components)
      The current embedding.

  kernel: array of shape (n_samples, n_samples) (optional)
      Unnormalised heavy-tailed kernel (1 + d^2)^-1, multiplied into the
      P - Q difference. Absent for the Gaussian kernel.

  factor: float
      4 for t-SNE, 2 for SNE.

  Returns
  -------
  gradient: array of shape (n_samples, n_components)
      factor * sum_j (p_ij - q_ij) [* kernel_ij] * (y_i - y_j)
*/
#[derive(TypedBuilder)]
pub struct KlGradient<'a> {
  target: ArrayView2<'a, f64>,
  affinity: ArrayView2<'a, f64>,
  embedding: ArrayView2<'a, f64>,
  #[builder(default, setter(strip_option))]
  kernel: Option<ArrayView2<'a, f64>>,
  factor: f64,
}

impl<'a> KlGradient<'a> {
  pub fn exec(self) -> Array2<f64> {
    let KlGradient {
      target,
      affinity,
      embedding,
      kernel,
      factor,
    } = self;

    let mut coefficients = &target - &affinity;
    nan_to_num(coefficients.view_mut(), 0.0, 0.0, 0.0);
    if let Some(kernel) = kernel {
      Zip::from(&mut coefficients)
        .and(kernel)
        .for_each(|c, &k| *c *= finite_or_zero(k));
    }
    coefficients.diag_mut().fill(0.0);

    let mut gradient = pairwise_pull(coefficients.view(), embedding);
    gradient *= factor;
    gradient
  }
}

/// `sum_{i != j} p_ij * ln(p_ij / q_ij)` with both sides clamped into
/// `[1e-12, 1 - 1e-12]`. Non-finite terms contribute 0.
pub fn kl_divergence(target: ArrayView2<f64>, affinity: ArrayView2<f64>) -> f64 {
  let mut cost = 0.0;
  Zip::indexed(target)
    .and(affinity)
    .for_each(|(i, j), &p, &q| {
      if i != j {
        let p = clamp_probability(p);
        let q = clamp_probability(q);
        cost += finite_or_zero(p * (p / q).ln());
      }
    });
  cost
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::low_dim::LowDimAffinityModel;
  use ndarray::array;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  fn random_joint(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut p = Array2::from_shape_fn((n, n), |_| rng.random_range(0.01..1.0));
    p = &p + &p.t();
    p.diag_mut().fill(0.0);
    let total = p.sum();
    p / total
  }

  #[test]
  fn kl_is_non_negative_and_zero_on_identity() {
    for seed in 0..5 {
      let p = random_joint(9, seed);
      let q = random_joint(9, seed + 100);
      assert!(kl_divergence(p.view(), q.view()) >= -1e-12);
      assert!(kl_divergence(p.view(), p.view()).abs() < 1e-12);
    }
  }

  #[test]
  fn tsne_gradient_matches_finite_differences() {
    let p = random_joint(5, 42);
    let y = array![[0.1, 0.4], [1.2, -0.3], [-0.8, 0.9], [0.3, 1.5], [-1.1, -0.6]];
    let model = LowDimAffinityModel::cauchy();

    let cost_at = |y: &Array2<f64>| {
      let q = model.affinity(y.view());
      kl_divergence(p.view(), q.view())
    };

    let q = model.affinity(y.view());
    let w = model.weights(y.view());
    let gradient = KlGradient::builder()
      .target(p.view())
      .affinity(q.view())
      .embedding(y.view())
      .kernel(w.view())
      .factor(4.0)
      .build()
      .exec();

    let h = 1e-6;
    for i in 0..5 {
      for k in 0..2 {
        let mut plus = y.clone();
        plus[(i, k)] += h;
        let mut minus = y.clone();
        minus[(i, k)] -= h;
        let numeric = (cost_at(&plus) - cost_at(&minus)) / (2.0 * h);
        assert!(
          (numeric - gradient[(i, k)]).abs() < 1e-5,
          "({i}, {k}): {numeric} vs {}",
          gradient[(i, k)]
        );
      }
    }
  }

  #[test]
  fn sne_gradient_matches_hand_computed_case() {
    let p = array![[0.0, 0.2, 0.1], [0.2, 0.0, 0.15], [0.1, 0.15, 0.0]];
    let q = array![[0.0, 0.25, 0.05], [0.25, 0.0, 0.1], [0.05, 0.1, 0.0]];
    let y = array![[0.0, 0.0], [1.0, 0.0], [3.0, 2.0]];
    let gradient = KlGradient::builder()
      .target(p.view())
      .affinity(q.view())
      .embedding(y.view())
      .factor(2.0)
      .build()
      .exec();

    // 2 * sum_j (p_ij - q_ij) * (y_i - y_j), worked by hand.
    let expected = array![[-0.2, -0.2], [-0.3, -0.2], [0.5, 0.4]];
    for ((i, k), &g) in gradient.indexed_iter() {
      assert!(
        (g - expected[(i, k)]).abs() < 1e-12,
        "({i}, {k}): {g} vs {}",
        expected[(i, k)]
      );
    }
  }

  #[test]
  fn gradient_sums_to_zero_across_points() {
    let p = random_joint(6, 9);
    let y = Array2::from_shape_fn((6, 2), |(i, k)| (i * 2 + k) as f64 * 0.3);
    let q = LowDimAffinityModel::Gaussian.affinity(y.view());
    let gradient = KlGradient::builder()
      .target(p.view())
      .affinity(q.view())
      .embedding(y.view())
      .factor(2.0)
      .build()
      .exec();
    for column in gradient.columns() {
      assert!(column.sum().abs() < 1e-12);
    }
  }
}
