use crate::calibrated::CalibratedAffinity;
use crate::calibrator::AffinityCalibrator;
use crate::config::EmbedConfig;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::objective::Algorithm;
use crate::objective::Objective;
use crate::optimizer::Optimizer;
use crate::optimizer::RunResult;
use crate::utils::sanitize::all_finite;
use ndarray::s;
use ndarray::Array2;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::StandardNormal;
use tracing::info;
use tracing::warn;

/// Scale of the random initial embedding.
const NOISE_SCALE: f64 = 1e-4;

/// Neighbour-embedding driver.
///
/// Holds the configuration and can be reused to embed several datasets with
/// the same parameters. No state is kept between runs.
///
/// # Example
///
/// ```
/// use neighbor_embed::{Algorithm, EmbedConfig, Embedder};
/// use ndarray::array;
///
/// let mut config = EmbedConfig::default();
/// config.calibration.perplexity = 2.0;
/// config.optimization.iterations = 50;
/// config.optimization.learning_rate = 10.0;
///
/// let x = array![
///   [0.0, 0.0, 0.1],
///   [1.0, 0.0, 0.2],
///   [0.0, 1.0, 0.3],
///   [1.0, 1.0, 0.4],
///   [0.5, 0.5, 0.5],
/// ];
/// let embedder = Embedder::new(config);
/// let result = embedder.fit_features(Algorithm::Tsne, x.view()).unwrap();
/// assert_eq!(result.embedding.dim(), (5, 2));
/// ```
pub struct Embedder {
  config: EmbedConfig,
}

impl Embedder {
  pub fn new(config: EmbedConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &EmbedConfig {
    &self.config
  }

  /// Compute the high-dimensional affinity an algorithm optimizes against:
  /// symmetric joint probabilities for t-SNE/SNE, the fuzzy-membership
  /// graph for UMAP-style runs.
  pub fn calibrate(
    &self,
    data: ArrayView2<f64>,
    algorithm: Algorithm,
  ) -> EmbedResult<CalibratedAffinity> {
    self.config.validate()?;
    let calibrator = AffinityCalibrator::new(self.config.calibration.clone());
    match algorithm {
      Algorithm::Tsne | Algorithm::Sne => calibrator.joint_probabilities(data),
      Algorithm::Umap => calibrator.fuzzy_membership(data),
    }
  }

  /// Build a resumable optimizer without running it.
  ///
  /// `dataset` supplies the initial embedding (see [`seed_embedding`]); it
  /// is only read.
  pub fn optimizer(
    &self,
    algorithm: Algorithm,
    high: ArrayView2<f64>,
    dataset: ArrayView2<f64>,
  ) -> EmbedResult<Optimizer> {
    self.config.validate()?;
    if dataset.nrows() < 2 {
      return Err(EmbedError::invalid(format!(
        "at least 2 samples are required, got {}",
        dataset.nrows()
      )));
    }
    let objective = Objective::new(algorithm, &self.config.manifold);
    if let Objective::Umap { a, b } = objective {
      info!(a, b, "calibrated kernel parameters");
    }
    let init = seed_embedding(
      dataset,
      self.config.n_components,
      self.config.optimization.seed,
    );
    Optimizer::new(objective, high, init, &self.config.optimization)
  }

  /// Optimize an embedding of `dataset` against a precomputed
  /// high-dimensional affinity.
  pub fn fit(
    &self,
    algorithm: Algorithm,
    high: ArrayView2<f64>,
    dataset: ArrayView2<f64>,
  ) -> EmbedResult<RunResult> {
    let mut optimizer = self.optimizer(algorithm, high, dataset)?;
    optimizer.run()?;
    Ok(optimizer.into_result())
  }

  /// Calibrate on raw features, then optimize, seeding from those features.
  pub fn fit_features(&self, algorithm: Algorithm, data: ArrayView2<f64>) -> EmbedResult<RunResult> {
    let high = self.calibrate(data, algorithm)?;
    self.fit(algorithm, high.matrix(), data)
  }
}

/// Initial embedding for a run.
///
/// A dataset with exactly `n_components` columns is used as-is, a wider
/// one contributes its first `n_components` columns. A narrower dataset,
/// or a slice with non-finite values, gets small Gaussian noise instead.
/// The dataset is never modified.
pub fn seed_embedding(dataset: ArrayView2<f64>, n_components: usize, seed: Option<u64>) -> Array2<f64> {
  let n_samples = dataset.nrows();
  if dataset.ncols() >= n_components {
    let slice = dataset.slice(s![.., ..n_components]);
    if all_finite(slice) {
      return slice.to_owned();
    }
    warn!("dataset slice contains non-finite values; using a random initial embedding");
  }

  let mut rng = match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => StdRng::from_os_rng(),
  };
  Array2::from_shape_fn((n_samples, n_components), |_| {
    rng.sample::<f64, _>(StandardNormal) * NOISE_SCALE
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn seeds_from_leading_columns() {
    let x = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
    assert_eq!(seed_embedding(x.view(), 2, None), array![[1.0, 2.0], [4.0, 5.0]]);
    assert_eq!(seed_embedding(x.view(), 3, None), x);
  }

  #[test]
  fn narrow_or_poisoned_data_gets_seeded_noise() {
    let narrow = array![[1.0], [2.0], [3.0]];
    let a = seed_embedding(narrow.view(), 2, Some(7));
    let b = seed_embedding(narrow.view(), 2, Some(7));
    assert_eq!(a, b);
    assert_eq!(a.dim(), (3, 2));
    assert!(a.iter().all(|v| v.abs() < 1e-2));

    let poisoned = array![[1.0, f64::NAN], [2.0, 0.0]];
    let c = seed_embedding(poisoned.view(), 2, Some(1));
    assert!(all_finite(c.view()));
    assert!(poisoned[(0, 1)].is_nan());
  }

  #[test]
  fn invalid_config_fails_before_any_work() {
    let mut config = EmbedConfig::default();
    config.optimization.iterations = 0;
    let embedder = Embedder::new(config);
    let p = Array2::<f64>::ones((3, 3));
    let x = Array2::<f64>::zeros((3, 2));
    assert!(matches!(
      embedder.fit(Algorithm::Tsne, p.view(), x.view()),
      Err(EmbedError::InputValidation(_))
    ));
  }
}
