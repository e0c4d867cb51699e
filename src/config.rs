use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::metric::MetricType;
use crate::objective::Algorithm;
use serde::Deserialize;
use serde::Serialize;

/// Configuration for the high-dimensional affinity calibration.
///
/// These parameters control how raw feature rows are turned into the fixed
/// target affinity the optimizer matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationParams {
  /// Effective neighbourhood size for the entropy search.
  ///
  /// Each row's kernel width is chosen so that its Shannon entropy equals
  /// `ln(perplexity)`. Must be >= 1 and < n_samples - 1.
  ///
  /// Default: 30.0
  pub perplexity: f64,

  /// Number of nearest neighbours for the fuzzy-membership graph.
  ///
  /// Must be >= 2 and < n_samples.
  ///
  /// Default: 15
  pub n_neighbors: usize,

  /// Fixed kernel width for the direct Euclidean-Gaussian similarity.
  ///
  /// Default: 1.0
  pub sigma: f64,

  /// Distance used between feature rows.
  ///
  /// Default: Euclidean
  pub metric: MetricType,

  /// Iteration budget of the per-row entropy search.
  ///
  /// Exhausting it is not an error; the best precision found is kept.
  ///
  /// Default: 50
  pub max_iter: usize,

  /// Entropy tolerance of the per-row search, in nats.
  ///
  /// Default: 1e-5
  pub tolerance: f64,

  /// Number of nearest neighbours assumed connected in the fuzzy graph.
  ///
  /// Default: 1.0
  pub local_connectivity: f64,

  /// Interpolation between fuzzy union (1.0) and fuzzy intersection (0.0).
  ///
  /// Default: 1.0
  pub set_op_mix_ratio: f64,
}

impl Default for CalibrationParams {
  fn default() -> Self {
    Self {
      perplexity: 30.0,
      n_neighbors: 15,
      sigma: 1.0,
      metric: MetricType::Euclidean,
      max_iter: 50,
      tolerance: 1e-5,
      local_connectivity: 1.0,
      set_op_mix_ratio: 1.0,
    }
  }
}

/// Configuration for the calibrated low-dimensional kernel
/// `1 / (1 + a * d^(2b))` used by the UMAP-style optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifoldParams {
  /// Minimum distance between points in the embedding space.
  ///
  /// Default: 0.1
  pub min_dist: f64,

  /// The effective scale of embedded points.
  ///
  /// Default: 1.0
  pub spread: f64,

  /// Parameter 'a' of the kernel. `None` fits it from `min_dist` and `spread`.
  ///
  /// Default: None (auto-compute)
  pub a: Option<f64>,

  /// Parameter 'b' of the kernel. `None` fits it from `min_dist` and `spread`.
  ///
  /// Default: None (auto-compute)
  pub b: Option<f64>,
}

impl Default for ManifoldParams {
  fn default() -> Self {
    Self {
      min_dist: 0.1,
      spread: 1.0,
      a: None,
      b: None,
    }
  }
}

/// Configuration for the gradient-descent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationParams {
  /// Iteration budget. There is no convergence test.
  ///
  /// Default: 1000
  pub iterations: usize,

  /// Initial step size. Halved on every rejected t-SNE/SNE update.
  ///
  /// Default: 200.0 (see [`OptimizationParams::default_learning_rate`] for
  /// the UMAP-style default)
  pub learning_rate: f64,

  /// Momentum coefficient for the t-SNE/SNE velocity term.
  ///
  /// Default: 0.8
  pub momentum: f64,

  /// Record a snapshot every this many iterations (and on the last one).
  ///
  /// Default: 10
  pub recording_interval: usize,

  /// Back-off floor. Falling below it aborts the run.
  ///
  /// Default: 1e-5
  pub min_learning_rate: f64,

  /// Per-point gradient norm cap.
  ///
  /// Default: 10.0
  pub max_point_gradient_norm: f64,

  /// Seed for the random initial embedding. `None` draws from OS entropy.
  ///
  /// Default: None
  pub seed: Option<u64>,
}

impl OptimizationParams {
  /// Initial learning rate suited to an algorithm's update rule.
  ///
  /// Momentum descent on normalised affinities takes large steps; the
  /// direct UMAP-style force update moves points by `learning_rate` times a
  /// force of order 1 and needs a step of about 1.
  pub fn default_learning_rate(algorithm: Algorithm) -> f64 {
    match algorithm {
      Algorithm::Tsne | Algorithm::Sne => 200.0,
      Algorithm::Umap => 1.0,
    }
  }

  /// Defaults with the learning rate chosen for `algorithm`.
  pub fn for_algorithm(algorithm: Algorithm) -> Self {
    Self {
      learning_rate: Self::default_learning_rate(algorithm),
      ..Default::default()
    }
  }
}

impl Default for OptimizationParams {
  fn default() -> Self {
    Self {
      iterations: 1000,
      learning_rate: Self::default_learning_rate(Algorithm::Tsne),
      momentum: 0.8,
      recording_interval: 10,
      min_learning_rate: 1e-5,
      max_point_gradient_norm: 10.0,
      seed: None,
    }
  }
}

/// Complete embedding configuration.
///
/// # Example
///
/// ```
/// use neighbor_embed::config::{EmbedConfig, OptimizationParams};
///
/// let config = EmbedConfig {
///   optimization: OptimizationParams {
///     iterations: 250,
///     learning_rate: 50.0,
///     ..Default::default()
///   },
///   ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
  /// Number of embedding dimensions.
  ///
  /// Default: 2
  #[serde(default = "default_components")]
  pub n_components: usize,
  #[serde(default)]
  pub calibration: CalibrationParams,
  #[serde(default)]
  pub manifold: ManifoldParams,
  #[serde(default)]
  pub optimization: OptimizationParams,
}

fn default_components() -> usize {
  2
}

impl Default for EmbedConfig {
  fn default() -> Self {
    Self {
      n_components: default_components(),
      calibration: CalibrationParams::default(),
      manifold: ManifoldParams::default(),
      optimization: OptimizationParams::default(),
    }
  }
}

impl EmbedConfig {
  /// Defaults with the optimization parameters chosen for `algorithm`.
  pub fn for_algorithm(algorithm: Algorithm) -> Self {
    Self {
      optimization: OptimizationParams::for_algorithm(algorithm),
      ..Default::default()
    }
  }

  /// Check every parameter range once, before any computation.
  ///
  /// Checks that depend on the dataset size (perplexity against n) live with
  /// the calibration routines.
  pub fn validate(&self) -> EmbedResult<()> {
    let opt = &self.optimization;
    if self.n_components < 1 {
      return Err(EmbedError::invalid(format!(
        "n_components must be >= 1, got {}",
        self.n_components
      )));
    }
    if opt.iterations < 1 {
      return Err(EmbedError::invalid("iterations must be >= 1"));
    }
    if opt.recording_interval < 1 {
      return Err(EmbedError::invalid("recording_interval must be >= 1"));
    }
    if !opt.learning_rate.is_finite() || opt.learning_rate < 0.0 {
      return Err(EmbedError::invalid(format!(
        "learning_rate must be finite and non-negative, got {}",
        opt.learning_rate
      )));
    }
    if !opt.momentum.is_finite() || !(0.0..1.0).contains(&opt.momentum) {
      return Err(EmbedError::invalid(format!(
        "momentum must be in [0, 1), got {}",
        opt.momentum
      )));
    }
    if !opt.min_learning_rate.is_finite() || opt.min_learning_rate <= 0.0 {
      return Err(EmbedError::invalid(format!(
        "min_learning_rate must be positive, got {}",
        opt.min_learning_rate
      )));
    }
    if !(opt.max_point_gradient_norm > 0.0) {
      return Err(EmbedError::invalid(format!(
        "max_point_gradient_norm must be positive, got {}",
        opt.max_point_gradient_norm
      )));
    }

    let cal = &self.calibration;
    if !cal.perplexity.is_finite() || cal.perplexity < 1.0 {
      return Err(EmbedError::invalid(format!(
        "perplexity must be finite and >= 1, got {}",
        cal.perplexity
      )));
    }
    if cal.n_neighbors < 2 {
      return Err(EmbedError::invalid(format!(
        "n_neighbors must be >= 2, got {}",
        cal.n_neighbors
      )));
    }
    if !(cal.sigma > 0.0) || !cal.sigma.is_finite() {
      return Err(EmbedError::invalid(format!(
        "sigma must be positive, got {}",
        cal.sigma
      )));
    }
    if !(0.0..=1.0).contains(&cal.set_op_mix_ratio) {
      return Err(EmbedError::invalid(format!(
        "set_op_mix_ratio must be between 0.0 and 1.0, got {}",
        cal.set_op_mix_ratio
      )));
    }

    let man = &self.manifold;
    if !man.min_dist.is_finite() || man.min_dist < 0.0 {
      return Err(EmbedError::invalid(format!(
        "min_dist cannot be negative, got {}",
        man.min_dist
      )));
    }
    if !(man.spread > 0.0) || man.min_dist > man.spread {
      return Err(EmbedError::invalid(format!(
        "min_dist ({}) must be <= spread ({})",
        man.min_dist, man.spread
      )));
    }
    for (name, value) in [("a", man.a), ("b", man.b)] {
      if let Some(v) = value {
        if !v.is_finite() || v <= 0.0 {
          return Err(EmbedError::invalid(format!(
            "kernel parameter {name} must be finite and positive, got {v}"
          )));
        }
      }
    }
    Ok(())
  }
}
