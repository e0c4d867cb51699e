use crate::affinity::find_ab_params::find_ab_params;
use crate::affinity::floor_off_diagonal;
use crate::config::ManifoldParams;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::layout::kl_gradient::kl_divergence;
use crate::layout::kl_gradient::KlGradient;
use crate::layout::umap_forces::binary_cross_entropy;
use crate::layout::umap_forces::UmapForces;
use crate::low_dim::normalize_affinity;
use crate::low_dim::LowDimAffinityModel;
use crate::utils::clip::PROB_FLOOR;
use crate::utils::sanitize::nan_to_num;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// The algorithm tag carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
  Tsne,
  Sne,
  Umap,
}

impl Algorithm {
  pub fn as_str(&self) -> &'static str {
    match self {
      Algorithm::Tsne => "tsne",
      Algorithm::Sne => "sne",
      Algorithm::Umap => "umap",
    }
  }

  /// Operation label for the derived node, e.g. `TSNE gradient descent`.
  pub fn operation_label(&self) -> String {
    format!("{} gradient descent", self.as_str().to_ascii_uppercase())
  }
}

impl fmt::Display for Algorithm {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Algorithm {
  type Err = EmbedError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "tsne" | "t-sne" => Ok(Algorithm::Tsne),
      "sne" => Ok(Algorithm::Sne),
      "umap" => Ok(Algorithm::Umap),
      other => Err(EmbedError::UnsupportedAlgorithm(format!(
        "'{other}' is not one of tsne, sne, umap"
      ))),
    }
  }
}

/// How the optimizer turns a gradient into a position change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRule {
  /// Momentum descent with learning-rate back-off and re-centring.
  Momentum,
  /// `embedding += learning_rate * force`, no back-off.
  Direct,
}

/// Cost and descent direction at one embedding.
#[derive(Debug, Clone)]
pub struct Evaluation {
  pub cost: f64,
  /// For [`UpdateRule::Momentum`] this is the gradient to descend; for
  /// [`UpdateRule::Direct`] it is the force to follow.
  pub direction: Array2<f64>,
}

/// One algorithm variant, binding the low-dimensional kernel, the cost, its
/// gradient and the update rule.
///
/// Built once per run; the iteration loop never branches on algorithm
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
  Tsne,
  Sne,
  Umap { a: f64, b: f64 },
}

impl Objective {
  /// Bind an algorithm to its parameters. For UMAP-style runs `(a, b)` come
  /// from `manifold` when both are given and from the curve fit otherwise.
  pub fn new(algorithm: Algorithm, manifold: &ManifoldParams) -> Self {
    match algorithm {
      Algorithm::Tsne => Objective::Tsne,
      Algorithm::Sne => Objective::Sne,
      Algorithm::Umap => {
        let (a, b) = match (manifold.a, manifold.b) {
          (Some(a), Some(b)) => (a, b),
          _ => find_ab_params(manifold.spread, manifold.min_dist),
        };
        Objective::Umap { a, b }
      }
    }
  }

  pub fn algorithm(&self) -> Algorithm {
    match self {
      Objective::Tsne => Algorithm::Tsne,
      Objective::Sne => Algorithm::Sne,
      Objective::Umap { .. } => Algorithm::Umap,
    }
  }

  pub fn low_dim_model(&self) -> LowDimAffinityModel {
    match *self {
      Objective::Tsne => LowDimAffinityModel::cauchy(),
      Objective::Sne => LowDimAffinityModel::Gaussian,
      Objective::Umap { a, b } => LowDimAffinityModel::Calibrated { a, b },
    }
  }

  pub fn update_rule(&self) -> UpdateRule {
    match self {
      Objective::Tsne | Objective::Sne => UpdateRule::Momentum,
      Objective::Umap { .. } => UpdateRule::Direct,
    }
  }

  /// Build the owned working copy of a high-dimensional affinity matrix
  /// that this objective optimizes against. The caller's matrix is never
  /// touched.
  pub fn prepare_target(&self, high: ArrayView2<f64>) -> EmbedResult<Array2<f64>> {
    let (rows, cols) = high.dim();
    if rows != cols {
      return Err(EmbedError::invalid(format!(
        "high similarity matrix must be square, got {rows}x{cols}"
      )));
    }
    if rows < 2 {
      return Err(EmbedError::invalid(format!(
        "high similarity matrix needs at least 2 rows, got {rows}"
      )));
    }

    let mut target = high.to_owned();
    match self {
      Objective::Tsne | Objective::Sne => {
        let replaced = nan_to_num(target.view_mut(), PROB_FLOOR, PROB_FLOOR, PROB_FLOOR);
        if replaced > 0 {
          warn!(replaced, "replaced non-finite entries in the high similarity matrix");
        }
        floor_off_diagonal(target.view_mut());
        let total = target.sum();
        if !total.is_finite() || total <= 0.0 {
          return Err(EmbedError::Computation(format!(
            "high similarity matrix has unusable total mass {total}"
          )));
        }
        target /= total;
      }
      Objective::Umap { .. } => {
        let replaced = nan_to_num(target.view_mut(), 0.0, 0.0, 0.0);
        if replaced > 0 {
          warn!(replaced, "replaced non-finite entries in the high similarity matrix");
        }
        target.mapv_inplace(|v| v.clamp(0.0, 1.0));
        target.diag_mut().fill(0.0);
      }
    }
    Ok(target)
  }

  /// Cost and descent direction at `embedding` against a prepared target.
  pub fn evaluate(&self, target: ArrayView2<f64>, embedding: ArrayView2<f64>) -> Evaluation {
    let (target, embedding) = (target.view(), embedding.view());
    let model = self.low_dim_model();
    let weights = model.weights(embedding);

    match *self {
      Objective::Tsne | Objective::Sne => {
        let affinity = normalize_affinity(weights.clone());
        let cost = kl_divergence(target, affinity.view());
        let gradient = match self {
          Objective::Tsne => KlGradient::builder()
            .target(target)
            .affinity(affinity.view())
            .embedding(embedding)
            .kernel(weights.view())
            .factor(4.0)
            .build()
            .exec(),
          _ => KlGradient::builder()
            .target(target)
            .affinity(affinity.view())
            .embedding(embedding)
            .factor(2.0)
            .build()
            .exec(),
        };
        Evaluation {
          cost,
          direction: gradient,
        }
      }
      Objective::Umap { a, b } => {
        let cost = binary_cross_entropy(target, weights.view());
        let forces = UmapForces::builder()
          .target(target)
          .embedding(embedding)
          .a(a)
          .b(b)
          .build()
          .exec();
        Evaluation {
          cost,
          direction: forces,
        }
      }
    }
  }

  /// The low-dimensional similarity reported with a finished run:
  /// normalised for t-SNE/SNE, the raw calibrated kernel for UMAP-style.
  /// Both have a zero diagonal and a 1e-12 floor elsewhere.
  pub fn final_low_affinity(&self, embedding: ArrayView2<f64>) -> Array2<f64> {
    let model = self.low_dim_model();
    match self {
      Objective::Tsne | Objective::Sne => model.affinity(embedding),
      Objective::Umap { .. } => {
        let mut weights = model.weights(embedding);
        nan_to_num(weights.view_mut(), 0.0, 0.0, 0.0);
        floor_off_diagonal(weights.view_mut());
        weights
      }
    }
  }
}
