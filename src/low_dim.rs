use crate::affinity::find_ab_params::find_ab_params;
use crate::affinity::floor_off_diagonal;
use crate::calibrator::sanitized_features;
use crate::distances::squared_euclidean_distances;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::utils::clip::PROB_FLOOR;
use crate::utils::sanitize::nan_to_num;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;

/// Kernel family mapping embedding distances to low-dimensional affinities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowDimAffinityModel {
  /// `(1 + d^2 / dof)^(-(dof + 1) / 2)`; with one degree of freedom this is
  /// the Cauchy kernel `1 / (1 + d^2)` of t-SNE.
  StudentT { dof: f64 },
  /// `exp(-d^2)`.
  Gaussian,
  /// `1 / (1 + a * d^(2b))`.
  Calibrated { a: f64, b: f64 },
}

impl LowDimAffinityModel {
  pub fn cauchy() -> Self {
    LowDimAffinityModel::StudentT { dof: 1.0 }
  }

  /// Calibrated kernel with `(a, b)` fitted to `min_dist` and `spread`.
  pub fn calibrated(spread: f64, min_dist: f64) -> Self {
    let (a, b) = find_ab_params(spread, min_dist);
    LowDimAffinityModel::Calibrated { a, b }
  }

  /// Kernel value for a squared distance.
  #[inline]
  pub fn kernel(&self, squared_distance: f64) -> f64 {
    match *self {
      LowDimAffinityModel::StudentT { dof } => {
        if dof == 1.0 {
          1.0 / (1.0 + squared_distance)
        } else {
          (1.0 + squared_distance / dof).powf(-(dof + 1.0) / 2.0)
        }
      }
      LowDimAffinityModel::Gaussian => (-squared_distance).exp(),
      LowDimAffinityModel::Calibrated { a, b } => 1.0 / (1.0 + a * squared_distance.powf(b)),
    }
  }

  /// Unnormalised kernel over all pairs with a zero diagonal.
  pub fn weights_from_squared(&self, squared_distances: ArrayView2<f64>) -> Array2<f64> {
    let mut weights = squared_distances.mapv(|d| self.kernel(d));
    weights.diag_mut().fill(0.0);
    weights
  }

  pub fn weights(&self, embedding: ArrayView2<f64>) -> Array2<f64> {
    self.weights_from_squared(squared_euclidean_distances(embedding).view())
  }

  /// Normalised low-dimensional affinity of `embedding`. Off-diagonal
  /// entries sum to 1 and are at least 1e-12; the diagonal is 0.
  pub fn affinity(&self, embedding: ArrayView2<f64>) -> Array2<f64> {
    normalize_affinity(self.weights(embedding))
  }
}

/// Divide off-diagonal weights by their total. A total below 1e-12 gets a
/// uniform floor first so the division stays well-defined.
pub fn normalize_affinity(mut weights: Array2<f64>) -> Array2<f64> {
  nan_to_num(weights.view_mut(), 0.0, 0.0, 0.0);
  weights.diag_mut().fill(0.0);
  let mut total = weights.sum();
  if total < PROB_FLOOR {
    weights.mapv_inplace(|w| w + PROB_FLOOR);
    weights.diag_mut().fill(0.0);
    total = weights.sum();
  }
  weights /= total;
  floor_off_diagonal(weights.view_mut());
  weights
}

/// Stand-alone low-dimensional similarity formulas over an existing
/// embedding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "formula", rename_all = "snake_case")]
pub enum LowSimilarityFormula {
  /// `1 / (1 + d^2 / dof)`, zero diagonal, normalised over the matrix.
  TsneLowSimilarity { degrees_of_freedom: f64 },
  /// `1 / (1 + a * max(0, d - min_dist)^(2b))`, unit diagonal, unnormalised.
  UmapLowSimilarity { min_dist: f64, spread: f64 },
}

impl LowSimilarityFormula {
  pub fn name(&self) -> &'static str {
    match self {
      LowSimilarityFormula::TsneLowSimilarity { .. } => "tsne_low_similarity",
      LowSimilarityFormula::UmapLowSimilarity { .. } => "umap_low_similarity",
    }
  }

  pub fn compute(&self, embedding: ArrayView2<f64>) -> EmbedResult<Array2<f64>> {
    let embedding = sanitized_features(embedding)?;
    let squared = squared_euclidean_distances(embedding.view());

    match *self {
      LowSimilarityFormula::TsneLowSimilarity { degrees_of_freedom } => {
        if !(degrees_of_freedom > 0.0) || !degrees_of_freedom.is_finite() {
          return Err(EmbedError::invalid(format!(
            "degrees_of_freedom must be positive, got {degrees_of_freedom}"
          )));
        }
        let weights = squared.mapv(|d| 1.0 / (1.0 + d / degrees_of_freedom));
        Ok(normalize_affinity(weights))
      }
      LowSimilarityFormula::UmapLowSimilarity { min_dist, spread } => {
        if !(spread > 0.0) || !(min_dist >= 0.0) || min_dist > spread {
          return Err(EmbedError::invalid(format!(
            "min_dist ({min_dist}) must be in [0, spread ({spread})]"
          )));
        }
        let (a, b) = find_ab_params(spread, min_dist);
        let mut similarity = squared.mapv(|d2| {
          let shifted = (d2.sqrt() - min_dist).max(0.0);
          1.0 / (1.0 + a * shifted.powf(2.0 * b))
        });
        similarity.diag_mut().fill(1.0);
        Ok(similarity)
      }
    }
  }
}
