use crate::affinity::entropy_search::CalibrationReport;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;

/// Which formula produced a high-dimensional affinity matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "formula", rename_all = "snake_case")]
pub enum HighSimilarityFormula {
  /// Fixed-bandwidth Gaussian, `exp(-d^2 / (2 sigma^2))`.
  Euclidean { sigma: f64 },
  /// Cosine similarity of unit-normalised rows.
  Cosine,
  /// Entropy-calibrated conditional probabilities `p_j|i`.
  Gaussian { perplexity: f64 },
  /// Symmetrised joint probabilities `(p_j|i + p_i|j) / 2n`.
  SymmetricSne { perplexity: f64 },
  /// Fuzzy-membership graph over the k nearest neighbours.
  UmapHighSimilarity { n_neighbors: usize },
}

impl HighSimilarityFormula {
  pub fn name(&self) -> &'static str {
    match self {
      HighSimilarityFormula::Euclidean { .. } => "euclidean",
      HighSimilarityFormula::Cosine => "cosine",
      HighSimilarityFormula::Gaussian { .. } => "gaussian",
      HighSimilarityFormula::SymmetricSne { .. } => "symmetric_sne",
      HighSimilarityFormula::UmapHighSimilarity { .. } => "umap_high_similarity",
    }
  }
}

/// A high-dimensional affinity matrix together with what was learned while
/// building it.
///
/// This is the fixed target of an optimization run and is never modified
/// by it; the optimizer prepares its own working copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibratedAffinity {
  pub(crate) matrix: Array2<f64>,
  pub(crate) formula: HighSimilarityFormula,
  /// Present for the entropy-calibrated formulas.
  pub(crate) report: Option<CalibrationReport>,
  /// Present for the fuzzy-membership formula.
  pub(crate) sigmas: Option<Array1<f64>>,
  pub(crate) rhos: Option<Array1<f64>>,
}

impl CalibratedAffinity {
  pub fn matrix(&self) -> ArrayView2<'_, f64> {
    self.matrix.view()
  }

  pub fn into_matrix(self) -> Array2<f64> {
    self.matrix
  }

  pub fn formula(&self) -> HighSimilarityFormula {
    self.formula
  }

  pub fn report(&self) -> Option<&CalibrationReport> {
    self.report.as_ref()
  }

  pub fn n_samples(&self) -> usize {
    self.matrix.nrows()
  }

  /// Per-point scale and connectivity distance of the fuzzy graph.
  pub fn fuzzy_scales(&self) -> Option<(&Array1<f64>, &Array1<f64>)> {
    self.sigmas.as_ref().zip(self.rhos.as_ref())
  }
}
