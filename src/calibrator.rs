use crate::affinity::entropy_search::EntropySearch;
use crate::affinity::floor_off_diagonal;
use crate::affinity::fuzzy_simplicial_set::FuzzySimplicialSet;
use crate::affinity::kernels::cosine_similarity;
use crate::affinity::kernels::fixed_gaussian;
use crate::affinity::kernels::symmetrize;
use crate::calibrated::CalibratedAffinity;
use crate::calibrated::HighSimilarityFormula;
use crate::config::CalibrationParams;
use crate::distances::pairwise_distances;
use crate::distances::pairwise_squared_distances;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::metric::Metric;
use crate::utils::sanitize::impute_column_means;
use ndarray::Array2;
use ndarray::ArrayView2;
use std::time::Instant;
use tracing::info;
use tracing::warn;

/// Turns a raw feature matrix into a high-dimensional affinity matrix.
///
/// The feature matrix is only ever read; every formula works on freshly
/// allocated distance and affinity matrices. Non-finite features are
/// sanitised with a warning: the kernel formulas impute the column mean,
/// the fuzzy graph disconnects the affected samples.
///
/// # Example
///
/// ```
/// use neighbor_embed::{AffinityCalibrator, CalibrationParams};
/// use ndarray::array;
///
/// let x = array![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
/// let calibrator = AffinityCalibrator::new(CalibrationParams {
///   perplexity: 2.0,
///   ..Default::default()
/// });
/// let p = calibrator.joint_probabilities(x.view()).unwrap();
/// assert!((p.matrix().sum() - 1.0).abs() < 1e-9);
/// ```
pub struct AffinityCalibrator {
  params: CalibrationParams,
  metric: Box<dyn Metric>,
}

impl AffinityCalibrator {
  /// Create a calibrator using the metric named in `params`.
  pub fn new(params: CalibrationParams) -> Self {
    let metric = params.metric.metric();
    Self { params, metric }
  }

  /// Create a calibrator with a custom input-space metric.
  pub fn with_metric(params: CalibrationParams, metric: Box<dyn Metric>) -> Self {
    Self { params, metric }
  }

  pub fn params(&self) -> &CalibrationParams {
    &self.params
  }

  /// Compute the affinity matrix for any supported formula.
  pub fn compute(
    &self,
    data: ArrayView2<f64>,
    formula: HighSimilarityFormula,
  ) -> EmbedResult<CalibratedAffinity> {
    match formula {
      HighSimilarityFormula::Euclidean { sigma } => self.fixed_gaussian(data, sigma),
      HighSimilarityFormula::Cosine => self.cosine(data),
      HighSimilarityFormula::Gaussian { perplexity } => {
        self.calibrated(data, perplexity, false, formula)
      }
      HighSimilarityFormula::SymmetricSne { perplexity } => {
        self.calibrated(data, perplexity, true, formula)
      }
      HighSimilarityFormula::UmapHighSimilarity { n_neighbors } => self.fuzzy(data, n_neighbors),
    }
  }

  /// Entropy-calibrated conditional probabilities `p_j|i`; each row sums to 1.
  pub fn conditional_probabilities(
    &self,
    data: ArrayView2<f64>,
  ) -> EmbedResult<CalibratedAffinity> {
    let perplexity = self.params.perplexity;
    self.calibrated(
      data,
      perplexity,
      false,
      HighSimilarityFormula::Gaussian { perplexity },
    )
  }

  /// Symmetrised joint probabilities `(p_j|i + p_i|j) / 2n`; the whole
  /// matrix sums to 1.
  pub fn joint_probabilities(&self, data: ArrayView2<f64>) -> EmbedResult<CalibratedAffinity> {
    let perplexity = self.params.perplexity;
    self.calibrated(
      data,
      perplexity,
      true,
      HighSimilarityFormula::SymmetricSne { perplexity },
    )
  }

  /// Fuzzy-membership graph using `params.n_neighbors`.
  pub fn fuzzy_membership(&self, data: ArrayView2<f64>) -> EmbedResult<CalibratedAffinity> {
    self.fuzzy(data, self.params.n_neighbors)
  }

  fn calibrated(
    &self,
    data: ArrayView2<f64>,
    perplexity: f64,
    symmetric: bool,
    formula: HighSimilarityFormula,
  ) -> EmbedResult<CalibratedAffinity> {
    let features = sanitized_features(data)?;
    let n_samples = features.nrows();

    info!(n_samples, perplexity, symmetric, "starting entropy calibration");
    let started = Instant::now();

    let squared = pairwise_squared_distances(features.view(), self.metric.as_ref());
    let (conditional, report) = EntropySearch::builder()
      .squared_distances(squared.view())
      .perplexity(perplexity)
      .max_iter(self.params.max_iter)
      .tolerance(self.params.tolerance)
      .build()
      .exec()?;

    let rows_unconverged = report.unconverged();
    if rows_unconverged > 0 {
      warn!(
        rows_unconverged,
        max_iter = self.params.max_iter,
        "entropy search exhausted its budget; keeping the best precision found"
      );
    }

    let mut matrix = if symmetric {
      symmetrize(conditional.view())
    } else {
      conditional
    };
    floor_off_diagonal(matrix.view_mut());

    info!(
      duration_ms = started.elapsed().as_millis(),
      rows_unconverged, "entropy calibration complete"
    );

    Ok(CalibratedAffinity {
      matrix,
      formula,
      report: Some(report),
      sigmas: None,
      rhos: None,
    })
  }

  fn fixed_gaussian(&self, data: ArrayView2<f64>, sigma: f64) -> EmbedResult<CalibratedAffinity> {
    if !(sigma > 0.0) || !sigma.is_finite() {
      return Err(EmbedError::invalid(format!(
        "sigma must be positive, got {sigma}"
      )));
    }
    let features = sanitized_features(data)?;
    let squared = pairwise_squared_distances(features.view(), self.metric.as_ref());
    Ok(CalibratedAffinity {
      matrix: fixed_gaussian(squared.view(), sigma),
      formula: HighSimilarityFormula::Euclidean { sigma },
      report: None,
      sigmas: None,
      rhos: None,
    })
  }

  fn cosine(&self, data: ArrayView2<f64>) -> EmbedResult<CalibratedAffinity> {
    let features = sanitized_features(data)?;
    Ok(CalibratedAffinity {
      matrix: cosine_similarity(features.view()),
      formula: HighSimilarityFormula::Cosine,
      report: None,
      sigmas: None,
      rhos: None,
    })
  }

  fn fuzzy(&self, data: ArrayView2<f64>, n_neighbors: usize) -> EmbedResult<CalibratedAffinity> {
    validate_feature_matrix(data)?;
    info!(
      n_samples = data.nrows(),
      n_neighbors, "starting fuzzy simplicial set"
    );
    let started = Instant::now();

    // A poisoned sample is infinitely far from every other one, so all of
    // its edges are disconnected.
    let mut distances = pairwise_distances(data, self.metric.as_ref());
    let poisoned = data
      .rows()
      .into_iter()
      .filter(|row| row.iter().any(|v| !v.is_finite()))
      .count();
    if poisoned > 0 {
      warn!(
        poisoned,
        "samples with non-finite features are disconnected from the fuzzy graph"
      );
      for (i, mut row) in distances.outer_iter_mut().enumerate() {
        for (j, d) in row.iter_mut().enumerate() {
          if i != j && !d.is_finite() {
            *d = f64::INFINITY;
          }
        }
      }
    }
    let fuzzy = FuzzySimplicialSet::builder()
      .distances(distances.view())
      .n_neighbors(n_neighbors)
      .set_op_mix_ratio(self.params.set_op_mix_ratio)
      .local_connectivity(self.params.local_connectivity)
      .build()
      .exec()?;

    info!(
      duration_ms = started.elapsed().as_millis(),
      "fuzzy simplicial set complete"
    );

    Ok(CalibratedAffinity {
      matrix: fuzzy.graph,
      formula: HighSimilarityFormula::UmapHighSimilarity { n_neighbors },
      report: None,
      sigmas: Some(fuzzy.sigmas),
      rhos: Some(fuzzy.rhos),
    })
  }
}

/// A feature matrix must have at least 2 rows and at least 1 column.
pub fn validate_feature_matrix(data: ArrayView2<f64>) -> EmbedResult<()> {
  let (n_samples, n_features) = data.dim();
  if n_samples < 2 {
    return Err(EmbedError::invalid(format!(
      "at least 2 samples are required, got {n_samples}"
    )));
  }
  if n_features == 0 {
    return Err(EmbedError::invalid("dataset has no feature columns"));
  }
  Ok(())
}

/// Validated copy of `data` with non-finite features replaced by their
/// column mean.
pub(crate) fn sanitized_features(data: ArrayView2<f64>) -> EmbedResult<Array2<f64>> {
  validate_feature_matrix(data)?;
  let (features, replaced) = impute_column_means(data);
  if replaced > 0 {
    warn!(replaced, "imputed non-finite feature values with column means");
  }
  Ok(features)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::metric::MetricType;
  use ndarray::array;
  use ndarray::Array2;
  use rand::rngs::StdRng;
  use rand::Rng;
  use rand::SeedableRng;

  fn blobs(seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((30, 3), |(i, _)| {
      let centre = if i < 15 { 0.0 } else { 5.0 };
      centre + rng.random::<f64>()
    })
  }

  #[test]
  fn joint_probabilities_are_symmetric_and_sum_to_one() {
    let x = blobs(1);
    let calibrator = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      ..Default::default()
    });
    let p = calibrator.joint_probabilities(x.view()).unwrap();
    let m = p.matrix();
    assert!((m.sum() - 1.0).abs() < 1e-9);
    for i in 0..30 {
      assert_eq!(m[(i, i)], 0.0);
      for j in 0..30 {
        assert!((m[(i, j)] - m[(j, i)]).abs() < 1e-15);
        if i != j {
          assert!(m[(i, j)] >= 1e-12);
        }
      }
    }
    assert!(p.report().unwrap().all_converged());
  }

  #[test]
  fn conditional_rows_favour_own_cluster() {
    let x = blobs(2);
    let calibrator = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      ..Default::default()
    });
    let p = calibrator.conditional_probabilities(x.view()).unwrap();
    let m = p.matrix();
    let own: f64 = (0..15).map(|j| m[(0, j)]).sum();
    assert!(own > 0.99);
  }

  #[test]
  fn input_is_left_untouched() {
    let x = blobs(3);
    let before = x.clone();
    let calibrator = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      n_neighbors: 5,
      ..Default::default()
    });
    calibrator.joint_probabilities(x.view()).unwrap();
    calibrator.fuzzy_membership(x.view()).unwrap();
    assert_eq!(x, before);
  }

  #[test]
  fn every_formula_is_non_negative_and_finite() {
    let x = blobs(4);
    let calibrator = AffinityCalibrator::new(CalibrationParams::default());
    let formulas = [
      HighSimilarityFormula::Euclidean { sigma: 1.0 },
      HighSimilarityFormula::Cosine,
      HighSimilarityFormula::Gaussian { perplexity: 4.0 },
      HighSimilarityFormula::SymmetricSne { perplexity: 4.0 },
      HighSimilarityFormula::UmapHighSimilarity { n_neighbors: 6 },
    ];
    for formula in formulas {
      let p = calibrator.compute(x.view(), formula).unwrap();
      assert_eq!(p.formula(), formula);
      assert!(
        p.matrix().iter().all(|v| v.is_finite() && *v >= 0.0),
        "{}",
        formula.name()
      );
    }
  }

  #[test]
  fn manhattan_metric_changes_the_calibration() {
    let x = blobs(5);
    let euclid = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      ..Default::default()
    });
    let manhattan = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      metric: MetricType::Manhattan,
      ..Default::default()
    });
    let a = euclid.joint_probabilities(x.view()).unwrap();
    let b = manhattan.joint_probabilities(x.view()).unwrap();
    assert!(a.matrix() != b.matrix());
  }

  #[test]
  fn rejects_single_sample_and_empty_features() {
    let calibrator = AffinityCalibrator::new(CalibrationParams::default());
    let one = array![[1.0, 2.0]];
    assert!(matches!(
      calibrator.joint_probabilities(one.view()),
      Err(EmbedError::InputValidation(_))
    ));
    let no_columns = Array2::<f64>::zeros((3, 0));
    assert!(matches!(
      calibrator.compute(no_columns.view(), HighSimilarityFormula::Cosine),
      Err(EmbedError::InputValidation(_))
    ));
  }

  #[test]
  fn kernel_formulas_impute_non_finite_features() {
    let mut x = blobs(6);
    x[(4, 1)] = f64::NAN;
    x[(20, 0)] = f64::INFINITY;
    let before = x.clone();
    let calibrator = AffinityCalibrator::new(CalibrationParams {
      perplexity: 5.0,
      ..Default::default()
    });
    for formula in [
      HighSimilarityFormula::Euclidean { sigma: 1.0 },
      HighSimilarityFormula::Cosine,
      HighSimilarityFormula::SymmetricSne { perplexity: 5.0 },
    ] {
      let p = calibrator.compute(x.view(), formula).unwrap();
      assert!(p.matrix().iter().all(|v| v.is_finite()), "{}", formula.name());
    }
    assert_eq!(x.row(0), before.row(0));
    assert!(x[(4, 1)].is_nan());
  }

  #[test]
  fn fuzzy_graph_disconnects_poisoned_samples() {
    let mut x = blobs(7);
    x[(3, 2)] = f64::NAN;
    let calibrator = AffinityCalibrator::new(CalibrationParams::default());
    let p = calibrator
      .compute(x.view(), HighSimilarityFormula::UmapHighSimilarity { n_neighbors: 5 })
      .unwrap();
    let m = p.matrix();
    assert!(m.iter().all(|v| v.is_finite()));
    assert_eq!(m.row(3).sum(), 0.0);
    assert_eq!(m.column(3).sum(), 0.0);
    assert!(m.row(0).sum() > 0.0);
  }
}
