use crate::distances::CosineMetric;
use crate::distances::EuclideanMetric;
use crate::distances::ManhattanMetric;
use ndarray::ArrayView1;
use std::fmt::Debug;

/// Named metric, used to pick an implementation from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
  /// Straight-line distance; the default for every calibration.
  #[default]
  Euclidean,
  Manhattan,
  /// One minus cosine similarity.
  Cosine,
}

impl MetricType {
  pub fn metric(self) -> Box<dyn Metric> {
    match self {
      MetricType::Euclidean => Box::new(EuclideanMetric),
      MetricType::Manhattan => Box::new(ManhattanMetric),
      MetricType::Cosine => Box::new(CosineMetric),
    }
  }
}

/// A distance between two feature rows.
///
/// Thread-safety (Send + Sync) is required because pairwise distance
/// matrices are filled one row per rayon task.
pub trait Metric: Debug + Send + Sync {
  /// Compute the distance between two rows of equal length.
  fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64;

  /// Optional squared distance without the square root.
  ///
  /// Gaussian kernels work on squared distances; metrics that can produce
  /// them directly should, to skip a `sqrt`/square round trip.
  ///
  /// Default: None
  fn squared_distance(&self, _a: ArrayView1<f64>, _b: ArrayView1<f64>) -> Option<f64> {
    None
  }
}
