use crate::metric::Metric;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::ArrayView2;
use ndarray::Axis;
use ndarray::Zip;

/// Euclidean (L2) distance metric.
///
/// Computes the standard Euclidean distance: sqrt(sum((x_i - y_i)^2)).
/// Provides the squared distance directly for Gaussian kernels.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMetric;

impl Metric for EuclideanMetric {
  fn distance(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    rdist(&x, &y).sqrt()
  }

  fn squared_distance(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<f64> {
    Some(rdist(&x, &y))
  }
}

/// Manhattan (L1) distance metric.
#[derive(Debug, Clone, Copy)]
pub struct ManhattanMetric;

impl Metric for ManhattanMetric {
  fn distance(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    x.iter().zip(y.iter()).map(|(a, b)| (a - b).abs()).sum()
  }
}

/// Cosine distance, `1 - cos(x, y)`.
///
/// A zero vector has no direction; it is placed at distance 1 from
/// everything, including itself.
#[derive(Debug, Clone, Copy)]
pub struct CosineMetric;

impl Metric for CosineMetric {
  fn distance(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let nx = x.dot(&x).sqrt();
    let ny = y.dot(&y).sqrt();
    if nx == 0.0 || ny == 0.0 {
      return 1.0;
    }
    (1.0 - x.dot(&y) / (nx * ny)).max(0.0)
  }
}

/// Squared Euclidean distance (rdist), avoiding the sqrt.
#[inline(always)]
pub fn rdist(x: &ArrayView1<f64>, y: &ArrayView1<f64>) -> f64 {
  x.iter()
    .zip(y.iter())
    .map(|(a, b)| {
      let diff = a - b;
      diff * diff
    })
    .sum()
}

/// Dense symmetric distance matrix between all rows of `data`.
///
/// Rows are filled in parallel; the diagonal is exactly zero.
pub fn pairwise_distances(data: ArrayView2<f64>, metric: &dyn Metric) -> Array2<f64> {
  let n = data.nrows();
  let mut out = Array2::<f64>::zeros((n, n));
  Zip::indexed(out.axis_iter_mut(Axis(0))).par_for_each(|i, mut row| {
    let xi = data.row(i);
    for j in 0..n {
      if i != j {
        row[j] = metric.distance(xi, data.row(j));
      }
    }
  });
  out
}

/// Dense matrix of squared distances, for Gaussian-style kernels.
///
/// Uses the metric's squared fast path when it has one.
pub fn pairwise_squared_distances(data: ArrayView2<f64>, metric: &dyn Metric) -> Array2<f64> {
  let n = data.nrows();
  let mut out = Array2::<f64>::zeros((n, n));
  Zip::indexed(out.axis_iter_mut(Axis(0))).par_for_each(|i, mut row| {
    let xi = data.row(i);
    for j in 0..n {
      if i != j {
        let xj = data.row(j);
        row[j] = metric.squared_distance(xi, xj).unwrap_or_else(|| {
          let d = metric.distance(xi, xj);
          d * d
        });
      }
    }
  });
  out
}

/// Squared Euclidean distances between embedding rows via
/// `|y_i|^2 + |y_j|^2 - 2 y_i . y_j`, clamped at zero. An overflowed
/// pair comes out as +inf.
///
/// This is the dense-matrix form used inside the optimization loop; it
/// costs one matrix product instead of n^2 row differences.
pub fn squared_euclidean_distances(y: ArrayView2<f64>) -> Array2<f64> {
  let sum_sq: Array1<f64> = y.map_axis(Axis(1), |row| row.dot(&row));
  let mut d = y.dot(&y.t());
  d.mapv_inplace(|v| -2.0 * v);
  d += &sum_sq.view().insert_axis(Axis(0));
  d += &sum_sq.view().insert_axis(Axis(1));
  d.mapv_inplace(|v| if v.is_nan() { f64::INFINITY } else { v.max(0.0) });
  d.diag_mut().fill(0.0);
  d
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  #[test]
  fn squared_identity_matches_row_differences() {
    let y = array![[0.0, 0.0], [3.0, 4.0], [-1.0, 2.0]];
    let d = squared_euclidean_distances(y.view());
    let direct = pairwise_squared_distances(y.view(), &EuclideanMetric);
    for (a, b) in d.iter().zip(direct.iter()) {
      assert!((a - b).abs() < 1e-9);
    }
    assert_eq!(d[(0, 1)], 25.0);
  }

  #[test]
  fn overflowed_pairs_are_infinitely_far() {
    let y = array![[1e200, 0.0], [-1e200, 0.0], [0.0, 1.0]];
    let d = squared_euclidean_distances(y.view());
    assert_eq!(d[(0, 1)], f64::INFINITY);
    assert_eq!(d[(0, 0)], 0.0);
    assert!(!d.iter().any(|v| v.is_nan()));
  }

  #[test]
  fn pairwise_is_symmetric_with_zero_diagonal() {
    let x = array![[1.0, 0.0, 2.0], [0.0, 1.0, 0.5], [2.0, 2.0, 2.0]];
    for metric in [
      &EuclideanMetric as &dyn Metric,
      &ManhattanMetric,
      &CosineMetric,
    ] {
      let d = pairwise_distances(x.view(), metric);
      for i in 0..3 {
        assert_eq!(d[(i, i)], 0.0);
        for j in 0..3 {
          assert!((d[(i, j)] - d[(j, i)]).abs() < 1e-12);
        }
      }
    }
  }

  #[test]
  fn cosine_of_zero_vector_is_one() {
    let z = array![0.0, 0.0];
    let v = array![1.0, 1.0];
    assert_eq!(CosineMetric.distance(z.view(), v.view()), 1.0);
  }
}
