use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::ArrayViewMut2;

/// Replace NaN, +Inf and -Inf with the given values, in place.
///
/// Returns how many entries were replaced so callers can log it.
pub fn nan_to_num(mut m: ArrayViewMut2<f64>, nan: f64, posinf: f64, neginf: f64) -> usize {
  let mut replaced = 0;
  m.map_inplace(|v| {
    if v.is_nan() {
      *v = nan;
      replaced += 1;
    } else if *v == f64::INFINITY {
      *v = posinf;
      replaced += 1;
    } else if *v == f64::NEG_INFINITY {
      *v = neginf;
      replaced += 1;
    }
  });
  replaced
}

/// Owned copy of a feature matrix with every non-finite value replaced by
/// the mean of the finite values in its column, or 0 when the column has
/// none.
///
/// Returns the copy and how many entries were replaced.
pub fn impute_column_means(data: ArrayView2<f64>) -> (Array2<f64>, usize) {
  let mut out = data.to_owned();
  let mut replaced = 0;
  for mut column in out.columns_mut() {
    let (sum, count) = column
      .iter()
      .filter(|v| v.is_finite())
      .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == column.len() {
      continue;
    }
    let mean = if count == 0 { 0.0 } else { sum / count as f64 };
    for v in column.iter_mut().filter(|v| !v.is_finite()) {
      *v = mean;
      replaced += 1;
    }
  }
  (out, replaced)
}

#[inline]
pub fn all_finite(m: ArrayView2<f64>) -> bool {
  m.iter().all(|v| v.is_finite())
}

/// Frobenius norm.
#[inline]
pub fn frobenius_norm(m: ArrayView2<f64>) -> f64 {
  m.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Map a non-finite scalar to zero.
#[inline(always)]
pub fn finite_or_zero(v: f64) -> f64 {
  if v.is_finite() {
    v
  } else {
    0.0
  }
}
