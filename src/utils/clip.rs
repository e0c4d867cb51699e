use ndarray::ArrayViewMut2;
use ndarray::Axis;

/// Smallest value any probability-like entry may take.
pub const PROB_FLOOR: f64 = 1e-12;

/// Clamp a probability-like value into `[1e-12, 1 - 1e-12]` before it
/// reaches a logarithm. NaN maps to the floor.
#[inline(always)]
pub fn clamp_probability(val: f64) -> f64 {
  if val > PROB_FLOOR && val < 1.0 - PROB_FLOOR {
    val
  } else if val >= 1.0 - PROB_FLOOR {
    1.0 - PROB_FLOOR
  } else {
    PROB_FLOOR
  }
}

/// Rescale every row whose L2 norm exceeds `max_norm` down to `max_norm`.
///
/// Rows with a non-finite norm are left for the caller's sanitising pass.
/// Returns the number of rows clipped.
pub fn clip_row_norms(mut grad: ArrayViewMut2<f64>, max_norm: f64) -> usize {
  let mut clipped = 0;
  for mut row in grad.axis_iter_mut(Axis(0)) {
    let norm = row.dot(&row).sqrt();
    if norm > max_norm {
      row *= max_norm / norm;
      clipped += 1;
    }
  }
  clipped
}
