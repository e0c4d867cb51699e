use ndarray::Array1;

/*
  Fit a, b params for the differentiable curve 1 / (1 + a * x^(2b)) used by
  the calibrated low-dimensional kernel. We want the smooth curve that best
  matches an offset exponential decay: 1 below min_dist, then
  exp(-(x - min_dist) / spread).
*/
pub fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
  let n_points = 300;
  let xv = Array1::linspace(0.0, spread * 3.0, n_points);
  let yv = xv.mapv(|x: f64| {
    if x < min_dist {
      1.0
    } else {
      (-(x - min_dist) / spread).exp()
    }
  });

  // Plain gradient descent on the squared error, started near the values
  // the fit usually lands on for 2-D embeddings.
  let mut a: f64 = 1.5;
  let mut b: f64 = 0.9;

  let learning_rate = 0.05;
  let n_iterations = 5000;

  for _ in 0..n_iterations {
    let mut grad_a = 0.0;
    let mut grad_b = 0.0;
    let mut total_error = 0.0;

    for (&x, &y_true) in xv.iter().zip(yv.iter()) {
      let x_2b = x.powf(2.0 * b);
      let denom = 1.0 + a * x_2b;
      let y_pred = 1.0 / denom;

      let error = y_pred - y_true;
      total_error += error * error;

      // dy/da = -x^(2b) / (1 + a*x^(2b))^2
      grad_a += 2.0 * error * (-x_2b / (denom * denom));

      // dy/db = -2*a*x^(2b)*ln(x) / (1 + a*x^(2b))^2
      if x > 0.0 {
        grad_b += 2.0 * error * (-2.0 * a * x_2b * x.ln() / (denom * denom));
      }
    }

    a -= learning_rate * grad_a / n_points as f64;
    b -= learning_rate * grad_b / n_points as f64;

    a = a.clamp(0.001, 10.0);
    b = b.clamp(0.001, 10.0);

    if total_error / (n_points as f64) < 1e-9 {
      break;
    }
  }

  (a, b)
}
