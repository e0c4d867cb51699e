use super::constants::MIN_K_DIST_SCALE;
use super::constants::SMOOTH_K_TOLERANCE;
use ndarray::Array1;
use ndarray::ArrayView2;
use rayon::prelude::*;
use typed_builder::TypedBuilder;

#[derive(TypedBuilder, Debug)]
pub struct SmoothKnnDist<'a> {
  distances: ArrayView2<'a, f64>,
  k: usize,
  #[builder(default = 64)]
  n_iter: usize,
  #[builder(default = 1.0)]
  local_connectivity: f64,
  #[builder(default = 1.0)]
  bandwidth: f64,
}

impl<'a> SmoothKnnDist<'a> {
  /*
    Compute a continuous version of the distance to the kth nearest
    neighbor, such that the cardinality of the fuzzy set generated for each
    point is log2(k).

    Parameters
    ----------
    distances: array of shape (n_samples, n_neighbors)
        Sorted distances to each sample's nearest neighbours, the sample
        itself first at distance 0. Non-finite entries are skipped.

    k: int
        The number of nearest neighbors to approximate for.

    n_iter: int (optional, default 64)
        Max number of binary search steps.

    local_connectivity: float (optional, default 1)
        The number of nearest neighbors assumed connected at a local level.

    bandwidth: float (optional, default 1)
        The target bandwidth of the kernel.

    Returns
    -------
    sigmas: array of shape (n_samples,)
        Per-point scale.

    rhos: array of shape (n_samples,)
        Distance to the local_connectivity'th non-zero neighbour.
  */
  pub fn exec(self) -> (Array1<f64>, Array1<f64>) {
    let SmoothKnnDist {
      distances,
      k,
      n_iter,
      local_connectivity,
      bandwidth,
    } = self;

    let n_samples = distances.nrows();
    let n_neighbors = distances.ncols();
    let target = (k as f64).log2() * bandwidth;

    let mean_distances = finite_mean(distances.iter().copied());

    let results: Vec<(f64, f64)> = (0..n_samples)
      .into_par_iter()
      .map(|i| {
        let ith_distances = distances.row(i);

        let non_zero: Vec<f64> = ith_distances
          .iter()
          .copied()
          .filter(|d| *d > 0.0 && d.is_finite())
          .collect();

        let mut rho_i = 0.0;
        if non_zero.len() as f64 >= local_connectivity {
          let index = local_connectivity.floor() as usize;
          let interpolation = local_connectivity - local_connectivity.floor();
          if index > 0 {
            rho_i = non_zero[index - 1];
            if interpolation > SMOOTH_K_TOLERANCE && index < non_zero.len() {
              rho_i += interpolation * (non_zero[index] - non_zero[index - 1]);
            }
          } else if let Some(first) = non_zero.first() {
            rho_i = interpolation * first;
          }
        } else if let Some(max) = non_zero.iter().copied().reduce(f64::max) {
          rho_i = max;
        }

        let mut lo = 0.0;
        let mut hi = f64::INFINITY;
        let mut mid = 1.0;
        for _ in 0..n_iter {
          let mut psum = 0.0;
          for j in 1..n_neighbors {
            let raw = ith_distances[j];
            if !raw.is_finite() {
              continue;
            }
            let d = raw - rho_i;
            if d > 0.0 {
              psum += (-(d / mid)).exp();
            } else {
              psum += 1.0;
            }
          }

          if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
          }

          if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
          } else {
            lo = mid;
            if hi == f64::INFINITY {
              mid *= 2.0;
            } else {
              mid = (lo + hi) / 2.0;
            }
          }
        }

        let mut sigma_i = mid;
        if rho_i > 0.0 {
          let mean_ith = finite_mean(ith_distances.iter().copied());
          if sigma_i < MIN_K_DIST_SCALE * mean_ith {
            sigma_i = MIN_K_DIST_SCALE * mean_ith;
          }
        } else if sigma_i < MIN_K_DIST_SCALE * mean_distances {
          sigma_i = MIN_K_DIST_SCALE * mean_distances;
        }

        (sigma_i, rho_i)
      })
      .collect();

    let mut sigmas = Array1::<f64>::zeros(n_samples);
    let mut rhos = Array1::<f64>::zeros(n_samples);
    for (i, (sigma_i, rho_i)) in results.into_iter().enumerate() {
      sigmas[i] = sigma_i;
      rhos[i] = rho_i;
    }
    (sigmas, rhos)
  }
}

fn finite_mean(values: impl Iterator<Item = f64>) -> f64 {
  let (sum, count) = values
    .filter(|v| v.is_finite())
    .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
  if count == 0 {
    0.0
  } else {
    sum / count as f64
  }
}
