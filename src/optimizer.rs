use crate::config::OptimizationParams;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::layout::momentum::MomentumUpdate;
use crate::objective::Objective;
use crate::objective::UpdateRule;
use crate::utils::clip::clip_row_norms;
use crate::utils::sanitize::all_finite;
use crate::utils::sanitize::frobenius_norm;
use crate::utils::sanitize::nan_to_num;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;
use std::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// One recorded point of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
  pub iteration: usize,
  /// The embedding after this iteration's update.
  pub embedding: Array2<f64>,
  /// Cost at the embedding this iteration started from.
  pub cost: f64,
  /// Frobenius norm of the clipped gradient (or force).
  pub gradient_norm: f64,
}

/// Everything a finished run hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
  pub embedding: Array2<f64>,
  pub low_affinity: Array2<f64>,
  pub snapshots: Vec<IterationSnapshot>,
  pub final_cost: f64,
}

/// Active optimization state for one embedding run.
///
/// This holds everything needed to run and resume gradient descent: the
/// prepared target, the embedding, the momentum term and the current
/// learning rate. It is meant to be stepped during training and then turned
/// into a [`RunResult`] with [`Optimizer::into_result`].
///
/// The optimizer can be serialized mid-run; a restored checkpoint continues
/// exactly where the original would have.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimizer {
  objective: Objective,

  // Owned, prepared copy of the high-dimensional affinity.
  target: Array2<f64>,

  // Current embedding state
  embedding: Array2<f64>,
  velocity: Array2<f64>,

  // Step size; only ever shrinks
  learning_rate: f64,
  momentum: f64,
  min_learning_rate: f64,
  max_point_gradient_norm: f64,

  // Progress tracking
  recording_interval: usize,
  current_iteration: usize,
  total_iterations: usize,
  snapshots: Vec<IterationSnapshot>,
}

impl Optimizer {
  /// Create an optimizer for `objective` against the high-dimensional
  /// affinity `high`, starting from `init`.
  ///
  /// `high` is copied and prepared; neither it nor the caller's dataset is
  /// modified.
  ///
  /// # Arguments
  ///
  /// * `objective` - Algorithm variant to optimize
  /// * `high` - Square high-dimensional affinity matrix, one row per point
  /// * `init` - Initial embedding, one row per point
  /// * `params` - Iteration budget, learning rate, momentum and recording
  pub fn new(
    objective: Objective,
    high: ArrayView2<f64>,
    init: Array2<f64>,
    params: &OptimizationParams,
  ) -> EmbedResult<Self> {
    if params.iterations < 1 {
      return Err(EmbedError::invalid("iterations must be >= 1"));
    }
    if params.recording_interval < 1 {
      return Err(EmbedError::invalid("recording_interval must be >= 1"));
    }
    if !params.learning_rate.is_finite() || params.learning_rate < 0.0 {
      return Err(EmbedError::invalid(format!(
        "learning_rate must be finite and non-negative, got {}",
        params.learning_rate
      )));
    }
    if init.ncols() == 0 {
      return Err(EmbedError::invalid("initial embedding has no columns"));
    }
    if !all_finite(init.view()) {
      return Err(EmbedError::invalid("initial embedding contains non-finite values"));
    }
    if let Objective::Umap { a, b } = objective {
      if !(a.is_finite() && a > 0.0 && b.is_finite() && b > 0.0) {
        return Err(EmbedError::invalid(format!(
          "kernel parameters must be finite and positive, got a = {a}, b = {b}"
        )));
      }
    }

    let target = objective.prepare_target(high)?;
    if target.nrows() != init.nrows() {
      return Err(EmbedError::invalid(format!(
        "high similarity matrix is {0}x{0} but the embedding has {1} rows",
        target.nrows(),
        init.nrows()
      )));
    }

    let velocity = Array2::zeros(init.raw_dim());
    Ok(Self {
      objective,
      target,
      embedding: init,
      velocity,
      learning_rate: params.learning_rate,
      momentum: params.momentum,
      min_learning_rate: params.min_learning_rate,
      max_point_gradient_norm: params.max_point_gradient_norm,
      recording_interval: params.recording_interval,
      current_iteration: 0,
      total_iterations: params.iterations,
      snapshots: Vec::new(),
    })
  }

  /// Run `n` more iterations.
  ///
  /// Stepping past the iteration budget is an input validation error; check
  /// [`Optimizer::remaining_iterations`] first.
  pub fn step_iterations(&mut self, n: usize) -> EmbedResult<()> {
    if n > self.remaining_iterations() {
      return Err(EmbedError::invalid(format!(
        "cannot step {} iterations: would exceed total_iterations {} (current: {})",
        n, self.total_iterations, self.current_iteration
      )));
    }
    for _ in 0..n {
      self.iterate()?;
    }
    Ok(())
  }

  /// Run every remaining iteration.
  pub fn run(&mut self) -> EmbedResult<()> {
    let started = Instant::now();
    info!(
      algorithm = %self.objective.algorithm(),
      n_samples = self.embedding.nrows(),
      iterations = self.remaining_iterations(),
      learning_rate = self.learning_rate,
      "starting optimization"
    );
    self.step_iterations(self.remaining_iterations())?;
    info!(
      duration_ms = started.elapsed().as_millis(),
      final_cost = self.snapshots.last().map(|s| s.cost),
      learning_rate = self.learning_rate,
      "optimization complete"
    );
    Ok(())
  }

  fn iterate(&mut self) -> EmbedResult<()> {
    let iteration = self.current_iteration;

    let evaluation = self
      .objective
      .evaluate(self.target.view(), self.embedding.view());

    let mut direction = evaluation.direction;
    let replaced = nan_to_num(direction.view_mut(), 0.0, 1.0, -1.0);
    if replaced > 0 {
      let norm = frobenius_norm(direction.view());
      if norm > 1.0 {
        direction /= norm;
      }
      warn!(iteration, replaced, "sanitised non-finite gradient entries");
    }
    clip_row_norms(direction.view_mut(), self.max_point_gradient_norm);
    let gradient_norm = frobenius_norm(direction.view());

    match self.objective.update_rule() {
      UpdateRule::Momentum => {
        MomentumUpdate::builder()
          .embedding(self.embedding.view_mut())
          .velocity(self.velocity.view_mut())
          .gradient(direction.view())
          .momentum(self.momentum)
          .learning_rate(&mut self.learning_rate)
          .min_learning_rate(self.min_learning_rate)
          .iteration(iteration)
          .build()
          .exec()?;
      }
      UpdateRule::Direct => {
        let next = &self.embedding + &(direction * self.learning_rate);
        if !all_finite(next.view()) {
          return Err(EmbedError::Computation(format!(
            "embedding diverged at iteration {iteration}"
          )));
        }
        self.embedding = next;
      }
    }

    if iteration % self.recording_interval == 0 || iteration + 1 == self.total_iterations {
      debug!(
        iteration,
        cost = evaluation.cost,
        gradient_norm,
        "recorded snapshot"
      );
      self.snapshots.push(IterationSnapshot {
        iteration,
        embedding: self.embedding.clone(),
        cost: evaluation.cost,
        gradient_norm,
      });
    }

    self.current_iteration += 1;
    Ok(())
  }

  pub fn current_iteration(&self) -> usize {
    self.current_iteration
  }

  pub fn total_iterations(&self) -> usize {
    self.total_iterations
  }

  pub fn remaining_iterations(&self) -> usize {
    self.total_iterations - self.current_iteration
  }

  pub fn embedding(&self) -> ArrayView2<'_, f64> {
    self.embedding.view()
  }

  pub fn snapshots(&self) -> &[IterationSnapshot] {
    &self.snapshots
  }

  /// The learning rate currently in use, after any back-off.
  pub fn learning_rate(&self) -> f64 {
    self.learning_rate
  }

  pub fn objective(&self) -> Objective {
    self.objective
  }

  /// Finish the run and compute the final low-dimensional affinity.
  ///
  /// The final cost is the last recorded one; a run stopped before any
  /// iteration reports the cost at its current embedding.
  pub fn into_result(self) -> RunResult {
    let final_cost = match self.snapshots.last() {
      Some(snapshot) => snapshot.cost,
      None => {
        self
          .objective
          .evaluate(self.target.view(), self.embedding.view())
          .cost
      }
    };
    let low_affinity = self.objective.final_low_affinity(self.embedding.view());
    RunResult {
      embedding: self.embedding,
      low_affinity,
      snapshots: self.snapshots,
      final_cost,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn square_target() -> Array2<f64> {
    array![
      [0.0, 0.2, 0.05, 0.2],
      [0.2, 0.0, 0.2, 0.05],
      [0.05, 0.2, 0.0, 0.2],
      [0.2, 0.05, 0.2, 0.0]
    ]
  }

  fn params(iterations: usize) -> OptimizationParams {
    OptimizationParams {
      iterations,
      learning_rate: 10.0,
      recording_interval: 3,
      ..Default::default()
    }
  }

  #[test]
  fn records_on_interval_and_last_iteration() {
    let init = array![[0.0, 0.0], [1.0, 0.1], [1.1, 1.0], [0.1, 0.9]];
    let mut opt = Optimizer::new(Objective::Tsne, square_target().view(), init, &params(8)).unwrap();
    opt.step_iterations(8).unwrap();
    let recorded: Vec<usize> = opt.snapshots().iter().map(|s| s.iteration).collect();
    assert_eq!(recorded, vec![0, 3, 6, 7]);
    assert_eq!(opt.remaining_iterations(), 0);
  }

  #[test]
  fn overstepping_is_an_error_not_a_panic() {
    let init = array![[0.0, 0.0], [1.0, 0.1], [1.1, 1.0], [0.1, 0.9]];
    let mut opt = Optimizer::new(Objective::Sne, square_target().view(), init, &params(5)).unwrap();
    opt.step_iterations(3).unwrap();
    assert!(matches!(
      opt.step_iterations(3),
      Err(EmbedError::InputValidation(_))
    ));
    assert_eq!(opt.current_iteration(), 3);
  }

  #[test]
  fn embedding_stays_centred_and_finite() {
    let init = array![[0.0, 0.0], [1.0, 0.1], [1.1, 1.0], [0.1, 0.9]];
    let mut opt = Optimizer::new(Objective::Tsne, square_target().view(), init, &params(20)).unwrap();
    opt.run().unwrap();
    let result = opt.into_result();
    assert!(all_finite(result.embedding.view()));
    for column in result.embedding.columns() {
      assert!(column.sum().abs() < 1e-9);
    }
    assert!((result.low_affinity.sum() - 1.0).abs() < 1e-9);
    assert_eq!(result.final_cost, result.snapshots.last().unwrap().cost);
  }

  #[test]
  fn gradient_norm_respects_per_point_clip() {
    let init = array![[0.0, 0.0], [1e-3, 0.0], [0.0, 1e-3], [1e-3, 1e-3]];
    let mut opt = Optimizer::new(
      Objective::Tsne,
      square_target().view(),
      init,
      &OptimizationParams {
        iterations: 1,
        max_point_gradient_norm: 1e-6,
        ..Default::default()
      },
    )
    .unwrap();
    opt.step_iterations(1).unwrap();
    assert!(opt.snapshots()[0].gradient_norm <= 2e-6 + 1e-15);
  }

  #[test]
  fn overflowing_distances_keep_the_run_finite() {
    let init = array![[1e200, 0.0], [-1e200, 0.0], [0.0, 1.0], [1.0, 1.0]];
    let mut opt = Optimizer::new(Objective::Tsne, square_target().view(), init, &params(6)).unwrap();
    opt.run().unwrap();
    let result = opt.into_result();
    assert!(all_finite(result.embedding.view()));
    assert!(all_finite(result.low_affinity.view()));
    assert!(result.snapshots.iter().all(|s| s.cost.is_finite()));
  }

  #[test]
  fn non_positive_kernel_parameters_are_rejected() {
    let init = array![[0.0, 0.0], [1.0, 0.1], [1.1, 1.0], [0.1, 0.9]];
    for (a, b) in [(-1.0, 0.9), (1.5, 0.0), (f64::NAN, 0.9)] {
      assert!(matches!(
        Optimizer::new(Objective::Umap { a, b }, square_target().view(), init.clone(), &params(5)),
        Err(EmbedError::InputValidation(_))
      ));
    }
  }

  #[test]
  fn mismatched_shapes_are_rejected() {
    let init = array![[0.0, 0.0], [1.0, 1.0]];
    assert!(matches!(
      Optimizer::new(Objective::Tsne, square_target().view(), init, &params(5)),
      Err(EmbedError::InputValidation(_))
    ));
  }
}
