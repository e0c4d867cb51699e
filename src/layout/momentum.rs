use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::utils::sanitize::all_finite;
use ndarray::Array2;
use ndarray::ArrayView2;
use ndarray::ArrayViewMut2;
use ndarray::Axis;
use tracing::warn;
use typed_builder::TypedBuilder;

/*
  Apply one momentum update to the embedding, halving the learning rate
  until the update is finite.

    velocity' = momentum * velocity - learning_rate * gradient
    embedding' = embedding + velocity'

  The velocity and embedding are only written once an update is accepted;
  a rejected attempt leaves both untouched. An accepted non-zero step is
  followed by re-centring the embedding on the origin.

  Parameters
  ----------
  embedding: array of shape (n_samples, n_components)
      Updated in place on success.

  velocity: array of shape (n_samples, n_components)
      Momentum term, updated in place on success.

  gradient: array of shape (n_samples, n_components)
      Finite gradient of the current iteration.

  learning_rate: &mut float
      Halved on every rejected attempt; the caller keeps the reduced value.

  min_learning_rate: float
      Falling below it aborts with NumericInstability.

  iteration: int
      Reported in logs and the error.

  Returns
  -------
  The number of rejected attempts before the accepted one.
*/
#[derive(TypedBuilder)]
pub struct MomentumUpdate<'a, 'lr> {
  embedding: ArrayViewMut2<'a, f64>,
  velocity: ArrayViewMut2<'a, f64>,
  gradient: ArrayView2<'a, f64>,
  momentum: f64,
  learning_rate: &'lr mut f64,
  min_learning_rate: f64,
  iteration: usize,
}

impl<'a, 'lr> MomentumUpdate<'a, 'lr> {
  pub fn exec(self) -> EmbedResult<usize> {
    let MomentumUpdate {
      mut embedding,
      mut velocity,
      gradient,
      momentum,
      learning_rate,
      min_learning_rate,
      iteration,
    } = self;

    let mut rejected = 0;
    loop {
      let step: Array2<f64> = &velocity * momentum - &gradient * *learning_rate;
      let next = &embedding + &step;

      if all_finite(step.view()) && all_finite(next.view()) {
        let moved = step.iter().any(|s| *s != 0.0);
        velocity.assign(&step);
        embedding.assign(&next);
        if moved {
          recenter(embedding.view_mut());
        }
        return Ok(rejected);
      }

      rejected += 1;
      *learning_rate *= 0.5;
      warn!(
        iteration,
        learning_rate = *learning_rate,
        "non-finite update rejected; halving learning rate"
      );
      if *learning_rate < min_learning_rate {
        return Err(EmbedError::NumericInstability {
          iteration,
          learning_rate: *learning_rate,
        });
      }
    }
  }
}

/// Subtract the column means so the embedding is centred on the origin.
pub fn recenter(mut embedding: ArrayViewMut2<f64>) {
  if let Some(mean) = embedding.mean_axis(Axis(0)) {
    embedding -= &mean;
  }
}
