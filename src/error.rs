use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Every failure the engine can report.
///
/// The display strings carry a fixed prefix per kind so a caller that only
/// sees the rendered message can still tell the four kinds apart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbedError {
  /// Empty or malformed data, missing fields, out-of-range parameters.
  #[error("input validation error: {0}")]
  InputValidation(String),

  /// The learning rate fell below its floor while backing off from
  /// non-finite updates.
  #[error(
    "numeric instability error: learning rate fell to {learning_rate:e} at iteration {iteration}; lower the learning rate or re-initialise the embedding"
  )]
  NumericInstability { iteration: usize, learning_rate: f64 },

  /// The algorithm tag is not one of `tsne`, `sne`, `umap`.
  #[error("unsupported algorithm error: {0}")]
  UnsupportedAlgorithm(String),

  /// A computation degenerated even after flooring (e.g. zero affinity mass).
  #[error("computation error: {0}")]
  Computation(String),
}

/// Stable tag for an [`EmbedError`], carried next to the message in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  InputValidation,
  NumericInstability,
  UnsupportedAlgorithm,
  Computation,
}

impl EmbedError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      EmbedError::InputValidation(_) => ErrorKind::InputValidation,
      EmbedError::NumericInstability { .. } => ErrorKind::NumericInstability,
      EmbedError::UnsupportedAlgorithm(_) => ErrorKind::UnsupportedAlgorithm,
      EmbedError::Computation(_) => ErrorKind::Computation,
    }
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    EmbedError::InputValidation(msg.into())
  }
}

pub type EmbedResult<T> = Result<T, EmbedError>;
