//! Neighbour-affinity calibration and gradient-descent embedding on dense
//! `ndarray` matrices.
//!
//! The crate turns a feature matrix into a high-dimensional affinity matrix
//! (entropy-calibrated Gaussian rows, symmetric joint probabilities, or a
//! fuzzy k-nearest-neighbour graph) and then optimizes a low-dimensional
//! embedding whose affinities match it, with t-SNE, SNE or a UMAP-style
//! force model.
//!
//! # Example
//!
//! ```
//! use neighbor_embed::{Algorithm, EmbedConfig, Embedder};
//! use ndarray::Array2;
//!
//! let mut config = EmbedConfig::default();
//! config.calibration.perplexity = 3.0;
//! config.optimization.iterations = 100;
//! config.optimization.learning_rate = 20.0;
//!
//! let data = Array2::from_shape_fn((12, 4), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
//! let embedder = Embedder::new(config);
//!
//! // Calibrate once, then optimize against the fixed target.
//! let target = embedder.calibrate(data.view(), Algorithm::Tsne).unwrap();
//! let mut optimizer = embedder
//!   .optimizer(Algorithm::Tsne, target.matrix(), data.view())
//!   .unwrap();
//! while optimizer.remaining_iterations() > 0 {
//!   optimizer
//!     .step_iterations(optimizer.remaining_iterations().min(25))
//!     .unwrap();
//! }
//! let result = optimizer.into_result();
//! assert_eq!(result.embedding.dim(), (12, 2));
//! ```
//!
//! # Public API
//!
//! * [`AffinityCalibrator`] - High-dimensional affinity formulas
//! * [`Embedder`] - Calibrate-and-optimize driver
//! * [`Optimizer`] - Resumable, serializable optimization state
//! * [`Objective`] - Kernel, cost and gradient bound per algorithm
//! * [`EmbedConfig`] - Configuration parameters
//! * [`EmbedError`] - The four failure kinds
//! * [`request`] - JSON request/response documents

// Public modules
pub mod config;
pub mod error;
pub mod metric;

// Public re-exports (primary API)
pub use affinity::entropy_search::CalibrationReport;
pub use affinity::find_ab_params::find_ab_params;
pub use calibrated::CalibratedAffinity;
pub use calibrated::HighSimilarityFormula;
pub use calibrator::AffinityCalibrator;
pub use config::CalibrationParams;
pub use config::EmbedConfig;
pub use config::ManifoldParams;
pub use config::OptimizationParams;
pub use distances::CosineMetric;
pub use distances::EuclideanMetric;
pub use distances::ManhattanMetric;
pub use embedding::seed_embedding;
pub use embedding::Embedder;
pub use error::EmbedError;
pub use error::EmbedResult;
pub use error::ErrorKind;
pub use low_dim::LowDimAffinityModel;
pub use low_dim::LowSimilarityFormula;
pub use metric::Metric;
pub use metric::MetricType;
pub use objective::Algorithm;
pub use objective::Objective;
pub use optimizer::IterationSnapshot;
pub use optimizer::Optimizer;
pub use optimizer::RunResult;

// Internal modules (not exposed)
mod affinity;
mod distances;
mod embedding;
mod layout;
mod utils;

// Public modules (for advanced users)
pub mod calibrated;
pub mod calibrator;
pub mod low_dim;
pub mod objective;
pub mod optimizer;
pub mod request;
