//! Request and response documents exchanged with the node-tree front end.
//!
//! Matrices travel as nested JSON arrays. `null` entries are read as NaN so a
//! poisoned matrix reaches the engine's sanitising passes instead of failing
//! to parse. Node fields the engine does not know about pass through
//! untouched.

use crate::calibrated::HighSimilarityFormula;
use crate::calibrator::AffinityCalibrator;
use crate::config::CalibrationParams;
use crate::config::EmbedConfig;
use crate::config::ManifoldParams;
use crate::config::OptimizationParams;
use crate::embedding::Embedder;
use crate::error::EmbedError;
use crate::error::EmbedResult;
use crate::error::ErrorKind;
use crate::low_dim::LowSimilarityFormula;
use crate::metric::MetricType;
use crate::objective::Algorithm;
use crate::optimizer::IterationSnapshot;
use ndarray::Array2;
use ndarray::ArrayView2;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use tracing::info;

/// A matrix on the wire; `None` is a missing or non-finite value.
pub type JsonMatrix = Vec<Vec<Option<f64>>>;

/// Embedding parameters as sent by the front end. Missing fields take the
/// engine defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestParameters {
  pub iterations: usize,
  /// `None` takes the algorithm's default learning rate.
  #[serde(alias = "learning_rate", skip_serializing_if = "Option::is_none")]
  pub learning_rate: Option<f64>,
  pub momentum: f64,
  pub perplexity: f64,
  #[serde(alias = "n_neighbors")]
  pub n_neighbors: usize,
  #[serde(alias = "min_dist")]
  pub min_dist: f64,
  #[serde(alias = "recording_interval")]
  pub recording_interval: usize,
  pub spread: f64,
  #[serde(alias = "n_components")]
  pub n_components: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub seed: Option<u64>,
}

impl Default for RequestParameters {
  fn default() -> Self {
    let config = EmbedConfig::default();
    Self {
      iterations: config.optimization.iterations,
      learning_rate: None,
      momentum: config.optimization.momentum,
      perplexity: config.calibration.perplexity,
      n_neighbors: config.calibration.n_neighbors,
      min_dist: config.manifold.min_dist,
      recording_interval: config.optimization.recording_interval,
      spread: config.manifold.spread,
      n_components: config.n_components,
      seed: None,
    }
  }
}

impl RequestParameters {
  pub fn to_config(&self, algorithm: Algorithm) -> EmbedConfig {
    EmbedConfig {
      n_components: self.n_components,
      calibration: CalibrationParams {
        perplexity: self.perplexity,
        n_neighbors: self.n_neighbors,
        ..Default::default()
      },
      manifold: ManifoldParams {
        min_dist: self.min_dist,
        spread: self.spread,
        ..Default::default()
      },
      optimization: OptimizationParams {
        iterations: self.iterations,
        learning_rate: self
          .learning_rate
          .unwrap_or_else(|| OptimizationParams::default_learning_rate(algorithm)),
        momentum: self.momentum,
        recording_interval: self.recording_interval,
        seed: self.seed,
        ..Default::default()
      },
    }
  }
}

/// Matrices derived for a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Computed {
  #[serde(
    default,
    alias = "high_similarity_matrix",
    skip_serializing_if = "Option::is_none"
  )]
  pub high_similarity_matrix: Option<JsonMatrix>,
  #[serde(
    default,
    alias = "low_similarity_matrix",
    skip_serializing_if = "Option::is_none"
  )]
  pub low_similarity_matrix: Option<JsonMatrix>,
  #[serde(default, alias = "final_cost", skip_serializing_if = "Option::is_none")]
  pub final_cost: Option<f64>,
  #[serde(
    default,
    alias = "iterations_recorded",
    skip_serializing_if = "Option::is_none"
  )]
  pub iterations_recorded: Option<usize>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A node of the front end's operation tree. Only `dataset` and `computed`
/// are interpreted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
  #[serde(default)]
  pub dataset: JsonMatrix,
  #[serde(default)]
  pub computed: Computed,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl NodeData {
  /// A child of this node produced by `operation`. The id is left for the
  /// tree owner to assign.
  fn derive(&self, operation: &str, parameters: Value) -> NodeData {
    let mut node = self.clone();
    node.extra.remove("id");
    node.extra.insert("operation".into(), Value::String(operation.into()));
    node.extra.insert("parameters".into(), parameters);
    node.extra.insert("children".into(), Value::Array(Vec::new()));
    node.extra.insert("selected".into(), Value::Bool(false));
    node
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedRequest {
  pub algorithm: String,
  #[serde(default)]
  pub parameters: RequestParameters,
  #[serde(alias = "node_data")]
  pub node_data: NodeData,
}

/// One snapshot on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
  pub iteration: usize,
  pub embedding: JsonMatrix,
  pub cost: f64,
  pub gradient_norm: f64,
}

impl From<&IterationSnapshot> for SnapshotRecord {
  fn from(snapshot: &IterationSnapshot) -> Self {
    Self {
      iteration: snapshot.iteration,
      embedding: matrix_to_json(snapshot.embedding.view()),
      cost: snapshot.cost,
      gradient_norm: snapshot.gradient_norm,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedResponse {
  pub success: bool,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_kind: Option<ErrorKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node: Option<NodeData>,
  #[serde(default)]
  pub iterations: Vec<SnapshotRecord>,
}

impl EmbedResponse {
  pub fn failure(error: &EmbedError) -> Self {
    Self {
      success: false,
      message: error.to_string(),
      error_kind: Some(error.kind()),
      node: None,
      iterations: Vec::new(),
    }
  }
}

/// Which side of the embedding a similarity request computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityType {
  #[default]
  High,
  Low,
}

/// Parameters of a similarity formula; each formula reads the ones it
/// needs and the rest are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormulaParameters {
  pub sigma: f64,
  pub perplexity: f64,
  #[serde(alias = "n_neighbors")]
  pub n_neighbors: usize,
  #[serde(alias = "min_dist")]
  pub min_dist: f64,
  pub spread: f64,
  #[serde(alias = "degrees_of_freedom")]
  pub degrees_of_freedom: f64,
  pub metric: MetricType,
}

impl Default for FormulaParameters {
  fn default() -> Self {
    let calibration = CalibrationParams::default();
    let manifold = ManifoldParams::default();
    Self {
      sigma: calibration.sigma,
      perplexity: calibration.perplexity,
      n_neighbors: calibration.n_neighbors,
      min_dist: manifold.min_dist,
      spread: manifold.spread,
      degrees_of_freedom: 1.0,
      metric: calibration.metric,
    }
  }
}

impl FormulaParameters {
  pub fn high_formula(&self, name: &str) -> EmbedResult<HighSimilarityFormula> {
    match name {
      "euclidean" => Ok(HighSimilarityFormula::Euclidean { sigma: self.sigma }),
      "cosine" => Ok(HighSimilarityFormula::Cosine),
      "gaussian" => Ok(HighSimilarityFormula::Gaussian {
        perplexity: self.perplexity,
      }),
      "symmetric_sne" => Ok(HighSimilarityFormula::SymmetricSne {
        perplexity: self.perplexity,
      }),
      "umap_high_similarity" => Ok(HighSimilarityFormula::UmapHighSimilarity {
        n_neighbors: self.n_neighbors,
      }),
      other => Err(EmbedError::UnsupportedAlgorithm(format!(
        "unknown high-dimensional similarity formula '{other}'"
      ))),
    }
  }

  pub fn low_formula(&self, name: &str) -> EmbedResult<LowSimilarityFormula> {
    match name {
      "tsne_low_similarity" => Ok(LowSimilarityFormula::TsneLowSimilarity {
        degrees_of_freedom: self.degrees_of_freedom,
      }),
      "umap_low_similarity" => Ok(LowSimilarityFormula::UmapLowSimilarity {
        min_dist: self.min_dist,
        spread: self.spread,
      }),
      other => Err(EmbedError::UnsupportedAlgorithm(format!(
        "unknown low-dimensional similarity formula '{other}'"
      ))),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityRequest {
  #[serde(alias = "source_node")]
  pub source_node: NodeData,
  pub formula: String,
  #[serde(default)]
  pub parameters: FormulaParameters,
  #[serde(default, alias = "similarity_type")]
  pub similarity_type: SimilarityType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResponse {
  pub success: bool,
  pub message: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error_kind: Option<ErrorKind>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub node: Option<NodeData>,
}

impl SimilarityResponse {
  pub fn failure(error: &EmbedError) -> Self {
    Self {
      success: false,
      message: error.to_string(),
      error_kind: Some(error.kind()),
      node: None,
    }
  }
}

/// Run a gradient-descent embedding request. Every failure becomes a
/// `success: false` response.
pub fn handle_embed(request: &EmbedRequest) -> EmbedResponse {
  run_embed(request).unwrap_or_else(|e| EmbedResponse::failure(&e))
}

fn run_embed(request: &EmbedRequest) -> EmbedResult<EmbedResponse> {
  let algorithm: Algorithm = request.algorithm.parse()?;
  let config = request.parameters.to_config(algorithm);
  config.validate()?;

  let dataset = matrix_from_json(&request.node_data.dataset, "dataset")?;
  let high_json = request
    .node_data
    .computed
    .high_similarity_matrix
    .as_ref()
    .ok_or_else(|| EmbedError::invalid("node has no highSimilarityMatrix; compute one first"))?;
  let high = matrix_from_json(high_json, "highSimilarityMatrix")?;

  let mut applied = request.parameters.clone();
  applied.learning_rate = Some(config.optimization.learning_rate);
  let result = Embedder::new(config).fit(algorithm, high.view(), dataset.view())?;

  let operation = algorithm.operation_label();
  let parameters = serde_json::to_value(&applied)
    .map_err(|e| EmbedError::Computation(format!("cannot encode parameters: {e}")))?;
  let mut node = request.node_data.derive(&operation, parameters);
  node.dataset = matrix_to_json(result.embedding.view());
  node.computed.low_similarity_matrix = Some(matrix_to_json(result.low_affinity.view()));
  node.computed.final_cost = Some(result.final_cost);
  node.computed.iterations_recorded = Some(result.snapshots.len());

  info!(
    algorithm = %algorithm,
    final_cost = result.final_cost,
    iterations_recorded = result.snapshots.len(),
    "embedding request complete"
  );

  Ok(EmbedResponse {
    success: true,
    message: "gradient descent completed".into(),
    error_kind: None,
    node: Some(node),
    iterations: result.snapshots.iter().map(SnapshotRecord::from).collect(),
  })
}

/// Run a similarity-matrix request. Every failure becomes a
/// `success: false` response.
pub fn handle_similarity(request: &SimilarityRequest) -> SimilarityResponse {
  run_similarity(request).unwrap_or_else(|e| SimilarityResponse::failure(&e))
}

fn run_similarity(request: &SimilarityRequest) -> EmbedResult<SimilarityResponse> {
  let data = matrix_from_json(&request.source_node.dataset, "dataset")?;
  let params = &request.parameters;

  let mut computed = request.source_node.computed.clone();
  match request.similarity_type {
    SimilarityType::High => {
      let formula = params.high_formula(&request.formula)?;
      let calibrator = AffinityCalibrator::new(CalibrationParams {
        metric: params.metric,
        ..Default::default()
      });
      let matrix = calibrator.compute(data.view(), formula)?;
      computed.high_similarity_matrix = Some(matrix_to_json(matrix.matrix()));
    }
    SimilarityType::Low => {
      let formula = params.low_formula(&request.formula)?;
      let matrix = formula.compute(data.view())?;
      computed.low_similarity_matrix = Some(matrix_to_json(matrix.view()));
    }
  }

  let mut parameters = request
    .source_node
    .extra
    .get("parameters")
    .and_then(Value::as_object)
    .cloned()
    .unwrap_or_default();
  parameters.insert(
    "similarity_formula".into(),
    Value::String(request.formula.clone()),
  );
  let mut node = request
    .source_node
    .derive("similarity matrix computation", Value::Object(parameters));
  node.computed = computed;

  Ok(SimilarityResponse {
    success: true,
    message: "similarity matrix computed".into(),
    error_kind: None,
    node: Some(node),
  })
}

/// Parse a rectangular, non-empty wire matrix. `null` becomes NaN.
pub fn matrix_from_json(rows: &JsonMatrix, what: &str) -> EmbedResult<Array2<f64>> {
  let n_rows = rows.len();
  let n_cols = rows.first().map_or(0, Vec::len);
  if n_rows == 0 || n_cols == 0 {
    return Err(EmbedError::invalid(format!("{what} is empty")));
  }
  if let Some(bad) = rows.iter().position(|row| row.len() != n_cols) {
    return Err(EmbedError::invalid(format!(
      "{what} is ragged: row {bad} has {} values, expected {n_cols}",
      rows[bad].len()
    )));
  }
  Ok(Array2::from_shape_fn((n_rows, n_cols), |(i, j)| {
    rows[i][j].unwrap_or(f64::NAN)
  }))
}

/// Render a matrix for the wire; non-finite values become `null`.
pub fn matrix_to_json(m: ArrayView2<f64>) -> JsonMatrix {
  m.outer_iter()
    .map(|row| {
      row
        .iter()
        .map(|v| if v.is_finite() { Some(*v) } else { None })
        .collect()
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn square_request(algorithm: &str) -> Value {
    json!({
      "algorithm": algorithm,
      "parameters": { "iterations": 12, "learningRate": 5.0, "recordingInterval": 5 },
      "nodeData": {
        "id": "parent",
        "dataset": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
        "featureNames": ["x", "y"],
        "target": [0, 0, 1, 1],
        "computed": {
          "highSimilarityMatrix": [
            [0.0, 0.2, 0.05, 0.2],
            [0.2, 0.0, 0.2, 0.05],
            [0.05, 0.2, 0.0, 0.2],
            [0.2, 0.05, 0.2, 0.0]
          ]
        }
      }
    })
  }

  #[test]
  fn embed_response_carries_node_and_snapshots() {
    let request: EmbedRequest = serde_json::from_value(square_request("tsne")).unwrap();
    let response = handle_embed(&request);
    assert!(response.success, "{}", response.message);

    let value = serde_json::to_value(&response).unwrap();
    let node = &value["node"];
    assert_eq!(node["operation"], "TSNE gradient descent");
    assert_eq!(node["featureNames"], json!(["x", "y"]));
    assert_eq!(node["target"], json!([0, 0, 1, 1]));
    assert!(node.get("id").is_none());
    assert_eq!(node["dataset"].as_array().unwrap().len(), 4);
    assert_eq!(node["computed"]["iterationsRecorded"], 4);
    assert!(node["computed"]["finalCost"].is_f64());
    assert_eq!(
      node["computed"]["lowSimilarityMatrix"].as_array().unwrap().len(),
      4
    );
    assert_eq!(node["computed"]["highSimilarityMatrix"][0][1], 0.2);

    let recorded: Vec<u64> = value["iterations"]
      .as_array()
      .unwrap()
      .iter()
      .map(|s| s["iteration"].as_u64().unwrap())
      .collect();
    assert_eq!(recorded, vec![0, 5, 10, 11]);
    assert!(value["iterations"][0]["gradientNorm"].is_f64());
  }

  #[test]
  fn snake_case_aliases_are_accepted() {
    let request: EmbedRequest = serde_json::from_value(json!({
      "algorithm": "sne",
      "parameters": { "iterations": 3, "learning_rate": 1.0, "recording_interval": 1 },
      "node_data": {
        "dataset": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
        "computed": { "high_similarity_matrix": [[0, 1, 1], [1, 0, 1], [1, 1, 0]] }
      }
    }))
    .unwrap();
    assert_eq!(request.parameters.learning_rate, Some(1.0));
    assert_eq!(request.parameters.momentum, 0.8);
    let response = handle_embed(&request);
    assert!(response.success, "{}", response.message);
    assert_eq!(response.iterations.len(), 3);
  }

  #[test]
  fn failures_name_their_kind() {
    let request: EmbedRequest = serde_json::from_value(square_request("isomap")).unwrap();
    let response = handle_embed(&request);
    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::UnsupportedAlgorithm));
    assert!(response.message.starts_with("unsupported algorithm error"));
    assert!(response.node.is_none());

    let mut missing = square_request("tsne");
    missing["nodeData"]["computed"] = json!({});
    let request: EmbedRequest = serde_json::from_value(missing).unwrap();
    let response = handle_embed(&request);
    assert_eq!(response.error_kind, Some(ErrorKind::InputValidation));
    assert!(response.message.contains("highSimilarityMatrix"));
  }

  #[test]
  fn null_entries_are_read_as_nan() {
    let rows: JsonMatrix = vec![vec![Some(1.0), None], vec![Some(0.0), Some(2.0)]];
    let m = matrix_from_json(&rows, "m").unwrap();
    assert!(m[(0, 1)].is_nan());
    assert_eq!(matrix_to_json(m.view()), rows);

    let ragged: JsonMatrix = vec![vec![Some(1.0)], vec![Some(0.0), Some(2.0)]];
    assert!(matrix_from_json(&ragged, "m").is_err());
  }

  #[test]
  fn similarity_request_fills_the_requested_matrix() {
    let request: SimilarityRequest = serde_json::from_value(json!({
      "source_node": {
        "id": "root",
        "dataset": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [5.0, 5.0], [5.0, 6.0]],
        "parameters": { "scaling": "none" }
      },
      "formula": "symmetric_sne",
      "parameters": { "perplexity": 2.0 }
    }))
    .unwrap();
    assert_eq!(request.similarity_type, SimilarityType::High);
    let response = handle_similarity(&request);
    assert!(response.success, "{}", response.message);
    let value = serde_json::to_value(&response).unwrap();
    let node = &value["node"];
    assert_eq!(node["parameters"]["similarity_formula"], "symmetric_sne");
    assert_eq!(node["parameters"]["scaling"], "none");
    let matrix = node["computed"]["highSimilarityMatrix"].as_array().unwrap();
    let total: f64 = matrix
      .iter()
      .flat_map(|row| row.as_array().unwrap().iter())
      .map(|v| v.as_f64().unwrap())
      .sum();
    assert!((total - 1.0).abs() < 1e-9);

    let low: SimilarityRequest = serde_json::from_value(json!({
      "sourceNode": { "dataset": [[0.0, 0.0], [1.0, 0.0], [3.0, 0.0]] },
      "formula": "umap_low_similarity",
      "similarityType": "low"
    }))
    .unwrap();
    let response = handle_similarity(&low);
    assert!(response.success, "{}", response.message);
    let node = response.node.unwrap();
    assert!(node.computed.low_similarity_matrix.is_some());
    assert!(node.computed.high_similarity_matrix.is_none());
  }

  #[test]
  fn omitted_learning_rate_follows_the_algorithm() {
    let params = RequestParameters::default();
    assert_eq!(params.learning_rate, None);
    assert_eq!(params.to_config(Algorithm::Umap).optimization.learning_rate, 1.0);
    assert_eq!(params.to_config(Algorithm::Tsne).optimization.learning_rate, 200.0);

    let explicit = RequestParameters {
      learning_rate: Some(0.05),
      ..Default::default()
    };
    assert_eq!(explicit.to_config(Algorithm::Umap).optimization.learning_rate, 0.05);

    let mut request: EmbedRequest = serde_json::from_value(square_request("umap")).unwrap();
    request.parameters.learning_rate = None;
    let value = serde_json::to_value(handle_embed(&request)).unwrap();
    assert_eq!(value["node"]["parameters"]["learningRate"], 1.0);
  }

  #[test]
  fn null_features_are_sanitised_in_similarity_requests() {
    let dataset = json!([
      [0.0, 0.0], [1.0, null], [0.0, 1.0], [1.0, 1.0],
      [5.0, 5.0], [6.0, 5.0], [5.0, 6.0], [6.0, 6.0]
    ]);
    for formula in ["euclidean", "cosine", "symmetric_sne", "umap_high_similarity"] {
      let request: SimilarityRequest = serde_json::from_value(json!({
        "sourceNode": { "dataset": dataset },
        "formula": formula,
        "parameters": { "perplexity": 3.0, "nNeighbors": 3 }
      }))
      .unwrap();
      let response = handle_similarity(&request);
      assert!(response.success, "{formula}: {}", response.message);
      let matrix = response.node.unwrap().computed.high_similarity_matrix.unwrap();
      assert!(
        matrix.iter().flatten().all(|v| v.is_some_and(f64::is_finite)),
        "{formula}"
      );
    }

    // The fuzzy graph cuts the poisoned sample off instead of imputing it.
    let request: SimilarityRequest = serde_json::from_value(json!({
      "sourceNode": { "dataset": dataset },
      "formula": "umap_high_similarity",
      "parameters": { "nNeighbors": 3 }
    }))
    .unwrap();
    let matrix = handle_similarity(&request)
      .node
      .unwrap()
      .computed
      .high_similarity_matrix
      .unwrap();
    assert!(matrix[1].iter().all(|v| *v == Some(0.0)));
  }

  #[test]
  fn unknown_formula_is_unsupported() {
    let request: SimilarityRequest = serde_json::from_value(json!({
      "sourceNode": { "dataset": [[0.0], [1.0]] },
      "formula": "mahalanobis"
    }))
    .unwrap();
    let response = handle_similarity(&request);
    assert_eq!(response.error_kind, Some(ErrorKind::UnsupportedAlgorithm));
  }
}
