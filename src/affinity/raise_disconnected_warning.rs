use tracing::debug;
use tracing::warn;

pub fn raise_disconnected_warning(
  edges_removed: usize,
  vertices_disconnected: usize,
  total_rows: usize,
  threshold: f64, // Default 0.1
) {
  if vertices_disconnected == 0 && edges_removed > 0 {
    debug!(
      edges_removed,
      "non-finite distances removed edges; no vertices were disconnected"
    );
  } else if vertices_disconnected > 0
    && vertices_disconnected <= (threshold * total_rows as f64) as usize
  {
    warn!(
      edges_removed,
      vertices_disconnected,
      "a few vertices were disconnected from the fuzzy graph; their rows of the affinity matrix are zero"
    );
  } else if vertices_disconnected > (threshold * total_rows as f64) as usize {
    warn!(
      edges_removed,
      vertices_disconnected,
      total_rows,
      "a large number of vertices were disconnected from the fuzzy graph; check the dataset for non-finite or extreme values"
    );
  }
}
