// Constants shared by the calibration routines

/// Default budget of the per-row entropy search.
pub const ENTROPY_SEARCH_MAX_ITER: usize = 50;

/// Default entropy tolerance (nats) of the per-row search.
pub const ENTROPY_TOLERANCE: f64 = 1e-5;

/// Tolerance for the smooth k-nearest neighbor distance approximation
pub const SMOOTH_K_TOLERANCE: f64 = 1e-5;

/// Minimum scale factor for k-nearest neighbor distances
pub const MIN_K_DIST_SCALE: f64 = 1e-3;
