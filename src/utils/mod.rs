pub mod clip;
pub mod sanitize;
