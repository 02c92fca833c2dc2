pub mod config;
pub mod error;
pub mod types;
pub mod yaml_layer;

pub use error::AppError;
pub use types::*;
