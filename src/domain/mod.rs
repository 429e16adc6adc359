//! Domain layer: expense records, formulas, and formula evaluation.

pub mod models;
pub mod parser;
pub mod services;
pub mod statistics;
pub mod errors;

pub use models::*;
pub use services::*;
pub use statistics::*;
pub use errors::*;
