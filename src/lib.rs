//! costbook - terminal expense tracker
//!
//! Projects hold expenses whose amounts are typed in directly, computed as
//! quantity times unit price, or evaluated from named formulas such as
//! `hours * hourly_rate`. Formulas run in a small sandboxed arithmetic
//! language; see [`domain::FormulaEvaluator`].

pub mod config;
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
pub use application::*;
