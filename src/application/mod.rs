//! Application layer managing state and workflows.
//!
//! This module sits between the domain and the terminal UI: it owns the
//! open project, the forms being edited, and the current mode.

pub mod forms;
pub mod state;

pub use forms::*;
pub use state::*;
