//! Infrastructure layer: project files on disk and CSV exports.

pub mod export;
pub mod persistence;

pub use export::{CsvExporter, ExportError, ExportFilter, ExportReport};
pub use persistence::{sanitize_filename, ProjectRepository, ProjectSummary, StorageError};
