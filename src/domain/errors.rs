use thiserror::Error;

/// Failures produced while validating or evaluating a formula.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    /// A declared formula parameter has no bound value.
    #[error("missing value for parameter '{0}'")]
    MissingParameter(String),

    /// The expression text matched the advisory keyword denylist.
    #[error("expression rejected as unsafe: {0}")]
    UnsafeExpression(String),

    /// The expression could not be parsed or computed.
    #[error("formula evaluation error: {0}")]
    EvaluationError(String),

    /// No formula with this key exists in the project.
    #[error("formula not found: {0}")]
    FormulaNotFound(String),

    /// The expression uses an identifier that is not a declared parameter.
    #[error("identifier '{0}' is not a declared parameter")]
    UndeclaredParameter(String),

    /// A parameter name is listed more than once.
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    #[error("invalid formula: {0}")]
    InvalidFormula(String),
}

pub type FormulaResult<T> = Result<T, FormulaError>;

/// Failures of project-level bookkeeping operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProjectError {
    #[error("expense not found: {0}")]
    ExpenseNotFound(u64),

    #[error("custom expense type not found: {0}")]
    CustomTypeNotFound(u64),

    #[error("a formula with key '{0}' already exists")]
    DuplicateFormula(String),

    #[error("built-in formula '{0}' cannot be changed")]
    BuiltinFormula(String),

    /// Removing the formula would leave these expenses pointing at nothing.
    #[error("formula '{name}' is still used by expense(s) {}", join_ids(.expense_ids))]
    FormulaInUse { name: String, expense_ids: Vec<u64> },

    #[error("invalid expense: {0}")]
    InvalidExpense(String),

    #[error(transparent)]
    Formula(#[from] FormulaError),
}

pub type ProjectResult<T> = Result<T, ProjectError>;

fn join_ids(ids: &[u64]) -> String {
    ids.iter().map(|id| format!("#{}", id)).collect::<Vec<_>>().join(", ")
}
