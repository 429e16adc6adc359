//! Formula evaluation services for expense amounts.
//!
//! [`FormulaEvaluator`] is the only entry point the application uses to turn
//! a formula and a set of parameter values into an amount. It is built once
//! at startup and passed to whoever needs it.

use tracing::debug;

use super::errors::{FormulaError, FormulaResult};
use super::models::{AmountSource, Bindings, Formula, Project};
use super::parser::{Expr, ExpressionEvaluator, FunctionRegistry, Parser};

/// Substrings the advisory safety check rejects, matched case-insensitively.
///
/// This is a plain textual filter kept for compatibility with formulas
/// written for earlier versions. It rejects harmless names that happen to
/// contain a listed substring (`cost` contains `os`) and it cannot catch
/// anything not on the list. It is not what keeps evaluation contained:
/// the grammar in [`super::parser`] is closed and can only reach bindings
/// and whitelisted functions.
pub const DENYLIST: [&str; 8] = ["import", "exec", "eval", "__", "open", "file", "os", "sys"];

/// Evaluates formula expressions against parameter bindings.
///
/// Supported features:
/// - Arithmetic operations: `+`, `-`, `*`, `/`, `//`, `%`, `**`, `^`
/// - Functions: `abs`, `round`, `min`, `max`, `sum`, `pow`
/// - The `math` namespace: `math.sqrt`, `math.log`, `math.sin`, `math.pi`, ...
/// - Names resolve only to the supplied bindings
///
/// # Examples
///
/// ```
/// use costbook::domain::{Bindings, FormulaEvaluator};
///
/// let evaluator = FormulaEvaluator::new();
/// let mut bindings = Bindings::new();
/// bindings.insert("hours".to_string(), 40.0);
/// bindings.insert("hourly_rate".to_string(), 200.0);
///
/// assert_eq!(evaluator.evaluate("hours * hourly_rate", &bindings).unwrap(), 8000.0);
/// assert!(evaluator.evaluate("hours / 0", &bindings).is_err());
/// ```
pub struct FormulaEvaluator {
    function_registry: FunctionRegistry,
}

impl FormulaEvaluator {
    pub fn new() -> Self {
        Self {
            function_registry: FunctionRegistry::new(),
        }
    }

    /// Evaluates `expression` with `bindings` as the only visible names.
    ///
    /// Any failure (syntax error, unknown name, division by zero, a result
    /// that is not finite) is reported as [`FormulaError::EvaluationError`]
    /// carrying the underlying message.
    pub fn evaluate(&self, expression: &str, bindings: &Bindings) -> FormulaResult<f64> {
        let ast = self.parse(expression)?;
        ExpressionEvaluator::new(bindings, &self.function_registry)
            .evaluate(&ast)
            .map_err(|e| {
                debug!(expression, error = %e, "formula evaluation failed");
                FormulaError::EvaluationError(e)
            })
    }

    /// Checks that every declared parameter of `formula` has a value.
    ///
    /// Parameters are checked in declaration order and the first missing one
    /// is reported. Extra bindings are ignored.
    pub fn validate_parameters(&self, formula: &Formula, bindings: &Bindings) -> FormulaResult<()> {
        match formula.parameters.iter().find(|p| !bindings.contains_key(p.as_str())) {
            Some(missing) => Err(FormulaError::MissingParameter(missing.clone())),
            None => Ok(()),
        }
    }

    /// Advisory denylist check on the raw expression text. See [`DENYLIST`].
    pub fn is_expression_safe(&self, expression: &str) -> bool {
        let lowered = expression.to_lowercase();
        !DENYLIST.iter().any(|keyword| lowered.contains(keyword))
    }

    /// Validates the bindings, applies the safety check, then evaluates.
    pub fn evaluate_formula(&self, formula: &Formula, bindings: &Bindings) -> FormulaResult<f64> {
        self.validate_parameters(formula, bindings)?;
        if !self.is_expression_safe(&formula.expression) {
            return Err(FormulaError::UnsafeExpression(formula.expression.clone()));
        }
        self.evaluate(&formula.expression, bindings)
    }

    /// Looks `name` up in `project` and evaluates it.
    pub fn evaluate_named(&self, project: &Project, name: &str, bindings: &Bindings) -> FormulaResult<f64> {
        let formula = project.formula(name)?;
        self.evaluate_formula(formula, bindings)
    }

    /// Resolves an [`AmountSource`] to a total amount.
    pub fn calculate_amount(&self, project: &Project, source: &AmountSource) -> FormulaResult<f64> {
        match source {
            AmountSource::Manual(amount) => finite_amount(*amount),
            AmountSource::QuantityTimesPrice { quantity, unit_price } => {
                finite_amount(quantity * unit_price)
            }
            AmountSource::Formula { name, bindings } => self.evaluate_named(project, name, bindings),
        }
    }

    /// Checks a formula definition before it is stored.
    ///
    /// Runs the safety check, parses the expression, and requires every name
    /// it reads to be one of `parameters`. Parameters must then be unique
    /// valid identifiers that do not shadow a function or constant.
    pub fn validate_formula_expression(&self, expression: &str, parameters: &[String]) -> FormulaResult<()> {
        if expression.trim().is_empty() {
            return Err(FormulaError::InvalidFormula("expression is empty".to_string()));
        }
        if !self.is_expression_safe(expression) {
            return Err(FormulaError::UnsafeExpression(expression.to_string()));
        }

        for name in self.referenced_variables(expression)? {
            if !parameters.contains(&name) {
                return Err(FormulaError::UndeclaredParameter(name));
            }
        }

        for (index, parameter) in parameters.iter().enumerate() {
            if parameters[..index].contains(parameter) {
                return Err(FormulaError::DuplicateParameter(parameter.clone()));
            }
        }

        for parameter in parameters {
            if !is_identifier(parameter) {
                return Err(FormulaError::InvalidFormula(format!(
                    "'{}' is not a valid parameter name",
                    parameter
                )));
            }
            if self.function_registry.is_reserved(parameter) {
                return Err(FormulaError::InvalidFormula(format!(
                    "parameter '{}' shadows a built-in name",
                    parameter
                )));
            }
        }

        Ok(())
    }

    /// Lists the free parameter names an expression reads, in order of first
    /// appearance. Namespace constants such as `math.pi` are not included.
    pub fn referenced_variables(&self, expression: &str) -> FormulaResult<Vec<String>> {
        let ast = self.parse(expression)?;
        let mut names = Vec::new();
        ast.collect_variables(&mut names);
        names.retain(|name| self.function_registry.get_constant(name).is_none());
        Ok(names)
    }

    fn parse(&self, expression: &str) -> FormulaResult<Expr> {
        Parser::new(expression)
            .and_then(|mut parser| parser.parse())
            .map_err(FormulaError::EvaluationError)
    }
}

impl Default for FormulaEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn finite_amount(amount: f64) -> FormulaResult<f64> {
    if amount.is_finite() {
        Ok(amount)
    } else {
        Err(FormulaError::EvaluationError("numerical result out of range".to_string()))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
