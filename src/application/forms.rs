//! Text inputs and the expense and formula forms.

use chrono::NaiveDate;

use crate::domain::{AmountSource, Bindings, Expense, ExpenseDraft, ExpenseType, Formula, Project};

/// Date format accepted and shown by the forms.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single-line text buffer with a cursor measured in characters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextInput {
    pub value: String,
    pub cursor: usize,
}

impl TextInput {
    pub fn with_value(value: impl Into<String>) -> Self {
        let value = value.into();
        let cursor = value.chars().count();
        Self { value, cursor }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn set(&mut self, value: impl Into<String>) {
        *self = Self::with_value(value);
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
    }

    pub fn insert(&mut self, c: char) {
        let index = self.byte_index(self.cursor);
        self.value.insert(index, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let index = self.byte_index(self.cursor);
            self.value.remove(index);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.len() {
            let index = self.byte_index(self.cursor);
            self.value.remove(index);
        }
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.len());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.len();
    }

    fn len(&self) -> usize {
        self.value.chars().count()
    }

    fn byte_index(&self, cursor: usize) -> usize {
        self.value
            .char_indices()
            .nth(cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.value.len())
    }
}

/// An ordered group of inputs with one of them focused.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSet {
    pub inputs: Vec<TextInput>,
    pub focus: usize,
}

impl FieldSet {
    pub fn new(count: usize) -> Self {
        Self {
            inputs: vec![TextInput::default(); count],
            focus: 0,
        }
    }

    pub fn value(&self, index: usize) -> &str {
        self.inputs.get(index).map(TextInput::as_str).unwrap_or("")
    }

    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if let Some(input) = self.inputs.get_mut(index) {
            input.set(value);
        }
    }

    pub fn focused_mut(&mut self) -> Option<&mut TextInput> {
        self.inputs.get_mut(self.focus)
    }

    pub fn next(&mut self) {
        if !self.inputs.is_empty() {
            self.focus = (self.focus + 1) % self.inputs.len();
        }
    }

    pub fn previous(&mut self) {
        if !self.inputs.is_empty() {
            self.focus = (self.focus + self.inputs.len() - 1) % self.inputs.len();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpenseField {
    Type,
    Name,
    Formula,
    Params,
    Quantity,
    UnitPrice,
    Amount,
    Date,
    Notes,
}

impl ExpenseField {
    pub const ALL: [ExpenseField; 9] = [
        ExpenseField::Type,
        ExpenseField::Name,
        ExpenseField::Formula,
        ExpenseField::Params,
        ExpenseField::Quantity,
        ExpenseField::UnitPrice,
        ExpenseField::Amount,
        ExpenseField::Date,
        ExpenseField::Notes,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ExpenseField::Type => "Type",
            ExpenseField::Name => "Name",
            ExpenseField::Formula => "Formula",
            ExpenseField::Params => "Parameters (k=v, ...)",
            ExpenseField::Quantity => "Quantity",
            ExpenseField::UnitPrice => "Unit price",
            ExpenseField::Amount => "Manual amount",
            ExpenseField::Date => "Date (YYYY-MM-DD)",
            ExpenseField::Notes => "Notes",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Expense entry form. Every field is free text until it is submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpenseForm {
    /// Id of the expense being edited, `None` when adding.
    pub editing: Option<u64>,
    pub fields: FieldSet,
    /// Amount the current input would produce, or why it cannot be computed.
    pub preview: Option<Result<f64, String>>,
}

impl Default for ExpenseForm {
    fn default() -> Self {
        Self {
            editing: None,
            fields: FieldSet::new(ExpenseField::ALL.len()),
            preview: None,
        }
    }
}

impl ExpenseForm {
    pub fn from_expense(expense: &Expense, project: &Project) -> Self {
        let mut form = Self {
            editing: Some(expense.id),
            ..Self::default()
        };

        let type_text = expense
            .custom_type_id
            .and_then(|id| project.custom_type(id).ok())
            .map(|custom| custom.name.clone())
            .unwrap_or_else(|| expense.expense_type.key().to_string());
        form.set(ExpenseField::Type, type_text);
        form.set(ExpenseField::Name, expense.name.clone());
        form.set(ExpenseField::Formula, expense.formula.clone().unwrap_or_default());
        form.set(ExpenseField::Params, format_params(&expense.params));
        form.set(ExpenseField::Quantity, expense.quantity.map(|q| q.to_string()).unwrap_or_default());
        form.set(ExpenseField::UnitPrice, expense.unit_price.map(|p| p.to_string()).unwrap_or_default());
        if expense.formula.is_none() && (expense.quantity.is_none() || expense.unit_price.is_none()) {
            form.set(ExpenseField::Amount, expense.total_amount.to_string());
        }
        form.set(
            ExpenseField::Date,
            expense.date.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default(),
        );
        form.set(ExpenseField::Notes, expense.notes.clone());
        form
    }

    pub fn value(&self, field: ExpenseField) -> &str {
        self.fields.value(field.index()).trim()
    }

    pub fn set(&mut self, field: ExpenseField, value: impl Into<String>) {
        self.fields.set(field.index(), value);
    }

    pub fn focused_field(&self) -> ExpenseField {
        ExpenseField::ALL
            .get(self.fields.focus)
            .copied()
            .unwrap_or(ExpenseField::Type)
    }

    /// Fills the parameter field with `name=` entries for the chosen formula
    /// when the field is still empty.
    pub fn suggest_params(&mut self, project: &Project) {
        if !self.value(ExpenseField::Params).is_empty() {
            return;
        }
        let Ok(formula) = project.formula(self.value(ExpenseField::Formula)) else {
            return;
        };
        let template = formula
            .parameters
            .iter()
            .map(|p| format!("{}=", p))
            .collect::<Vec<_>>()
            .join(", ");
        self.set(ExpenseField::Params, template);
    }

    /// Decides how the total is computed.
    ///
    /// A manual amount wins, then quantity times unit price, then the chosen
    /// formula with the entered parameters.
    pub fn amount_source(&self) -> Result<AmountSource, String> {
        if let Some(amount) = parse_optional_number(self.value(ExpenseField::Amount), "amount")? {
            return Ok(AmountSource::Manual(amount));
        }

        let quantity = parse_optional_number(self.value(ExpenseField::Quantity), "quantity")?;
        let unit_price = parse_optional_number(self.value(ExpenseField::UnitPrice), "unit price")?;
        if let (Some(quantity), Some(unit_price)) = (quantity, unit_price) {
            return Ok(AmountSource::QuantityTimesPrice { quantity, unit_price });
        }

        let formula = self.value(ExpenseField::Formula);
        if !formula.is_empty() {
            return Ok(AmountSource::Formula {
                name: formula.to_string(),
                bindings: parse_params(self.value(ExpenseField::Params))?,
            });
        }

        Err("enter an amount, a quantity and unit price, or a formula".to_string())
    }

    /// Builds a draft from the fields. `total_amount` is the already computed total.
    ///
    /// The formula key and parameters are kept only when the total came from
    /// the formula.
    pub fn to_draft(&self, project: &Project, total_amount: f64) -> Result<ExpenseDraft, String> {
        let (expense_type, custom_type_id) = resolve_type(self.value(ExpenseField::Type), project)?;
        let (formula, params) = match self.amount_source() {
            Ok(AmountSource::Formula { name, bindings }) => (Some(name), bindings),
            _ => (None, Bindings::new()),
        };

        Ok(ExpenseDraft {
            expense_type,
            custom_type_id,
            name: self.value(ExpenseField::Name).to_string(),
            quantity: parse_optional_number(self.value(ExpenseField::Quantity), "quantity")?,
            unit_price: parse_optional_number(self.value(ExpenseField::UnitPrice), "unit price")?,
            total_amount,
            formula,
            params,
            date: parse_optional_date(self.value(ExpenseField::Date))?,
            notes: self.value(ExpenseField::Notes).to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaField {
    Key,
    DisplayName,
    Expression,
    Parameters,
    Description,
}

impl FormulaField {
    pub const ALL: [FormulaField; 5] = [
        FormulaField::Key,
        FormulaField::DisplayName,
        FormulaField::Expression,
        FormulaField::Parameters,
        FormulaField::Description,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FormulaField::Key => "Key (blank for automatic)",
            FormulaField::DisplayName => "Display name",
            FormulaField::Expression => "Expression",
            FormulaField::Parameters => "Parameters (comma separated)",
            FormulaField::Description => "Description",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormulaForm {
    pub fields: FieldSet,
    /// Result of checking the definition as typed.
    pub check: Option<Result<(), String>>,
}

impl Default for FormulaForm {
    fn default() -> Self {
        Self {
            fields: FieldSet::new(FormulaField::ALL.len()),
            check: None,
        }
    }
}

impl FormulaForm {
    pub fn value(&self, field: FormulaField) -> &str {
        self.fields.value(field as usize).trim()
    }

    pub fn set(&mut self, field: FormulaField, value: impl Into<String>) {
        self.fields.set(field as usize, value);
    }

    pub fn parameters(&self) -> Vec<String> {
        self.value(FormulaField::Parameters)
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn to_formula(&self) -> Formula {
        Formula {
            name: self.value(FormulaField::Key).to_string(),
            display_name: self.value(FormulaField::DisplayName).to_string(),
            expression: self.value(FormulaField::Expression).to_string(),
            parameters: self.parameters(),
            description: self.value(FormulaField::Description).to_string(),
            is_builtin: false,
        }
    }
}

/// Parses `name=value, name=value`. Entries with an empty value are left
/// unbound so the evaluator can report them as missing.
pub fn parse_params(input: &str) -> Result<Bindings, String> {
    let mut bindings = Bindings::new();
    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("'{}' is not of the form name=value", entry))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("'{}' has no parameter name", entry));
        }
        if let Some(value) = parse_optional_number(value, name)? {
            bindings.insert(name.to_string(), value);
        }
    }
    Ok(bindings)
}

pub fn format_params(bindings: &Bindings) -> String {
    bindings
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn parse_optional_number(input: &str, what: &str) -> Result<Option<f64>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    match input.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(format!("{} must be a number, got '{}'", what, input)),
    }
}

pub fn parse_optional_date(input: &str) -> Result<Option<NaiveDate>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(input, DATE_FORMAT)
        .map(Some)
        .map_err(|_| format!("date must look like 2024-01-31, got '{}'", input))
}

/// Custom type names take precedence over the built-in type keys.
pub fn resolve_type(input: &str, project: &Project) -> Result<(ExpenseType, Option<u64>), String> {
    if input.is_empty() {
        return Ok((ExpenseType::Other, None));
    }
    if let Some(custom) = project
        .custom_expense_types
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(input))
    {
        return Ok((ExpenseType::Other, Some(custom.id)));
    }
    ExpenseType::parse(input)
        .map(|t| (t, None))
        .ok_or_else(|| format!("unknown expense type '{}'", input))
}
