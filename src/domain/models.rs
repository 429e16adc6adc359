use std::collections::BTreeMap;
use std::fmt;

use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::errors::{FormulaError, FormulaResult, ProjectError, ProjectResult};

/// Parameter name to value, built fresh for each evaluation.
pub type Bindings = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpenseType {
    Labor,
    Material,
    Equipment,
    #[default]
    Other,
}

impl ExpenseType {
    pub const ALL: [ExpenseType; 4] = [
        ExpenseType::Labor,
        ExpenseType::Material,
        ExpenseType::Equipment,
        ExpenseType::Other,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ExpenseType::Labor => "labor",
            ExpenseType::Material => "material",
            ExpenseType::Equipment => "equipment",
            ExpenseType::Other => "other",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ExpenseType::Labor => "Labor cost",
            ExpenseType::Material => "Material cost",
            ExpenseType::Equipment => "Equipment cost",
            ExpenseType::Other => "Other",
        }
    }

    /// Accepts the key, the display name, or a key prefix, ignoring case.
    pub fn parse(input: &str) -> Option<Self> {
        let needle = input.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|t| {
            t.key() == needle || t.display_name().to_lowercase() == needle || t.key().starts_with(&needle)
        })
    }
}

impl fmt::Display for ExpenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A named arithmetic expression with its declared parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Unique key within a project, e.g. `labor_cost`.
    pub name: String,
    pub display_name: String,
    pub expression: String,
    /// Parameter names in the order they are asked for.
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_builtin: bool,
}

impl Formula {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        expression: impl Into<String>,
        parameters: &[&str],
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            expression: expression.into(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            description: description.into(),
            is_builtin: false,
        }
    }

    /// Label used in lists; custom formulas are marked.
    pub fn label(&self) -> String {
        if self.is_builtin {
            self.display_name.clone()
        } else {
            format!("{} [custom]", self.display_name)
        }
    }
}

/// The formulas every new project starts with.
pub fn builtin_formulas() -> Vec<Formula> {
    [
        Formula::new(
            "labor_cost",
            "Labor cost",
            "hours * hourly_rate",
            &["hours", "hourly_rate"],
            "Labor cost = hours x hourly rate",
        ),
        Formula::new(
            "material_cost",
            "Material cost",
            "quantity * unit_price",
            &["quantity", "unit_price"],
            "Material cost = quantity x unit price",
        ),
        Formula::new(
            "equipment_cost",
            "Equipment cost",
            "usage_time * rate",
            &["usage_time", "rate"],
            "Equipment cost = usage time x rate",
        ),
    ]
    .into_iter()
    .map(|formula| Formula {
        is_builtin: true,
        ..formula
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomExpenseType {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: NaiveDateTime,
}

/// A recorded expense line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: u64,
    pub expense_type: ExpenseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type_id: Option<u64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    pub total_amount: f64,
    /// Key of the formula the amount was computed with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Bindings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    pub created_at: NaiveDateTime,
}

/// The user-editable part of an [`Expense`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExpenseDraft {
    pub expense_type: ExpenseType,
    pub custom_type_id: Option<u64>,
    pub name: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total_amount: f64,
    pub formula: Option<String>,
    pub params: Bindings,
    pub date: Option<NaiveDate>,
    pub notes: String,
}

impl ExpenseDraft {
    fn into_expense(self, id: u64, created_at: NaiveDateTime) -> Expense {
        Expense {
            id,
            expense_type: self.expense_type,
            custom_type_id: self.custom_type_id,
            name: self.name.trim().to_string(),
            quantity: self.quantity,
            unit_price: self.unit_price,
            total_amount: self.total_amount,
            formula: self.formula,
            params: self.params,
            date: self.date,
            notes: self.notes.trim().to_string(),
            created_at,
        }
    }
}

/// How the total amount of an expense is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountSource {
    Manual(f64),
    QuantityTimesPrice { quantity: f64, unit_price: f64 },
    Formula { name: String, bindings: Bindings },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    pub created_date: NaiveDateTime,
    pub last_modified: NaiveDateTime,
    #[serde(default)]
    pub description: String,
}

/// Everything stored in one project file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_info: ProjectInfo,
    #[serde(default)]
    pub custom_expense_types: Vec<CustomExpenseType>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub expenses: Vec<Expense>,
}

impl Project {
    /// Creates an empty project seeded with the built-in formulas.
    pub fn new(name: &str, description: &str) -> Self {
        let now = now();
        Self {
            project_info: ProjectInfo {
                name: name.trim().to_string(),
                created_date: now,
                last_modified: now,
                description: description.trim().to_string(),
            },
            custom_expense_types: Vec::new(),
            formulas: builtin_formulas(),
            expenses: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.project_info.name
    }

    pub fn touch(&mut self) {
        self.project_info.last_modified = now();
    }

    pub fn total_amount(&self) -> f64 {
        self.expenses.iter().map(|e| e.total_amount).sum()
    }

    pub fn add_expense(&mut self, draft: ExpenseDraft) -> ProjectResult<u64> {
        self.check_draft(&draft)?;
        let id = self.expenses.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        self.expenses.push(draft.into_expense(id, now()));
        Ok(id)
    }

    pub fn get_expense(&self, id: u64) -> ProjectResult<&Expense> {
        self.expenses
            .iter()
            .find(|e| e.id == id)
            .ok_or(ProjectError::ExpenseNotFound(id))
    }

    /// Replaces an expense's editable fields, keeping its id and creation time.
    pub fn update_expense(&mut self, id: u64, draft: ExpenseDraft) -> ProjectResult<()> {
        self.check_draft(&draft)?;
        let slot = self
            .expenses
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(ProjectError::ExpenseNotFound(id))?;
        let created_at = slot.created_at;
        *slot = draft.into_expense(id, created_at);
        Ok(())
    }

    pub fn delete_expense(&mut self, id: u64) -> ProjectResult<Expense> {
        let index = self
            .expenses
            .iter()
            .position(|e| e.id == id)
            .ok_or(ProjectError::ExpenseNotFound(id))?;
        Ok(self.expenses.remove(index))
    }

    pub fn add_custom_expense_type(&mut self, name: &str, description: &str) -> ProjectResult<u64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProjectError::InvalidExpense("custom type name is empty".to_string()));
        }
        let id = self.custom_expense_types.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        self.custom_expense_types.push(CustomExpenseType {
            id,
            name: name.to_string(),
            description: description.trim().to_string(),
            created_at: now(),
        });
        Ok(id)
    }

    pub fn custom_type(&self, id: u64) -> ProjectResult<&CustomExpenseType> {
        self.custom_expense_types
            .iter()
            .find(|t| t.id == id)
            .ok_or(ProjectError::CustomTypeNotFound(id))
    }

    /// Looks a formula up by key.
    pub fn formula(&self, name: &str) -> FormulaResult<&Formula> {
        self.formulas
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| FormulaError::FormulaNotFound(name.to_string()))
    }

    /// Stores a user formula. An empty key is replaced with `custom_<n>`.
    /// Returns the key the formula was stored under.
    pub fn add_custom_formula(&mut self, mut formula: Formula) -> ProjectResult<String> {
        formula.name = formula.name.trim().to_string();
        if formula.name.is_empty() {
            formula.name = self.next_custom_formula_key();
        }
        if self.formulas.iter().any(|f| f.name == formula.name) {
            return Err(ProjectError::DuplicateFormula(formula.name));
        }
        if formula.display_name.trim().is_empty() {
            formula.display_name = formula.name.clone();
        }
        formula.is_builtin = false;

        let key = formula.name.clone();
        self.formulas.push(formula);
        Ok(key)
    }

    /// Removes a custom formula. Built-in formulas and formulas that an
    /// expense still refers to cannot be removed.
    pub fn remove_custom_formula(&mut self, name: &str) -> ProjectResult<Formula> {
        let index = self
            .formulas
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| FormulaError::FormulaNotFound(name.to_string()))?;
        if self.formulas[index].is_builtin {
            return Err(ProjectError::BuiltinFormula(name.to_string()));
        }
        let expense_ids: Vec<u64> = self
            .expenses
            .iter()
            .filter(|e| e.formula.as_deref() == Some(name))
            .map(|e| e.id)
            .collect();
        if !expense_ids.is_empty() {
            return Err(ProjectError::FormulaInUse {
                name: name.to_string(),
                expense_ids,
            });
        }
        Ok(self.formulas.remove(index))
    }

    fn next_custom_formula_key(&self) -> String {
        (1..)
            .map(|n| format!("custom_{}", n))
            .find(|key| self.formulas.iter().all(|f| &f.name != key))
            .unwrap_or_default()
    }

    fn check_draft(&self, draft: &ExpenseDraft) -> ProjectResult<()> {
        if draft.name.trim().is_empty() {
            return Err(ProjectError::InvalidExpense("name is required".to_string()));
        }
        if !draft.total_amount.is_finite() {
            return Err(ProjectError::InvalidExpense("total amount is not a number".to_string()));
        }
        if let Some(id) = draft.custom_type_id {
            self.custom_type(id)?;
        }
        if let Some(name) = &draft.formula {
            self.formula(name)?;
        }
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}
