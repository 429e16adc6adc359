//! Summary statistics over a project's expenses.

use chrono::NaiveDate;
use serde::Serialize;

use super::models::{CustomExpenseType, Expense, ExpenseType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeTotal {
    pub label: String,
    pub count: usize,
    pub total_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseStatistics {
    pub total_count: usize,
    pub grand_total: f64,
    pub average_amount: f64,
    pub max_amount: Option<f64>,
    pub min_amount: Option<f64>,
    /// Earliest and latest expense date, counting only dated expenses.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    pub by_type: Vec<TypeTotal>,
    pub by_custom_type: Vec<TypeTotal>,
}

impl ExpenseStatistics {
    /// Aggregates `expenses`. Custom type totals only include expenses whose
    /// `custom_type_id` names one of `custom_types`.
    pub fn compute<'a, I>(expenses: I, custom_types: &[CustomExpenseType]) -> Self
    where
        I: IntoIterator<Item = &'a Expense>,
    {
        let expenses: Vec<&Expense> = expenses.into_iter().collect();
        let total_count = expenses.len();
        let grand_total: f64 = expenses.iter().map(|e| e.total_amount).sum();
        let average_amount = if total_count > 0 {
            grand_total / total_count as f64
        } else {
            0.0
        };

        let amounts = expenses.iter().map(|e| e.total_amount);
        let max_amount = amounts.clone().reduce(f64::max);
        let min_amount = amounts.reduce(f64::min);

        let mut dates = expenses.iter().filter_map(|e| e.date);
        let date_range = dates.next().map(|first| {
            dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d)))
        });

        let by_type = ExpenseType::ALL
            .into_iter()
            .filter_map(|expense_type| {
                let matching: Vec<&&Expense> =
                    expenses.iter().filter(|e| e.expense_type == expense_type).collect();
                (!matching.is_empty()).then(|| TypeTotal {
                    label: expense_type.display_name().to_string(),
                    count: matching.len(),
                    total_amount: matching.iter().map(|e| e.total_amount).sum(),
                })
            })
            .collect();

        let by_custom_type = custom_types
            .iter()
            .filter_map(|custom| {
                let matching: Vec<&&Expense> = expenses
                    .iter()
                    .filter(|e| e.custom_type_id == Some(custom.id))
                    .collect();
                (!matching.is_empty()).then(|| TypeTotal {
                    label: custom.name.clone(),
                    count: matching.len(),
                    total_amount: matching.iter().map(|e| e.total_amount).sum(),
                })
            })
            .collect();

        Self {
            total_count,
            grand_total,
            average_amount,
            max_amount,
            min_amount,
            date_range,
            by_type,
            by_custom_type,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExpenseDraft, Project};
    use pretty_assertions::assert_eq;

    fn sample_project() -> Project {
        let mut project = Project::new("p", "");
        let tooling = project.add_custom_expense_type("Tooling", "").unwrap();

        let rows = [
            (ExpenseType::Labor, 8000.0, Some("2024-03-02"), None),
            (ExpenseType::Material, 500.0, Some("2024-01-15"), Some(tooling)),
            (ExpenseType::Labor, 1000.0, None, None),
            (ExpenseType::Equipment, 37.5, Some("2024-02-01"), Some(tooling)),
        ];
        for (index, (expense_type, amount, date, custom)) in rows.into_iter().enumerate() {
            project
                .add_expense(ExpenseDraft {
                    expense_type,
                    name: format!("item {index}"),
                    total_amount: amount,
                    date: date.map(|d| d.parse().unwrap()),
                    custom_type_id: custom,
                    ..ExpenseDraft::default()
                })
                .unwrap();
        }
        project
    }

    #[test]
    fn test_empty_statistics() {
        let stats = ExpenseStatistics::compute(&Vec::<Expense>::new(), &[]);
        assert!(stats.is_empty());
        assert_eq!(stats.grand_total, 0.0);
        assert_eq!(stats.average_amount, 0.0);
        assert_eq!(stats.max_amount, None);
        assert_eq!(stats.date_range, None);
        assert!(stats.by_type.is_empty());
    }

    #[test]
    fn test_overall_statistics() {
        let project = sample_project();
        let stats = ExpenseStatistics::compute(&project.expenses, &project.custom_expense_types);

        assert_eq!(stats.total_count, 4);
        assert_eq!(stats.grand_total, 9537.5);
        assert_eq!(stats.average_amount, 9537.5 / 4.0);
        assert_eq!(stats.max_amount, Some(8000.0));
        assert_eq!(stats.min_amount, Some(37.5));
        assert_eq!(
            stats.date_range,
            Some(("2024-01-15".parse().unwrap(), "2024-03-02".parse().unwrap()))
        );
    }

    #[test]
    fn test_grouped_statistics() {
        let project = sample_project();
        let stats = ExpenseStatistics::compute(&project.expenses, &project.custom_expense_types);

        assert_eq!(
            stats.by_type,
            vec![
                TypeTotal { label: "Labor cost".to_string(), count: 2, total_amount: 9000.0 },
                TypeTotal { label: "Material cost".to_string(), count: 1, total_amount: 500.0 },
                TypeTotal { label: "Equipment cost".to_string(), count: 1, total_amount: 37.5 },
            ]
        );
        assert_eq!(
            stats.by_custom_type,
            vec![TypeTotal { label: "Tooling".to_string(), count: 2, total_amount: 537.5 }]
        );
    }
}
