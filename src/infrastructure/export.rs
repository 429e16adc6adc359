use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::info;

use crate::domain::{Expense, ExpenseStatistics, ExpenseType, Project};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no expenses match the export filter")]
    NoRows,
}

pub type Result<T> = std::result::Result<T, ExportError>;

const HEADERS: [&str; 9] = [
    "ID",
    "Date",
    "Type",
    "Name",
    "Quantity",
    "Unit Price",
    "Total Amount",
    "Notes",
    "Created At",
];

/// Restricts which expenses are exported. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportFilter {
    pub expense_type: Option<ExpenseType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ExportFilter {
    /// Date bounds are inclusive. Undated expenses never match a date bound.
    pub fn matches(&self, expense: &Expense) -> bool {
        if self.expense_type.is_some_and(|t| t != expense.expense_type) {
            return false;
        }
        if self.start_date.is_none() && self.end_date.is_none() {
            return true;
        }
        match expense.date {
            Some(date) => {
                self.start_date.is_none_or(|start| date >= start)
                    && self.end_date.is_none_or(|end| date <= end)
            }
            None => false,
        }
    }
}

/// Files written by one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub csv_path: PathBuf,
    pub summary_path: PathBuf,
    pub row_count: usize,
}

/// Writes expenses as CSV with a plain-text summary beside it.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    exports_dir: PathBuf,
    decimal_places: usize,
}

impl CsvExporter {
    pub fn new(exports_dir: impl Into<PathBuf>, decimal_places: usize) -> Self {
        Self {
            exports_dir: exports_dir.into(),
            decimal_places,
        }
    }

    pub fn default_file_name(at: NaiveDateTime) -> String {
        format!("expenses_export_{}.csv", at.format("%Y%m%d_%H%M%S"))
    }

    /// Resolves a user-entered name against the exports directory, adding a
    /// `.csv` extension when missing. An empty name gets a timestamped default.
    pub fn target_path(&self, file_name: &str) -> PathBuf {
        let file_name = file_name.trim();
        let file_name = if file_name.is_empty() {
            Self::default_file_name(Local::now().naive_local())
        } else if file_name.to_lowercase().ends_with(".csv") {
            file_name.to_string()
        } else {
            format!("{}.csv", file_name)
        };
        self.exports_dir.join(file_name)
    }

    /// Exports the project's expenses that pass `filter`.
    pub fn export(&self, project: &Project, filter: &ExportFilter, file_name: &str) -> Result<ExportReport> {
        let rows: Vec<&Expense> = project.expenses.iter().filter(|e| filter.matches(e)).collect();
        if rows.is_empty() {
            return Err(ExportError::NoRows);
        }

        let csv_path = self.target_path(file_name);
        if let Some(parent) = csv_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(&csv_path)?;
        writer.write_record(HEADERS)?;
        for expense in &rows {
            writer.write_record(self.record(project, expense))?;
        }
        writer.flush()?;

        let stats = ExpenseStatistics::compute(rows.iter().copied(), &project.custom_expense_types);
        let summary_path = summary_path_for(&csv_path);
        fs::write(
            &summary_path,
            self.render_summary(project.name(), &stats, Local::now().naive_local()),
        )?;

        info!(
            project = project.name(),
            rows = rows.len(),
            path = %csv_path.display(),
            "exported expenses"
        );
        Ok(ExportReport {
            csv_path,
            summary_path,
            row_count: rows.len(),
        })
    }

    fn record(&self, project: &Project, expense: &Expense) -> Vec<String> {
        let type_label = expense
            .custom_type_id
            .and_then(|id| project.custom_type(id).ok())
            .map(|custom| custom.name.clone())
            .unwrap_or_else(|| expense.expense_type.display_name().to_string());

        vec![
            expense.id.to_string(),
            expense.date.map(|d| d.to_string()).unwrap_or_default(),
            type_label,
            expense.name.clone(),
            expense.quantity.map(|q| q.to_string()).unwrap_or_default(),
            expense.unit_price.map(|p| self.amount(p)).unwrap_or_default(),
            self.amount(expense.total_amount),
            expense.notes.clone(),
            expense.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }

    fn amount(&self, value: f64) -> String {
        format!("{:.*}", self.decimal_places, value)
    }

    fn render_summary(&self, project_name: &str, stats: &ExpenseStatistics, exported_at: NaiveDateTime) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Expense summary: {}", project_name);
        let _ = writeln!(out, "Exported at: {}", exported_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out);
        let _ = writeln!(out, "Expenses: {}", stats.total_count);
        let _ = writeln!(out, "Total amount: {}", self.amount(stats.grand_total));
        let _ = writeln!(out, "Average amount: {}", self.amount(stats.average_amount));
        if let (Some(max), Some(min)) = (stats.max_amount, stats.min_amount) {
            let _ = writeln!(out, "Largest expense: {}", self.amount(max));
            let _ = writeln!(out, "Smallest expense: {}", self.amount(min));
        }
        if let Some((first, last)) = stats.date_range {
            let _ = writeln!(out, "Date range: {} to {}", first, last);
        }

        let groups = [("By type", &stats.by_type), ("By custom type", &stats.by_custom_type)];
        for (title, totals) in groups {
            if totals.is_empty() {
                continue;
            }
            let _ = writeln!(out);
            let _ = writeln!(out, "{}:", title);
            for total in totals.iter() {
                let _ = writeln!(
                    out,
                    "  {}: {} expenses, {}",
                    total.label,
                    total.count,
                    self.amount(total.total_amount)
                );
            }
        }
        out
    }
}

/// `report.csv` -> `report_stats.txt` in the same directory.
fn summary_path_for(csv_path: &Path) -> PathBuf {
    let stem = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "expenses".to_string());
    csv_path.with_file_name(format!("{}_stats.txt", stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExpenseDraft;
    use pretty_assertions::assert_eq;

    fn sample_project() -> Project {
        let mut project = Project::new("Workshop", "");
        let rows = [
            (ExpenseType::Labor, "install", 8000.0, Some("2024-03-02")),
            (ExpenseType::Material, "bolts, m8", 500.0, Some("2024-01-15")),
            (ExpenseType::Material, "paint", 75.25, None),
        ];
        for (expense_type, name, amount, date) in rows {
            project
                .add_expense(ExpenseDraft {
                    expense_type,
                    name: name.to_string(),
                    total_amount: amount,
                    date: date.map(|d| d.parse().unwrap()),
                    ..ExpenseDraft::default()
                })
                .unwrap();
        }
        project
    }

    #[test]
    fn test_default_file_name() {
        let at = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(CsvExporter::default_file_name(at), "expenses_export_20240506_070809.csv");
    }

    #[test]
    fn test_target_path_adds_extension() {
        let exporter = CsvExporter::new("out", 2);
        assert_eq!(exporter.target_path("report"), PathBuf::from("out/report.csv"));
        assert_eq!(exporter.target_path("report.CSV"), PathBuf::from("out/report.CSV"));
        let generated = exporter.target_path("  ");
        assert!(generated.to_string_lossy().contains("expenses_export_"));
    }

    #[test]
    fn test_filter_matches() {
        let project = sample_project();
        let filter = ExportFilter {
            expense_type: Some(ExpenseType::Material),
            ..ExportFilter::default()
        };
        let names: Vec<&str> = project
            .expenses
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["bolts, m8", "paint"]);

        let dated = ExportFilter {
            start_date: Some("2024-02-01".parse().unwrap()),
            ..ExportFilter::default()
        };
        let names: Vec<&str> = project
            .expenses
            .iter()
            .filter(|e| dated.matches(e))
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["install"]);
    }

    #[test]
    fn test_export_writes_csv_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path().join("exports"), 2);
        let project = sample_project();

        let report = exporter.export(&project, &ExportFilter::default(), "all").unwrap();
        assert_eq!(report.row_count, 3);
        assert_eq!(report.summary_path, dir.path().join("exports").join("all_stats.txt"));

        let mut reader = csv::Reader::from_path(&report.csv_path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, HEADERS.to_vec());

        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(&records[0][2], "Labor cost");
        assert_eq!(&records[1][3], "bolts, m8");
        assert_eq!(&records[2][1], "");
        assert_eq!(&records[2][6], "75.25");

        let summary = fs::read_to_string(&report.summary_path).unwrap();
        assert!(summary.contains("Expenses: 3"));
        assert!(summary.contains("Total amount: 8575.25"));
        assert!(summary.contains("Date range: 2024-01-15 to 2024-03-02"));
        assert!(summary.contains("Material cost: 2 expenses, 575.25"));
    }

    #[test]
    fn test_export_without_rows_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = CsvExporter::new(dir.path(), 2);
        let filter = ExportFilter {
            expense_type: Some(ExpenseType::Equipment),
            ..ExportFilter::default()
        };
        assert!(matches!(
            exporter.export(&sample_project(), &filter, "none"),
            Err(ExportError::NoRows)
        ));
        assert!(!dir.path().join("none.csv").exists());
    }
}
