//! Application state management for the expense tracker.
//!
//! [`App`] owns the open project and everything the terminal UI shows. The
//! [`FormulaEvaluator`] is handed in by the caller and used for every amount
//! the forms compute.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::forms::{
    parse_optional_date, ExpenseField, ExpenseForm, FieldSet, FormulaField, FormulaForm, TextInput,
};
use crate::config::AppConfig;
use crate::domain::{ExpenseStatistics, ExpenseType, FormulaEvaluator, Project};
use crate::infrastructure::{
    sanitize_filename, CsvExporter, ExportFilter, ProjectRepository, ProjectSummary, StorageError,
};

/// Represents the current mode of the application.
///
/// The mode decides how key presses are interpreted and which screen or
/// popup is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// Project picker
    Projects,
    /// Single-line prompt, see [`PromptKind`]
    Prompt(PromptKind),
    /// Expense table of the open project
    Expenses,
    ExpenseForm,
    Formulas,
    FormulaForm,
    Statistics,
    ExportCsv,
    /// Waiting for y/n on [`App::pending_delete`]
    ConfirmDelete,
    /// An import collides with [`App::pending_import`]: overwrite, rename or cancel
    ConfirmOverwrite,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    NewProject,
    RenameProject,
    NewCustomType,
    ImportProject,
    ExportProject,
    /// New name for a project file whose name is already taken
    ImportAs,
}

impl PromptKind {
    pub fn title(self) -> &'static str {
        match self {
            PromptKind::NewProject => "New project name",
            PromptKind::RenameProject => "Rename project to",
            PromptKind::NewCustomType => "New custom expense type",
            PromptKind::ImportProject => "Import project from file",
            PromptKind::ExportProject => "Export project to file",
            PromptKind::ImportAs => "Import under the name",
        }
    }
}

/// Something the user asked to delete and has not confirmed yet.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteTarget {
    Project(String),
    Expense(u64),
    Formula(String),
}

/// A project file waiting for the user to decide how to import it.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImport {
    pub source: PathBuf,
    /// Name stored in the file, already used by another project
    pub name: String,
}

/// Export prompt fields, in display order.
pub const EXPORT_FIELDS: [&str; 4] = ["File name", "Type (blank for all)", "From date", "To date"];

/// Main application state.
///
/// # Examples
///
/// ```
/// use costbook::application::{App, AppMode};
/// use costbook::config::AppConfig;
/// use costbook::domain::FormulaEvaluator;
///
/// let app = App::new(AppConfig::default(), FormulaEvaluator::new());
/// assert_eq!(app.mode, AppMode::Projects);
/// assert!(app.project.is_none());
/// ```
pub struct App {
    pub config: AppConfig,
    pub evaluator: FormulaEvaluator,
    pub repository: ProjectRepository,
    pub exporter: CsvExporter,
    pub mode: AppMode,
    /// Mode to return to when help or a delete confirmation closes
    pub previous_mode: AppMode,
    pub projects: Vec<ProjectSummary>,
    pub selected_project: usize,
    /// The open project, saved after every change
    pub project: Option<Project>,
    pub selected_expense: usize,
    pub selected_formula: usize,
    pub expense_form: ExpenseForm,
    pub formula_form: FormulaForm,
    pub prompt: TextInput,
    pub export_fields: FieldSet,
    pub pending_delete: Option<DeleteTarget>,
    pub pending_import: Option<PendingImport>,
    pub help_scroll: usize,
    /// Temporary status message to display
    pub status_message: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(config: AppConfig, evaluator: FormulaEvaluator) -> Self {
        let repository = ProjectRepository::new(config.projects_dir.clone());
        let exporter = CsvExporter::new(config.exports_dir.clone(), config.decimal_places);
        Self {
            config,
            evaluator,
            repository,
            exporter,
            mode: AppMode::Projects,
            previous_mode: AppMode::Projects,
            projects: Vec::new(),
            selected_project: 0,
            project: None,
            selected_expense: 0,
            selected_formula: 0,
            expense_form: ExpenseForm::default(),
            formula_form: FormulaForm::default(),
            prompt: TextInput::default(),
            export_fields: FieldSet::new(EXPORT_FIELDS.len()),
            pending_delete: None,
            pending_import: None,
            help_scroll: 0,
            status_message: None,
            should_quit: false,
        }
    }

    /// Reloads the project list from disk.
    pub fn refresh_projects(&mut self) {
        match self.repository.list_projects() {
            Ok(projects) => {
                self.projects = projects;
                self.selected_project = clamp_index(self.selected_project, self.projects.len());
            }
            Err(e) => self.status_message = Some(format!("Could not list projects: {}", e)),
        }
    }

    pub fn select_next(&mut self) {
        match self.mode {
            AppMode::Projects => {
                self.selected_project = step(self.selected_project, self.projects.len(), 1);
            }
            AppMode::Expenses => {
                self.selected_expense = step(self.selected_expense, self.expense_count(), 1);
            }
            AppMode::Formulas => {
                self.selected_formula = step(self.selected_formula, self.formula_count(), 1);
            }
            _ => {}
        }
    }

    pub fn select_previous(&mut self) {
        match self.mode {
            AppMode::Projects => {
                self.selected_project = step(self.selected_project, self.projects.len(), -1);
            }
            AppMode::Expenses => {
                self.selected_expense = step(self.selected_expense, self.expense_count(), -1);
            }
            AppMode::Formulas => {
                self.selected_formula = step(self.selected_formula, self.formula_count(), -1);
            }
            _ => {}
        }
    }

    pub fn show_help(&mut self) {
        if self.mode != AppMode::Help {
            self.previous_mode = self.mode;
        }
        self.mode = AppMode::Help;
        self.help_scroll = 0;
    }

    pub fn close_help(&mut self) {
        self.mode = self.previous_mode;
    }

    // Projects

    pub fn start_prompt(&mut self, kind: PromptKind) {
        self.prompt = match kind {
            PromptKind::RenameProject => self
                .projects
                .get(self.selected_project)
                .map(|p| TextInput::with_value(p.name.clone()))
                .unwrap_or_default(),
            PromptKind::ExportProject => self
                .projects
                .get(self.selected_project)
                .map(|p| TextInput::with_value(self.default_backup_path(&p.name).display().to_string()))
                .unwrap_or_default(),
            PromptKind::ImportAs => self
                .pending_import
                .as_ref()
                .map(|pending| TextInput::with_value(format!("{}_imported", pending.name)))
                .unwrap_or_default(),
            _ => TextInput::default(),
        };
        self.mode = AppMode::Prompt(kind);
        self.status_message = None;
    }

    pub fn cancel_prompt(&mut self) {
        self.prompt.clear();
        self.pending_import = None;
        self.mode = if self.project.is_some() {
            AppMode::Expenses
        } else {
            AppMode::Projects
        };
    }

    pub fn finish_prompt(&mut self) {
        let AppMode::Prompt(kind) = self.mode else {
            return;
        };
        let text = self.prompt.as_str().trim().to_string();
        if text.is_empty() {
            self.status_message = Some("Name cannot be empty".to_string());
            return;
        }

        match kind {
            PromptKind::NewProject => match self.repository.create(&text, "") {
                Ok(project) => {
                    self.status_message = Some(format!("Created project {}", project.name()));
                    self.enter_project(project);
                }
                Err(e) => self.status_message = Some(format!("Create failed: {}", e)),
            },
            PromptKind::RenameProject => {
                let Some(old) = self.projects.get(self.selected_project).map(|p| p.name.clone()) else {
                    return;
                };
                match self.repository.rename(&old, &text) {
                    Ok(project) => {
                        self.status_message = Some(format!("Renamed {} to {}", old, project.name()));
                        self.mode = AppMode::Projects;
                        self.refresh_projects();
                    }
                    Err(e) => self.status_message = Some(format!("Rename failed: {}", e)),
                }
            }
            PromptKind::ImportProject => self.import_from(PathBuf::from(&text)),
            PromptKind::ExportProject => {
                let Some(name) = self.projects.get(self.selected_project).map(|p| p.name.clone()) else {
                    return;
                };
                match self.repository.export_project(&name, Path::new(&text)) {
                    Ok(path) => {
                        self.status_message = Some(format!("Exported {} to {}", name, path.display()));
                        self.mode = AppMode::Projects;
                    }
                    Err(e) => self.status_message = Some(format!("Export failed: {}", e)),
                }
            }
            PromptKind::ImportAs => {
                let Some(pending) = self.pending_import.clone() else {
                    return;
                };
                match self.repository.import_project_as(&pending.source, &text) {
                    Ok(project) => {
                        self.pending_import = None;
                        self.finish_import(&project);
                    }
                    Err(e) => self.status_message = Some(format!("Import failed: {}", e)),
                }
            }
            PromptKind::NewCustomType => {
                let Some(project) = self.project.as_mut() else {
                    return;
                };
                match project.add_custom_expense_type(&text, "") {
                    Ok(_) => {
                        self.status_message = Some(format!("Added expense type {}", text));
                        self.mode = AppMode::Expenses;
                        self.persist();
                    }
                    Err(e) => self.status_message = Some(e.to_string()),
                }
            }
        }
        self.prompt.clear();
    }

    fn import_from(&mut self, source: PathBuf) {
        match self.repository.import_project(&source, false) {
            Ok(project) => self.finish_import(&project),
            Err(StorageError::ProjectExists(name)) => {
                self.status_message = Some(format!("Project '{}' already exists", name));
                self.pending_import = Some(PendingImport { source, name });
                self.mode = AppMode::ConfirmOverwrite;
            }
            Err(e) => self.status_message = Some(format!("Import failed: {}", e)),
        }
    }

    fn finish_import(&mut self, project: &Project) {
        self.status_message = Some(format!("Imported project {}", project.name()));
        self.mode = AppMode::Projects;
        self.refresh_projects();
        if let Some(index) = self.projects.iter().position(|p| p.name == project.name()) {
            self.selected_project = index;
        }
    }

    /// Replaces the existing project with the pending import.
    pub fn overwrite_import(&mut self) {
        let Some(pending) = self.pending_import.take() else {
            return;
        };
        match self.repository.import_project(&pending.source, true) {
            Ok(project) => self.finish_import(&project),
            Err(e) => {
                self.status_message = Some(format!("Import failed: {}", e));
                self.mode = AppMode::Projects;
            }
        }
    }

    /// Asks for another name for the pending import.
    pub fn rename_import(&mut self) {
        if self.pending_import.is_some() {
            self.start_prompt(PromptKind::ImportAs);
        }
    }

    pub fn cancel_import(&mut self) {
        self.pending_import = None;
        self.mode = AppMode::Projects;
        self.status_message = Some("Import cancelled".to_string());
    }

    fn default_backup_path(&self, name: &str) -> PathBuf {
        self.config
            .exports_dir
            .join(format!("{}_backup.json", sanitize_filename(name)))
    }

    pub fn open_selected_project(&mut self) {
        let Some(name) = self.projects.get(self.selected_project).map(|p| p.name.clone()) else {
            return;
        };
        match self.repository.open(&name) {
            Ok(project) => {
                self.status_message = Some(format!("Opened {}", project.name()));
                self.enter_project(project);
            }
            Err(e) => self.status_message = Some(format!("Open failed: {}", e)),
        }
    }

    pub fn close_project(&mut self) {
        self.persist();
        self.project = None;
        self.mode = AppMode::Projects;
        self.refresh_projects();
    }

    fn enter_project(&mut self, project: Project) {
        self.project = Some(project);
        self.selected_expense = 0;
        self.selected_formula = 0;
        self.mode = AppMode::Expenses;
    }

    /// Saves the open project, reporting failures in the status bar.
    pub fn persist(&mut self) -> bool {
        let Some(project) = self.project.as_mut() else {
            return false;
        };
        match self.repository.save(project) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "saving project failed");
                self.status_message = Some(format!("Save failed: {}", e));
                false
            }
        }
    }

    // Deletion

    pub fn request_delete(&mut self) {
        let target = match self.mode {
            AppMode::Projects => self
                .projects
                .get(self.selected_project)
                .map(|p| DeleteTarget::Project(p.name.clone())),
            AppMode::Expenses => self
                .project
                .as_ref()
                .and_then(|p| p.expenses.get(self.selected_expense))
                .map(|e| DeleteTarget::Expense(e.id)),
            AppMode::Formulas => match self.project.as_ref().and_then(|p| p.formulas.get(self.selected_formula)) {
                Some(formula) if formula.is_builtin => {
                    self.status_message = Some("Built-in formulas cannot be deleted".to_string());
                    None
                }
                Some(formula) => Some(DeleteTarget::Formula(formula.name.clone())),
                None => None,
            },
            _ => None,
        };

        if let Some(target) = target {
            self.previous_mode = self.mode;
            self.pending_delete = Some(target);
            self.mode = AppMode::ConfirmDelete;
        }
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
        self.mode = self.previous_mode;
    }

    pub fn confirm_delete(&mut self) {
        let Some(target) = self.pending_delete.take() else {
            return;
        };
        self.mode = self.previous_mode;

        let result = match &target {
            DeleteTarget::Project(name) => self.repository.delete(name).map_err(|e| e.to_string()),
            DeleteTarget::Expense(id) => match self.project.as_mut() {
                Some(project) => project.delete_expense(*id).map(|_| ()).map_err(|e| e.to_string()),
                None => Ok(()),
            },
            DeleteTarget::Formula(name) => match self.project.as_mut() {
                Some(project) => project.remove_custom_formula(name).map(|_| ()).map_err(|e| e.to_string()),
                None => Ok(()),
            },
        };

        match result {
            Ok(()) => {
                self.status_message = Some("Deleted".to_string());
                match target {
                    DeleteTarget::Project(_) => self.refresh_projects(),
                    _ => {
                        self.persist();
                        self.selected_expense = clamp_index(self.selected_expense, self.expense_count());
                        self.selected_formula = clamp_index(self.selected_formula, self.formula_count());
                    }
                }
            }
            Err(e) => self.status_message = Some(format!("Delete failed: {}", e)),
        }
    }

    // Expenses

    pub fn start_add_expense(&mut self) {
        if self.project.is_none() {
            return;
        }
        self.expense_form = ExpenseForm::default();
        self.mode = AppMode::ExpenseForm;
        self.status_message = None;
        self.update_expense_preview();
    }

    pub fn start_edit_expense(&mut self) {
        let Some(project) = self.project.as_ref() else {
            return;
        };
        let Some(expense) = project.expenses.get(self.selected_expense) else {
            return;
        };
        self.expense_form = ExpenseForm::from_expense(expense, project);
        self.mode = AppMode::ExpenseForm;
        self.status_message = None;
        self.update_expense_preview();
    }

    /// Moves focus in the expense form. Leaving the formula field fills in
    /// an empty parameter list for the chosen formula.
    pub fn expense_form_focus(&mut self, forward: bool) {
        if self.expense_form.focused_field() == ExpenseField::Formula {
            if let Some(project) = self.project.as_ref() {
                self.expense_form.suggest_params(project);
            }
        }
        if forward {
            self.expense_form.fields.next();
        } else {
            self.expense_form.fields.previous();
        }
        self.update_expense_preview();
    }

    /// Recomputes the amount shown while the form is edited.
    pub fn update_expense_preview(&mut self) {
        let Some(project) = self.project.as_ref() else {
            self.expense_form.preview = None;
            return;
        };
        let preview = self.expense_form.amount_source().and_then(|source| {
            self.evaluator
                .calculate_amount(project, &source)
                .map_err(|e| e.to_string())
        });
        self.expense_form.preview = Some(preview);
    }

    pub fn finish_expense_form(&mut self) {
        let Some(project) = self.project.as_mut() else {
            return;
        };
        let result = self
            .expense_form
            .amount_source()
            .and_then(|source| {
                self.evaluator
                    .calculate_amount(project, &source)
                    .map_err(|e| e.to_string())
            })
            .and_then(|total| self.expense_form.to_draft(project, total))
            .and_then(|draft| match self.expense_form.editing {
                Some(id) => project.update_expense(id, draft).map(|_| id).map_err(|e| e.to_string()),
                None => project.add_expense(draft).map_err(|e| e.to_string()),
            });

        match result {
            Ok(id) => {
                info!(expense = id, "expense stored");
                if let Some(index) = project.expenses.iter().position(|e| e.id == id) {
                    self.selected_expense = index;
                }
                self.status_message = Some("Expense saved".to_string());
                self.mode = AppMode::Expenses;
                self.persist();
            }
            Err(e) => self.status_message = Some(e),
        }
    }

    pub fn cancel_form(&mut self) {
        self.mode = AppMode::Expenses;
        self.status_message = None;
    }

    pub fn expense_count(&self) -> usize {
        self.project.as_ref().map(|p| p.expenses.len()).unwrap_or(0)
    }

    pub fn statistics(&self) -> Option<ExpenseStatistics> {
        self.project
            .as_ref()
            .map(|p| ExpenseStatistics::compute(&p.expenses, &p.custom_expense_types))
    }

    pub fn show_statistics(&mut self) {
        if self.project.is_some() {
            self.mode = AppMode::Statistics;
        }
    }

    // Formulas

    pub fn show_formulas(&mut self) {
        if self.project.is_some() {
            self.selected_formula = clamp_index(self.selected_formula, self.formula_count());
            self.mode = AppMode::Formulas;
        }
    }

    pub fn formula_count(&self) -> usize {
        self.project.as_ref().map(|p| p.formulas.len()).unwrap_or(0)
    }

    pub fn start_add_formula(&mut self) {
        self.formula_form = FormulaForm::default();
        self.mode = AppMode::FormulaForm;
        self.status_message = None;
    }

    /// Checks the formula as typed so the form can show problems early.
    pub fn update_formula_check(&mut self) {
        let form = &self.formula_form;
        if form.value(FormulaField::Expression).is_empty() {
            self.formula_form.check = None;
            return;
        }
        let check = self
            .evaluator
            .validate_formula_expression(form.value(FormulaField::Expression), &form.parameters())
            .map_err(|e| e.to_string());
        self.formula_form.check = Some(check);
    }

    pub fn finish_formula_form(&mut self) {
        let Some(project) = self.project.as_mut() else {
            return;
        };
        let formula = self.formula_form.to_formula();
        let result = self
            .evaluator
            .validate_formula_expression(&formula.expression, &formula.parameters)
            .map_err(|e| e.to_string())
            .and_then(|_| project.add_custom_formula(formula).map_err(|e| e.to_string()));

        match result {
            Ok(key) => {
                info!(formula = %key, "custom formula added");
                self.selected_formula = project.formulas.len().saturating_sub(1);
                self.status_message = Some(format!("Added formula {}", key));
                self.mode = AppMode::Formulas;
                self.persist();
            }
            Err(e) => self.status_message = Some(e),
        }
    }

    pub fn cancel_formula_form(&mut self) {
        self.mode = AppMode::Formulas;
        self.status_message = None;
    }

    // Export

    pub fn start_csv_export(&mut self) {
        if self.project.is_none() {
            return;
        }
        self.export_fields = FieldSet::new(EXPORT_FIELDS.len());
        self.mode = AppMode::ExportCsv;
        self.status_message = None;
    }

    pub fn export_filter(&self) -> Result<ExportFilter, String> {
        let type_text = self.export_fields.value(1).trim();
        let expense_type = if type_text.is_empty() {
            None
        } else {
            Some(ExpenseType::parse(type_text).ok_or_else(|| format!("unknown expense type '{}'", type_text))?)
        };
        Ok(ExportFilter {
            expense_type,
            start_date: parse_optional_date(self.export_fields.value(2))?,
            end_date: parse_optional_date(self.export_fields.value(3))?,
        })
    }

    pub fn finish_csv_export(&mut self) {
        let Some(project) = self.project.as_ref() else {
            return;
        };
        let result = self.export_filter().and_then(|filter| {
            self.exporter
                .export(project, &filter, self.export_fields.value(0))
                .map_err(|e| e.to_string())
        });

        match result {
            Ok(report) => {
                self.status_message = Some(format!(
                    "Exported {} expenses to {}",
                    report.row_count,
                    report.csv_path.display()
                ));
                self.mode = AppMode::Expenses;
            }
            Err(e) => self.status_message = Some(format!("Export failed: {}", e)),
        }
    }

    pub fn format_amount(&self, amount: f64) -> String {
        self.config.format_amount(amount)
    }
}

fn clamp_index(index: usize, len: usize) -> usize {
    index.min(len.saturating_sub(1))
}

fn step(index: usize, len: usize, delta: isize) -> usize {
    if len == 0 {
        return 0;
    }
    index.saturating_add_signed(delta).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn test_app() -> (TempDir, App) {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            projects_dir: dir.path().join("projects"),
            exports_dir: dir.path().join("exports"),
            ..AppConfig::default()
        };
        (dir, App::new(config, FormulaEvaluator::new()))
    }

    fn app_with_project() -> (TempDir, App) {
        let (dir, mut app) = test_app();
        app.start_prompt(PromptKind::NewProject);
        app.prompt.set("Workshop");
        app.finish_prompt();
        (dir, app)
    }

    fn fill_expense(app: &mut App, values: &[(ExpenseField, &str)]) {
        app.start_add_expense();
        for (field, value) in values {
            app.expense_form.set(*field, *value);
        }
        app.update_expense_preview();
    }

    #[test]
    fn test_app_new() {
        let (_dir, app) = test_app();
        assert_eq!(app.mode, AppMode::Projects);
        assert!(app.project.is_none());
        assert!(app.status_message.is_none());
        assert!(!app.should_quit);
    }

    #[test]
    fn test_create_project_enters_expenses() {
        let (_dir, app) = app_with_project();
        assert_eq!(app.mode, AppMode::Expenses);
        assert_eq!(app.project.as_ref().unwrap().name(), "Workshop");
        assert!(app.repository.exists("Workshop"));
    }

    #[test]
    fn test_empty_prompt_is_rejected() {
        let (_dir, mut app) = test_app();
        app.start_prompt(PromptKind::NewProject);
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Prompt(PromptKind::NewProject));
        assert!(app.status_message.is_some());

        app.cancel_prompt();
        assert_eq!(app.mode, AppMode::Projects);
    }

    #[test]
    fn test_add_expense_with_formula() {
        let (_dir, mut app) = app_with_project();
        fill_expense(
            &mut app,
            &[
                (ExpenseField::Type, "labor"),
                (ExpenseField::Name, "Install"),
                (ExpenseField::Formula, "labor_cost"),
                (ExpenseField::Params, "hours=40, hourly_rate=200"),
            ],
        );
        assert_eq!(app.expense_form.preview, Some(Ok(8000.0)));

        app.finish_expense_form();
        assert_eq!(app.mode, AppMode::Expenses);

        let project = app.project.as_ref().unwrap();
        assert_eq!(project.expenses.len(), 1);
        assert_eq!(project.expenses[0].total_amount, 8000.0);
        assert_eq!(project.expenses[0].formula.as_deref(), Some("labor_cost"));

        let saved = app.repository.open("Workshop").unwrap();
        assert_eq!(saved.expenses.len(), 1);
    }

    #[test]
    fn test_preview_reports_missing_parameter() {
        let (_dir, mut app) = app_with_project();
        fill_expense(
            &mut app,
            &[(ExpenseField::Formula, "labor_cost"), (ExpenseField::Params, "hours=40, hourly_rate=")],
        );
        match &app.expense_form.preview {
            Some(Err(message)) => assert!(message.contains("hourly_rate")),
            other => panic!("unexpected preview {other:?}"),
        }

        app.expense_form.set(ExpenseField::Name, "Install");
        app.finish_expense_form();
        assert_eq!(app.mode, AppMode::ExpenseForm);
        assert_eq!(app.expense_count(), 0);
    }

    #[test]
    fn test_leaving_formula_field_suggests_params() {
        let (_dir, mut app) = app_with_project();
        app.start_add_expense();
        app.expense_form.fields.focus = 2;
        app.expense_form.set(ExpenseField::Formula, "equipment_cost");
        app.expense_form_focus(true);

        assert_eq!(app.expense_form.focused_field(), ExpenseField::Params);
        assert_eq!(app.expense_form.value(ExpenseField::Params), "usage_time=, rate=");
    }

    #[test]
    fn test_edit_and_delete_expense() {
        let (_dir, mut app) = app_with_project();
        fill_expense(&mut app, &[(ExpenseField::Name, "Bolts"), (ExpenseField::Amount, "10")]);
        app.finish_expense_form();

        app.start_edit_expense();
        assert_eq!(app.expense_form.editing, Some(1));
        app.expense_form.set(ExpenseField::Amount, "12.5");
        app.finish_expense_form();
        assert_eq!(app.project.as_ref().unwrap().expenses[0].total_amount, 12.5);

        app.request_delete();
        assert_eq!(app.mode, AppMode::ConfirmDelete);
        assert_eq!(app.pending_delete, Some(DeleteTarget::Expense(1)));
        app.confirm_delete();
        assert_eq!(app.mode, AppMode::Expenses);
        assert_eq!(app.expense_count(), 0);
    }

    #[test]
    fn test_custom_formula_flow() {
        let (_dir, mut app) = app_with_project();
        app.show_formulas();
        app.start_add_formula();
        app.formula_form.set(FormulaField::DisplayName, "Shipping");
        app.formula_form.set(FormulaField::Expression, "weight * rate");
        app.formula_form.set(FormulaField::Parameters, "weight");
        app.update_formula_check();
        assert!(matches!(app.formula_form.check, Some(Err(_))));

        app.finish_formula_form();
        assert_eq!(app.mode, AppMode::FormulaForm);

        app.formula_form.set(FormulaField::Parameters, "weight, rate");
        app.update_formula_check();
        assert_eq!(app.formula_form.check, Some(Ok(())));
        app.finish_formula_form();
        assert_eq!(app.mode, AppMode::Formulas);

        let project = app.project.as_ref().unwrap();
        assert_eq!(project.formula("custom_1").unwrap().display_name, "Shipping");
        assert_eq!(app.selected_formula, 3);
    }

    #[test]
    fn test_builtin_formula_cannot_be_deleted() {
        let (_dir, mut app) = app_with_project();
        app.show_formulas();
        app.request_delete();
        assert_eq!(app.mode, AppMode::Formulas);
        assert!(app.pending_delete.is_none());
    }

    #[test]
    fn test_custom_type_prompt() {
        let (_dir, mut app) = app_with_project();
        app.start_prompt(PromptKind::NewCustomType);
        app.prompt.set("Tooling");
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Expenses);
        assert_eq!(app.project.as_ref().unwrap().custom_expense_types[0].name, "Tooling");
    }

    #[test]
    fn test_project_list_round_trip() {
        let (_dir, mut app) = app_with_project();
        app.close_project();
        assert_eq!(app.mode, AppMode::Projects);
        assert_eq!(app.projects.len(), 1);

        app.open_selected_project();
        assert_eq!(app.mode, AppMode::Expenses);
        app.close_project();

        app.request_delete();
        assert_eq!(app.pending_delete, Some(DeleteTarget::Project("Workshop".to_string())));
        app.cancel_delete();
        assert_eq!(app.mode, AppMode::Projects);
        assert_eq!(app.projects.len(), 1);

        app.request_delete();
        app.confirm_delete();
        assert!(app.projects.is_empty());
    }

    #[test]
    fn test_csv_export() {
        let (dir, mut app) = app_with_project();
        app.start_csv_export();
        app.finish_csv_export();
        assert_eq!(app.mode, AppMode::ExportCsv);
        assert!(app.status_message.as_deref().unwrap_or("").contains("no expenses"));

        fill_expense(&mut app, &[(ExpenseField::Name, "Bolts"), (ExpenseField::Amount, "10")]);
        app.finish_expense_form();
        app.start_csv_export();
        app.export_fields.set(0, "bolts");
        app.finish_csv_export();
        assert_eq!(app.mode, AppMode::Expenses);
        assert!(dir.path().join("exports").join("bolts.csv").is_file());
    }

    #[test]
    fn test_project_file_export_and_import() {
        let (dir, mut app) = app_with_project();
        fill_expense(&mut app, &[(ExpenseField::Name, "Bolts"), (ExpenseField::Amount, "10")]);
        app.finish_expense_form();
        app.close_project();

        let backup = dir.path().join("backup.json");
        app.start_prompt(PromptKind::ExportProject);
        assert!(app.prompt.as_str().ends_with("Workshop_backup.json"));
        app.prompt.set(backup.display().to_string());
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Projects);
        assert!(backup.is_file());

        // Same name: cancel leaves the existing project alone
        app.start_prompt(PromptKind::ImportProject);
        app.prompt.set(backup.display().to_string());
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::ConfirmOverwrite);
        assert_eq!(
            app.pending_import,
            Some(PendingImport {
                source: backup.clone(),
                name: "Workshop".to_string(),
            })
        );
        app.cancel_import();
        assert_eq!(app.mode, AppMode::Projects);
        assert!(app.pending_import.is_none());

        // Overwrite replaces the stored project with the file's contents
        let mut stored = app.repository.open("Workshop").unwrap();
        stored.delete_expense(1).unwrap();
        app.repository.save(&mut stored).unwrap();

        app.start_prompt(PromptKind::ImportProject);
        app.prompt.set(backup.display().to_string());
        app.finish_prompt();
        app.overwrite_import();
        assert_eq!(app.mode, AppMode::Projects);
        assert_eq!(app.projects.len(), 1);
        assert_eq!(app.repository.open("Workshop").unwrap().expenses.len(), 1);
    }

    #[test]
    fn test_import_under_another_name() {
        let (dir, mut app) = app_with_project();
        app.close_project();
        let backup = dir.path().join("backup.json");
        app.repository.export_project("Workshop", &backup).unwrap();

        app.start_prompt(PromptKind::ImportProject);
        app.prompt.set(backup.display().to_string());
        app.finish_prompt();
        app.rename_import();
        assert_eq!(app.mode, AppMode::Prompt(PromptKind::ImportAs));
        assert_eq!(app.prompt.as_str(), "Workshop_imported");

        app.prompt.set("Workshop");
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Prompt(PromptKind::ImportAs));
        assert!(app.status_message.as_deref().unwrap_or("").contains("already exists"));

        app.prompt.set("Workshop 2");
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Projects);
        assert!(app.pending_import.is_none());
        assert_eq!(app.projects.len(), 2);
        assert_eq!(app.projects[app.selected_project].name, "Workshop 2");
    }

    #[test]
    fn test_import_reports_unreadable_file() {
        let (dir, mut app) = test_app();
        app.start_prompt(PromptKind::ImportProject);
        app.prompt.set(dir.path().join("missing.json").display().to_string());
        app.finish_prompt();
        assert_eq!(app.mode, AppMode::Prompt(PromptKind::ImportProject));
        assert!(app.status_message.as_deref().unwrap_or("").starts_with("Import failed"));
        assert!(app.pending_import.is_none());
    }

    #[test]
    fn test_formula_in_use_is_kept() {
        let (_dir, mut app) = app_with_project();
        app.show_formulas();
        app.start_add_formula();
        app.formula_form.set(FormulaField::Key, "ship");
        app.formula_form.set(FormulaField::Expression, "weight * rate");
        app.formula_form.set(FormulaField::Parameters, "weight, rate");
        app.finish_formula_form();

        fill_expense(
            &mut app,
            &[
                (ExpenseField::Name, "Parcel"),
                (ExpenseField::Formula, "ship"),
                (ExpenseField::Params, "weight=3, rate=10"),
            ],
        );
        app.finish_expense_form();
        assert_eq!(app.expense_count(), 1);

        app.show_formulas();
        app.request_delete();
        assert_eq!(app.pending_delete, Some(DeleteTarget::Formula("ship".to_string())));
        app.confirm_delete();
        assert_eq!(app.mode, AppMode::Formulas);
        assert!(app.status_message.as_deref().unwrap_or("").contains("still used"));
        assert!(app.project.as_ref().unwrap().formula("ship").is_ok());
    }

    #[test]
    fn test_selection_stays_in_bounds() {
        let (_dir, mut app) = app_with_project();
        app.select_previous();
        assert_eq!(app.selected_expense, 0);
        app.show_formulas();
        for _ in 0..10 {
            app.select_next();
        }
        assert_eq!(app.selected_formula, 2);
    }

    #[test]
    fn test_help_returns_to_previous_mode() {
        let (_dir, mut app) = app_with_project();
        app.show_help();
        assert_eq!(app.mode, AppMode::Help);
        app.close_help();
        assert_eq!(app.mode, AppMode::Expenses);
    }
}
