use crate::application::{App, AppMode, PromptKind, TextInput};
use crossterm::event::{KeyCode, KeyModifiers};

pub struct InputHandler;

impl InputHandler {
    pub fn handle_key_event(app: &mut App, key: KeyCode, modifiers: KeyModifiers) {
        match app.mode {
            AppMode::Projects => Self::handle_projects_mode(app, key),
            AppMode::Prompt(_) => Self::handle_prompt_mode(app, key),
            AppMode::Expenses => Self::handle_expenses_mode(app, key, modifiers),
            AppMode::ExpenseForm => Self::handle_expense_form_mode(app, key),
            AppMode::Formulas => Self::handle_formulas_mode(app, key),
            AppMode::FormulaForm => Self::handle_formula_form_mode(app, key),
            AppMode::Statistics => Self::handle_statistics_mode(app, key),
            AppMode::ExportCsv => Self::handle_export_mode(app, key),
            AppMode::ConfirmDelete => Self::handle_confirm_mode(app, key),
            AppMode::ConfirmOverwrite => Self::handle_overwrite_mode(app, key),
            AppMode::Help => Self::handle_help_mode(app, key),
        }
    }

    fn handle_projects_mode(app: &mut App, key: KeyCode) {
        app.status_message = None;
        match key {
            KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => app.select_next(),
            KeyCode::Enter => app.open_selected_project(),
            KeyCode::Char('n') => app.start_prompt(PromptKind::NewProject),
            KeyCode::Char('r') => {
                if !app.projects.is_empty() {
                    app.start_prompt(PromptKind::RenameProject);
                }
            }
            KeyCode::Char('d') | KeyCode::Delete => app.request_delete(),
            KeyCode::Char('i') => app.start_prompt(PromptKind::ImportProject),
            KeyCode::Char('o') => {
                if !app.projects.is_empty() {
                    app.start_prompt(PromptKind::ExportProject);
                }
            }
            KeyCode::F(5) => app.refresh_projects(),
            KeyCode::F(1) | KeyCode::Char('?') => app.show_help(),
            KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
            _ => {}
        }
    }

    fn handle_prompt_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Enter => app.finish_prompt(),
            KeyCode::Esc => app.cancel_prompt(),
            _ => {
                edit_text(&mut app.prompt, key);
            }
        }
    }

    fn handle_expenses_mode(app: &mut App, key: KeyCode, modifiers: KeyModifiers) {
        if modifiers.contains(KeyModifiers::CONTROL) {
            if key == KeyCode::Char('e') {
                app.start_csv_export();
            }
            return;
        }

        app.status_message = None;
        match key {
            KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => app.select_next(),
            KeyCode::Char('a') | KeyCode::Char('n') => app.start_add_expense(),
            KeyCode::Enter | KeyCode::Char('e') => app.start_edit_expense(),
            KeyCode::Char('d') | KeyCode::Delete => app.request_delete(),
            KeyCode::Char('f') => app.show_formulas(),
            KeyCode::Char('s') => app.show_statistics(),
            KeyCode::Char('x') => app.start_csv_export(),
            KeyCode::Char('t') => app.start_prompt(PromptKind::NewCustomType),
            KeyCode::F(1) | KeyCode::Char('?') => app.show_help(),
            KeyCode::Esc | KeyCode::Char('q') => app.close_project(),
            _ => {}
        }
    }

    fn handle_expense_form_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Enter => app.finish_expense_form(),
            KeyCode::Esc => app.cancel_form(),
            KeyCode::Tab | KeyCode::Down => app.expense_form_focus(true),
            KeyCode::BackTab | KeyCode::Up => app.expense_form_focus(false),
            _ => {
                let changed = app
                    .expense_form
                    .fields
                    .focused_mut()
                    .is_some_and(|input| edit_text(input, key));
                if changed {
                    app.update_expense_preview();
                }
            }
        }
    }

    fn handle_formulas_mode(app: &mut App, key: KeyCode) {
        app.status_message = None;
        match key {
            KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => app.select_next(),
            KeyCode::Char('a') | KeyCode::Char('n') => app.start_add_formula(),
            KeyCode::Char('d') | KeyCode::Delete => app.request_delete(),
            KeyCode::F(1) | KeyCode::Char('?') => app.show_help(),
            KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('f') => app.mode = AppMode::Expenses,
            _ => {}
        }
    }

    fn handle_formula_form_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Enter => app.finish_formula_form(),
            KeyCode::Esc => app.cancel_formula_form(),
            KeyCode::Tab | KeyCode::Down => app.formula_form.fields.next(),
            KeyCode::BackTab | KeyCode::Up => app.formula_form.fields.previous(),
            _ => {
                let changed = app
                    .formula_form
                    .fields
                    .focused_mut()
                    .is_some_and(|input| edit_text(input, key));
                if changed {
                    app.update_formula_check();
                }
            }
        }
    }

    fn handle_statistics_mode(app: &mut App, key: KeyCode) {
        if matches!(key, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') | KeyCode::Char('s')) {
            app.mode = AppMode::Expenses;
        }
    }

    fn handle_export_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Enter => app.finish_csv_export(),
            KeyCode::Esc => {
                app.mode = AppMode::Expenses;
                app.status_message = None;
            }
            KeyCode::Tab | KeyCode::Down => app.export_fields.next(),
            KeyCode::BackTab | KeyCode::Up => app.export_fields.previous(),
            _ => {
                if let Some(input) = app.export_fields.focused_mut() {
                    edit_text(input, key);
                }
            }
        }
    }

    fn handle_confirm_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Char('y') | KeyCode::Char('Y') => app.confirm_delete(),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.cancel_delete(),
            _ => {}
        }
    }

    fn handle_overwrite_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Char('y') | KeyCode::Char('Y') => app.overwrite_import(),
            KeyCode::Char('r') | KeyCode::Char('R') => app.rename_import(),
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => app.cancel_import(),
            _ => {}
        }
    }

    fn handle_help_mode(app: &mut App, key: KeyCode) {
        match key {
            KeyCode::Esc | KeyCode::F(1) | KeyCode::Char('?') | KeyCode::Char('q') => {
                app.close_help();
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if app.help_scroll > 0 {
                    app.help_scroll -= 1;
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                app.help_scroll += 1;
            }
            KeyCode::PageUp => {
                app.help_scroll = app.help_scroll.saturating_sub(5);
            }
            KeyCode::PageDown => {
                app.help_scroll += 5;
            }
            KeyCode::Home => {
                app.help_scroll = 0;
            }
            _ => {}
        }
    }
}

/// Applies a line-editing key to `input`. Returns whether the text changed.
fn edit_text(input: &mut TextInput, key: KeyCode) -> bool {
    match key {
        KeyCode::Backspace => {
            input.backspace();
            true
        }
        KeyCode::Delete => {
            input.delete();
            true
        }
        KeyCode::Left => {
            input.move_left();
            false
        }
        KeyCode::Right => {
            input.move_right();
            false
        }
        KeyCode::Home => {
            input.home();
            false
        }
        KeyCode::End => {
            input.end();
            false
        }
        KeyCode::Char(c) => {
            input.insert(c);
            true
        }
        _ => false,
    }
}
