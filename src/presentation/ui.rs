use crate::application::{
    App, AppMode, DeleteTarget, ExpenseField, FieldSet, FormulaField, PromptKind, EXPORT_FIELDS,
};
use ratatui::{
    layout::{Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame,
};

const LABEL_WIDTH: usize = 30;

pub fn render_ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    match base_screen(app) {
        AppMode::Projects => render_projects(f, app, chunks[1]),
        AppMode::Formulas => render_formulas(f, app, chunks[1]),
        _ => render_expenses(f, app, chunks[1]),
    }
    render_status_bar(f, app, chunks[2]);

    match app.mode {
        AppMode::Prompt(kind) => render_prompt(f, app, kind),
        AppMode::ExpenseForm => render_expense_form(f, app),
        AppMode::FormulaForm => render_formula_form(f, app),
        AppMode::Statistics => render_statistics(f, app),
        AppMode::ExportCsv => render_export(f, app),
        AppMode::ConfirmDelete => render_confirm(f, app),
        AppMode::ConfirmOverwrite => render_overwrite(f, app),
        AppMode::Help => render_help_popup(f, app.help_scroll),
        _ => {}
    }
}

/// The screen drawn beneath any popup.
fn base_screen(app: &App) -> AppMode {
    let mode = match app.mode {
        AppMode::Help | AppMode::ConfirmDelete => app.previous_mode,
        mode => mode,
    };
    match mode {
        AppMode::Formulas | AppMode::FormulaForm => AppMode::Formulas,
        _ if app.project.is_none() => AppMode::Projects,
        _ => AppMode::Expenses,
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let text = match &app.project {
        Some(project) => format!(
            "costbook | Project: {} | Expenses: {} | Total: {}",
            project.name(),
            project.expenses.len(),
            app.format_amount(project.total_amount())
        ),
        None => format!("costbook | Projects in {}", app.repository.root().display()),
    };
    let header = Paragraph::new(text).style(Style::default().fg(Color::Cyan));
    f.render_widget(header, area);
}

fn selected_style(selected: bool) -> Style {
    if selected {
        Style::default().bg(Color::Blue).fg(Color::White)
    } else {
        Style::default()
    }
}

/// First row to draw so that `selected` stays inside `area`.
fn scroll_offset(selected: usize, area: Rect) -> usize {
    let visible = area.height.saturating_sub(3).max(1) as usize;
    selected.saturating_sub(visible - 1)
}

fn header_row(titles: &[&'static str]) -> Row<'static> {
    Row::new(
        titles
            .iter()
            .map(|t| Cell::from(*t).style(Style::default().fg(Color::Yellow))),
    )
    .height(1)
}

fn render_projects(f: &mut Frame, app: &App, area: Rect) {
    let offset = scroll_offset(app.selected_project, area);
    let rows: Vec<Row> = app
        .projects
        .iter()
        .enumerate()
        .skip(offset)
        .map(|(index, summary)| {
            Row::new(vec![
                Cell::from(summary.name.clone()),
                Cell::from(summary.expense_count.to_string()),
                Cell::from(app.format_amount(summary.total_amount)),
                Cell::from(summary.last_modified.format("%Y-%m-%d %H:%M").to_string()),
                Cell::from(summary.description.clone()),
            ])
            .style(selected_style(index == app.selected_project))
        })
        .collect();

    let title = if app.projects.is_empty() {
        "Projects (none yet, press n to create one)"
    } else {
        "Projects"
    };
    let widths = [
        Constraint::Percentage(25),
        Constraint::Length(9),
        Constraint::Length(16),
        Constraint::Length(17),
        Constraint::Min(10),
    ];
    let table = Table::new(rows, widths)
        .header(header_row(&["Name", "Expenses", "Total", "Modified", "Description"]))
        .block(Block::default().borders(Borders::ALL).title(title))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn render_expenses(f: &mut Frame, app: &App, area: Rect) {
    let Some(project) = &app.project else {
        return;
    };
    let offset = scroll_offset(app.selected_expense, area);
    let rows: Vec<Row> = project
        .expenses
        .iter()
        .enumerate()
        .skip(offset)
        .map(|(index, expense)| {
            let type_label = expense
                .custom_type_id
                .and_then(|id| project.custom_type(id).ok())
                .map(|t| t.name.clone())
                .unwrap_or_else(|| expense.expense_type.display_name().to_string());
            Row::new(vec![
                Cell::from(expense.id.to_string()),
                Cell::from(expense.date.map(|d| d.to_string()).unwrap_or_default()),
                Cell::from(type_label),
                Cell::from(expense.name.clone()),
                Cell::from(expense.formula.clone().unwrap_or_default()),
                Cell::from(app.format_amount(expense.total_amount)),
                Cell::from(expense.notes.clone()),
            ])
            .style(selected_style(index == app.selected_expense))
        })
        .collect();

    let widths = [
        Constraint::Length(5),
        Constraint::Length(10),
        Constraint::Length(15),
        Constraint::Percentage(25),
        Constraint::Length(15),
        Constraint::Length(14),
        Constraint::Min(10),
    ];
    let table = Table::new(rows, widths)
        .header(header_row(&["ID", "Date", "Type", "Name", "Formula", "Amount", "Notes"]))
        .block(Block::default().borders(Borders::ALL).title("Expenses"))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn render_formulas(f: &mut Frame, app: &App, area: Rect) {
    let Some(project) = &app.project else {
        return;
    };
    let offset = scroll_offset(app.selected_formula, area);
    let rows: Vec<Row> = project
        .formulas
        .iter()
        .enumerate()
        .skip(offset)
        .map(|(index, formula)| {
            Row::new(vec![
                Cell::from(formula.name.clone()),
                Cell::from(formula.label()),
                Cell::from(formula.expression.clone()),
                Cell::from(formula.parameters.join(", ")),
                Cell::from(formula.description.clone()),
            ])
            .style(selected_style(index == app.selected_formula))
        })
        .collect();

    let widths = [
        Constraint::Length(16),
        Constraint::Length(24),
        Constraint::Percentage(30),
        Constraint::Length(24),
        Constraint::Min(10),
    ];
    let table = Table::new(rows, widths)
        .header(header_row(&["Key", "Name", "Expression", "Parameters", "Description"]))
        .block(Block::default().borders(Borders::ALL).title("Formulas"))
        .column_spacing(1);
    f.render_widget(table, area);
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let hint = match app.mode {
        AppMode::Projects => {
            "Enter: open | n: new | r: rename | d: delete | i: import | o: export | F5: reload | ?: help | q: quit"
        }
        AppMode::Prompt(_) => "Enter: confirm | Esc: cancel",
        AppMode::Expenses => {
            "a: add | e: edit | d: delete | f: formulas | s: stats | x: export | t: new type | ?: help | q: close"
        }
        AppMode::ExpenseForm | AppMode::FormulaForm | AppMode::ExportCsv => {
            "Tab/↓: next field | Shift+Tab/↑: previous | Enter: save | Esc: cancel"
        }
        AppMode::Formulas => "a: add custom formula | d: delete custom formula | Esc: back",
        AppMode::Statistics => "Esc: close",
        AppMode::ConfirmDelete => "y: delete | n/Esc: keep",
        AppMode::ConfirmOverwrite => "y: overwrite | r: import under another name | n/Esc: cancel",
        AppMode::Help => "↑↓/jk: scroll | PgUp/PgDn: fast scroll | Home: top | Esc/q: close help",
    };
    let text = app.status_message.clone().unwrap_or_else(|| hint.to_string());

    let style = match app.mode {
        _ if app.status_message.is_some() => Style::default().fg(Color::Yellow),
        AppMode::ExpenseForm | AppMode::FormulaForm => Style::default().fg(Color::Green),
        AppMode::Help => Style::default().fg(Color::Cyan),
        AppMode::ExportCsv => Style::default().fg(Color::Magenta),
        AppMode::ConfirmDelete | AppMode::ConfirmOverwrite => Style::default().fg(Color::Red),
        _ => Style::default(),
    };
    let status = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .style(style);
    f.render_widget(status, area);
}

fn popup_area(area: Rect, width_percent: u16, height: u16) -> Rect {
    let width = area.width * width_percent / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn field_lines(fields: &FieldSet, labels: &[&str]) -> Vec<Line<'static>> {
    labels
        .iter()
        .enumerate()
        .map(|(index, label)| {
            let focused = index == fields.focus;
            let label_style = if focused {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Gray)
            };
            Line::from(vec![
                Span::styled(format!("{:<width$}", label, width = LABEL_WIDTH), label_style),
                Span::raw(fields.value(index).to_string()),
            ])
        })
        .collect()
}

/// Places the terminal cursor inside the focused field.
fn place_cursor(f: &mut Frame, inner: Rect, fields: &FieldSet) {
    let cursor = fields.inputs.get(fields.focus).map(|i| i.cursor).unwrap_or(0);
    let x = inner.x + (LABEL_WIDTH + cursor) as u16;
    let y = inner.y + fields.focus as u16;
    if x < inner.right() && y < inner.bottom() {
        f.set_cursor_position(Position::new(x, y));
    }
}

fn render_prompt(f: &mut Frame, app: &App, kind: PromptKind) {
    let area = popup_area(f.area(), 50, 3);
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(kind.title())
        .style(Style::default().fg(Color::Yellow));
    let inner = block.inner(area);
    f.render_widget(Paragraph::new(app.prompt.as_str().to_string()).block(block), area);

    let x = inner.x + app.prompt.cursor as u16;
    if x < inner.right() {
        f.set_cursor_position(Position::new(x, inner.y));
    }
}

fn render_expense_form(f: &mut Frame, app: &App) {
    let form = &app.expense_form;
    let labels: Vec<&str> = ExpenseField::ALL.iter().map(|field| field.label()).collect();
    let mut lines = field_lines(&form.fields, &labels);

    lines.push(Line::from(""));
    lines.push(match &form.preview {
        Some(Ok(amount)) => Line::from(Span::styled(
            format!("{:<width$}{}", "Amount", app.format_amount(*amount), width = LABEL_WIDTH),
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        )),
        Some(Err(reason)) => Line::from(Span::styled(
            format!("{:<width$}{}", "Amount", reason, width = LABEL_WIDTH),
            Style::default().fg(Color::Red),
        )),
        None => Line::from(""),
    });

    if let Some(project) = &app.project {
        lines.push(Line::from(""));
        let types: Vec<String> = project
            .custom_expense_types
            .iter()
            .map(|t| t.name.clone())
            .collect();
        lines.push(Line::from(Span::styled(
            format!(
                "Types: labor, material, equipment, other{}{}",
                if types.is_empty() { "" } else { ", " },
                types.join(", ")
            ),
            Style::default().fg(Color::DarkGray),
        )));
        for formula in &project.formulas {
            lines.push(Line::from(Span::styled(
                format!("  {} = {}", formula.name, formula.expression),
                Style::default().fg(Color::DarkGray),
            )));
        }
    }

    let height = lines.len() as u16 + 2;
    let area = popup_area(f.area(), 80, height);
    f.render_widget(Clear, area);
    let title = if form.editing.is_some() { "Edit expense" } else { "New expense" };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);
    f.render_widget(Paragraph::new(lines).block(block), area);
    place_cursor(f, inner, &form.fields);
}

fn render_formula_form(f: &mut Frame, app: &App) {
    let form = &app.formula_form;
    let labels: Vec<&str> = FormulaField::ALL.iter().map(|field| field.label()).collect();
    let mut lines = field_lines(&form.fields, &labels);

    lines.push(Line::from(""));
    lines.push(match &form.check {
        Some(Ok(())) => Line::from(Span::styled("Formula is valid", Style::default().fg(Color::Green))),
        Some(Err(reason)) => Line::from(Span::styled(reason.clone(), Style::default().fg(Color::Red))),
        None => Line::from(Span::styled(
            "Operators: + - * / // % ** ^  Functions: abs round min max sum pow math.*",
            Style::default().fg(Color::DarkGray),
        )),
    });

    let area = popup_area(f.area(), 80, lines.len() as u16 + 2);
    f.render_widget(Clear, area);
    let block = Block::default().borders(Borders::ALL).title("New custom formula");
    let inner = block.inner(area);
    f.render_widget(Paragraph::new(lines).block(block), area);
    place_cursor(f, inner, &form.fields);
}

fn render_export(f: &mut Frame, app: &App) {
    let mut lines = field_lines(&app.export_fields, &EXPORT_FIELDS);
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!(
            "Blank file name writes expenses_export_<timestamp>.csv to {}",
            app.config.exports_dir.display()
        ),
        Style::default().fg(Color::DarkGray),
    )));

    let area = popup_area(f.area(), 70, lines.len() as u16 + 2);
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Export CSV")
        .style(Style::default().fg(Color::Magenta));
    let inner = block.inner(area);
    f.render_widget(Paragraph::new(lines).block(block), area);
    place_cursor(f, inner, &app.export_fields);
}

fn render_statistics(f: &mut Frame, app: &App) {
    let Some(stats) = app.statistics() else {
        return;
    };
    let mut lines = vec![
        Line::from(format!("Expenses:         {}", stats.total_count)),
        Line::from(format!("Total amount:     {}", app.format_amount(stats.grand_total))),
        Line::from(format!("Average amount:   {}", app.format_amount(stats.average_amount))),
    ];
    if let (Some(max), Some(min)) = (stats.max_amount, stats.min_amount) {
        lines.push(Line::from(format!("Largest expense:  {}", app.format_amount(max))));
        lines.push(Line::from(format!("Smallest expense: {}", app.format_amount(min))));
    }
    if let Some((first, last)) = stats.date_range {
        lines.push(Line::from(format!("Date range:       {} to {}", first, last)));
    }

    for (title, totals) in [("By type", &stats.by_type), ("By custom type", &stats.by_custom_type)] {
        if totals.is_empty() {
            continue;
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(title, Style::default().fg(Color::Yellow))));
        for total in totals {
            lines.push(Line::from(format!(
                "  {:<20} {:>4}  {}",
                total.label,
                total.count,
                app.format_amount(total.total_amount)
            )));
        }
    }

    let area = popup_area(f.area(), 60, lines.len() as u16 + 2);
    f.render_widget(Clear, area);
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Statistics")
            .style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(widget, area);
}

fn render_confirm(f: &mut Frame, app: &App) {
    let question = match &app.pending_delete {
        Some(DeleteTarget::Project(name)) => format!("Delete project '{}' and its file?", name),
        Some(DeleteTarget::Expense(id)) => format!("Delete expense #{}?", id),
        Some(DeleteTarget::Formula(name)) => format!("Delete formula '{}'?", name),
        None => return,
    };
    let area = popup_area(f.area(), 50, 3);
    f.render_widget(Clear, area);
    let widget = Paragraph::new(format!("{} (y/n)", question)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Confirm")
            .style(Style::default().fg(Color::Red)),
    );
    f.render_widget(widget, area);
}

fn render_overwrite(f: &mut Frame, app: &App) {
    let Some(pending) = &app.pending_import else {
        return;
    };
    let lines = vec![
        Line::from(format!("Project '{}' already exists.", pending.name)),
        Line::from("y: overwrite it | r: import under another name | n: cancel"),
    ];
    let area = popup_area(f.area(), 60, 4);
    f.render_widget(Clear, area);
    let widget = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Import project")
            .style(Style::default().fg(Color::Red)),
    );
    f.render_widget(widget, area);
}

fn render_help_popup(f: &mut Frame, scroll: usize) {
    let area = f.area();
    let popup_area = Rect {
        x: area.width / 10,
        y: area.height / 10,
        width: area.width * 4 / 5,
        height: area.height * 4 / 5,
    };

    f.render_widget(Clear, popup_area);

    let help_lines: Vec<&str> = HELP_TEXT.lines().collect();
    let visible_height = popup_area.height.saturating_sub(2) as usize;

    let start_line = scroll.min(help_lines.len().saturating_sub(visible_height));
    let end_line = (start_line + visible_height).min(help_lines.len());

    let visible_text = help_lines[start_line..end_line].join("\n");

    let help_widget = Paragraph::new(visible_text)
        .block(Block::default()
            .borders(Borders::ALL)
            .title(format!("costbook Help (Line {}/{})", start_line + 1, help_lines.len()))
            .style(Style::default().fg(Color::Cyan)))
        .style(Style::default().fg(Color::White));

    f.render_widget(help_widget, popup_area);
}

const HELP_TEXT: &str = r#"COSTBOOK REFERENCE

=== AMOUNTS ===
An expense amount comes from the first of these that is filled in:
  1. Manual amount
  2. Quantity x unit price
  3. Formula, evaluated with the parameters field (name=value, ...)
The form shows the resulting amount, or the reason it cannot be computed,
while you type.

=== BUILT-IN FORMULAS ===
labor_cost      hours * hourly_rate
material_cost   quantity * unit_price
equipment_cost  usage_time * rate

=== FORMULA LANGUAGE ===
+ - * /         Arithmetic              hours * hourly_rate + 50
//              Floor division          7 // 2 -> 3
%               Remainder (sign of divisor)  -7 % 3 -> 2
** or ^         Power (right assoc.)    2 ** 3 ** 2 -> 512
-x              Negation                -2 ** 2 -> -4
( )             Grouping                (a + b) * c

abs(x)          Absolute value
round(x[, n])   Round half to even      round(2.5) -> 2
min(...), max(...), sum(...)
pow(x, y)
math.sqrt math.exp math.log math.log10 math.log2
math.sin math.cos math.tan math.asin math.acos math.atan math.atan2
math.sinh math.cosh math.tanh math.floor math.ceil math.trunc
math.fabs math.degrees math.radians math.hypot math.pow
math.pi math.e math.tau

Names are case sensitive and must be declared parameters.
Division by zero and results that are not finite are errors.
Expressions containing import, exec, eval, __, open, file, os or sys
are refused, even inside longer names such as "cost".

=== PROJECTS ===
Enter           Open selected project
n               New project
r               Rename project
d / Delete      Delete project (asks first)
i               Import a project file (a taken name can be
                overwritten or imported under another name)
o               Export the selected project to a file
F5              Reload project list
q / Esc         Quit

=== EXPENSES ===
a / n           Add expense
Enter / e       Edit selected expense
d / Delete      Delete selected expense (asks first)
t               Add a custom expense type
f               Formula list
s               Statistics
x / Ctrl+E      Export CSV (with a _stats.txt summary)
q / Esc         Close project
Projects are saved after every change.

=== FORMS ===
Tab / Down      Next field
Shift+Tab / Up  Previous field
Enter           Save
Esc             Cancel

=== FORMULA LIST ===
a / n           Add custom formula
d / Delete      Delete custom formula
Esc / q / f     Back to expenses

=== HELP NAVIGATION ===
↑↓ or j/k       Scroll help text up/down one line
Page Up/Down    Scroll help text up/down 5 lines
Home            Jump to top of help text
Esc/F1/?/q      Close this help window"#;
