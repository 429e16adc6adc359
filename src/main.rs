//! costbook - terminal expense tracker
//!
//! Keeps per-project expense records with amounts computed from formulas,
//! and exports them to CSV.

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use costbook::application::App;
use costbook::config::{config_path, load_config, AppConfig};
use costbook::domain::FormulaEvaluator;
use costbook::presentation::{render_ui, InputHandler};

/// Entry point for the costbook terminal application.
///
/// Loads the configuration, starts file logging, builds the formula
/// evaluator, and runs the event loop until the user quits.
///
/// # Errors
///
/// Returns an error if the configuration cannot be read, the log file cannot
/// be opened, or terminal setup fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    let config = load_config(&path)?;
    init_logging(&config)?;
    info!(config = %path.display(), projects = %config.projects_dir.display(), "starting costbook");

    let mut app = App::new(config, FormulaEvaluator::new());
    app.refresh_projects();

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    info!("exiting costbook");
    Ok(())
}

/// Sends tracing output to the configured log file, since the terminal
/// belongs to the UI. `RUST_LOG` overrides the configured level.
fn init_logging(config: &AppConfig) -> io::Result<()> {
    if let Some(parent) = config.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Main application event loop.
///
/// Redraws after every key press and stops once the app asks to quit.
fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    loop {
        terminal.draw(|f| render_ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                InputHandler::handle_key_event(app, key.code, key.modifiers);
            }
        }

        if app.should_quit {
            app.persist();
            return Ok(());
        }
    }
}
