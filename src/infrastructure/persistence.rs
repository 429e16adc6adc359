use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::Project;

/// Extension of project files inside the projects directory.
pub const PROJECT_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("project already exists: {0}")]
    ProjectExists(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("invalid project file {path}: {reason}")]
    InvalidProjectFile { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// What the project picker shows without keeping every project in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectSummary {
    pub name: String,
    pub file: PathBuf,
    pub created_date: NaiveDateTime,
    pub last_modified: NaiveDateTime,
    pub description: String,
    pub expense_count: usize,
    pub total_amount: f64,
}

impl ProjectSummary {
    fn from_project(project: &Project, file: PathBuf) -> Self {
        Self {
            name: project.name().to_string(),
            file,
            created_date: project.project_info.created_date,
            last_modified: project.project_info.last_modified,
            description: project.project_info.description.clone(),
            expense_count: project.expenses.len(),
            total_amount: project.total_amount(),
        }
    }
}

/// Turns a project name into a safe file stem.
///
/// Characters that are not allowed in file names on common platforms become
/// `_`. A name that is empty after trimming maps to `untitled_project`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "untitled_project".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Stores one pretty-printed JSON file per project under a root directory.
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    root: PathBuf,
}

impl ProjectRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", sanitize_filename(name), PROJECT_EXTENSION))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Lists every readable project, most recently modified first.
    ///
    /// Files that fail to parse are logged and skipped.
    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROJECT_EXTENSION) {
                continue;
            }
            match read_project(&path) {
                Ok(project) => summaries.push(ProjectSummary::from_project(&project, path)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable project file"),
            }
        }

        summaries.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(summaries)
    }

    pub fn create(&self, name: &str, description: &str) -> Result<Project> {
        if self.exists(name) {
            return Err(StorageError::ProjectExists(name.trim().to_string()));
        }
        let project = Project::new(name, description);
        let path = self.write(&project)?;
        info!(project = project.name(), path = %path.display(), "created project");
        Ok(project)
    }

    pub fn open(&self, name: &str) -> Result<Project> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(StorageError::ProjectNotFound(name.to_string()));
        }
        let project = read_project(&path)?;
        info!(project = project.name(), "opened project");
        Ok(project)
    }

    /// Writes the project, bumping its last-modified time first.
    pub fn save(&self, project: &mut Project) -> Result<PathBuf> {
        project.touch();
        let path = self.write(project)?;
        info!(project = project.name(), expenses = project.expenses.len(), "saved project");
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(StorageError::ProjectNotFound(name.to_string()));
        }
        fs::remove_file(&path)?;
        info!(project = name, "deleted project");
        Ok(())
    }

    /// Renames a stored project, moving its file and updating the stored name.
    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<Project> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StorageError::InvalidProjectFile {
                path: self.path_for(new_name),
                reason: "project name is empty".to_string(),
            });
        }

        let old_path = self.path_for(old_name);
        let new_path = self.path_for(new_name);
        let mut project = self.open(old_name)?;
        if new_path != old_path && new_path.is_file() {
            return Err(StorageError::ProjectExists(new_name.to_string()));
        }

        project.project_info.name = new_name.to_string();
        project.touch();
        self.write(&project)?;
        if new_path != old_path {
            fs::remove_file(&old_path)?;
        }
        info!(from = old_name, to = new_name, "renamed project");
        Ok(project)
    }

    /// Copies a project file from outside the root into the repository.
    ///
    /// The file must parse as a project with a name, unique expense ids, and
    /// unique formula keys. An existing project of the same name is only
    /// replaced when `overwrite` is set.
    pub fn import_project(&self, source: &Path, overwrite: bool) -> Result<Project> {
        let project = read_importable(source)?;
        self.store_import(project, source, overwrite)
    }

    /// Imports a project file under `name` instead of the name stored in it.
    /// Never replaces an existing project.
    pub fn import_project_as(&self, source: &Path, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StorageError::InvalidProjectFile {
                path: source.to_path_buf(),
                reason: "project name is empty".to_string(),
            });
        }
        let mut project = read_importable(source)?;
        project.project_info.name = name.to_string();
        self.store_import(project, source, false)
    }

    fn store_import(&self, project: Project, source: &Path, overwrite: bool) -> Result<Project> {
        if self.exists(project.name()) && !overwrite {
            return Err(StorageError::ProjectExists(project.name().to_string()));
        }
        self.write(&project)?;
        info!(project = project.name(), source = %source.display(), "imported project");
        Ok(project)
    }

    /// Writes a copy of a stored project to `target`.
    pub fn export_project(&self, name: &str, target: &Path) -> Result<PathBuf> {
        let project = self.open(name)?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(target, serde_json::to_string_pretty(&project)?)?;
        info!(project = name, target = %target.display(), "exported project file");
        Ok(target.to_path_buf())
    }

    fn write(&self, project: &Project) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(project.name());
        fs::write(&path, serde_json::to_string_pretty(project)?)?;
        Ok(path)
    }
}

fn read_project(path: &Path) -> Result<Project> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| StorageError::InvalidProjectFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_importable(source: &Path) -> Result<Project> {
    let project = read_project(source)?;
    validate_structure(&project).map_err(|reason| StorageError::InvalidProjectFile {
        path: source.to_path_buf(),
        reason,
    })?;
    Ok(project)
}

fn validate_structure(project: &Project) -> std::result::Result<(), String> {
    if project.name().trim().is_empty() {
        return Err("project name is empty".to_string());
    }

    let mut ids = HashSet::new();
    if let Some(expense) = project.expenses.iter().find(|e| !ids.insert(e.id)) {
        return Err(format!("expense id {} appears more than once", expense.id));
    }

    let mut keys = HashSet::new();
    if let Some(formula) = project.formulas.iter().find(|f| !keys.insert(f.name.as_str())) {
        return Err(format!("formula '{}' appears more than once", formula.name));
    }

    Ok(())
}
