use serde::{Deserialize, Serialize};

use super::date_key::DateKey;
use super::project::{Project, ProjectId, ProjectRef};
use crate::error::{PlannerError, Result};

pub type TaskId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: DateKey,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, rename = "estimatedTime")]
    pub estimated_minutes: u32,
    /// Position within the date bucket. Only relative order matters.
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl Task {
    pub fn has_project(&self, project_id: ProjectId) -> bool {
        self.projects.iter().any(|p| p.id == project_id)
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name.clone()).collect()
    }

    pub fn toggled(&self) -> Self {
        Self { completed: !self.completed, ..self.clone() }
    }
}

/// A task that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub date: DateKey,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, rename = "estimatedTime")]
    pub estimated_minutes: u32,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub projects: Vec<ProjectRef>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, date: DateKey) -> Self {
        Self {
            title: title.into(),
            notes: None,
            date,
            completed: false,
            estimated_minutes: 0,
            order: 0,
            projects: Vec::new(),
        }
    }

    pub fn with_project(mut self, name: impl Into<String>) -> Self {
        self.projects.push(ProjectRef::named(name));
        self
    }

    /// Form validation: a title and at least one project.
    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.title, self.projects.len())
    }
}

/// Form-level checks shared by create and edit.
pub fn validate_fields(title: &str, project_count: usize) -> Result<()> {
    if title.trim().is_empty() {
        return Err(PlannerError::validation("Title is required"));
    }
    if project_count == 0 {
        return Err(PlannerError::validation("At least one project is required"));
    }
    Ok(())
}

/// Persistence-level update emitted by a drag commit.
///
/// `date` is only set when the task moved to another bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub id: TaskId,
    pub order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateKey>,
}
