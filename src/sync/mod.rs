pub mod anthropic;
pub mod copilot;
pub mod keyring;
pub mod local;
pub mod rest;

use async_trait::async_trait;

use crate::core::date_key::DateKey;
use crate::core::project::{Project, ProjectRef};
use crate::core::suggestion::SuggestionSet;
use crate::core::task::{NewTask, OrderUpdate, Task, TaskId};
use crate::error::Result;

/// Task persistence offered by the backend.
#[async_trait]
pub trait TaskGateway: Send + Sync {
    async fn get_tasks(&self) -> Result<Vec<Task>>;

    /// Create a task. Every project reference must already be persisted.
    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn update_task(&self, task: &Task) -> Result<Task>;

    async fn delete_task(&self, id: TaskId) -> Result<()>;

    /// Apply order/date changes. Not atomic across records on the REST
    /// backend: an error means some records may already have been written.
    /// The local store applies all or none.
    async fn batch_update_tasks(&self, updates: &[OrderUpdate]) -> Result<()>;
}

#[async_trait]
pub trait ProjectGateway: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Case-insensitive exact name match.
    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>>;

    async fn create_project(&self, name: &str) -> Result<Project>;
}

/// Everything the planner needs from a backend.
pub trait Backend: TaskGateway + ProjectGateway {}

impl<T: TaskGateway + ProjectGateway> Backend for T {}

/// What the assistant is asked.
#[derive(Debug, Clone, Copy)]
pub struct PlanningRequest<'a> {
    pub message: &'a str,
    pub date: DateKey,
    /// Suggestions shown to the user but not applied yet.
    pub pending: Option<&'a SuggestionSet>,
    /// The user's current tasks, for services that build their own prompt.
    pub tasks: &'a [Task],
}

#[async_trait]
pub trait SuggestionService: Send + Sync {
    /// Returns the assistant's raw reply text.
    async fn suggest(&self, request: &PlanningRequest<'_>) -> Result<String>;
}

/// Turn project references into persisted projects, creating missing ones.
///
/// References with a real id are trusted; the rest are looked up by name and
/// created when absent. Duplicates collapse to one entry.
pub async fn resolve_projects<G>(gateway: &G, refs: &[ProjectRef]) -> Result<Vec<Project>>
where
    G: ProjectGateway + ?Sized,
{
    let mut resolved: Vec<Project> = Vec::new();
    for r in refs {
        let name = r.name.trim();
        if name.is_empty() {
            continue;
        }
        let project = match r.as_project() {
            Some(p) => p,
            None => match gateway.find_project_by_name(name).await? {
                Some(p) => p,
                None => {
                    log::info!("Creating project {:?}", name);
                    gateway.create_project(name).await?
                }
            },
        };
        if !resolved.iter().any(|p| p.id == project.id) {
            resolved.push(project);
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::local::LocalStore;

    #[tokio::test]
    async fn resolve_creates_missing_projects_once() {
        let store = LocalStore::in_memory();
        let existing = store.create_project("Work").await.unwrap();

        let refs = vec![
            ProjectRef::named("work"),
            ProjectRef::named("Garden"),
            ProjectRef::named("garden"),
            ProjectRef { id: Some(existing.id), name: "Work".into() },
        ];
        let projects = resolve_projects(&store, &refs).await.unwrap();

        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Work", "Garden"]);
        assert_eq!(store.list_projects().await.unwrap().len(), 2);
    }
}
