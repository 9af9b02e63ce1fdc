use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ProjectGateway, TaskGateway};
use crate::core::project::Project;
use crate::core::task::{NewTask, OrderUpdate, Task, TaskId};
use crate::error::{PlannerError, Result};

const LOCAL_USER: &str = "local";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct LocalData {
    tasks: Vec<Task>,
    projects: Vec<Project>,
    next_task_id: i64,
    next_project_id: i64,
}

/// A single-user backend kept in a JSON file, for working offline.
///
/// Without a path everything lives in memory.
pub struct LocalStore {
    path: Option<PathBuf>,
    data: Mutex<LocalData>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self { path: None, data: Mutex::new(LocalData::default()) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LocalData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path: Some(path.to_path_buf()), data: Mutex::new(data) })
    }

    /// Run `f` against a copy of the data and keep the copy only when `f`
    /// and the file write both succeed, so a failed call changes nothing.
    fn with_data<T>(&self, f: impl FnOnce(&mut LocalData) -> Result<T>) -> Result<T> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| PlannerError::Backend { status: 500, message: "local store poisoned".into() })?;
        let mut draft = data.clone();
        let out = f(&mut draft)?;
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&draft)?)?;
        }
        *data = draft;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&LocalData) -> T) -> Result<T> {
        let data = self
            .data
            .lock()
            .map_err(|_| PlannerError::Backend { status: 500, message: "local store poisoned".into() })?;
        Ok(f(&data))
    }
}

fn linked_projects(data: &LocalData, task: &NewTask) -> Result<Vec<Project>> {
    task.projects
        .iter()
        .map(|r| {
            let id = r
                .id
                .ok_or_else(|| PlannerError::validation(format!("project {:?} is not saved", r.name)))?;
            data.projects
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| PlannerError::NotFound(format!("project {}", id)))
        })
        .collect()
}

#[async_trait]
impl TaskGateway for LocalStore {
    async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.read(|data| {
            let mut tasks = data.tasks.clone();
            tasks.sort_by_key(|t| t.order);
            tasks
        })
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        self.with_data(|data| {
            let projects = linked_projects(data, task)?;
            data.next_task_id += 1;
            let created = Task {
                id: data.next_task_id,
                title: task.title.clone(),
                notes: task.notes.clone(),
                date: task.date,
                completed: task.completed,
                estimated_minutes: task.estimated_minutes,
                order: task.order,
                user_id: LOCAL_USER.to_string(),
                projects,
            };
            data.tasks.push(created.clone());
            Ok(created)
        })
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        self.with_data(|data| {
            let slot = data
                .tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| PlannerError::NotFound(format!("task {}", task.id)))?;
            *slot = Task { user_id: slot.user_id.clone(), ..task.clone() };
            Ok(slot.clone())
        })
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.with_data(|data| {
            data.tasks.retain(|t| t.id != id);
            Ok(())
        })
    }

    async fn batch_update_tasks(&self, updates: &[OrderUpdate]) -> Result<()> {
        self.with_data(|data| {
            for update in updates {
                let task = data
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == update.id)
                    .ok_or_else(|| PlannerError::NotFound(format!("task {}", update.id)))?;
                task.order = update.order;
                if let Some(date) = update.date {
                    task.date = date;
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl ProjectGateway for LocalStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.read(|data| {
            let mut projects = data.projects.clone();
            projects.sort_by(|a, b| a.name.cmp(&b.name));
            projects
        })
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.read(|data| data.projects.iter().find(|p| p.matches_name(name)).cloned())
    }

    async fn create_project(&self, name: &str) -> Result<Project> {
        self.with_data(|data| {
            if data.projects.iter().any(|p| p.matches_name(name)) {
                return Err(PlannerError::Backend {
                    status: 409,
                    message: format!("project {:?} already exists", name),
                });
            }
            data.next_project_id += 1;
            let project = Project::new(data.next_project_id, name.trim());
            data.projects.push(project.clone());
            Ok(project)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::date_key::DateKey;
    use crate::core::project::ProjectRef;

    fn day(s: &str) -> DateKey {
        DateKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = LocalStore::open(&path).unwrap();
        let project = store.create_project("Home").await.unwrap();
        let mut draft = NewTask::new("Vacuum", day("2024-05-01"));
        draft.projects.push(ProjectRef::from(&project));
        let created = store.create_task(&draft).await.unwrap();
        drop(store);

        let reopened = LocalStore::open(&path).unwrap();
        let tasks = reopened.get_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, created.id);
        assert_eq!(tasks[0].projects, vec![project]);
    }

    #[tokio::test]
    async fn unsaved_project_refs_are_rejected() {
        let store = LocalStore::in_memory();
        let draft = NewTask::new("Vacuum", day("2024-05-01")).with_project("Home");
        assert!(store.create_task(&draft).await.is_err());
    }

    #[tokio::test]
    async fn batch_moves_tasks() {
        let store = LocalStore::in_memory();
        let project = store.create_project("Home").await.unwrap();
        let mut draft = NewTask::new("Vacuum", day("2024-05-01"));
        draft.projects.push(ProjectRef::from(&project));
        let t = store.create_task(&draft).await.unwrap();

        store
            .batch_update_tasks(&[OrderUpdate { id: t.id, order: 4, date: Some(day("2024-05-02")) }])
            .await
            .unwrap();
        let tasks = store.get_tasks().await.unwrap();
        assert_eq!(tasks[0].order, 4);
        assert_eq!(tasks[0].date, day("2024-05-02"));
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = LocalStore::open(&path).unwrap();
        let project = store.create_project("Home").await.unwrap();
        let mut draft = NewTask::new("Vacuum", day("2024-05-01"));
        draft.projects.push(ProjectRef::from(&project));
        let t = store.create_task(&draft).await.unwrap();

        let err = store
            .batch_update_tasks(&[
                OrderUpdate { id: t.id, order: 7, date: Some(day("2024-05-03")) },
                OrderUpdate { id: 999, order: 0, date: None },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::NotFound(_)));

        let tasks = store.get_tasks().await.unwrap();
        assert_eq!((tasks[0].order, tasks[0].date), (0, day("2024-05-01")));
        let reopened = LocalStore::open(&path).unwrap().get_tasks().await.unwrap();
        assert_eq!(reopened, tasks);
    }

    #[tokio::test]
    async fn duplicate_project_names_conflict() {
        let store = LocalStore::in_memory();
        store.create_project("Home").await.unwrap();
        assert!(store.create_project("home").await.is_err());
        assert!(store.find_project_by_name("HOME").await.unwrap().is_some());
    }
}
