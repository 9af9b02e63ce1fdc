#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dayplanner::core::date_key::DateKey;
use dayplanner::core::project::{Project, ProjectRef};
use dayplanner::core::task::{NewTask, OrderUpdate, Task, TaskId};
use dayplanner::core::temporal::VisibleRange;
use dayplanner::sync::local::LocalStore;
use dayplanner::sync::{PlanningRequest, ProjectGateway, SuggestionService, TaskGateway};
use dayplanner::{Planner, PlannerError, Result};

pub fn day(s: &str) -> DateKey {
    DateKey::parse(s).unwrap()
}

/// Knobs and call records shared between a test and its backend.
#[derive(Default)]
pub struct Controls {
    pub fail_batch: AtomicBool,
    pub fail_writes: AtomicBool,
    pub fail_reads: AtomicBool,
    pub batch_calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<OrderUpdate>>>,
}

impl Controls {
    pub fn last_batch(&self) -> Vec<OrderUpdate> {
        self.batches.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

/// In-memory backend with failure injection.
pub struct FakeBackend {
    pub store: LocalStore,
    pub controls: Arc<Controls>,
}

impl FakeBackend {
    fn read_guard(&self) -> Result<()> {
        if self.controls.fail_reads.load(Ordering::SeqCst) {
            return Err(PlannerError::Network("read timed out".into()));
        }
        Ok(())
    }

    fn write_guard(&self) -> Result<()> {
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(PlannerError::Backend { status: 500, message: "write rejected".into() });
        }
        Ok(())
    }
}

#[async_trait]
impl TaskGateway for FakeBackend {
    async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.read_guard()?;
        self.store.get_tasks().await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        self.write_guard()?;
        self.store.create_task(task).await
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        self.write_guard()?;
        self.store.update_task(task).await
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.write_guard()?;
        self.store.delete_task(id).await
    }

    async fn batch_update_tasks(&self, updates: &[OrderUpdate]) -> Result<()> {
        self.controls.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.controls.batches.lock().unwrap().push(updates.to_vec());
        if self.controls.fail_batch.load(Ordering::SeqCst) {
            return Err(PlannerError::Network("connection reset".into()));
        }
        self.store.batch_update_tasks(updates).await
    }
}

#[async_trait]
impl ProjectGateway for FakeBackend {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.read_guard()?;
        self.store.list_projects().await
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.store.find_project_by_name(name).await
    }

    async fn create_project(&self, name: &str) -> Result<Project> {
        self.store.create_project(name).await
    }
}

#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub message: String,
    pub date: DateKey,
    pub pending_len: Option<usize>,
    pub task_count: usize,
}

/// Replays canned replies and records what it was asked.
#[derive(Default)]
pub struct ScriptedAssistant {
    pub replies: Mutex<VecDeque<Result<String>>>,
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

#[async_trait]
impl SuggestionService for ScriptedAssistant {
    async fn suggest(&self, request: &PlanningRequest<'_>) -> Result<String> {
        self.seen.lock().unwrap().push(SeenRequest {
            message: request.message.to_string(),
            date: request.date,
            pending_len: request.pending.map(|p| p.len()),
            task_count: request.tasks.len(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

pub struct Fixture {
    pub planner: Planner,
    pub controls: Arc<Controls>,
    pub seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl Fixture {
    pub fn id_of(&self, title: &str) -> TaskId {
        self.planner
            .tasks()
            .iter()
            .find(|t| t.title == title)
            .map(|t| t.id)
            .unwrap_or_else(|| panic!("no task titled {title}"))
    }

    pub fn titles_on(&self, date: &str) -> Vec<String> {
        self.planner
            .board()
            .bucket(&day(date))
            .unwrap_or_default()
            .iter()
            .map(|t| t.title.clone())
            .collect()
    }
}

/// A planner centered on 2024-05-01 showing 04-30..05-02, seeded with
/// `(title, date)` tasks in order, all in project "Home".
pub async fn fixture(tasks: &[(&str, &str)], replies: Vec<Result<String>>) -> Fixture {
    let store = LocalStore::in_memory();
    let home = store.create_project("Home").await.unwrap();
    let mut next_order: std::collections::HashMap<String, i64> = Default::default();
    for (title, date) in tasks {
        let order = next_order.entry(date.to_string()).or_insert(0);
        let mut draft = NewTask::new(*title, day(date));
        draft.order = *order;
        draft.estimated_minutes = 30;
        draft.projects.push(ProjectRef::from(&home));
        store.create_task(&draft).await.unwrap();
        *order += 1;
    }

    let controls = Arc::new(Controls::default());
    let backend = FakeBackend { store, controls: controls.clone() };
    let assistant = ScriptedAssistant { replies: Mutex::new(replies.into()), ..Default::default() };
    let seen = assistant.seen.clone();

    let mut planner = Planner::new(
        Box::new(backend),
        Some(Box::new(assistant)),
        VisibleRange::new(day("2024-05-01"), 1),
    );
    planner.refresh().await.unwrap();
    Fixture { planner, controls, seen }
}
