use crate::core::board::{DragId, Snapshot};
use crate::core::date_key::DateKey;
use crate::core::drag::{self, CommitResolution, CommitTicket, DragSession, DropOutcome};
use crate::core::mutation::{MutationState, Optimistic, TaskCache, TaskChange};
use crate::core::project::{Project, ProjectId, ProjectRef};
use crate::core::suggestion::{self, Preview, SuggestionSet};
use crate::core::task::{self, NewTask, Task, TaskId};
use crate::core::temporal::{self, VisibleRange};
use crate::error::{PlannerError, Result};
use crate::session::{ChatMessage, Session};
use crate::sync::{self, Backend, PlanningRequest, SuggestionService};

pub const UNPARSEABLE_REPLY: &str = "I couldn't process that request properly. Please try again. \
     The AI response did not contain valid suggestions.";

/// The planner for one signed-in session.
///
/// Owns the task cache, the rendered date buckets, drag state and the
/// assistant conversation. Every mutation goes through the backend and
/// posts a notice on the session.
pub struct Planner {
    backend: Box<dyn Backend>,
    assistant: Option<Box<dyn SuggestionService>>,
    cache: TaskCache,
    projects: Vec<Project>,
    range: VisibleRange,
    project_filter: Option<ProjectId>,
    week_starts_on_monday: bool,
    board: Snapshot,
    drag: DragSession,
    session: Session,
}

impl Planner {
    pub fn new(
        backend: Box<dyn Backend>,
        assistant: Option<Box<dyn SuggestionService>>,
        range: VisibleRange,
    ) -> Self {
        Self {
            backend,
            assistant,
            cache: TaskCache::new(),
            projects: Vec::new(),
            range,
            project_filter: None,
            week_starts_on_monday: true,
            board: Snapshot::build(&[], &range.dates(), None),
            drag: DragSession::new(),
            session: Session::new(),
        }
    }

    pub fn with_week_start(mut self, starts_on_monday: bool) -> Self {
        self.week_starts_on_monday = starts_on_monday;
        self
    }

    pub fn tasks(&self) -> &[Task] {
        self.cache.tasks()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.cache.get(id)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn board(&self) -> &Snapshot {
        &self.board
    }

    pub fn range(&self) -> VisibleRange {
        self.range
    }

    pub fn project_filter(&self) -> Option<ProjectId> {
        self.project_filter
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn needs_refresh(&self) -> bool {
        self.cache.needs_refresh()
    }

    /// Refetch tasks and projects from the backend.
    pub async fn refresh(&mut self) -> Result<()> {
        let tasks = self.backend.get_tasks().await?;
        let projects = self.backend.list_projects().await?;
        log::debug!("Loaded {} tasks and {} projects", tasks.len(), projects.len());
        self.cache.replace_all(tasks);
        self.projects = projects;
        self.rebuild_board();
        Ok(())
    }

    /// Refetch only when the cache was never loaded or has gone stale.
    pub async fn ensure_fresh(&mut self) -> Result<()> {
        if self.cache.needs_refresh() {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Recompute the visible buckets. Skipped while a drag owns the board.
    fn rebuild_board(&mut self) {
        if self.drag.is_dragging() {
            return;
        }
        self.board = Snapshot::build(self.cache.tasks(), &self.range.dates(), self.project_filter);
    }

    pub fn previous_day(&mut self) {
        self.range.previous();
        self.rebuild_board();
    }

    pub fn next_day(&mut self) {
        self.range.next();
        self.rebuild_board();
    }

    pub fn jump_to(&mut self, date: DateKey) {
        self.range.jump_to(date);
        self.rebuild_board();
    }

    pub fn set_visible_days(&mut self, radius: u32) {
        self.range.set_radius(radius);
        self.rebuild_board();
    }

    pub fn set_project_filter(&mut self, project: Option<ProjectId>) {
        self.project_filter = project;
        self.rebuild_board();
    }

    pub fn tasks_for_date(&self, date: DateKey) -> Vec<Task> {
        let mut tasks = temporal::tasks_for_date(self.cache.tasks(), date);
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    pub fn tasks_for_week(&self, date: DateKey) -> Vec<Task> {
        temporal::tasks_for_week(self.cache.tasks(), date, self.week_starts_on_monday)
    }

    // Single-task mutations

    pub async fn create_task(&mut self, mut draft: NewTask) -> Result<Task> {
        if let Err(e) = draft.validate() {
            self.session.notify_error(e.to_string());
            return Err(e);
        }
        draft.title = draft.title.trim().to_string();

        let created = match self.persist_new(draft).await {
            Ok(task) => task,
            Err(e) => {
                self.session.notify_error(format!("Failed to create task: {}", e));
                return Err(e);
            }
        };

        self.cache.prepend(created.clone());
        self.cache.invalidate();
        self.rebuild_board();
        self.session.notify_success("Task created successfully");
        Ok(created)
    }

    async fn persist_new(&mut self, mut draft: NewTask) -> Result<Task> {
        let projects = sync::resolve_projects(&*self.backend, &draft.projects).await?;
        self.remember_projects(&projects);
        draft.projects = projects.iter().map(ProjectRef::from).collect();
        self.backend.create_task(&draft).await
    }

    fn remember_projects(&mut self, projects: &[Project]) {
        for p in projects {
            if !self.projects.iter().any(|known| known.id == p.id) {
                self.projects.push(p.clone());
            }
        }
        self.projects.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Speculatively apply `change`, then confirm or roll back against the
    /// backend. Returns the settled state.
    async fn run_optimistic(&mut self, change: TaskChange) -> (MutationState, Result<Option<Task>>) {
        let mutation = Optimistic::begin(&mut self.cache, change.clone());
        self.rebuild_board();

        let result = match &change {
            TaskChange::Update(task) => self.backend.update_task(task).await.map(Some),
            TaskChange::Delete(id) => self.backend.delete_task(*id).await.map(|_| None),
        };

        let state = match &result {
            Ok(server) => mutation.confirm(&mut self.cache, server.clone()),
            Err(e) => {
                log::warn!("Rolling back change to task {}: {}", change.task_id(), e);
                mutation.roll_back(&mut self.cache)
            }
        };
        self.cache.invalidate();
        self.rebuild_board();
        (state, result)
    }

    async fn apply_update(&mut self, task: Task, success: &str, failure: &str) -> Result<Task> {
        let id = task.id;
        match self.run_optimistic(TaskChange::Update(task)).await {
            (_, Ok(server)) => {
                self.session.notify_success(success);
                match server {
                    Some(task) => Ok(task),
                    None => self.cache.get(id).cloned().ok_or_else(|| PlannerError::NotFound(format!("task {}", id))),
                }
            }
            (_, Err(e)) => {
                self.session.notify_error(format!("{}: {}", failure, e));
                Err(e)
            }
        }
    }

    pub async fn update_task(&mut self, task: Task) -> Result<Task> {
        if let Err(e) = task::validate_fields(&task.title, task.projects.len()) {
            self.session.notify_error(e.to_string());
            return Err(e);
        }
        self.apply_update(task, "Task updated successfully", "Failed to update task").await
    }

    pub async fn delete_task(&mut self, id: TaskId) -> Result<()> {
        match self.run_optimistic(TaskChange::Delete(id)).await {
            (_, Ok(_)) => {
                self.session.notify_success("Task deleted successfully");
                Ok(())
            }
            (_, Err(e)) => {
                self.session.notify_error(format!("Failed to delete task: {}", e));
                Err(e)
            }
        }
    }

    fn cached(&self, id: TaskId) -> Result<Task> {
        self.cache
            .get(id)
            .cloned()
            .ok_or_else(|| PlannerError::NotFound(format!("task {}", id)))
    }

    pub async fn toggle_complete(&mut self, id: TaskId) -> Result<Task> {
        let task = self.cached(id)?.toggled();
        let success = if task.completed {
            "Task marked as completed"
        } else {
            "Task marked as incomplete"
        };
        self.apply_update(task, success, "Failed to update task completion status")
            .await
    }

    pub async fn complete_task(&mut self, id: TaskId) -> Result<Task> {
        let task = Task { completed: true, ..self.cached(id)? };
        self.apply_update(task, "Task marked as completed", "Failed to complete task")
            .await
    }

    // Projects

    pub async fn find_project(&self, name: &str) -> Result<Option<Project>> {
        self.backend.find_project_by_name(name).await
    }

    pub async fn create_project(&mut self, name: &str) -> Result<Project> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PlannerError::validation("Project name is required"));
        }
        match self.backend.create_project(name).await {
            Ok(project) => {
                self.remember_projects(std::slice::from_ref(&project));
                self.session.notify_success(format!("Created project: {}", project.name));
                Ok(project)
            }
            Err(e) => {
                self.session.notify_error(format!("Failed to create project: {}", e));
                Err(e)
            }
        }
    }

    // Drag and drop

    /// Begin dragging. Returns the task for overlay rendering; anything that
    /// is not a rendered task is ignored.
    pub fn drag_start(&mut self, active: DragId) -> Option<Task> {
        active.task_id()?;
        let task = self.drag.start(&self.board, active)?;
        self.session.active_task_id = Some(task.id);
        self.session.dragged_task_id = Some(task.id);
        Some(task)
    }

    pub fn drag_over(&mut self, over: &DragId) -> bool {
        self.session.drag_over_task_id = over.task_id();
        self.drag.hover(&mut self.board, over)
    }

    /// Release the drag. `over` is `None` when dropped outside every target.
    pub fn drag_end(&mut self, over: Option<&DragId>) -> DropOutcome {
        let outcome = self.drag.release(&mut self.board, over);
        self.session.active_task_id = None;
        self.session.clear_drag();
        outcome
    }

    /// Send a drop's batch and settle the board with the result.
    pub async fn commit(&mut self, ticket: CommitTicket) -> CommitResolution {
        log::info!("Committing {} task updates", ticket.updates.len());
        let result = self
            .backend
            .batch_update_tasks(&ticket.updates)
            .await
            .map_err(|e| e.to_string());

        let resolution = self.drag.resolve(&mut self.board, ticket, result);
        match &resolution {
            CommitResolution::Confirmed(updates) => {
                drag::apply_updates(self.cache.tasks_mut(), updates);
                self.rebuild_board();
            }
            CommitResolution::RolledBack(e) => {
                self.session
                    .notify_error(format!("Failed to save changes. Reverting... ({})", e));
            }
            CommitResolution::Stale => {}
        }
        // Failed batches may have partially landed; reconcile on next read.
        self.cache.invalidate();
        resolution
    }

    /// Release and, when something moved, commit. `None` means nothing was sent.
    pub async fn finish_drag(&mut self, over: Option<&DragId>) -> Option<CommitResolution> {
        match self.drag_end(over) {
            DropOutcome::Commit(ticket) => Some(self.commit(ticket).await),
            _ => None,
        }
    }

    // Planning assistant

    /// Send a chat message to the assistant.
    ///
    /// Failures become assistant messages; only authentication errors are
    /// returned so the caller can ask the user to log in again.
    pub async fn send_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() || self.session.is_ai_loading {
            return Ok(());
        }
        self.session.chat.push(ChatMessage::user(text));
        self.session.is_ai_loading = true;

        let reply = match &self.assistant {
            Some(assistant) => {
                let request = PlanningRequest {
                    message: text,
                    date: self.range.center,
                    pending: self.session.pending.as_ref(),
                    tasks: self.cache.tasks(),
                };
                assistant.suggest(&request).await
            }
            None => Err(PlannerError::Config("no planning assistant is configured".into())),
        };
        self.session.is_ai_loading = false;

        let reply = reply.and_then(|r| {
            if r.trim().is_empty() {
                Err(PlannerError::SuggestionParse("Received empty response from AI".into()))
            } else {
                Ok(r)
            }
        });

        match reply {
            Ok(raw) => match suggestion::extract(&raw) {
                Some(parsed) => {
                    let set = parsed.suggestions;
                    if set.is_empty() {
                        self.session.chat.push(ChatMessage::assistant(parsed.explanation, None));
                    } else {
                        log::info!("Assistant suggested {} changes", set.len());
                        self.session.pending = Some(set.clone());
                        self.session.is_preview_open = true;
                        self.session.chat.push(ChatMessage::assistant(parsed.explanation, Some(set)));
                    }
                    Ok(())
                }
                None => {
                    self.session.chat.push(ChatMessage::assistant(UNPARSEABLE_REPLY, None));
                    Ok(())
                }
            },
            Err(e) => {
                log::error!("Assistant request failed: {}", e);
                self.session
                    .chat
                    .push(ChatMessage::assistant(format!("Sorry, I encountered an error: {}", e), None));
                if e.is_auth() { Err(e) } else { Ok(()) }
            }
        }
    }

    /// Pending suggestions paired with the current tasks they touch.
    pub fn preview(&self) -> Option<Preview> {
        self.session
            .pending
            .as_ref()
            .map(|set| Preview::build(set, self.cache.tasks()))
    }

    pub fn is_new_project(&self, name: &str) -> bool {
        Preview::is_new_project(name, &self.projects)
    }

    pub fn discard_suggestions(&mut self) {
        if self.session.pending.is_some() {
            log::debug!("Discarding pending suggestions");
        }
        self.session.clear_pending();
    }

    /// Apply the pending suggestions: creates, then updates, then deletes.
    ///
    /// On failure the pending set is kept so the user can retry; whatever
    /// already landed shows up after the refetch. Once every write has
    /// landed the set is cleared even if the refetch fails.
    pub async fn apply_suggestions(&mut self) -> Result<()> {
        let Some(set) = self.session.pending.clone() else {
            return Ok(());
        };
        self.session.is_applying = true;
        let result = self.apply_set(&set).await;
        self.session.is_applying = false;

        match result {
            Ok(()) => {
                self.session.clear_pending();
                self.session.notify_success(format!("Applied {} suggested changes", set.len()));
                if let Err(e) = self.refresh().await {
                    log::warn!("Refetch after apply failed: {}", e);
                    self.session.notify_error(format!("Failed to reload tasks: {}", e));
                    self.cache.invalidate();
                }
                Ok(())
            }
            Err(e) => {
                self.session.notify_error(format!("Failed to apply suggestions: {}", e));
                self.cache.invalidate();
                if let Err(refetch) = self.refresh().await {
                    log::warn!("Refetch after failed apply also failed: {}", refetch);
                }
                Err(e)
            }
        }
    }

    async fn apply_set(&mut self, set: &SuggestionSet) -> Result<()> {
        let today = DateKey::today();

        for s in &set.create {
            let draft = NewTask {
                title: s.title.clone(),
                notes: s.notes.clone(),
                date: s.date.unwrap_or(today),
                completed: s.completed.unwrap_or(false),
                estimated_minutes: s.estimated_minutes.unwrap_or(0),
                order: s.order.unwrap_or(0),
                projects: s.projects.clone(),
            };
            let created = self.persist_new(draft).await?;
            log::debug!("Created suggested task {} ({})", created.id, created.title);
        }

        if !set.update.is_empty() {
            let current = self.backend.get_tasks().await?;
            for patch in &set.update {
                let Some(original) = current.iter().find(|t| t.id == patch.id) else {
                    self.session
                        .notify_error(format!("Task {} no longer exists; skipped its update", patch.id));
                    continue;
                };
                let projects = match &patch.projects {
                    Some(refs) => {
                        let resolved = sync::resolve_projects(&*self.backend, refs).await?;
                        self.remember_projects(&resolved);
                        Some(resolved)
                    }
                    None => None,
                };
                let updated = patch.apply_to(original, projects);
                self.backend.update_task(&updated).await?;
            }
        }

        for id in &set.delete {
            self.backend.delete_task(*id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::OrderUpdate;
    use crate::session::{NoticeLevel, Role};
    use crate::sync::local::LocalStore;
    use crate::sync::{ProjectGateway, TaskGateway};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Local store whose writes can be made to fail.
    struct Flaky {
        inner: LocalStore,
        fail_writes: Arc<AtomicBool>,
    }

    impl Flaky {
        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(PlannerError::Network("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TaskGateway for Flaky {
        async fn get_tasks(&self) -> Result<Vec<Task>> {
            self.inner.get_tasks().await
        }
        async fn create_task(&self, task: &NewTask) -> Result<Task> {
            self.check()?;
            self.inner.create_task(task).await
        }
        async fn update_task(&self, task: &Task) -> Result<Task> {
            self.check()?;
            self.inner.update_task(task).await
        }
        async fn delete_task(&self, id: TaskId) -> Result<()> {
            self.check()?;
            self.inner.delete_task(id).await
        }
        async fn batch_update_tasks(&self, updates: &[OrderUpdate]) -> Result<()> {
            self.check()?;
            self.inner.batch_update_tasks(updates).await
        }
    }

    #[async_trait]
    impl ProjectGateway for Flaky {
        async fn list_projects(&self) -> Result<Vec<Project>> {
            self.inner.list_projects().await
        }
        async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
            self.inner.find_project_by_name(name).await
        }
        async fn create_project(&self, name: &str) -> Result<Project> {
            self.inner.create_project(name).await
        }
    }

    fn day(s: &str) -> DateKey {
        DateKey::parse(s).unwrap()
    }

    async fn planner_with(titles: &[(&str, &str)]) -> (Planner, Arc<AtomicBool>) {
        let fail = Arc::new(AtomicBool::new(false));
        let store = LocalStore::in_memory();
        let home = store.create_project("Home").await.unwrap();
        for (i, (title, date)) in titles.iter().enumerate() {
            let mut draft = NewTask::new(*title, day(date));
            draft.order = i as i64;
            draft.projects.push(ProjectRef::from(&home));
            store.create_task(&draft).await.unwrap();
        }
        let backend = Flaky { inner: store, fail_writes: fail.clone() };
        let mut planner =
            Planner::new(Box::new(backend), None, VisibleRange::new(day("2024-05-01"), 1));
        planner.refresh().await.unwrap();
        (planner, fail)
    }

    #[tokio::test]
    async fn board_covers_every_visible_day() {
        let (planner, _) = planner_with(&[("A", "2024-05-01")]).await;
        let keys: Vec<String> = planner.board().keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2024-04-30", "2024-05-01", "2024-05-02"]);
        assert_eq!(planner.board().task_count(), 1);
    }

    #[tokio::test]
    async fn validation_failure_touches_nothing() {
        let (mut planner, _) = planner_with(&[]).await;
        let err = planner
            .create_task(NewTask::new("   ", day("2024-05-01")).with_project("Home"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Validation(_)));
        assert!(planner.tasks().is_empty());
        assert_eq!(planner.session().notices()[0].message, "Title is required");
    }

    #[tokio::test]
    async fn failed_delete_rolls_back() {
        let (mut planner, fail) = planner_with(&[("A", "2024-05-01")]).await;
        let id = planner.tasks()[0].id;
        fail.store(true, Ordering::SeqCst);

        assert!(planner.delete_task(id).await.is_err());
        assert!(planner.task(id).is_some());
        assert_eq!(planner.board().task_count(), 1);
        let notice = planner.session_mut().take_notices().pop().unwrap();
        assert_eq!(notice.level, NoticeLevel::Error);
        assert!(notice.message.starts_with("Failed to delete task"));
        assert!(planner.needs_refresh());
    }

    #[tokio::test]
    async fn toggle_reports_direction() {
        let (mut planner, _) = planner_with(&[("A", "2024-05-01")]).await;
        let id = planner.tasks()[0].id;
        assert!(planner.toggle_complete(id).await.unwrap().completed);
        assert!(!planner.toggle_complete(id).await.unwrap().completed);
        let messages: Vec<String> =
            planner.session_mut().take_notices().into_iter().map(|n| n.message).collect();
        assert_eq!(messages, vec!["Task marked as completed", "Task marked as incomplete"]);
    }

    #[tokio::test]
    async fn failed_commit_reverts_board() {
        let (mut planner, fail) = planner_with(&[("A", "2024-05-01"), ("B", "2024-05-01")]).await;
        let a = planner.tasks().iter().find(|t| t.title == "A").unwrap().id;
        let before = planner.board().clone();

        planner.drag_start(DragId::Task(a));
        assert!(planner.drag_over(&DragId::Bucket(day("2024-05-02"))));
        fail.store(true, Ordering::SeqCst);
        let resolution = planner
            .finish_drag(Some(&DragId::Bucket(day("2024-05-02"))))
            .await
            .unwrap();

        assert!(matches!(resolution, CommitResolution::RolledBack(_)));
        assert_eq!(planner.board(), &before);
        assert_eq!(planner.task(a).unwrap().date, day("2024-05-01"));
        assert!(planner.session().dragged_task_id.is_none());
    }

    #[tokio::test]
    async fn missing_assistant_is_reported_in_chat() {
        let (mut planner, _) = planner_with(&[]).await;
        planner.send_message("plan my day").await.unwrap();
        let chat = &planner.session().chat;
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[1].role, Role::Assistant);
        assert!(chat[1].content.starts_with("Sorry, I encountered an error:"));
        assert!(!planner.session().is_ai_loading);
    }
}
