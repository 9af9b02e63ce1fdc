use super::task::{Task, TaskId};

/// Client-side copy of the server's task collection.
///
/// Authoritative only while a mutation is in flight; `stale` marks that the
/// next read should refetch.
#[derive(Debug, Clone, Default)]
pub struct TaskCache {
    tasks: Vec<Task>,
    loaded: bool,
    stale: bool,
}

impl TaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut Vec<Task> {
        &mut self.tasks
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// True when the cache was never loaded or was invalidated.
    pub fn needs_refresh(&self) -> bool {
        !self.loaded || self.stale
    }

    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.loaded = true;
        self.stale = false;
    }

    pub fn invalidate(&mut self) {
        self.stale = true;
    }

    pub fn prepend(&mut self, task: Task) {
        self.tasks.insert(0, task);
    }

    fn replace(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => self.tasks.push(task),
        }
    }

    fn remove(&mut self, id: TaskId) {
        self.tasks.retain(|t| t.id != id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    Update(Task),
    Delete(TaskId),
}

impl TaskChange {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Update(t) => t.id,
            Self::Delete(id) => *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    Confirmed,
    RolledBack,
}

/// A speculative cache change awaiting server confirmation.
///
/// `begin` applies the change and keeps the pre-image. Exactly one of
/// `confirm` or `roll_back` ends it; both consume the mutation.
#[derive(Debug)]
pub struct Optimistic {
    change: TaskChange,
    pre_image: Vec<Task>,
    state: MutationState,
}

impl Optimistic {
    pub fn begin(cache: &mut TaskCache, change: TaskChange) -> Self {
        let pre_image = cache.tasks.clone();
        match &change {
            TaskChange::Update(task) => cache.replace(task.clone()),
            TaskChange::Delete(id) => cache.remove(*id),
        }
        Self { change, pre_image, state: MutationState::Pending }
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn change(&self) -> &TaskChange {
        &self.change
    }

    /// Accept the server's answer. An update is replaced by the returned row.
    pub fn confirm(mut self, cache: &mut TaskCache, server: Option<Task>) -> MutationState {
        if let Some(task) = server {
            cache.replace(task);
        }
        self.state = MutationState::Confirmed;
        self.state
    }

    /// Restore the cache exactly as it was before `begin`.
    pub fn roll_back(mut self, cache: &mut TaskCache) -> MutationState {
        cache.tasks = std::mem::take(&mut self.pre_image);
        self.state = MutationState::RolledBack;
        self.state
    }
}
