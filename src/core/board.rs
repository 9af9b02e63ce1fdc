use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::date_key::DateKey;
use super::project::ProjectId;
use super::task::{Task, TaskId};

const TASK_PREFIX: &str = "task-";

/// Identifier of something that can be dragged or hovered.
///
/// A bucket id is the date key itself (hovering an empty day); a task id
/// is rendered as `task-<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DragId {
    Bucket(DateKey),
    Task(TaskId),
}

impl DragId {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Task(id) => Some(*id),
            Self::Bucket(_) => None,
        }
    }
}

impl fmt::Display for DragId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bucket(key) => write!(f, "{}", key),
            Self::Task(id) => write!(f, "{}{}", TASK_PREFIX, id),
        }
    }
}

impl FromStr for DragId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let numeric = s.strip_prefix(TASK_PREFIX).unwrap_or(s);
        if let Ok(id) = numeric.parse::<TaskId>() {
            return Ok(Self::Task(id));
        }
        DateKey::parse(s)
            .map(Self::Bucket)
            .ok_or_else(|| format!("not a task or day: {}", s))
    }
}

/// The rendered date buckets: each visible day mapped to its tasks in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    buckets: BTreeMap<DateKey, Vec<Task>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive buckets for `dates` from the full task collection.
    ///
    /// Every requested day gets a bucket, empty or not. With a project
    /// filter only tasks tagged with that project are kept.
    pub fn build(tasks: &[Task], dates: &[DateKey], project: Option<ProjectId>) -> Self {
        let mut buckets: BTreeMap<DateKey, Vec<Task>> =
            dates.iter().map(|d| (*d, Vec::new())).collect();

        for task in tasks {
            if let Some(pid) = project {
                if !task.has_project(pid) {
                    continue;
                }
            }
            if let Some(bucket) = buckets.get_mut(&task.date) {
                bucket.push(task.clone());
            }
        }

        for bucket in buckets.values_mut() {
            bucket.sort_by_key(|t| t.order);
        }

        Self { buckets }
    }

    pub fn from_buckets(buckets: impl IntoIterator<Item = (DateKey, Vec<Task>)>) -> Self {
        Self { buckets: buckets.into_iter().collect() }
    }

    pub fn bucket(&self, key: &DateKey) -> Option<&[Task]> {
        self.buckets.get(key).map(|b| b.as_slice())
    }

    pub(crate) fn set_bucket(&mut self, key: DateKey, tasks: Vec<Task>) {
        self.buckets.insert(key, tasks);
    }

    pub fn keys(&self) -> impl Iterator<Item = &DateKey> {
        self.buckets.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DateKey, &Vec<Task>)> {
        self.buckets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.is_empty())
    }

    pub fn task_count(&self) -> usize {
        self.buckets.values().map(|b| b.len()).sum()
    }

    /// Which bucket currently holds `id`.
    ///
    /// A bucket id resolves to itself when that bucket is rendered; a task id
    /// resolves to the bucket containing the task. `None` means the caller
    /// should do nothing.
    pub fn find_container(&self, id: &DragId) -> Option<DateKey> {
        match id {
            DragId::Bucket(key) => self.buckets.contains_key(key).then_some(*key),
            DragId::Task(task_id) => self
                .buckets
                .iter()
                .find(|(_, tasks)| tasks.iter().any(|t| t.id == *task_id))
                .map(|(key, _)| *key),
        }
    }

    /// Bucket and stored order of a task.
    pub fn placement(&self, task_id: TaskId) -> Option<(DateKey, i64)> {
        self.buckets.iter().find_map(|(key, tasks)| {
            tasks.iter().find(|t| t.id == task_id).map(|t| (*key, t.order))
        })
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.buckets.values().flatten().find(|t| t.id == task_id)
    }
}
