use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::date_key::DateKey;
use super::project::{Project, ProjectId, ProjectRef};
use super::task::{Task, TaskId};

pub const DEFAULT_EXPLANATION: &str = "AI suggestions ready to apply";

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap());

/// A task the assistant wants created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSuggestion {
    pub title: String,
    #[serde(rename = "description", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateKey>,
    #[serde(rename = "estimatedTime", skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    pub projects: Vec<ProjectRef>,
}

/// Changes the assistant wants made to an existing task. Absent fields keep
/// the current value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub id: TaskId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "description", skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateKey>,
    #[serde(rename = "estimatedTime", skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<ProjectRef>>,
}

impl TaskPatch {
    /// Overlay this patch on `base`. `projects` replaces the project list when
    /// given, otherwise the base list is kept.
    pub fn apply_to(&self, base: &Task, projects: Option<Vec<Project>>) -> Task {
        Task {
            id: base.id,
            title: self.title.clone().unwrap_or_else(|| base.title.clone()),
            notes: self.notes.clone().or_else(|| base.notes.clone()),
            date: self.date.unwrap_or(base.date),
            completed: self.completed.unwrap_or(base.completed),
            estimated_minutes: self.estimated_minutes.unwrap_or(base.estimated_minutes),
            order: self.order.unwrap_or(base.order),
            user_id: base.user_id.clone(),
            projects: projects.unwrap_or_else(|| base.projects.clone()),
        }
    }

    /// Names of fields this patch would actually change on `base`.
    pub fn changed_fields(&self, base: &Task) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.title.as_ref().is_some_and(|t| *t != base.title) {
            fields.push("title");
        }
        if self.notes.is_some() && self.notes != base.notes {
            fields.push("notes");
        }
        if self.date.is_some_and(|d| d != base.date) {
            fields.push("date");
        }
        if self.estimated_minutes.is_some_and(|m| m != base.estimated_minutes) {
            fields.push("estimatedTime");
        }
        if self.completed.is_some_and(|c| c != base.completed) {
            fields.push("completed");
        }
        if let Some(refs) = &self.projects {
            let mut new_names: Vec<String> = refs.iter().map(|r| r.name.to_lowercase()).collect();
            let mut old_names: Vec<String> = base.projects.iter().map(|p| p.name.to_lowercase()).collect();
            new_names.sort();
            old_names.sort();
            if new_names != old_names {
                fields.push("projects");
            }
        }
        fields
    }
}

/// The structured create/update/delete set carried by an assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SuggestionSet {
    pub create: Vec<TaskSuggestion>,
    pub update: Vec<TaskPatch>,
    pub delete: Vec<TaskId>,
}

impl SuggestionSet {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub suggestions: SuggestionSet,
    pub explanation: String,
}

// Wire shapes as the assistant writes them. Everything is optional and
// loosely typed; `normalize` turns them into the canonical types above.

#[derive(Deserialize)]
#[serde(untagged)]
enum WireProject {
    Name(String),
    Object {
        #[serde(default)]
        id: Option<Value>,
        name: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTask {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, alias = "notes")]
    description: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "estimatedTimeMinutes")]
    estimated_time: Option<f64>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    projects: Option<Vec<WireProject>>,
}

#[derive(Deserialize)]
struct WireChanges {
    #[serde(default)]
    create: Vec<WireTask>,
    #[serde(default)]
    update: Vec<WireTask>,
    #[serde(default)]
    delete: Vec<Value>,
}

fn value_as_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_project(p: WireProject) -> ProjectRef {
    match p {
        WireProject::Name(name) => ProjectRef::named(name.trim()),
        WireProject::Object { id, name } => ProjectRef {
            id: id.as_ref().and_then(value_as_id).filter(|id: &ProjectId| *id >= 0),
            name: name.trim().to_string(),
        },
    }
}

fn normalize_projects(projects: Option<Vec<WireProject>>) -> Option<Vec<ProjectRef>> {
    projects.map(|ps| {
        ps.into_iter()
            .map(normalize_project)
            .filter(|p| !p.name.is_empty())
            .collect()
    })
}

fn minutes(v: Option<f64>) -> Option<u32> {
    v.filter(|m| m.is_finite() && *m >= 0.0).map(|m| m.round() as u32)
}

fn parse_date(raw: Option<String>) -> Option<DateKey> {
    let raw = raw?;
    let parsed = DateKey::parse(&raw);
    if parsed.is_none() {
        log::warn!("Ignoring unparseable suggested date {:?}", raw);
    }
    parsed
}

fn normalize(changes: WireChanges) -> SuggestionSet {
    let create = changes
        .create
        .into_iter()
        .filter_map(|w| {
            let title = w.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
            let Some(title) = title else {
                log::warn!("Dropping suggested task without a title");
                return None;
            };
            Some(TaskSuggestion {
                title,
                notes: w.description,
                date: parse_date(w.date),
                estimated_minutes: minutes(w.estimated_time),
                completed: w.completed,
                order: w.order,
                projects: normalize_projects(w.projects).unwrap_or_default(),
            })
        })
        .collect();

    let update = changes
        .update
        .into_iter()
        .filter_map(|w| {
            let Some(id) = w.id.as_ref().and_then(value_as_id) else {
                log::warn!("Dropping suggested update without a task id");
                return None;
            };
            Some(TaskPatch {
                id,
                title: w.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
                notes: w.description,
                date: parse_date(w.date),
                estimated_minutes: minutes(w.estimated_time),
                completed: w.completed,
                order: w.order,
                projects: normalize_projects(w.projects),
            })
        })
        .collect();

    let delete = changes.delete.iter().filter_map(value_as_id).collect();

    SuggestionSet { create, update, delete }
}

fn reply_from_value(value: &Value) -> Option<ParsedReply> {
    let changes = value.get("changes")?;
    let wire: WireChanges = match serde_json::from_value(changes.clone()) {
        Ok(w) => w,
        Err(e) => {
            log::warn!("Suggestion payload has an unexpected shape: {}", e);
            return None;
        }
    };
    let explanation = value
        .get("explanation")
        .and_then(|e| e.as_str())
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EXPLANATION)
        .to_string();
    Some(ParsedReply { suggestions: normalize(wire), explanation })
}

fn reply_from_str(candidate: &str) -> Option<ParsedReply> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .and_then(|v| reply_from_value(&v))
}

/// Pull the structured suggestion payload out of an assistant reply.
///
/// Fenced code blocks are tried first, then the widest `{...}` span, then
/// the first JSON object that parses from any `{`. Returns `None` when no
/// payload with a `changes` object is found.
pub fn extract(response: &str) -> Option<ParsedReply> {
    if response.trim().is_empty() {
        log::error!("Received empty response from assistant");
        return None;
    }

    for caps in FENCE_RE.captures_iter(response) {
        if let Some(reply) = caps.get(1).and_then(|m| reply_from_str(m.as_str())) {
            return Some(reply);
        }
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            if let Some(reply) = reply_from_str(&response[start..=end]) {
                return Some(reply);
            }
        }
    }

    for (start, _) in response.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&response[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            if let Some(reply) = reply_from_value(&value) {
                return Some(reply);
            }
        }
    }

    log::warn!("No suggestion payload found in assistant reply");
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePreview {
    /// The current task, when it is known locally.
    pub original: Option<Task>,
    pub patch: TaskPatch,
}

impl UpdatePreview {
    pub fn updated(&self) -> Option<Task> {
        self.original.as_ref().map(|o| self.patch.apply_to(o, None))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeletePreview {
    pub id: TaskId,
    pub task: Option<Task>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Preview {
    pub creates: Vec<TaskSuggestion>,
    pub updates: Vec<UpdatePreview>,
    pub deletes: Vec<DeletePreview>,
}

impl Preview {
    pub fn build(suggestions: &SuggestionSet, tasks: &[Task]) -> Self {
        let find = |id: TaskId| tasks.iter().find(|t| t.id == id).cloned();
        Self {
            creates: suggestions.create.clone(),
            updates: suggestions
                .update
                .iter()
                .map(|patch| UpdatePreview { original: find(patch.id), patch: patch.clone() })
                .collect(),
            deletes: suggestions
                .delete
                .iter()
                .map(|id| DeletePreview { id: *id, task: find(*id) })
                .collect(),
        }
    }

    /// Whether a suggested project name has no match among `known`.
    pub fn is_new_project(name: &str, known: &[Project]) -> bool {
        !known.iter().any(|p| p.matches_name(name))
    }
}
