use serde::{Deserialize, Serialize};

pub type ProjectId = i64;

/// A persisted project. Names are unique server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

impl Project {
    pub fn new(id: ProjectId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.trim())
    }
}

/// A reference to a project that may not exist yet.
///
/// Forms and assistant suggestions name projects that have no server row;
/// those carry `id: None` and are created before the task that uses them is
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: Option<ProjectId>,
    pub name: String,
}

impl ProjectRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into() }
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some_and(|id| id >= 0)
    }

    /// The persisted project this reference points at, if it has a real id.
    pub fn as_project(&self) -> Option<Project> {
        match self.id {
            Some(id) if id >= 0 => Some(Project::new(id, self.name.clone())),
            _ => None,
        }
    }
}

impl From<&Project> for ProjectRef {
    fn from(p: &Project) -> Self {
        Self { id: Some(p.id), name: p.name.clone() }
    }
}

/// Find a project by case-insensitive name.
pub fn find_by_name<'a>(projects: &'a [Project], name: &str) -> Option<&'a Project> {
    projects.iter().find(|p| p.matches_name(name))
}
