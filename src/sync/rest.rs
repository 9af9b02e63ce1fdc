use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{ProjectGateway, TaskGateway};
use crate::core::date_key::DateKey;
use crate::core::project::Project;
use crate::core::task::{NewTask, OrderUpdate, Task, TaskId};
use crate::error::{PlannerError, Result};

const TASK_SELECT: &str = "*,projects:tasks_projects(project:projects(id,name))";

/// Tokens returned by a password sign-in.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectLink {
    project: Option<Project>,
}

/// A `tasks` row as the REST layer returns it.
#[derive(Debug, Deserialize)]
struct TaskRow {
    id: TaskId,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    date: DateKey,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    estimated_time: Option<u32>,
    #[serde(default)]
    order: Option<i64>,
    user_id: String,
    #[serde(default)]
    projects: Option<Vec<ProjectLink>>,
}

impl TaskRow {
    fn into_task(self, projects: Option<Vec<Project>>) -> Task {
        let linked = self
            .projects
            .unwrap_or_default()
            .into_iter()
            .filter_map(|l| l.project)
            .collect();
        Task {
            id: self.id,
            title: self.title,
            notes: self.notes.filter(|n| !n.is_empty()).or(self.description.filter(|d| !d.is_empty())),
            date: self.date,
            completed: self.completed.unwrap_or(false),
            estimated_minutes: self.estimated_time.unwrap_or(0),
            order: self.order.unwrap_or(0),
            user_id: self.user_id,
            projects: projects.unwrap_or(linked),
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskWrite<'a> {
    title: &'a str,
    notes: Option<&'a str>,
    date: DateKey,
    completed: bool,
    estimated_time: u32,
    order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderWrite {
    order: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<DateKey>,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct LinkWrite {
    task_id: TaskId,
    project_id: i64,
}

/// Client for the hosted backend: PostgREST tables under `/rest/v1` and
/// GoTrue auth under `/auth/v1`.
pub struct RestGateway {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    user_id: OnceCell<String>,
    http: Client,
}

impl RestGateway {
    pub fn new(base_url: &str, anon_key: &str, access_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| PlannerError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token,
            user_id: OnceCell::new(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
    }

    fn require_token(&self) -> Result<()> {
        match self.access_token {
            Some(_) => Ok(()),
            None => Err(PlannerError::Auth("Please log in first".into())),
        }
    }

    /// Exchange email and password for a session.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let resp = self
            .http
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .header(CONTENT_TYPE, "application/json")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Sign-in request failed: {}", e)))?;
        let resp = check(resp).await.map_err(|e| match e {
            PlannerError::Backend { status: 400, message } => PlannerError::Auth(message),
            other => other,
        })?;
        Ok(resp.json().await?)
    }

    /// The signed-in user's id, fetched once per gateway.
    pub async fn user_id(&self) -> Result<String> {
        self.require_token()?;
        let id = self
            .user_id
            .get_or_try_init(|| async {
                let resp = self
                    .request(Method::GET, "/auth/v1/user")
                    .send()
                    .await
                    .map_err(|e| PlannerError::Network(format!("User lookup failed: {}", e)))?;
                let user: AuthUser = check(resp).await?.json().await?;
                Ok::<_, PlannerError>(user.id)
            })
            .await?;
        Ok(id.clone())
    }

    async fn replace_links(&self, task_id: TaskId, projects: &[Project]) -> Result<()> {
        let resp = self
            .request(Method::DELETE, "/rest/v1/tasks_projects")
            .query(&[("task_id", format!("eq.{}", task_id))])
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Unlinking projects failed: {}", e)))?;
        check(resp).await?;
        self.insert_links(task_id, projects).await
    }

    async fn insert_links(&self, task_id: TaskId, projects: &[Project]) -> Result<()> {
        if projects.is_empty() {
            return Ok(());
        }
        let links: Vec<LinkWrite> = projects
            .iter()
            .map(|p| LinkWrite { task_id, project_id: p.id })
            .collect();
        let resp = self
            .request(Method::POST, "/rest/v1/tasks_projects")
            .json(&links)
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Linking projects failed: {}", e)))?;
        check(resp).await?;
        Ok(())
    }

    async fn patch_order(&self, user_id: &str, update: &OrderUpdate) -> Result<()> {
        let body = OrderWrite {
            order: update.order,
            date: update.date,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        let resp = self
            .request(Method::PATCH, "/rest/v1/tasks")
            .query(&[("id", format!("eq.{}", update.id)), ("user_id", format!("eq.{}", user_id))])
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Updating task {} failed: {}", update.id, e)))?;
        check(resp).await?;
        Ok(())
    }
}

/// Pass successful responses through; turn the rest into errors, preferring
/// the backend's own message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or(text);
    Err(PlannerError::from_status(status.as_u16(), message))
}

#[async_trait]
impl TaskGateway for RestGateway {
    async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.require_token()?;
        let resp = self
            .request(Method::GET, "/rest/v1/tasks")
            .query(&[("select", TASK_SELECT), ("order", "order.asc")])
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Fetching tasks failed: {}", e)))?;
        let rows: Vec<TaskRow> = check(resp).await?.json().await?;
        log::debug!("Fetched {} tasks", rows.len());
        Ok(rows.into_iter().map(|r| r.into_task(None)).collect())
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        let user_id = self.user_id().await?;
        let projects: Vec<Project> = task
            .projects
            .iter()
            .map(|r| {
                r.as_project()
                    .ok_or_else(|| PlannerError::validation(format!("project {:?} is not saved", r.name)))
            })
            .collect::<Result<_>>()?;

        let body = TaskWrite {
            title: &task.title,
            notes: task.notes.as_deref(),
            date: task.date,
            completed: task.completed,
            estimated_time: task.estimated_minutes,
            order: task.order,
            user_id: Some(&user_id),
            updated_at: None,
        };
        let resp = self
            .request(Method::POST, "/rest/v1/tasks")
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Creating task failed: {}", e)))?;
        let rows: Vec<TaskRow> = check(resp).await?.json().await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PlannerError::Backend { status: 200, message: "no task returned".into() })?;
        let id = row.id;

        self.insert_links(id, &projects).await?;
        log::info!("Created task {} ({})", id, task.title);
        Ok(row.into_task(Some(projects)))
    }

    async fn update_task(&self, task: &Task) -> Result<Task> {
        self.require_token()?;
        let body = TaskWrite {
            title: &task.title,
            notes: task.notes.as_deref(),
            date: task.date,
            completed: task.completed,
            estimated_time: task.estimated_minutes,
            order: task.order,
            user_id: None,
            updated_at: Some(chrono::Utc::now().to_rfc3339()),
        };
        let resp = self
            .request(Method::PATCH, "/rest/v1/tasks")
            .query(&[("id", format!("eq.{}", task.id))])
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Updating task failed: {}", e)))?;
        let rows: Vec<TaskRow> = check(resp).await?.json().await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PlannerError::NotFound(format!("task {}", task.id)))?;

        self.replace_links(task.id, &task.projects).await?;
        Ok(row.into_task(Some(task.projects.clone())))
    }

    async fn delete_task(&self, id: TaskId) -> Result<()> {
        self.require_token()?;
        // Link rows cascade server-side
        let resp = self
            .request(Method::DELETE, "/rest/v1/tasks")
            .query(&[("id", format!("eq.{}", id))])
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Deleting task failed: {}", e)))?;
        check(resp).await?;
        Ok(())
    }

    async fn batch_update_tasks(&self, updates: &[OrderUpdate]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let user_id = self.user_id().await?;
        log::info!("Batch updating {} tasks", updates.len());

        let results = join_all(updates.iter().map(|u| self.patch_order(&user_id, u))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        match results.into_iter().find_map(|r| r.err()) {
            Some(e) => {
                log::error!("Batch update: {} of {} records failed", failed, updates.len());
                Err(e)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ProjectGateway for RestGateway {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.require_token()?;
        let resp = self
            .request(Method::GET, "/rest/v1/projects")
            .query(&[("select", "id,name"), ("order", "name.asc")])
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Fetching projects failed: {}", e)))?;
        Ok(check(resp).await?.json().await?)
    }

    async fn find_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        self.require_token()?;
        let resp = self
            .request(Method::GET, "/rest/v1/projects")
            .query(&[
                ("select", "id,name".to_string()),
                ("name", format!("ilike.{}", escape_like(name.trim()))),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Project lookup failed: {}", e)))?;
        let rows: Vec<Project> = check(resp).await?.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn create_project(&self, name: &str) -> Result<Project> {
        self.require_token()?;
        let resp = self
            .request(Method::POST, "/rest/v1/projects")
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "name": name.trim() }))
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("Creating project failed: {}", e)))?;
        let rows: Vec<Project> = check(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| PlannerError::Backend { status: 200, message: "no project returned".into() })
    }
}

/// Escape `ilike` wildcards so the lookup is an exact, case-insensitive match.
fn escape_like(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '%' | '_' | '\\' | '*') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
