use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use super::{PlanningRequest, SuggestionService};
use crate::core::date_key::DateKey;
use crate::core::suggestion::SuggestionSet;
use crate::core::task::{Task, TaskId};
use crate::error::{PlannerError, Result};

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// The shape each task takes inside the planning prompt.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskForAi {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub estimated_time_minutes: u32,
    pub completed: bool,
    pub projects: Vec<String>,
}

/// Group tasks by date for the prompt.
pub fn tasks_for_ai(tasks: &[Task]) -> BTreeMap<DateKey, Vec<TaskForAi>> {
    let mut by_date: BTreeMap<DateKey, Vec<TaskForAi>> = BTreeMap::new();
    for task in tasks {
        by_date.entry(task.date).or_default().push(TaskForAi {
            id: task.id,
            title: task.title.clone(),
            description: task.notes.clone().unwrap_or_default(),
            estimated_time_minutes: task.estimated_minutes,
            completed: task.completed,
            projects: task.project_names(),
        });
    }
    by_date
}

/// Build the system prompt for a planning conversation.
pub fn build_system_prompt(
    tasks: &[Task],
    target: DateKey,
    pending: Option<&SuggestionSet>,
) -> Result<String> {
    let mut prompt = String::from(
        "You are an AI task planning assistant for people with ADHD.\n\
         Your goal is to help the user plan and organize their day effectively.\n\n\
         The user's tasks are organized by date. Here's their current task data:\n",
    );
    prompt.push_str(&serde_json::to_string_pretty(&tasks_for_ai(tasks))?);
    prompt.push_str(&format!("\n\nThe user is currently planning for date: {}\n\n", target));

    if let Some(pending) = pending {
        prompt.push_str(
            "IMPORTANT: The user already has pending suggestions that have not been applied yet:\n",
        );
        prompt.push_str(&serde_json::to_string_pretty(pending)?);
        prompt.push_str(
            "\n\nThey are asking you to modify these pending suggestions. Your response should \
             INCLUDE these suggestions with any modifications the user requested. Do not lose any \
             pending suggestions unless explicitly asked to.\n\n",
        );
    }

    prompt.push_str(&format!(
        "When suggesting changes, use the following JSON structure:\n\
         {{\n\
         \x20 \"explanation\": \"Human-readable explanation of your suggestions\",\n\
         \x20 \"changes\": {{\n\
         \x20   \"create\": [{{\"title\": \"New task name\", \"description\": \"Description\", \
         \"estimatedTime\": 30, \"date\": \"YYYY-MM-DD\", \"projects\": [\"Project 1\"]}}],\n\
         \x20   \"update\": [{{\"id\": 123, \"title\": \"Updated task name\", \"description\": \
         \"Updated description\", \"estimatedTime\": 45, \"date\": \"YYYY-MM-DD\", \
         \"projects\": [\"Project 1\"]}}],\n\
         \x20   \"delete\": [123, 456]\n\
         \x20 }}\n\
         }}\n\n\
         Dates:\n\
         - You can suggest tasks for any date, not just {target}\n\
         - ALL dates MUST use the format \"YYYY-MM-DD\" (e.g. \"{target}\")\n\
         - Updates MUST ALWAYS include the date field, even when it does not change\n\n\
         Updates:\n\
         - Always include the id and every field you want to keep\n\
         - An omitted property is treated as removed\n\n\
         For people with ADHD:\n\
         - Suggest breaking large tasks into smaller ones\n\
         - Prioritize by importance and urgency\n\
         - Suggest realistic time estimates\n\
         - Group similar tasks together when possible\n\
         - Limit the number of tasks per day to avoid overwhelm\n\n\
         Always respond with ONLY the structured JSON, inside a ```json code block.\n",
    ));

    Ok(prompt)
}

/// Calls the Anthropic Messages API directly with a locally built prompt.
pub struct AnthropicPlanner {
    api_key: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

impl AnthropicPlanner {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| PlannerError::Network(format!("API request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => PlannerError::Auth("Invalid API key".into()),
                code => PlannerError::Backend { status: code, message: text },
            });
        }
        Ok(resp.json().await?)
    }

    /// Verify the API key with a minimal request.
    pub async fn test_api_key(&self) -> Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4,
            "messages": [{ "role": "user", "content": "Reply with OK" }]
        });
        self.post(&body).await.map(|_| ())
    }
}

/// Text of the first content block.
fn first_text(api_resp: &serde_json::Value) -> Option<&str> {
    api_resp["content"]
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|block| block["text"].as_str())
}

#[async_trait]
impl SuggestionService for AnthropicPlanner {
    async fn suggest(&self, request: &PlanningRequest<'_>) -> Result<String> {
        let system = build_system_prompt(request.tasks, request.date, request.pending)?;
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": request.message }]
        });
        log::debug!("Asking {} about {}", self.model, request.date);

        let api_resp = self.post(&body).await?;
        Ok(first_text(&api_resp).unwrap_or_default().to_string())
    }
}
