use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

use super::{PlanningRequest, SuggestionService};
use crate::core::date_key::DateKey;
use crate::core::suggestion::SuggestionSet;
use crate::error::{PlannerError, Result};

pub const DEFAULT_FUNCTION: &str = "planning-copilot";

const CONNECTION_ERROR: &str =
    "Failed to connect to the planning assistant. Please check your connection and try again.";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CopilotRequest<'a> {
    message: &'a str,
    date: DateKey,
    current_suggestions: Option<&'a SuggestionSet>,
}

#[derive(Deserialize)]
struct CopilotResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// The hosted planning function. It reads the user's tasks server-side, so
/// only the message, date and pending suggestions are sent.
pub struct CopilotClient {
    url: String,
    anon_key: String,
    access_token: String,
    http: reqwest::Client,
}

impl CopilotClient {
    pub fn new(base_url: &str, function: &str, anon_key: &str, access_token: &str) -> Self {
        Self {
            url: function_url(base_url, function),
            anon_key: anon_key.to_string(),
            access_token: access_token.to_string(),
            http: reqwest::Client::new(),
        }
    }
}

fn function_url(base_url: &str, function: &str) -> String {
    format!("{}/functions/v1/{}", base_url.trim_end_matches('/'), function)
}

fn into_reply(status: u16, body: CopilotResponse) -> Result<String> {
    if let Some(error) = body.error {
        return Err(PlannerError::from_status(if status < 400 { 500 } else { status }, error));
    }
    if status >= 400 {
        return Err(PlannerError::from_status(status, "planning assistant request failed"));
    }
    Ok(body.response.unwrap_or_default())
}

#[async_trait]
impl SuggestionService for CopilotClient {
    async fn suggest(&self, request: &PlanningRequest<'_>) -> Result<String> {
        let body = CopilotRequest {
            message: request.message,
            date: request.date,
            current_suggestions: request.pending,
        };
        let resp = self
            .http
            .post(&self.url)
            .header("apikey", &self.anon_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                log::error!("Copilot request failed: {}", e);
                PlannerError::Network(CONNECTION_ERROR.into())
            })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| PlannerError::Network(e.to_string()))?;
        let parsed: CopilotResponse = serde_json::from_str(&text).unwrap_or(CopilotResponse {
            response: None,
            error: (status >= 400).then(|| text.clone()),
        });
        into_reply(status, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_function_url() {
        assert_eq!(
            function_url("https://proj.example.co/", DEFAULT_FUNCTION),
            "https://proj.example.co/functions/v1/planning-copilot"
        );
    }

    #[test]
    fn request_body_uses_camel_case() {
        let pending = SuggestionSet::default();
        let body = CopilotRequest {
            message: "plan my day",
            date: DateKey::parse("2024-05-01").unwrap(),
            current_suggestions: Some(&pending),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["date"], "2024-05-01");
        assert!(json["currentSuggestions"].is_object());

        let none = CopilotRequest { current_suggestions: None, ..body };
        assert!(serde_json::to_value(&none).unwrap()["currentSuggestions"].is_null());
    }

    #[test]
    fn error_field_wins() {
        let ok = CopilotResponse { response: Some("hi".into()), error: None };
        assert_eq!(into_reply(200, ok).unwrap(), "hi");

        let failed = CopilotResponse { response: None, error: Some("Authentication failed".into()) };
        assert!(into_reply(401, failed).unwrap_err().is_auth());

        let failed = CopilotResponse { response: None, error: Some("boom".into()) };
        match into_reply(200, failed).unwrap_err() {
            PlannerError::Backend { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
