use chrono::{DateTime, Local};

use crate::core::suggestion::SuggestionSet;
use crate::core::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A user-facing notification, the CLI's equivalent of a toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub suggestions: Option<SuggestionSet>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), timestamp: Local::now(), suggestions: None }
    }

    pub fn assistant(content: impl Into<String>, suggestions: Option<SuggestionSet>) -> Self {
        Self { role: Role::Assistant, content: content.into(), timestamp: Local::now(), suggestions }
    }
}

/// UI and assistant state for one signed-in session.
///
/// Owned by the planner that created it; dropping the planner tears it down.
#[derive(Debug, Default)]
pub struct Session {
    pub active_task_id: Option<TaskId>,
    pub dragged_task_id: Option<TaskId>,
    pub drag_over_task_id: Option<TaskId>,

    pub chat: Vec<ChatMessage>,
    pub pending: Option<SuggestionSet>,
    pub is_ai_loading: bool,
    pub is_applying: bool,
    pub is_preview_open: bool,

    notices: Vec<Notice>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_success(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.notices.push(Notice { level: NoticeLevel::Success, message });
    }

    pub fn notify_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        self.notices.push(Notice { level: NoticeLevel::Error, message });
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Hand pending notices to the caller for display.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn clear_drag(&mut self) {
        self.dragged_task_id = None;
        self.drag_over_task_id = None;
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
        self.is_preview_open = false;
    }
}
