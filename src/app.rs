use ratatui::layout::Rect;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::api::{read_document, Backend, UploadResponse};
use crate::error::{ApiError, AskError};
use crate::session::{dispatch, AskOutcome, PendingAsk, Session};
use crate::tui::AppEvent;

pub const UPLOAD_FAILED_TEXT: &str = "Failed to upload document.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    UploadPath,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Unknown,
    Online,
    Offline,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub popup: Option<Popup>,

    // Conversation
    pub session: Session,
    pub pending_ask: Option<PendingAsk>,

    // Question input
    pub question_input: String,
    pub question_cursor: usize, // cursor position in chars

    // Upload prompt
    pub upload_path_input: String,
    pub upload_path_cursor: usize,
    pub upload_in_flight: Option<String>, // file name being uploaded

    // Feedback
    pub alert: Option<String>,
    pub status_line: Option<String>,
    pub backend_status: BackendStatus,

    // Transcript scrolling
    pub chat_scroll: u16,
    pub follow_tail: bool,
    pub chat_height: u16, // inner height of chat area
    pub chat_width: u16,  // inner width of chat area
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Backend
    pub backend: Arc<dyn Backend>,
    pub api_url: String,
    pub ask_timeout: Duration,
    events: UnboundedSender<AppEvent>,
}

impl App {
    pub fn new(
        backend: Arc<dyn Backend>,
        api_url: &str,
        ask_timeout: Duration,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            popup: None,

            session: Session::new(),
            pending_ask: None,

            question_input: String::new(),
            question_cursor: 0,

            upload_path_input: String::new(),
            upload_path_cursor: 0,
            upload_in_flight: None,

            alert: None,
            status_line: None,
            backend_status: BackendStatus::Unknown,

            chat_scroll: 0,
            follow_tail: true,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,

            animation_frame: 0,

            backend,
            api_url: api_url.to_string(),
            ask_timeout,
            events,
        }
    }

    /// Questions can be typed once a document is in and nothing is outstanding
    pub fn can_edit_question(&self) -> bool {
        self.session.is_ready() && !self.session.is_asking()
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_in_flight.is_some()
    }

    // Asking

    /// Submit whatever is in the input box as a question
    pub fn submit_question(&mut self) {
        let question = self.question_input.clone();

        match self.session.begin_ask(&question) {
            Ok(pending) => {
                self.question_input.clear();
                self.question_cursor = 0;
                self.input_mode = InputMode::Normal;
                self.status_line = None;
                self.follow_tail = true;

                let backend = Arc::clone(&self.backend);
                let request = pending.request.clone();
                let ticket = pending.ticket();
                let timeout = self.ask_timeout;
                let events = self.events.clone();
                self.pending_ask = Some(pending);

                tokio::spawn(async move {
                    let outcome = dispatch(backend.as_ref(), &request, timeout).await;
                    let _ = events.send(AppEvent::AskSettled { ticket, outcome });
                });
            }
            Err(AskError::EmptyQuestion) => {}
            Err(err) => {
                self.status_line = Some(format!("Not sent: {}", err));
            }
        }
    }

    pub fn on_ask_settled(&mut self, ticket: u64, outcome: AskOutcome) {
        let Some(pending) = self.pending_ask.take() else {
            tracing::warn!(ticket, "answer arrived with no question outstanding");
            return;
        };

        if pending.ticket() != ticket {
            tracing::warn!(ticket, expected = pending.ticket(), "dropping answer for another question");
            self.pending_ask = Some(pending);
            return;
        }

        if let Err(err) = self.session.complete_ask(pending, outcome) {
            tracing::error!(error = %err, "could not settle ask");
        }
        self.follow_tail = true;
    }

    // Uploading

    pub fn open_upload_prompt(&mut self) {
        if self.is_uploading() {
            self.status_line = Some("An upload is already in progress".to_string());
            return;
        }
        self.popup = Some(Popup::UploadPath);
        self.upload_path_cursor = self.upload_path_input.chars().count();
    }

    /// Start uploading the file named in the upload prompt. Only one upload
    /// runs at a time.
    pub fn start_upload(&mut self) {
        if self.is_uploading() {
            self.status_line = Some("An upload is already in progress".to_string());
            return;
        }

        let raw = self.upload_path_input.trim();
        if raw.is_empty() {
            return;
        }
        let path = expand_home(raw);
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raw.to_string());

        self.popup = None;
        self.upload_in_flight = Some(display_name.clone());
        self.status_line = None;
        tracing::info!(path = %path.display(), "uploading document");

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let (file_name, result) = match read_document(&path).await {
                Ok((file_name, bytes)) => {
                    let result = backend.upload(&file_name, bytes).await;
                    (file_name, result)
                }
                Err(err) => (display_name, Err(err)),
            };
            let _ = events.send(AppEvent::UploadSettled { file_name, result });
        });
    }

    pub fn on_upload_settled(&mut self, file_name: String, result: Result<UploadResponse, ApiError>) {
        self.upload_in_flight = None;

        match result {
            Ok(response) => {
                self.session.record_upload(&response.docs_snapshot_id, &file_name);
                self.upload_path_input.clear();
                self.upload_path_cursor = 0;
                self.follow_tail = true;
            }
            Err(err) => {
                tracing::error!(file_name = %file_name, error = %err, "upload failed");
                if let ApiError::Status { excerpt, .. } = &err {
                    tracing::debug!(excerpt = %excerpt, "upload error body");
                }
                self.alert = Some(format!("{}\n\n{}", UPLOAD_FAILED_TEXT, err));
                self.popup = Some(Popup::Alert);
            }
        }
    }

    pub fn dismiss_popup(&mut self) {
        if self.popup == Some(Popup::Alert) {
            self.alert = None;
        }
        self.popup = None;
    }

    // Health

    pub fn check_health(&self) {
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        tokio::spawn(async move {
            let healthy = match backend.health().await {
                Ok(healthy) => healthy,
                Err(err) => {
                    tracing::warn!(error = %err, "health check failed");
                    false
                }
            };
            let _ = events.send(AppEvent::HealthChecked(healthy));
        });
    }

    pub fn on_health_checked(&mut self, healthy: bool) {
        self.backend_status = if healthy {
            BackendStatus::Online
        } else {
            BackendStatus::Offline
        };
    }

    // Transcript scrolling

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.follow_tail = false;
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
        self.follow_tail = false;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow_tail = true;
    }

    /// Keep the scroll offset within the rendered transcript. Called during render.
    pub fn clamp_scroll(&mut self, total_lines: u16) {
        let max_scroll = total_lines.saturating_sub(self.chat_height);
        if self.follow_tail || self.chat_scroll >= max_scroll {
            self.chat_scroll = max_scroll;
            self.follow_tail = true;
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_asking() || self.is_uploading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
