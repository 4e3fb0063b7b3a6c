//! UI-agnostic transcript types
//!
//! These are shared between the interactive TUI and the one-shot commands and
//! don't depend on any UI framework.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One evidence fragment supporting an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub doc_name: String,
    /// 1-based page within the source document
    pub page_num: u32,
    pub chunk_id: String,
    pub snippet: String,
    /// Relevance in [0, 1]
    pub score: f64,
}

impl Citation {
    /// Score as a rounded percentage, the way evidence cards show it
    pub fn score_percent(&self) -> u32 {
        (self.score.clamp(0.0, 1.0) * 100.0).round() as u32
    }
}

/// Provenance the backend attaches to every answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VersionSnapshot {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub docs_snapshot_id: Option<String>,
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default)]
    pub retrieval_version: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub parser_mode: Option<String>,
}

/// The sender of a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single transcript entry. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_snapshot: Option<VersionSnapshot>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    /// Assistant message with no evidence attached (announcements, errors)
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            citations: None,
            refusal_code: None,
            request_id: None,
            version_snapshot: None,
        }
    }

    /// Citations worth rendering; an empty list shows no evidence section
    pub fn evidence(&self) -> &[Citation] {
        self.citations.as_deref().unwrap_or_default()
    }

    /// Refusal code in display form, e.g. `LOW_RETRIEVAL_CONFIDENCE` -> `LOW RETRIEVAL CONFIDENCE`
    pub fn refusal_label(&self) -> Option<String> {
        self.refusal_code.as_ref().map(|code| code.replace('_', " "))
    }
}
