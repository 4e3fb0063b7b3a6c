//! Conversation state machine
//!
//! A `Session` owns the transcript, the active document snapshot and whether a
//! question is outstanding. Uploads and asks are the only ways to mutate it:
//!
//! ```text
//!            begin_ask (user message appended)
//!   Idle ─────────────────────────────────────▶ Asking
//!    ▲                                             │
//!    └─────────────────────────────────────────────┘
//!            complete_ask (assistant message appended)
//! ```
//!
//! `record_upload` may happen in either state and never touches the phase.

use std::time::Duration;
use uuid::Uuid;

use crate::api::{AskRequest, AskResponse, Backend};
use crate::error::{ApiError, AskError};
use crate::state::Message;

pub const NO_ANSWER_TEXT: &str = "I could not find an answer.";
pub const CONNECTIVITY_ERROR_TEXT: &str =
    "Error connecting to the API. Please ensure the backend is running.";
pub const TIMEOUT_TEXT: &str = "The API did not respond in time. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Asking,
}

/// How an outstanding ask settled
#[derive(Debug)]
pub enum AskOutcome {
    Answered(AskResponse),
    Failed(ApiError),
    TimedOut,
}

/// Proof that `begin_ask` accepted a question. Consumed by `complete_ask`.
#[derive(Debug)]
pub struct PendingAsk {
    ticket: u64,
    pub request: AskRequest,
}

impl PendingAsk {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

#[derive(Debug)]
pub struct Session {
    docs_snapshot_id: Option<String>,
    messages: Vec<Message>,
    phase: Phase,
    /// Ticket of the outstanding ask, if any
    in_flight: Option<u64>,
    next_ticket: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            docs_snapshot_id: None,
            messages: Vec::new(),
            phase: Phase::Idle,
            in_flight: None,
            next_ticket: 1,
        }
    }

    /// Continue against a snapshot ingested earlier, e.g. by another run
    pub fn resume(snapshot_id: &str) -> Self {
        Self {
            docs_snapshot_id: snapshot(snapshot_id),
            ..Self::new()
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn docs_snapshot_id(&self) -> Option<&str> {
        self.docs_snapshot_id.as_deref()
    }

    pub fn is_asking(&self) -> bool {
        self.phase == Phase::Asking
    }

    /// A document has been ingested, so questions have something to search
    pub fn is_ready(&self) -> bool {
        self.docs_snapshot_id.is_some()
    }

    /// Record a confirmed upload. The new snapshot replaces any previous one.
    pub fn record_upload(&mut self, snapshot_id: &str, file_name: &str) -> &Message {
        tracing::info!(snapshot_id, file_name, "document ingested");
        self.docs_snapshot_id = snapshot(snapshot_id);
        self.push(Message::assistant(format!(
            "Document \"{}\" uploaded and indexed. Snapshot: {}. You can now ask questions about it.",
            file_name, snapshot_id
        )))
    }

    /// Accept a question: append it to the transcript and move to `Asking`.
    ///
    /// The returned request is what should be sent to the ask endpoint. Blank
    /// questions and questions asked while another is outstanding are rejected
    /// without touching the transcript.
    pub fn begin_ask(&mut self, question: &str) -> Result<PendingAsk, AskError> {
        if question.trim().is_empty() {
            return Err(AskError::EmptyQuestion);
        }
        if self.is_asking() {
            tracing::warn!("ask rejected: previous question still outstanding");
            return Err(AskError::AlreadyAsking);
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;

        self.push(Message::user(question));
        self.phase = Phase::Asking;
        self.in_flight = Some(ticket);

        tracing::debug!(ticket, snapshot_id = ?self.docs_snapshot_id, "ask dispatched");

        Ok(PendingAsk {
            ticket,
            request: AskRequest {
                question: question.to_string(),
                docs_snapshot_id: self.docs_snapshot_id.clone(),
            },
        })
    }

    /// Settle the outstanding ask with exactly one assistant message and
    /// return to `Idle`.
    pub fn complete_ask(&mut self, pending: PendingAsk, outcome: AskOutcome) -> Result<&Message, AskError> {
        if self.in_flight != Some(pending.ticket) {
            return Err(AskError::StaleTicket);
        }

        let message = match outcome {
            AskOutcome::Answered(response) => {
                tracing::info!(
                    request_id = ?response.request_id,
                    refusal_code = ?response.refusal_code,
                    citations = response.citations.as_ref().map_or(0, Vec::len),
                    "answer received"
                );
                answer_message(response)
            }
            AskOutcome::Failed(err) => {
                tracing::error!(error = %err, "ask failed");
                Message::assistant(CONNECTIVITY_ERROR_TEXT)
            }
            AskOutcome::TimedOut => {
                tracing::error!("ask timed out");
                Message::assistant(TIMEOUT_TEXT)
            }
        };

        self.phase = Phase::Idle;
        self.in_flight = None;
        Ok(self.push(message))
    }

    /// Ask a question and wait (bounded) for the answer.
    pub async fn ask(
        &mut self,
        backend: &dyn Backend,
        question: &str,
        timeout: Duration,
    ) -> Result<&Message, AskError> {
        let pending = self.begin_ask(question)?;
        let outcome = dispatch(backend, &pending.request, timeout).await;
        self.complete_ask(pending, outcome)
    }

    fn push(&mut self, message: Message) -> &Message {
        self.messages.push(message);
        // just pushed
        &self.messages[self.messages.len() - 1]
    }
}

/// An empty id means "no snapshot": never ready, never sent
fn snapshot(snapshot_id: &str) -> Option<String> {
    Some(snapshot_id.to_string()).filter(|id| !id.is_empty())
}

/// Send one ask request, folding every way it can end into an `AskOutcome`
pub async fn dispatch(backend: &dyn Backend, request: &AskRequest, timeout: Duration) -> AskOutcome {
    match tokio::time::timeout(timeout, backend.ask(request)).await {
        Ok(Ok(response)) => AskOutcome::Answered(response),
        Ok(Err(err)) => AskOutcome::Failed(err),
        Err(_) => AskOutcome::TimedOut,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn answer_message(response: AskResponse) -> Message {
    let text = non_empty(response.answer_text)
        .or_else(|| non_empty(response.reason))
        .unwrap_or_else(|| NO_ANSWER_TEXT.to_string());

    Message {
        id: response
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        role: crate::state::Role::Assistant,
        text,
        citations: response.citations,
        refusal_code: response.refusal_code,
        request_id: response.request_id,
        version_snapshot: response.version_snapshot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{unavailable, MockBackend};
    use crate::state::{Citation, Role};
    use proptest::prelude::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn citations() -> Vec<Citation> {
        vec![
            Citation {
                doc_id: "d1".to_string(),
                doc_name: "geo.pdf".to_string(),
                page_num: 4,
                chunk_id: "d1:7".to_string(),
                snippet: "Paris is the capital of France".to_string(),
                score: 0.91,
            },
            Citation {
                doc_id: "d1".to_string(),
                doc_name: "geo.pdf".to_string(),
                page_num: 9,
                chunk_id: "d1:22".to_string(),
                snippet: "the capital city".to_string(),
                score: 0.40,
            },
        ]
    }

    #[test]
    fn test_new_session_is_idle_and_not_ready() {
        let session = Session::new();
        assert!(!session.is_asking());
        assert!(!session.is_ready());
        assert!(session.messages().is_empty());
        assert_eq!(session.docs_snapshot_id(), None);
    }

    #[test]
    fn test_record_upload_announces_and_sets_snapshot() {
        let mut session = Session::new();
        let msg = session.record_upload("snap-1", "handbook.pdf").clone();

        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.text.contains("\"handbook.pdf\""));
        assert!(msg.text.contains("snap-1"));
        assert!(msg.citations.is_none());
        assert_eq!(session.docs_snapshot_id(), Some("snap-1"));
        assert!(session.is_ready());
    }

    #[test]
    fn test_reupload_replaces_snapshot_and_keeps_history() {
        let mut session = Session::new();
        session.record_upload("snap-1", "a.pdf");
        let first = session.messages()[0].clone();

        session.record_upload("snap-2", "b.pdf");

        assert_eq!(session.docs_snapshot_id(), Some("snap-2"));
        assert_eq!(session.messages().len(), 2);
        assert_eq!(session.messages()[0], first);
    }

    #[test]
    fn test_blank_questions_are_noops() {
        let mut session = Session::new();
        assert_eq!(session.begin_ask("").unwrap_err(), AskError::EmptyQuestion);
        assert_eq!(session.begin_ask("   \t\n").unwrap_err(), AskError::EmptyQuestion);
        assert!(session.messages().is_empty());
        assert!(!session.is_asking());
    }

    #[test]
    fn test_begin_ask_appends_verbatim_question_first() {
        let mut session = Session::new();
        session.record_upload("snap-1", "a.pdf");

        let pending = session.begin_ask("  What is the capital?  ").unwrap();

        assert!(session.is_asking());
        let last = session.messages().last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.text, "  What is the capital?  ");
        assert_eq!(pending.request.question, "  What is the capital?  ");
        assert_eq!(pending.request.docs_snapshot_id.as_deref(), Some("snap-1"));
    }

    #[test]
    fn test_resume_is_ready_without_announcement() {
        let mut session = Session::resume("snap-old");
        assert!(session.is_ready());
        assert!(session.messages().is_empty());
        let pending = session.begin_ask("q").unwrap();
        assert_eq!(pending.request.docs_snapshot_id.as_deref(), Some("snap-old"));
    }

    #[test]
    fn test_empty_snapshot_id_is_not_ready_and_not_sent() {
        let mut session = Session::resume("");
        assert!(!session.is_ready());
        let pending = session.begin_ask("q").unwrap();
        let json = serde_json::to_value(&pending.request).unwrap();
        assert_eq!(json, serde_json::json!({ "question": "q" }));

        let mut session = Session::new();
        session.record_upload("", "a.pdf");
        assert!(!session.is_ready());
        assert_eq!(session.docs_snapshot_id(), None);
        assert_eq!(session.begin_ask("q").unwrap().request.docs_snapshot_id, None);
    }

    #[test]
    fn test_begin_ask_without_upload_omits_snapshot() {
        let mut session = Session::new();
        let pending = session.begin_ask("anything?").unwrap();
        assert_eq!(pending.request.docs_snapshot_id, None);
    }

    #[test]
    fn test_second_ask_while_asking_is_rejected() {
        let mut session = Session::new();
        let _pending = session.begin_ask("first").unwrap();

        assert_eq!(session.begin_ask("second").unwrap_err(), AskError::AlreadyAsking);
        assert_eq!(session.messages().len(), 1);
        assert!(session.is_asking());
    }

    #[test]
    fn test_answer_copies_evidence_through() {
        let mut session = Session::new();
        let pending = session.begin_ask("What is the capital?").unwrap();
        let response = AskResponse {
            request_id: Some("r1".to_string()),
            answer_text: Some("Paris is the capital.".to_string()),
            citations: Some(citations()),
            ..AskResponse::default()
        };

        let msg = session.complete_ask(pending, AskOutcome::Answered(response)).unwrap().clone();

        assert_eq!(msg.text, "Paris is the capital.");
        assert_eq!(msg.citations, Some(citations()));
        assert_eq!(msg.refusal_code, None);
        assert_eq!(msg.request_id.as_deref(), Some("r1"));
        assert_eq!(msg.id, "r1");
        assert!(!session.is_asking());
    }

    #[test]
    fn test_refusal_uses_reason_and_keeps_code() {
        let mut session = Session::new();
        let pending = session.begin_ask("Who won in 2090?").unwrap();
        let response = AskResponse {
            reason: Some("insufficient evidence".to_string()),
            refusal_code: Some("LOW_CONFIDENCE".to_string()),
            ..AskResponse::default()
        };

        let msg = session.complete_ask(pending, AskOutcome::Answered(response)).unwrap();

        assert_eq!(msg.text, "insufficient evidence");
        assert_eq!(msg.refusal_code.as_deref(), Some("LOW_CONFIDENCE"));
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn test_empty_response_uses_fallback() {
        let mut session = Session::new();
        let pending = session.begin_ask("?").unwrap();
        let msg = session
            .complete_ask(pending, AskOutcome::Answered(AskResponse::default()))
            .unwrap();
        assert_eq!(msg.text, NO_ANSWER_TEXT);
        // no request_id, so the id is generated locally
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_empty_answer_text_falls_back_to_reason() {
        let mut session = Session::new();
        let pending = session.begin_ask("?").unwrap();
        let response = AskResponse {
            answer_text: Some(String::new()),
            reason: Some("no match".to_string()),
            ..AskResponse::default()
        };
        let msg = session.complete_ask(pending, AskOutcome::Answered(response)).unwrap();
        assert_eq!(msg.text, "no match");
    }

    #[test]
    fn test_failure_becomes_connectivity_message() {
        let mut session = Session::new();
        let pending = session.begin_ask("q").unwrap();
        let msg = session
            .complete_ask(pending, AskOutcome::Failed(unavailable("/v1/ask")))
            .unwrap();

        assert_eq!(msg.text, CONNECTIVITY_ERROR_TEXT);
        assert!(msg.citations.is_none());
        assert!(msg.refusal_code.is_none());
        assert!(!session.is_asking());
    }

    #[test]
    fn test_stale_ticket_changes_nothing() {
        let mut session = Session::new();
        let first = session.begin_ask("one").unwrap();
        session.complete_ask(first, AskOutcome::TimedOut).unwrap();

        let second = session.begin_ask("two").unwrap();
        let forged = PendingAsk {
            ticket: second.ticket() + 100,
            request: second.request.clone(),
        };

        assert_eq!(
            session.complete_ask(forged, AskOutcome::TimedOut).unwrap_err(),
            AskError::StaleTicket
        );
        assert!(session.is_asking());
        assert_eq!(session.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_ask_round_trip_through_backend() {
        let backend = MockBackend::new();
        backend.queue_answer(AskResponse {
            request_id: Some("r7".to_string()),
            answer_text: Some("Paris is the capital.".to_string()),
            citations: Some(citations()),
            ..AskResponse::default()
        });

        let mut session = Session::new();
        session.record_upload("snap-1", "geo.pdf");
        let msg = session.ask(&backend, "Capital?", TIMEOUT).await.unwrap().clone();

        assert_eq!(msg.text, "Paris is the capital.");
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].role, Role::User);
        assert_eq!(
            backend.recorded_asks(),
            vec![AskRequest {
                question: "Capital?".to_string(),
                docs_snapshot_id: Some("snap-1".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_network_rejection_returns_to_idle() {
        let backend = MockBackend::new();
        backend.queue_ask_error(unavailable("/v1/ask"));

        let mut session = Session::new();
        let msg = session.ask(&backend, "q", TIMEOUT).await.unwrap();

        assert_eq!(msg.text, CONNECTIVITY_ERROR_TEXT);
        assert!(!session.is_asking());
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let backend = MockBackend::new();
        backend.queue_ask_hang();

        let mut session = Session::new();
        let msg = session
            .ask(&backend, "q", Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(msg.text, TIMEOUT_TEXT);
        assert!(!session.is_asking());
    }

    #[tokio::test]
    async fn test_blank_ask_dispatches_nothing() {
        let backend = MockBackend::new();
        let mut session = Session::new();

        let err = session.ask(&backend, "   ", TIMEOUT).await.unwrap_err();

        assert_eq!(err, AskError::EmptyQuestion);
        assert!(backend.recorded_asks().is_empty());
        assert!(session.messages().is_empty());
    }

    proptest! {
        #[test]
        fn prop_last_upload_wins(uploads in prop::collection::vec(("[a-z0-9]{1,12}", "[a-z]{1,8}\\.pdf"), 1..8)) {
            let mut session = Session::new();
            for (snapshot, name) in &uploads {
                session.record_upload(snapshot, name);
            }
            prop_assert_eq!(session.docs_snapshot_id(), Some(uploads.last().unwrap().0.as_str()));
            prop_assert_eq!(session.messages().len(), uploads.len());
            prop_assert!(session.messages().iter().all(|m| m.role == Role::Assistant));
        }

        #[test]
        fn prop_each_ask_adds_exactly_two(
            questions in prop::collection::vec("[ a-z?]{0,16}", 0..12),
            outcomes in prop::collection::vec(0u8..3, 12),
        ) {
            let mut session = Session::new();
            for (question, kind) in questions.iter().zip(outcomes) {
                let before = session.messages().len();
                match session.begin_ask(question) {
                    Ok(pending) => {
                        prop_assert_eq!(session.messages().len(), before + 1);
                        let outcome = match kind {
                            0 => AskOutcome::Answered(AskResponse::default()),
                            1 => AskOutcome::Failed(unavailable("/v1/ask")),
                            _ => AskOutcome::TimedOut,
                        };
                        session.complete_ask(pending, outcome).unwrap();
                        prop_assert_eq!(session.messages().len(), before + 2);
                    }
                    Err(err) => {
                        prop_assert_eq!(err, AskError::EmptyQuestion);
                        prop_assert!(question.trim().is_empty());
                        prop_assert_eq!(session.messages().len(), before);
                    }
                }
                prop_assert!(!session.is_asking());
            }
        }
    }
}
