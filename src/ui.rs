use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use crate::app::{App, BackendStatus, InputMode, Popup};
use crate::state::{Citation, Message, Role};

const REFUSAL_EXPLANATION: &str =
    "The system refused to answer based on safety or confidence policies.";
const EMPTY_TRANSCRIPT: &str = "Upload a document to start asking questions.";

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, transcript, input, footer
    let [header_area, chat_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);
    render_transcript(app, frame, chat_area);
    render_input(app, frame, input_area);
    render_footer(app, frame, footer_area);

    match app.popup {
        Some(Popup::UploadPath) => render_upload_prompt(app, frame, area),
        Some(Popup::Alert) => render_alert(app, frame, area),
        None => {}
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let (status_text, status_color) = match app.backend_status {
        BackendStatus::Unknown => ("checking", Color::Gray),
        BackendStatus::Online => ("online", Color::Green),
        BackendStatus::Offline => ("offline", Color::Red),
    };

    let mut spans = vec![
        Span::styled(" DocQ&A ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{} ", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Gray),
        ),
        Span::styled(format!("{} ", app.api_url), Style::default().fg(Color::Gray)),
        Span::styled(format!("[{}]", status_text), Style::default().fg(status_color)),
    ];

    if let Some(snapshot) = app.session.docs_snapshot_id() {
        spans.push(Span::raw("  "));
        spans.push(Span::styled("ACTIVE SNAPSHOT: ", Style::default().fg(Color::Gray)));
        spans.push(Span::styled(snapshot.to_string(), Style::default().fg(Color::LightBlue)));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_transcript(app: &mut App, frame: &mut Frame, area: Rect) {
    // Store area and inner size for mouse hit-testing and scrolling
    app.chat_area = Some(area);
    app.chat_height = area.height.saturating_sub(2);
    app.chat_width = area.width.saturating_sub(2);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(if app.input_mode == InputMode::Normal {
            Color::Cyan
        } else {
            Color::DarkGray
        }))
        .title(" Evidence-Bound Document Assistant ");

    let lines = transcript_lines(app);

    let transcript = if lines.is_empty() {
        Paragraph::new(Text::from(Span::styled(
            EMPTY_TRANSCRIPT,
            Style::default().fg(Color::DarkGray),
        )))
        .block(block)
    } else {
        let paragraph = Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false });
        app.clamp_scroll(wrapped_height(&paragraph, app.chat_width));
        paragraph.block(block).scroll((app.chat_scroll, 0))
    };

    frame.render_widget(transcript, area);
}

/// Every line of the transcript, including the pending "Thinking..." indicator
fn transcript_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    for message in app.session.messages() {
        lines.extend(message_lines(message));
    }

    if app.session.is_asking() {
        lines.push(Line::from(Span::styled(
            "AI:",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

fn message_lines(message: &Message) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    let (label, color) = match message.role {
        Role::User => ("You:", Color::Cyan),
        Role::Assistant => ("AI:", Color::Yellow),
    };
    lines.push(Line::from(Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )));

    for text_line in message.text.lines() {
        lines.push(Line::from(text_line.to_string()));
    }

    if let Some(label) = message.refusal_label() {
        lines.push(Line::from(Span::styled(
            format!("! Refusal: {}", label),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(Span::styled(
            REFUSAL_EXPLANATION,
            Style::default().fg(Color::Red),
        )));
    }

    let evidence = message.evidence();
    if !evidence.is_empty() {
        lines.push(Line::from(Span::styled(
            "Evidence",
            Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
        )));
        for citation in evidence {
            lines.extend(citation_lines(citation));
        }
    }

    if let Some(request_id) = &message.request_id {
        let mut footer = format!("REQ-ID: {}", request_id);
        if let Some(model) = message
            .version_snapshot
            .as_ref()
            .and_then(|v| v.model_id.as_deref())
        {
            footer.push_str(&format!("  model: {}", model));
        }
        lines.push(Line::from(Span::styled(footer, Style::default().fg(Color::DarkGray))));
    }

    lines.push(Line::default());
    lines
}

/// A citation card: source header and quoted snippet
fn citation_lines(citation: &Citation) -> Vec<Line<'static>> {
    vec![
        Line::from(vec![
            Span::styled(
                format!("  {} • Page {}", citation.doc_name, citation.page_num),
                Style::default().fg(Color::LightBlue).add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  {}% Match", citation.score_percent()),
                Style::default().fg(Color::LightBlue),
            ),
        ]),
        Line::from(Span::styled(
            format!("  \"...{}...\"", citation.snippet),
            Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
        )),
    ]
}

/// Rows a block-less paragraph occupies once word-wrapped to `width` columns
fn wrapped_height(paragraph: &Paragraph, width: u16) -> u16 {
    paragraph.line_count(width).min(u16::MAX as usize) as u16
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Ask (i to type, Enter to send) ");

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.question_cursor;
    let scroll_offset = if inner_width > 0 && cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let input = if app.question_input.is_empty() && !editing {
        let placeholder = if app.session.is_ready() {
            "Ask about the document..."
        } else {
            "Upload a document first..."
        };
        Paragraph::new(placeholder).style(Style::default().fg(Color::DarkGray))
    } else {
        let visible_text: String = app
            .question_input
            .chars()
            .skip(scroll_offset)
            .take(inner_width)
            .collect();
        Paragraph::new(visible_text).style(Style::default().fg(Color::Cyan))
    };

    frame.render_widget(input.block(block), area);

    // Show cursor when editing
    if editing && app.popup.is_none() {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let (mode_text, mode_style) = match app.input_mode {
        InputMode::Normal => (" NORMAL ", Style::default().bg(Color::Blue).fg(Color::White)),
        InputMode::Editing => (" ASK ", Style::default().bg(Color::Yellow).fg(Color::Black)),
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let mut spans = vec![Span::styled(mode_text, mode_style), Span::raw(" ")];

    let hints: &[(&str, &str)] = match app.input_mode {
        InputMode::Normal => &[
            (" u ", " upload "),
            (" i ", " ask "),
            (" j/k ", " scroll "),
            (" g/G ", " top/bottom "),
            (" q ", " quit "),
        ],
        InputMode::Editing => &[(" Enter ", " send "), (" Esc ", " cancel ")],
    };
    for (key, label) in hints {
        spans.push(Span::styled(*key, key_style));
        spans.push(Span::styled(*label, label_style));
    }

    if let Some(file_name) = &app.upload_in_flight {
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        spans.push(Span::styled(
            format!("  Processing {}{}", file_name, dots),
            Style::default().fg(Color::Yellow),
        ));
    } else if let Some(status) = &app.status_line {
        spans.push(Span::styled(format!("  {}", status), Style::default().fg(Color::Yellow)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Centered rectangle for popups
fn popup_rect(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width.saturating_sub(4));
    let height = height.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect::new(x, y, width, height)
}

fn render_upload_prompt(app: &App, frame: &mut Frame, area: Rect) {
    let popup_area = popup_rect(area, 70, 7);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow))
        .title(" Upload PDF ");

    let inner = block.inner(popup_area);
    frame.render_widget(block, popup_area);

    let instructions = Paragraph::new("Path to a PDF. Enter to upload, Esc to cancel.")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(instructions, Rect::new(inner.x, inner.y, inner.width, 1));

    let input_area = Rect::new(inner.x, inner.y + 2, inner.width, 1);
    let width = input_area.width as usize;
    let scroll_offset = if width > 0 && app.upload_path_cursor >= width {
        app.upload_path_cursor - width + 1
    } else {
        0
    };
    let visible: String = app
        .upload_path_input
        .chars()
        .skip(scroll_offset)
        .take(width)
        .collect();
    frame.render_widget(
        Paragraph::new(visible).style(Style::default().fg(Color::Cyan)),
        input_area,
    );

    let cursor_x = (app.upload_path_cursor - scroll_offset) as u16;
    frame.set_cursor_position((input_area.x + cursor_x, input_area.y));
}

fn render_alert(app: &App, frame: &mut Frame, area: Rect) {
    let message = app.alert.as_deref().unwrap_or_default();
    let popup_area = popup_rect(area, 60, 9);

    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red))
        .title(" Error (Enter to dismiss) ");

    let alert = Paragraph::new(message)
        .style(Style::default().fg(Color::Red))
        .wrap(Wrap { trim: true })
        .block(block);

    frame.render_widget(alert, popup_area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockBackend;
    use crate::api::AskResponse;
    use crate::session::AskOutcome;
    use crate::state::VersionSnapshot;
    use ratatui::{backend::TestBackend, Terminal};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn plain(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect()
    }

    fn answered() -> Message {
        Message {
            id: "r1".to_string(),
            role: Role::Assistant,
            text: "Paris is the capital.".to_string(),
            citations: Some(vec![Citation {
                doc_id: "d1".to_string(),
                doc_name: "geo.pdf".to_string(),
                page_num: 4,
                chunk_id: "d1:7".to_string(),
                snippet: "Paris is the capital of France".to_string(),
                score: 0.876,
            }]),
            refusal_code: None,
            request_id: Some("r1".to_string()),
            version_snapshot: Some(VersionSnapshot {
                model_id: Some("demo-no-llm".to_string()),
                ..VersionSnapshot::default()
            }),
        }
    }

    #[test]
    fn test_answer_renders_evidence_card() {
        let text = plain(&message_lines(&answered()));
        assert_eq!(text[0], "AI:");
        assert_eq!(text[1], "Paris is the capital.");
        assert_eq!(text[2], "Evidence");
        assert_eq!(text[3], "  geo.pdf • Page 4  88% Match");
        assert_eq!(text[4], "  \"...Paris is the capital of France...\"");
        assert_eq!(text[5], "REQ-ID: r1  model: demo-no-llm");
    }

    #[test]
    fn test_refusal_renders_notice_without_evidence() {
        let mut message = Message::assistant("insufficient evidence");
        message.refusal_code = Some("LOW_RETRIEVAL_CONFIDENCE".to_string());
        message.citations = Some(Vec::new());

        let text = plain(&message_lines(&message));
        assert!(text.contains(&"! Refusal: LOW RETRIEVAL CONFIDENCE".to_string()));
        assert!(text.contains(&REFUSAL_EXPLANATION.to_string()));
        assert!(!text.contains(&"Evidence".to_string()));
    }

    #[test]
    fn test_wrapped_height_breaks_at_words() {
        // 12 columns of text fit in two 6-wide rows by character count, but
        // word wrapping puts "abcd", "efgh" and "ij" on separate rows
        let paragraph = Paragraph::new("abcd efgh ij").wrap(Wrap { trim: false });
        assert_eq!(wrapped_height(&paragraph, 6), 3);
        assert_eq!(wrapped_height(&paragraph, 40), 1);
    }

    #[tokio::test]
    async fn test_following_tail_keeps_last_line_visible() {
        let (tx, _rx) = unbounded_channel();
        let mut app = App::new(Arc::new(MockBackend::new()), "http://localhost:8000", Duration::from_secs(1), tx);
        app.session.record_upload("snap-1", "geo.pdf");
        for i in 0..6 {
            let pending = app.session.begin_ask("where is the capital of the country described").unwrap();
            let response = AskResponse {
                request_id: Some(format!("req-{}", i)),
                answer_text: Some("word ".repeat(30)),
                ..AskResponse::default()
            };
            app.session.complete_ask(pending, AskOutcome::Answered(response)).unwrap();
        }

        let mut terminal = Terminal::new(TestBackend::new(30, 20)).unwrap();
        terminal.draw(|f| render(&mut app, f)).unwrap();
        let screen = format!("{:?}", terminal.backend().buffer());
        assert!(app.follow_tail);
        assert!(screen.contains("REQ-ID: req-5"));
    }

    #[tokio::test]
    async fn test_render_shows_snapshot_and_placeholder() {
        let (tx, _rx) = unbounded_channel();
        let mut app = App::new(Arc::new(MockBackend::new()), "http://localhost:8000", Duration::from_secs(1), tx);
        let mut terminal = Terminal::new(TestBackend::new(100, 20)).unwrap();

        terminal.draw(|f| render(&mut app, f)).unwrap();
        let screen = format!("{:?}", terminal.backend().buffer());
        assert!(screen.contains("Upload a document first..."));
        assert!(screen.contains("Upload a document to start asking questions."));

        app.session.record_upload("snap-abc", "geo.pdf");
        terminal.draw(|f| render(&mut app, f)).unwrap();
        let screen = format!("{:?}", terminal.backend().buffer());
        assert!(screen.contains("ACTIVE SNAPSHOT: snap-abc"));
        assert!(screen.contains("Ask about the document..."));
    }
}
