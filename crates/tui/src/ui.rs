use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style, Modifier},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use seatwatch_core::types::ScanStatus;
use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
            .split(f.area())
    } else {
        Layout::default()
            .constraints([Constraint::Percentage(100)])
            .split(f.area())
    };

    let status = app.snapshot();
    let [start_key, stop_key] = app.trigger.hotkeys().keys();

    // The gate flips before the controller publishes.
    let (banner_label, banner_bg) = if app.gate.is_running() {
        (format!("RUNNING ({} to stop)", stop_key.to_uppercase()), Color::Green)
    } else {
        (format!("STOPPED ({} to start)", start_key.to_uppercase()), Color::Red)
    };

    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    // Full-width centered banner
    let banner_width = left_chunks[0].width as usize;
    let pad_total = banner_width.saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let pad_right = pad_total - pad_left;
    let centered_banner = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_right));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered_banner,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left_chunks[0]);

    let panel = Paragraph::new(status_lines(&status, start_key, stop_key)).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(panel, left_chunks[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let max_scroll = total.saturating_sub(visible_height);
        let scroll = app.log_scroll.min(max_scroll);
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end]
            .iter()
            .map(|m| parse_log_line(m))
            .collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn key_span(key: &str) -> Span<'_> {
    Span::styled(key, Style::default().fg(Color::Yellow))
}

fn field<'a>(label: &'a str, value: String, color: Color) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!(" {:<14}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(color)),
    ])
}

fn status_lines<'a>(status: &ScanStatus, start_key: &'a str, stop_key: &'a str) -> Vec<Line<'a>> {
    let mut lines = vec![
        Line::from(vec![
            Span::raw(" "),
            key_span(start_key),
            Span::raw(" start, "),
            key_span(stop_key),
            Span::raw(" stop, "),
            key_span("s"),
            Span::raw(" toggle, "),
            key_span("l"),
            Span::raw(" logs, "),
            key_span("q"),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    let phase = status.phase.map(|p| p.label()).unwrap_or("idle");
    lines.push(field("phase", phase.to_string(), Color::Cyan));
    lines.push(field("refreshes", status.refresh_count.to_string(), Color::White));
    lines.push(field(
        "attempts",
        format!(
            "{} (booking {}, waitlist {})",
            status.total_attempts, status.booking_attempts, status.waitlist_attempts
        ),
        Color::White,
    ));
    if let Some(kind) = status.last_success {
        lines.push(field("last success", kind.label().to_string(), Color::Green));
    }
    if let Some(fault) = &status.last_fault {
        lines.push(field("last fault", fault.clone(), Color::Red));
    }
    lines
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }

    let level = parts[0];
    let prefix = parts[1];
    let color_idx: u8 = parts[2].parse().unwrap_or(0);
    let timestamp = parts[3];
    let message = parts[4];

    let prefix_color = match color_idx {
        1 => Color::DarkGray,  // COLOR_GRAY
        2 => Color::LightBlue, // COLOR_BLUE
        3 => Color::Green,     // COLOR_GREEN
        4 => Color::Magenta,   // COLOR_MAGENTA
        _ => Color::White,
    };

    let mut spans = vec![
        Span::styled(timestamp, Style::default().fg(Color::DarkGray)),
        Span::raw(" "),
    ];

    // Level tag: only for warn/error
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }

    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(prefix_color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(prefix_color)));

    Line::from(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use seatwatch_core::types::{Phase, SuccessKind};

    fn text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn structured_log_line_is_split() {
        let line = parse_log_line("WARN\x1fscan\x1f2\x1f12:00:00.000\x1fprobe slow");
        assert_eq!(text(&line), "12:00:00.000 warn scan probe slow");
        assert_eq!(line.spans[3].style.fg, Some(Color::LightBlue));
    }

    #[test]
    fn plain_log_line_passes_through() {
        assert_eq!(text(&parse_log_line("hello")), "hello");
    }

    #[test]
    fn status_shows_success_and_fault() {
        let status = ScanStatus {
            running: false,
            phase: Some(Phase::SearchingReservation),
            refresh_count: 4,
            total_attempts: 2,
            booking_attempts: 1,
            waitlist_attempts: 1,
            last_success: Some(SuccessKind::Waitlist),
            last_fault: Some("probe failed".into()),
        };
        let lines: Vec<String> = status_lines(&status, "f9", "f10").iter().map(text).collect();
        assert!(lines[0].contains("f9 start"));
        assert!(lines.iter().any(|l| l.contains("searching reservation")));
        assert!(lines.iter().any(|l| l.contains("2 (booking 1, waitlist 1)")));
        assert!(lines.iter().any(|l| l.contains("waitlist") && l.contains("last success")));
        assert!(lines.iter().any(|l| l.contains("probe failed")));
    }
}
