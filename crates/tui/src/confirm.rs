use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};

/// Yes/no prompt drawn over the main view. Defaults to the safe answer.
pub struct ConfirmDialog {
    pub message: String,
    pub selected: bool, // true = confirm
    labels: (&'static str, &'static str),
}

impl ConfirmDialog {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), selected: false, labels: ("Quit", "Keep running") }
    }

    pub fn toggle(&mut self) {
        self.selected = !self.selected;
    }

    fn width(&self) -> u16 {
        let text = self.message.chars().count().max(self.labels.0.len() + self.labels.1.len() + 12);
        (text as u16).saturating_add(6)
    }

    pub fn render(&self, f: &mut Frame) {
        let area = centered_rect(self.width(), 6, f.area());
        f.render_widget(Clear, area);

        let button = |label: &str, active: bool, bg: Color| {
            let style = if active {
                Style::default().fg(Color::Black).bg(bg).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Span::styled(format!(" [{}] ", label), style)
        };
        let lines = vec![
            Line::from(""),
            Line::from(Span::styled(self.message.as_str(), Style::default().fg(Color::White))),
            Line::from(""),
            Line::from(vec![
                button(self.labels.0, self.selected, Color::Red),
                Span::raw("   "),
                button(self.labels.1, !self.selected, Color::Green),
            ]),
        ];

        let dialog = Paragraph::new(lines).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow))
                .title(" Confirm "),
        );
        f.render_widget(dialog, area);
    }
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect::new(x, y, width.min(area.width), height.min(area.height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_keep_running() {
        let mut d = ConfirmDialog::new("A run is active. Quit anyway?");
        assert!(!d.selected);
        d.toggle();
        assert!(d.selected);
    }

    #[test]
    fn dialog_fits_inside_small_terminals() {
        let area = Rect::new(0, 0, 20, 4);
        let r = centered_rect(ConfirmDialog::new("x").width(), 6, area);
        assert_eq!((r.width, r.height), (20, 4));
    }
}
