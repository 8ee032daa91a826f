use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers, MouseEventKind};
use ratatui::{Terminal, backend::CrosstermBackend};

use crate::App;
use crate::ui;

/// Name a key the way hotkeys are configured (`f9`, `esc`, `a`).
pub fn key_name(code: KeyCode) -> Option<String> {
    match code {
        KeyCode::F(n) if (1..=12).contains(&n) => Some(format!("f{}", n)),
        KeyCode::Esc => Some("esc".into()),
        KeyCode::Enter => Some("enter".into()),
        KeyCode::Tab => Some("tab".into()),
        KeyCode::Char(' ') => Some("space".into()),
        KeyCode::Char(c) if c.is_ascii_alphanumeric() => Some(c.to_ascii_lowercase().to_string()),
        _ => None,
    }
}

pub fn run(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> anyhow::Result<()> {
    loop {
        if app.should_quit || app.gate.is_shutdown() {
            return Ok(());
        }

        app.drain_logs();
        terminal.draw(|f| ui::draw(f, app))?;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) => {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                    app.quit();
                    continue;
                }

                if let Some(dialog) = app.confirm.as_mut() {
                    match key.code {
                        KeyCode::Left | KeyCode::Right | KeyCode::Tab => dialog.toggle(),
                        KeyCode::Char('y') | KeyCode::Char('Y') => app.quit(),
                        KeyCode::Enter => {
                            if dialog.selected {
                                app.quit();
                            } else {
                                app.confirm = None;
                            }
                        }
                        KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => app.confirm = None,
                        _ => {}
                    }
                    continue;
                }

                // Configured hotkeys win over the built-in bindings.
                if let Some(name) = key_name(key.code) {
                    if app.hotkey(&name) {
                        continue;
                    }
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => app.request_quit(),
                    KeyCode::Char('s') | KeyCode::Char('S') => app.toggle_run(),
                    KeyCode::Char('l') | KeyCode::Char('L') => app.toggle_log(),
                    KeyCode::PageUp => app.scroll_log_up(10),
                    KeyCode::PageDown => app.scroll_log_down(10),
                    _ => {}
                }
            }
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollUp => app.scroll_log_up(3),
                MouseEventKind::ScrollDown => app.scroll_log_down(3),
                _ => {}
            },
            _ => {}
        }
    }
}
