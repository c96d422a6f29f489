use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::Confirm;
use crate::error::SummaryError;

/// Yes/no dialog in the alternate screen. Anything but `y` declines.
pub struct TerminalConfirm {
    title: String,
}

impl TerminalConfirm {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Default for TerminalConfirm {
    fn default() -> Self {
        Self::new("Confirm")
    }
}

/// Leaves raw mode and the alternate screen however the dialog exits.
struct ScreenGuard;

impl ScreenGuard {
    fn enter() -> Result<(Self, Terminal<CrosstermBackend<Stdout>>), SummaryError> {
        enable_raw_mode().map_err(terminal_error)?;
        let guard = ScreenGuard;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen).map_err(terminal_error)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout)).map_err(terminal_error)?;
        Ok((guard, terminal))
    }
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
    }
}

fn terminal_error(err: io::Error) -> SummaryError {
    SummaryError::Terminal(err.to_string())
}

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> Result<bool, SummaryError> {
        let (_guard, mut terminal) = ScreenGuard::enter()?;

        loop {
            terminal
                .draw(|frame| {
                    let area = Layout::default()
                        .direction(Direction::Vertical)
                        .constraints([
                            Constraint::Percentage(35),
                            Constraint::Length(6),
                            Constraint::Min(0),
                        ])
                        .split(frame.area())[1];
                    let block = Block::default()
                        .borders(Borders::ALL)
                        .title(Span::styled(
                            self.title.as_str(),
                            Style::default()
                                .fg(Color::Cyan)
                                .add_modifier(Modifier::BOLD),
                        ));
                    let text = Paragraph::new(vec![
                        Line::from(prompt),
                        Line::from(""),
                        Line::from(Span::styled(
                            "Press y to confirm, n to cancel.",
                            Style::default().fg(Color::Gray),
                        )),
                    ])
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true })
                    .block(block);
                    frame.render_widget(text, area);
                })
                .map_err(terminal_error)?;

            if event::poll(Duration::from_millis(100)).map_err(terminal_error)? {
                if let Event::Key(key) = event::read().map_err(terminal_error)? {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => return Ok(true),
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                            return Ok(false);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
