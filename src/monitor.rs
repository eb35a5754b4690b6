//! Live dashboard of the actuators.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Row, Sparkline, Table};
use ratatui::{Frame, Terminal};
use shield_ctl::framing::CommandQueue;
use shield_ctl::hal::AudioOutput;
use shield_ctl::servo::ServoId;
use shield_ctl::SimController;

use crate::{Clock, SerialInput};

const LOG_CAPACITY: usize = 200;
const FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// Log records shown in the dashboard.
///
/// The logger always writes through a [`PaneWriter`]; while the pane is
/// inactive the records go to stderr as usual.
#[derive(Debug, Clone, Default)]
pub struct LogPane {
    inner: Arc<PaneInner>,
}

#[derive(Debug, Default)]
struct PaneInner {
    active: AtomicBool,
    lines: Mutex<VecDeque<String>>,
}

impl LogPane {
    pub fn writer(&self) -> PaneWriter {
        PaneWriter {
            pane: self.clone(),
            partial: Vec::new(),
        }
    }

    fn set_active(&self, active: bool) {
        self.inner.active.store(active, Ordering::Relaxed);
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn push(&self, line: String) {
        let mut lines = self.inner.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == LOG_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The last `count` lines, oldest first.
    fn recent(&self, count: usize) -> Vec<String> {
        let lines = self.inner.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.iter().skip(lines.len().saturating_sub(count)).cloned().collect()
    }
}

pub struct PaneWriter {
    pane: LogPane,
    partial: Vec<u8>,
}

impl Write for PaneWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.pane.is_active() {
            return io::stderr().write(buf);
        }
        self.partial.extend_from_slice(buf);
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=end).collect();
            self.pane.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

struct App {
    input: String,
    last_status: Option<String>,
    pending: CommandQueue,
    serial: Option<SerialInput>,
}

/// Runs the dashboard until Esc or Ctrl-C.
pub fn run(
    controller: &mut SimController,
    clock: &Clock,
    serial: Option<SerialInput>,
    pane: &LogPane,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
    pane.set_active(true);

    let app = App {
        input: String::new(),
        last_status: None,
        pending: CommandQueue::new(),
        serial,
    };
    let result = event_loop(&mut terminal, controller, clock, app, pane);

    pane.set_active(false);
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    controller: &mut SimController,
    clock: &Clock,
    mut app: App,
    pane: &LogPane,
) -> Result<()> {
    let cycle = Duration::from_millis(controller.config().control.cycle_ms);
    let mut last_frame: Option<Instant> = None;

    loop {
        if last_frame.map_or(true, |t| t.elapsed() >= FRAME_INTERVAL) {
            terminal.draw(|frame| draw(frame, controller, &app, pane))?;
            last_frame = Some(Instant::now());
        }

        if event::poll(cycle)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Esc => return Ok(()),
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            return Ok(())
                        }
                        KeyCode::Enter => {
                            let line = std::mem::take(&mut app.input);
                            if !line.trim().is_empty() {
                                app.pending.push(line);
                            }
                        }
                        KeyCode::Backspace => {
                            app.input.pop();
                        }
                        KeyCode::Char(c) => app.input.push(c),
                        _ => {}
                    }
                }
            }
        }

        if let Some(serial) = app.serial.as_mut() {
            app.pending.extend(serial.poll());
        }

        let line = app.pending.pop();
        if let Some(result) = controller.cycle(clock.now_ms(), line.as_deref()) {
            app.last_status = Some(match result {
                Ok(status) => status.to_string(),
                Err(e) => format!("Rejected: {e}"),
            });
        }
    }
}

fn draw(frame: &mut Frame, controller: &SimController, app: &App, pane: &LogPane) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(4),
            Constraint::Length(3),
        ])
        .split(frame.size());

    draw_servos(frame, rows[0], controller, app);
    draw_fan(frame, rows[1], controller);
    draw_audio(frame, rows[2], controller);
    draw_log(frame, rows[3], pane);
    draw_input(frame, rows[4], app);
}

fn draw_servos(frame: &mut Frame, area: Rect, controller: &SimController, app: &App) {
    let rows = ServoId::ALL.iter().map(|&id| {
        let state = controller.servo_state(id);
        Row::new(vec![
            id.to_string(),
            String::from(if state.enabled { "on" } else { "off" }),
            format!("{} ms", state.interval_ms),
            state.position.to_string(),
            String::from(if state.clockwise { "cw" } else { "ccw" }),
        ])
    });
    let header = Row::new(vec!["Servo", "State", "Interval", "Position", "Direction"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let title = match app.serial {
        Some(ref serial) => format!("Servos [{}]", serial.name()),
        None => String::from("Servos"),
    };

    let table = Table::new(rows, [Constraint::Length(10); 5])
        .header(header)
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(table, area);
}

fn draw_fan(frame: &mut Frame, area: Rect, controller: &SimController) {
    let duty = controller.fan().duty();
    let gauge = Gauge::default()
        .block(Block::default().title("Fan").borders(Borders::ALL))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(f64::from(duty) / 255.0)
        .label(format!("duty {duty}/255"));
    frame.render_widget(gauge, area);
}

fn draw_audio(frame: &mut Frame, area: Rect, controller: &SimController) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(32), Constraint::Min(10)])
        .split(area);

    let audio = controller.audio();
    let waveform = match controller.waveform_state().load() {
        Ok(waveform) => waveform.to_string(),
        Err(code) => format!("unknown ({code:#04x})"),
    };
    let text = vec![
        Line::from(format!(
            "State:     {}",
            if audio.is_running() { "playing" } else { "stopped" }
        )),
        Line::from(format!("Waveform:  {waveform}")),
        Line::from(format!("Frequency: {} Hz", controller.oscillators().frequency())),
        Line::from(format!("Samples:   {}", audio.samples_written())),
    ];
    let info = Paragraph::new(text).block(Block::default().title("Audio").borders(Borders::ALL));
    frame.render_widget(info, columns[0]);

    let data: Vec<u64> = audio
        .history()
        .iter()
        .map(|&s| (i32::from(s) - i32::from(i16::MIN)) as u64)
        .collect();
    let sparkline = Sparkline::default()
        .block(Block::default().title("Output").borders(Borders::ALL))
        .data(&data)
        .max(u64::from(u16::MAX))
        .style(Style::default().fg(Color::Yellow));
    frame.render_widget(sparkline, columns[1]);
}

fn draw_log(frame: &mut Frame, area: Rect, pane: &LogPane) {
    let visible = usize::from(area.height.saturating_sub(2));
    let items: Vec<ListItem> = pane.recent(visible).into_iter().map(ListItem::new).collect();
    let list = List::new(items).block(Block::default().title("Log").borders(Borders::ALL));
    frame.render_widget(list, area);
}

fn draw_input(frame: &mut Frame, area: Rect, app: &App) {
    let title = match app.last_status {
        Some(ref status) => format!("Command (Enter sends, Esc quits) | {status}"),
        None => String::from("Command (Enter sends, Esc quits)"),
    };
    let input = Paragraph::new(format!("> {}", app.input))
        .block(Block::default().title(title).borders(Borders::ALL));
    frame.render_widget(input, area);
    frame.set_cursor(area.x + 3 + app.input.chars().count() as u16, area.y + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_pane_collects_whole_lines() {
        let pane = LogPane::default();
        pane.set_active(true);
        let mut writer = pane.writer();
        writer.write_all(b"[INFO] Fan speed 50").unwrap();
        assert!(pane.recent(10).is_empty());
        writer.write_all(b" (duty 127/255)\n[WARN] Wrong component code 'Q'\n").unwrap();
        assert_eq!(
            pane.recent(10),
            vec!["[INFO] Fan speed 50 (duty 127/255)", "[WARN] Wrong component code 'Q'"]
        );
        assert_eq!(pane.recent(1), vec!["[WARN] Wrong component code 'Q'"]);
    }

    #[test]
    fn pane_is_bounded() {
        let pane = LogPane::default();
        for i in 0..(LOG_CAPACITY + 5) {
            pane.push(i.to_string());
        }
        let lines = pane.recent(LOG_CAPACITY + 5);
        assert_eq!(lines.len(), LOG_CAPACITY);
        assert_eq!(lines[0], "5");
    }
}
