//! Live dashboard.
//!
//! # Data Flow
//! ```text
//! Aggregator::snapshot() every refresh tick
//!     → pivot() (one row per path, a column per method)
//!     → ratatui table
//! Keys: q / Esc / Ctrl-C quit, c clears the aggregator
//! ```
//!
//! # Design Decisions
//! - Runs on a blocking thread; crossterm event polling is synchronous
//! - The dashboard only reads snapshots; `clear` is its one write

pub mod terminal;

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::layout::Constraint;
use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::{Block, Borders, Cell, Row, Table};
use ratatui::Frame;
use thiserror::Error;

use crate::lifecycle::StopSignal;
use crate::observability::{Aggregator, Entry, RouteKey};
use terminal::Tui;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Per-method counts for one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodCounts {
    pub get: u64,
    pub post: u64,
    pub put: u64,
    pub patch: u64,
    pub delete: u64,
    pub other: u64,
}

impl MethodCounts {
    fn add(&mut self, method: &str, count: u64) {
        let slot = match method {
            "GET" => &mut self.get,
            "POST" => &mut self.post,
            "PUT" => &mut self.put,
            "PATCH" => &mut self.patch,
            "DELETE" => &mut self.delete,
            _ => &mut self.other,
        };
        *slot += count;
    }
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRow {
    pub path: String,
    pub counts: MethodCounts,
    pub last_seen: SystemTime,
}

/// Fold a snapshot into rows keyed by path, most recently active first.
pub fn pivot(snapshot: &[(RouteKey, Entry)]) -> Vec<PathRow> {
    let mut rows: HashMap<&str, PathRow> = HashMap::new();
    for (key, entry) in snapshot {
        let row = rows.entry(key.path.as_str()).or_insert_with(|| PathRow {
            path: key.path.clone(),
            counts: MethodCounts::default(),
            last_seen: entry.last_seen,
        });
        row.counts.add(&key.method, entry.count);
        row.last_seen = row.last_seen.max(entry.last_seen);
    }

    let mut rows: Vec<PathRow> = rows.into_values().collect();
    rows.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.path.cmp(&b.path)));
    rows
}

/// Run the dashboard until the user quits or `stop` fires. Blocking.
pub fn run(
    aggregator: Aggregator,
    refresh: Duration,
    stop: StopSignal,
) -> Result<(), DashboardError> {
    let mut tui = Tui::new()?;
    tui.enter()?;

    loop {
        if stop.is_stopped() {
            break;
        }
        let rows = pivot(&aggregator.snapshot());
        tui.terminal().draw(|frame| render(frame, &rows))?;

        if event::poll(refresh)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Char('c') => aggregator.clear(),
                    _ => {}
                }
            }
        }
    }

    tui.exit()?;
    Ok(())
}

fn render(frame: &mut Frame, rows: &[PathRow]) {
    let header = Row::new(["Path", "GET", "POST", "PUT", "PATCH", "DEL", "OTHER", "Last Seen"])
        .style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    let body = rows.iter().map(|row| {
        Row::new(vec![
            Cell::from(row.path.clone()),
            Cell::from(row.counts.get.to_string()),
            Cell::from(row.counts.post.to_string()),
            Cell::from(row.counts.put.to_string()),
            Cell::from(row.counts.patch.to_string()),
            Cell::from(row.counts.delete.to_string()),
            Cell::from(row.counts.other.to_string()),
            Cell::from(ago(row.last_seen)),
        ])
    });

    let table = Table::new(
        body,
        [
            Constraint::Percentage(40),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(7),
            Constraint::Min(12),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" http-tap  q quit  c clear "),
    );

    frame.render_widget(table, frame.area());
}

fn ago(ts: SystemTime) -> String {
    let secs = match ts.elapsed() {
        Ok(d) => d.as_secs(),
        Err(_) => return "just now".to_string(),
    };
    match secs {
        0 => "just now".to_string(),
        1..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m {}s ago", secs / 60, secs % 60),
        _ => format!("{}h {}m ago", secs / 3600, (secs % 3600) / 60),
    }
}
