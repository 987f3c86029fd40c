/// Ratatui draw entry-point for the dashboard and the login screen.
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::{AppState, LoginField, Mode};
use crate::dashboard::NoticeLevel;
use crate::gateway::TaskGateway;
use crate::task::Task;

pub const SPINNER_GLYPHS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const BG: Color = Color::Rgb(8, 8, 14);
const BAR_BG: Color = Color::Rgb(10, 10, 18);
const HINT: Color = Color::Rgb(70, 70, 90);

// ── Main draw entry point ─────────────────────────────────────────────────────

pub fn draw<G: TaskGateway>(f: &mut Frame, state: &AppState<G>) {
    let area = f.area();
    f.render_widget(Block::default().style(Style::default().bg(BG)), area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(0),    // task list / login
            Constraint::Length(3), // input box
            Constraint::Length(1), // status bar
        ])
        .split(area);

    draw_header(f, state, chunks[0]);
    match state.mode {
        Mode::Starting => draw_starting(f, state, chunks[1]),
        Mode::Tasks => draw_tasks(f, state, chunks[1]),
        Mode::Login => draw_login(f, state, chunks[1]),
    }
    if state.mode == Mode::Tasks {
        draw_input(f, state, chunks[2]);
    }
    draw_status_bar(f, state, chunks[3]);
}

fn spinner(state_tick: u64) -> &'static str {
    SPINNER_GLYPHS[(state_tick as usize) % SPINNER_GLYPHS.len()]
}

// ── Header ────────────────────────────────────────────────────────────────────

fn draw_header<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let visible = state.dashboard.visible();
    let done = visible.iter().filter(|t| t.completed).count();
    let pending = state.dashboard.pending_mutations();

    let (glyph, glyph_color) = if state.is_busy() {
        (spinner(state.spinner_tick), Color::Cyan)
    } else {
        ("✓", Color::Green)
    };

    let who = match (&state.display_name, state.dashboard.session().auth()) {
        (Some(name), Some(_)) => name.clone(),
        _ => state.dashboard.session().label(),
    };

    let mut spans = vec![
        Span::raw(" "),
        Span::styled(glyph, Style::default().fg(glyph_color).add_modifier(Modifier::BOLD)),
        Span::styled(" todosync", Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::raw("  "),
        Span::styled(state.profile.clone(), Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(state.endpoint.clone(), Style::default().fg(Color::DarkGray)),
        Span::styled("  ·  ", Style::default().fg(Color::DarkGray)),
        Span::styled(who, Style::default().fg(Color::Rgb(100, 180, 220))),
    ];
    if state.mode == Mode::Tasks {
        spans.push(Span::styled(
            format!("  {done}/{} done", visible.len()),
            Style::default().fg(Color::DarkGray),
        ));
    }
    if pending > 0 {
        spans.push(Span::styled(
            format!("  ⟳ {pending} syncing"),
            Style::default().fg(Color::Yellow),
        ));
    }

    f.render_widget(
        Paragraph::new(Line::from(spans)).style(Style::default().bg(BAR_BG)),
        area,
    );
}

// ── Body ──────────────────────────────────────────────────────────────────────

fn draw_starting<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let line = Line::from(vec![
        Span::styled(spinner(state.spinner_tick), Style::default().fg(Color::Cyan)),
        Span::styled(" checking session…", Style::default().fg(Color::DarkGray)),
    ]);
    f.render_widget(
        Paragraph::new(line).alignment(Alignment::Center),
        centered_line(area),
    );
}

fn draw_tasks<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let tasks = state.dashboard.visible();

    if tasks.is_empty() {
        // The loading indicator only shows while there is nothing to show
        let line = if state.dashboard.is_loading() {
            Line::from(vec![
                Span::styled(spinner(state.spinner_tick), Style::default().fg(Color::Cyan)),
                Span::styled(" loading tasks…", Style::default().fg(Color::DarkGray)),
            ])
        } else {
            Line::from(Span::styled(
                "No tasks yet. Type a title below and press Enter.",
                Style::default().fg(HINT),
            ))
        };
        f.render_widget(
            Paragraph::new(line).alignment(Alignment::Center),
            centered_line(area),
        );
        return;
    }

    // Keep the selection on screen
    let height = area.height as usize;
    let offset = if height == 0 { 0 } else { state.selected.saturating_sub(height - 1) };

    let lines: Vec<Line> = tasks
        .iter()
        .enumerate()
        .skip(offset)
        .take(height)
        .map(|(i, t)| task_line(t, i == state.selected, area.width as usize))
        .collect();

    f.render_widget(Paragraph::new(lines), area);
}

fn task_line(task: &Task, selected: bool, width: usize) -> Line<'static> {
    let marker = if selected { " ▸ " } else { "   " };
    let check = if task.completed { "[x] " } else { "[ ] " };
    let sync = if task.is_placeholder() { "  …" } else { "" };

    let mut title_style = Style::default().fg(Color::White);
    if task.completed {
        title_style = Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT);
    }
    if task.is_placeholder() {
        title_style = title_style.add_modifier(Modifier::ITALIC);
    }
    if selected {
        title_style = title_style.add_modifier(Modifier::BOLD);
    }

    let fixed = marker.width() + check.width() + sync.width();
    let room = width.saturating_sub(fixed);
    let title = truncate_to_width(&task.title, room);
    let mut spans = vec![
        Span::styled(marker, Style::default().fg(Color::Cyan)),
        Span::styled(check, Style::default().fg(if task.completed { Color::Green } else { Color::DarkGray })),
        Span::styled(title.clone(), title_style),
    ];

    if let Some(desc) = &task.description {
        let room = room.saturating_sub(title.width() + 3);
        if room > 1 {
            spans.push(Span::styled("  ·", Style::default().fg(Color::DarkGray)));
            spans.push(Span::styled(
                format!(" {}", truncate_to_width(desc, room - 1)),
                Style::default().fg(Color::Rgb(120, 120, 140)),
            ));
        }
    }
    spans.push(Span::styled(sync, Style::default().fg(Color::Yellow)));

    let line = Line::from(spans);
    if selected {
        line.style(Style::default().bg(Color::Rgb(20, 20, 34)))
    } else {
        line
    }
}

fn draw_login<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let width = 56u16.min(area.width.saturating_sub(4));
    let height = 9u16.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    let popup_area = Rect { x, y, width, height };

    f.render_widget(Clear, popup_area);

    let form = &state.login;
    let field = |label: &'static str, value: String, focused: bool| {
        let label_style = if focused {
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let cursor = if focused && !form.submitting { "▏" } else { "" };
        Line::from(vec![
            Span::styled(format!("  {label:<10}"), label_style),
            Span::styled(value, Style::default().fg(Color::White)),
            Span::styled(cursor, Style::default().fg(Color::Cyan)),
        ])
    };

    let masked = "•".repeat(form.password.chars().count());
    let status = if form.submitting {
        Line::from(vec![
            Span::styled(format!("  {}", spinner(state.spinner_tick)), Style::default().fg(Color::Cyan)),
            Span::styled(" signing in…", Style::default().fg(Color::DarkGray)),
        ])
    } else if let Some(err) = &form.error {
        Line::from(Span::styled(format!("  ✗ {err}"), Style::default().fg(Color::Red)))
    } else {
        Line::from("")
    };

    let lines = vec![
        Line::from(""),
        field("email", form.identifier.clone(), form.focus == LoginField::Identifier),
        Line::from(""),
        field("password", masked, form.focus == LoginField::Password),
        Line::from(""),
        status,
        Line::from(Span::styled(
            "  Tab switch field · Enter sign in · Esc quit",
            Style::default().fg(HINT),
        )),
    ];

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(Span::styled(" Sign in ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)))
        .style(Style::default().bg(BAR_BG));

    f.render_widget(Paragraph::new(lines).block(block), popup_area);
}

// ── Input box ─────────────────────────────────────────────────────────────────

fn draw_input<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let prompt_span = Span::styled(
        "  ❯ ",
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    );
    let content_span = if state.input.is_empty() {
        Span::styled("new task · title | description", Style::default().fg(HINT))
    } else {
        Span::styled(state.input.clone(), Style::default().fg(Color::White))
    };

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::Rgb(60, 60, 80)))
        .style(Style::default().bg(BG));

    f.render_widget(
        Paragraph::new(Line::from(vec![prompt_span, content_span])).block(block),
        area,
    );

    // prompt is "  ❯ ", 4 cols
    let prompt_width: u16 = 4;
    let before_cursor = &state.input[..state.cursor.min(state.input.len())];
    let cursor_x = cursor_column(area.x, prompt_width, before_cursor);
    let cursor_y = area.y.saturating_add(1); // +1 for top border
    if cursor_x < area.x.saturating_add(area.width) {
        f.set_cursor_position((cursor_x, cursor_y));
    }
}

/// Screen column of the cursor; saturates instead of wrapping on huge input.
fn cursor_column(x: u16, prompt_width: u16, before_cursor: &str) -> u16 {
    let typed = u16::try_from(before_cursor.width()).unwrap_or(u16::MAX);
    x.saturating_add(prompt_width).saturating_add(typed)
}

// ── Status bar ────────────────────────────────────────────────────────────────

fn draw_status_bar<G: TaskGateway>(f: &mut Frame, state: &AppState<G>, area: Rect) {
    let line = match state.dashboard.last_notice() {
        Some(n) => {
            let (glyph, color) = match n.level {
                NoticeLevel::Info => ("·", Color::Rgb(100, 180, 220)),
                NoticeLevel::Error => ("✗", Color::Red),
            };
            let stamp = n.at.format("%H:%M:%S").to_string();
            let room = (area.width as usize).saturating_sub(stamp.width() + 6);
            Line::from(vec![
                Span::styled(format!(" {stamp} "), Style::default().fg(Color::DarkGray)),
                Span::styled(glyph, Style::default().fg(color).add_modifier(Modifier::BOLD)),
                Span::styled(format!(" {}", truncate_to_width(&n.text, room)), Style::default().fg(color)),
            ])
        }
        None => {
            let hints = match state.mode {
                Mode::Tasks => " Enter add · ↑↓ select · Ctrl+T/Space toggle · Ctrl+D delete · Ctrl+R reload · Ctrl+L logout · Esc quit",
                Mode::Login | Mode::Starting => " Esc quit",
            };
            Line::from(Span::styled(hints, Style::default().fg(HINT)))
        }
    };
    f.render_widget(Paragraph::new(line).style(Style::default().bg(BAR_BG)), area);
}

// ── Small helpers ─────────────────────────────────────────────────────────────

fn centered_line(area: Rect) -> Rect {
    Rect {
        x: area.x,
        y: area.y + area.height / 2,
        width: area.width,
        height: area.height.min(1),
    }
}

/// Cut `s` to at most `max` display columns, ending in `…` when cut.
pub fn truncate_to_width(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > max - 1 {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
