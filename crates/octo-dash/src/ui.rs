use crate::state::{App, Focus, TreeRow};
use crate::theme::{self, icons};
use octo_core::BufferSnapshot;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &mut App) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_header(f, app, rows[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(rows[1]);
    app.update_layout(body[0]);
    render_tree(f, app, body[0]);

    let output_column = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(body[1]);
    render_output(f, app, output_column[0]);
    render_input(f, app, output_column[1]);

    render_footer(f, rows[2]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let parts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(10)])
        .split(area);
    f.render_widget(
        Paragraph::new(Span::styled(" Octo - Script Dashboard", theme::HEADER_STYLE))
            .style(theme::BAR_STYLE),
        parts[0],
    );
    f.render_widget(
        Paragraph::new(app.clock.as_str())
            .alignment(Alignment::Right)
            .style(theme::BAR_STYLE),
        parts[1],
    );
}

fn render_tree(f: &mut Frame, app: &mut App, area: Rect) {
    let border_style = if app.focus == Focus::Tree {
        theme::FOCUSED_BORDER
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Scripts")
        .border_style(border_style);

    if app.rows.is_empty() {
        let inner = block.inner(area);
        f.render_widget(block, area);
        let text = vec![
            Line::from(Span::styled(
                "No scripts found",
                Style::default().fg(Color::Yellow),
            )),
            Line::from(""),
            Line::from(format!(
                "scripts dir: {}",
                app.controller.scripts_dir().display()
            )),
            Line::from(""),
            Line::from("Add files there; the tree refreshes on its own."),
        ];
        f.render_widget(Paragraph::new(text).wrap(Wrap { trim: true }), inner);
        return;
    }

    let running = app
        .controller
        .active_session()
        .filter(|session| session.is_running())
        .map(|session| session.entry().full_path.clone());

    let items: Vec<ListItem> = app
        .rows
        .iter()
        .map(|row| match row {
            TreeRow::Category(name) => {
                ListItem::new(Line::from(Span::styled(name.clone(), theme::CATEGORY_STYLE)))
            }
            TreeRow::Script(entry) => {
                let icon = if running.as_ref() == Some(&entry.full_path) {
                    icons::RUNNING
                } else {
                    icons::SCRIPT
                };
                ListItem::new(Line::from(format!("  {icon} {}", entry.display_name)))
            }
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(theme::SELECTED_STYLE);
    f.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_output(f: &mut Frame, app: &mut App, area: Rect) {
    let snapshot = app.controller.buffer().snapshot();
    let lines = output_lines(&snapshot);

    let status = match app.controller.active_session() {
        Some(session) if session.is_running() => {
            format!("{} {}", icons::RUNNING, session.entry().display_name)
        }
        _ => icons::IDLE.to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" | Output (Ctrl+C to Kill) {status} "));
    let inner = block.inner(area);

    let max_scroll = lines.len().saturating_sub(inner.height as usize);
    let max_scroll = u16::try_from(max_scroll).unwrap_or(u16::MAX);
    app.output_scroll_back = app.output_scroll_back.min(max_scroll);
    let offset = max_scroll - app.output_scroll_back;

    f.render_widget(Paragraph::new(lines).block(block).scroll((offset, 0)), area);
}

fn render_input(f: &mut Frame, app: &App, area: Rect) {
    let focused = app.focus == Focus::Input;
    let border_style = if focused {
        theme::FOCUSED_BORDER
    } else {
        Style::default()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Input")
        .border_style(border_style);
    let inner = block.inner(area);

    let content = if app.input.is_empty() && !focused {
        Line::from(Span::styled(
            "Type input here and press Enter...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Line::from(app.input.as_str())
    };
    f.render_widget(Paragraph::new(content).block(block), area);

    if focused {
        let width = app.input.chars().count() as u16;
        let x = inner.x + width.min(inner.width.saturating_sub(1));
        f.set_cursor(x, inner.y);
    }
}

fn render_footer(f: &mut Frame, area: Rect) {
    let parts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(22), Constraint::Min(10)])
        .split(area);
    f.render_widget(
        Paragraph::new(" V0.1 - EXPERIMENTAL").style(theme::BAR_STYLE),
        parts[0],
    );
    f.render_widget(
        Paragraph::new("Enter run | Tab focus | Ctrl+C kill | PgUp/PgDn scroll | q quit ")
            .alignment(Alignment::Right)
            .style(theme::BAR_STYLE),
        parts[1],
    );
}

/// Splits the transcript into display lines, keeping each segment's style.
/// A carriage return keeps only the text after it, like a terminal redraw.
pub fn output_lines(snapshot: &BufferSnapshot) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();

    for segment in &snapshot.segments {
        let style = theme::segment_style(segment.kind);
        let mut pieces = segment.text.split('\n').peekable();
        while let Some(piece) = pieces.next() {
            let visible = piece.rsplit('\r').next().unwrap_or_default();
            if !visible.is_empty() {
                current.push(Span::styled(visible.replace('\t', "    "), style));
            }
            if pieces.peek().is_some() {
                lines.push(Line::from(std::mem::take(&mut current)));
            }
        }
    }
    if !current.is_empty() {
        lines.push(Line::from(current));
    }
    lines
}
