use chrono::Local;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use octo_core::{CatalogSnapshot, ChannelNotifier, DashboardController, LaunchOutcome, ScriptEntry};
use ratatui::{layout::Rect, widgets::ListState};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Tree,
    Input,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeRow {
    Category(String),
    Script(ScriptEntry),
}

pub struct App {
    pub controller: DashboardController<ChannelNotifier>,
    pub rows: Vec<TreeRow>,
    pub list_state: ListState,
    pub input: String,
    pub focus: Focus,
    pub clock: String,
    pub output_scroll_back: u16,
    pub tree_area: Option<Rect>,
    pub dirty: bool,
    should_quit: bool,
}

impl App {
    pub fn new(controller: DashboardController<ChannelNotifier>) -> Self {
        controller.buffer().reset("System ready.");
        Self {
            controller,
            rows: Vec::new(),
            list_state: ListState::default(),
            input: String::new(),
            focus: Focus::Tree,
            clock: String::new(),
            output_scroll_back: 0,
            tree_area: None,
            dirty: true,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn on_tick(&mut self) {
        self.refresh_catalog();
    }

    pub fn update_clock(&mut self) {
        let now = Local::now().format("%H:%M:%S").to_string();
        if now != self.clock {
            self.clock = now;
            self.mark_dirty();
        }
    }

    /// Rebuilds the tree only when the catalog actually changed.
    pub fn refresh_catalog(&mut self) {
        let Some(snapshot) = self.controller.on_poll_tick() else {
            return;
        };
        let rows = build_rows(snapshot);
        debug!(rows = rows.len(), "rebuilding script tree");
        self.rebuild_tree(rows);
    }

    fn rebuild_tree(&mut self, rows: Vec<TreeRow>) {
        let selected_path = self.selected_entry().map(|entry| entry.full_path.clone());
        self.rows = rows;

        let restored = selected_path.and_then(|path| self.position_of(&path));
        let fallback = self
            .rows
            .iter()
            .position(|row| matches!(row, TreeRow::Script(_)));
        self.list_state.select(restored.or(fallback));
        self.mark_dirty();
    }

    fn position_of(&self, path: &Path) -> Option<usize> {
        self.rows.iter().position(|row| match row {
            TreeRow::Script(entry) => entry.full_path == path,
            TreeRow::Category(_) => false,
        })
    }

    pub fn selected_entry(&self) -> Option<&ScriptEntry> {
        let idx = self.list_state.selected()?;
        match self.rows.get(idx)? {
            TreeRow::Script(entry) => Some(entry),
            TreeRow::Category(_) => None,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        self.mark_dirty();

        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('c') => {
                    self.controller.on_kill_requested();
                }
                KeyCode::Char('q') => {
                    self.should_quit = true;
                }
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Tree => Focus::Input,
                    Focus::Input => Focus::Tree,
                };
                return;
            }
            KeyCode::PageUp => {
                self.output_scroll_back = self.output_scroll_back.saturating_add(10);
                return;
            }
            KeyCode::PageDown => {
                self.output_scroll_back = self.output_scroll_back.saturating_sub(10);
                return;
            }
            _ => {}
        }

        match self.focus {
            Focus::Tree => self.handle_tree_key(key),
            Focus::Input => self.handle_input_key(key),
        }
    }

    fn handle_tree_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
            }
            KeyCode::Char('r') => {
                self.refresh_catalog();
            }
            KeyCode::Enter => {
                self.launch_selected();
            }
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => {
                self.focus = Focus::Tree;
            }
            KeyCode::Enter => {
                self.submit_input();
            }
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Char(ch) => {
                self.input.push(ch);
            }
            _ => {}
        }
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) {
        let over_tree = self
            .tree_area
            .is_some_and(|area| contains(area, event.column, event.row));
        match event.kind {
            MouseEventKind::ScrollUp if over_tree => self.move_selection(-1),
            MouseEventKind::ScrollDown if over_tree => self.move_selection(1),
            MouseEventKind::ScrollUp => {
                self.output_scroll_back = self.output_scroll_back.saturating_add(3);
            }
            MouseEventKind::ScrollDown => {
                self.output_scroll_back = self.output_scroll_back.saturating_sub(3);
            }
            _ => return,
        }
        self.mark_dirty();
    }

    pub fn update_layout(&mut self, tree_area: Rect) {
        self.tree_area = Some(tree_area);
    }

    fn move_selection(&mut self, delta: isize) {
        let scripts: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches!(row, TreeRow::Script(_)))
            .map(|(idx, _)| idx)
            .collect();
        if scripts.is_empty() {
            self.list_state.select(None);
            return;
        }

        let current = self
            .list_state
            .selected()
            .and_then(|idx| scripts.iter().position(|&row| row == idx))
            .unwrap_or(0);
        let next = (current as isize + delta).clamp(0, scripts.len() as isize - 1) as usize;
        self.list_state.select(Some(scripts[next]));
    }

    fn launch_selected(&mut self) {
        let Some(entry) = self.selected_entry().cloned() else {
            return;
        };
        self.focus = Focus::Input;
        if self.controller.on_script_selected(&entry) != LaunchOutcome::Rejected {
            self.output_scroll_back = 0;
        }
    }

    fn submit_input(&mut self) {
        if self.controller.on_operator_input(&self.input) {
            self.input.clear();
            self.output_scroll_back = 0;
        }
    }

    pub fn shutdown(&mut self) {
        self.controller.shutdown();
    }
}

pub fn build_rows(snapshot: &CatalogSnapshot) -> Vec<TreeRow> {
    let mut rows = Vec::with_capacity(snapshot.len() + 8);
    for (category, entries) in snapshot.iter() {
        rows.push(TreeRow::Category(category.to_string()));
        rows.extend(entries.iter().cloned().map(TreeRow::Script));
    }
    rows
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}
