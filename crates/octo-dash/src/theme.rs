use octo_core::{SegmentKind, StatusKind};
use ratatui::style::{Color, Modifier, Style};

const SAGE: Color = Color::Rgb(142, 192, 124);
const TEAL: Color = Color::Rgb(131, 165, 152);
const AMBER: Color = Color::Rgb(250, 189, 47);
const STONE: Color = Color::Rgb(146, 131, 116);
const BAR_BG: Color = Color::Rgb(24, 27, 34);
const BAR_FG: Color = Color::Rgb(189, 174, 147);

pub const HEADER_STYLE: Style = Style::new().fg(SAGE).add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .fg(Color::Black)
    .bg(TEAL)
    .add_modifier(Modifier::BOLD);
pub const CATEGORY_STYLE: Style = Style::new().fg(AMBER).add_modifier(Modifier::BOLD);
pub const BAR_STYLE: Style = Style::new().fg(BAR_FG).bg(BAR_BG);
pub const FOCUSED_BORDER: Style = Style::new().fg(Color::Cyan);

pub fn segment_style(kind: SegmentKind) -> Style {
    match kind {
        SegmentKind::Header => Style::new().fg(TEAL).add_modifier(Modifier::BOLD),
        SegmentKind::Output => Style::new(),
        SegmentKind::Echo => CATEGORY_STYLE,
        SegmentKind::Notice => Style::new().fg(STONE).add_modifier(Modifier::ITALIC),
        SegmentKind::Status(status) => status_style(status),
    }
}

pub fn status_style(status: StatusKind) -> Style {
    let color = match status {
        StatusKind::Success => Color::Rgb(184, 187, 38),
        StatusKind::Failed | StatusKind::Error => Color::Rgb(251, 73, 52),
        StatusKind::Terminated => Color::Rgb(254, 128, 25),
    };
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}

pub mod icons {
    pub const RUNNING: &str = ">";
    pub const IDLE: &str = ".";
    pub const SCRIPT: &str = "-";
}
