use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Gauge, Paragraph, Widget, Wrap},
};
use runoverlay::{
    display::{DistanceMarker, OverlayView},
    runtime::Clock,
    session::RunStatus,
    store::SessionStore,
};

use crate::App;

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;

const LEGEND: &str =
    "(space) start/pause/resume  (f)inish  (r)eset  (↑/↓) speed  (←/→) incline  (q)uit";

impl<S: SessionStore, C: Clock> Widget for &App<S, C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let view = self.overlay.view();
        render_view(&view, self.notice.as_deref(), area, buf);
    }
}

fn status_label(view: &OverlayView) -> String {
    let run = match view.run_id {
        Some(id) if id > 0 => format!("RUN #{id}"),
        _ => "NO RUN".to_string(),
    };
    let status = if view.complete {
        "COMPLETE".to_string()
    } else {
        view.status.to_string().to_uppercase()
    };
    match &view.paused_for {
        Some(paused_for) => format!("{run}  {status} {paused_for}"),
        None => format!("{run}  {status}"),
    }
}

fn status_color(view: &OverlayView) -> Color {
    if view.complete {
        return Color::Green;
    }
    match view.status {
        RunStatus::Running => Color::Cyan,
        RunStatus::Paused => Color::Yellow,
        RunStatus::Ready => Color::Gray,
        RunStatus::Complete => Color::Green,
    }
}

/// Lay marker labels out along `width` columns, each label ending at its position.
pub fn marker_line(markers: &[DistanceMarker], width: u16) -> Line<'static> {
    let width = width as usize;
    if width == 0 {
        return Line::default();
    }

    let done = Style::default().fg(Color::Green).add_modifier(Modifier::BOLD);
    let pending = Style::default().add_modifier(Modifier::DIM);

    let mut spans = Vec::new();
    let mut cursor = 0usize;
    for m in markers {
        let end = ((m.ratio * (width - 1) as f64).round() as usize).min(width - 1);
        let start = (end + 1).saturating_sub(m.label.len());
        if cursor > 0 && start <= cursor {
            // would touch the previous label
            continue;
        }
        if start > cursor {
            spans.push(Span::raw(" ".repeat(start - cursor)));
        }
        spans.push(Span::styled(
            m.label.clone(),
            if m.completed { done } else { pending },
        ));
        cursor = start + m.label.len();
    }
    Line::from(spans)
}

pub fn render_view(view: &OverlayView, notice: Option<&str>, area: Rect, buf: &mut Buffer) {
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let dim_style = Style::default().add_modifier(Modifier::DIM);
    let italic_style = Style::default().add_modifier(Modifier::ITALIC);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(1), // run + goal
            Constraint::Length(1), // padding
            Constraint::Length(1), // progress
            Constraint::Length(1), // markers
            Constraint::Length(1), // padding
            Constraint::Length(1), // totals
            Constraint::Length(1), // inputs
            Constraint::Min(0),
            Constraint::Length(1), // message
            Constraint::Length(1), // legend
        ])
        .split(area);

    let header = Line::from(vec![
        Span::styled(
            status_label(view),
            Style::default().patch(bold_style).fg(status_color(view)),
        ),
        Span::raw("   "),
        Span::styled(
            format!(
                "GOAL {} · {} · {}",
                view.goal_distance, view.goal_time, view.plan_pace
            ),
            dim_style,
        ),
    ]);
    Paragraph::new(header).render(chunks[0], buf);

    Gauge::default()
        .gauge_style(Style::default().fg(status_color(view)).bg(Color::Black))
        .ratio(view.progress.clamp(0.0, 1.0))
        .label(Span::styled(
            format!("{:.0}%", view.progress * 100.0),
            bold_style,
        ))
        .use_unicode(true)
        .render(chunks[2], buf);

    Paragraph::new(marker_line(&view.markers, chunks[3].width)).render(chunks[3], buf);

    let totals = Paragraph::new(Line::from(vec![
        Span::styled("TIME ", dim_style),
        Span::styled(view.elapsed.clone(), bold_style),
        Span::raw("   "),
        Span::styled("PACE ", dim_style),
        Span::styled(view.pace.clone(), bold_style),
        Span::raw("   "),
        Span::styled("DIST ", dim_style),
        Span::styled(view.distance.clone(), bold_style),
        Span::raw("   "),
        Span::styled("CAL ", dim_style),
        Span::styled(view.calories.to_string(), bold_style),
    ]))
    .alignment(Alignment::Center);
    totals.render(chunks[5], buf);

    let inputs = Paragraph::new(Line::from(vec![
        Span::styled("SPEED ", dim_style),
        Span::raw(view.speed.clone()),
        Span::raw("   "),
        Span::styled("INCLINE ", dim_style),
        Span::raw(view.incline.clone()),
    ]))
    .alignment(Alignment::Center);
    inputs.render(chunks[6], buf);

    if let Some(msg) = view.message.as_deref().or(notice) {
        Paragraph::new(Span::styled(
            msg.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[8], buf);
    }

    Paragraph::new(Span::styled(LEGEND, italic_style)).render(chunks[9], buf);
}
