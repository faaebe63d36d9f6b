//! Rendering of the coordinator view.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::core::{Coordinator, HalfWorkflow, HalfWorkflowState, KeyboardHalfRole};

pub fn render(frame: &mut Frame, coordinator: &Coordinator) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Halves
            Constraint::Length(3), // Footer/help
        ])
        .split(frame.area());

    render_header(frame, coordinator, chunks[0]);

    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[1]);

    for (role, area) in [
        (KeyboardHalfRole::Central, halves[0]),
        (KeyboardHalfRole::Peripheral, halves[1]),
    ] {
        render_half(
            frame,
            coordinator.workflow(role),
            coordinator.focus() == role,
            area,
        );
    }

    render_footer(frame, coordinator, chunks[2]);
}

fn render_header(frame: &mut Frame, coordinator: &Coordinator, area: Rect) {
    let mut spans = vec![Span::styled(
        "  ZMK Flasher",
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if coordinator.dry_run() {
        spans.push(Span::styled(
            "  [DRY RUN]",
            Style::default().fg(Color::Yellow),
        ));
    }
    spans.push(Span::styled(
        format!("  {} device(s) detected", coordinator.devices().len()),
        Style::default().fg(Color::DarkGray),
    ));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
}

fn render_half(frame: &mut Frame, workflow: &HalfWorkflow, focused: bool, area: Rect) {
    let (border, title) = if focused {
        (
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            format!("> {} <", workflow.role().label()),
        )
    } else {
        (
            Style::default().fg(Color::DarkGray),
            workflow.role().label().to_string(),
        )
    };

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(border);

    let label = Style::default().fg(Color::Cyan);
    let state = workflow.state();

    let target = state
        .mount_point()
        .or(workflow.mount_override())
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut lines = vec![
        Line::from(vec![
            Span::styled("  Source: ", label),
            Span::raw(workflow.source().display().to_string()),
        ]),
        Line::from(vec![
            Span::styled("  Target: ", label),
            Span::raw(target),
        ]),
        Line::from(vec![
            Span::styled("  State:  ", label),
            state_span(state),
        ]),
    ];

    if workflow.mount_override().is_some() {
        let device = workflow
            .matched_device()
            .map(|d| d.display_name())
            .unwrap_or_else(|| "not detected".to_string());
        lines.push(Line::from(vec![
            Span::styled("  Device: ", label),
            Span::raw(device),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::raw(format!("  {}", hint(workflow)))));

    if workflow.accepts_selection() && !workflow.selection().candidates().is_empty() {
        lines.push(Line::from(""));
        let selection = workflow.selection();
        for (i, device) in selection.candidates().iter().enumerate() {
            let is_selected = i == selection.cursor();
            let style = if is_selected && focused {
                Style::default()
                    .bg(Color::DarkGray)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let mounted = device
                .mount_points
                .first()
                .map(|p| format!("  {}", p.display()))
                .unwrap_or_default();

            lines.push(Line::from(Span::styled(
                format!(
                    "{}{}{}",
                    if is_selected { "  > " } else { "    " },
                    device.display_name(),
                    mounted
                ),
                style,
            )));
        }
    }

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn state_span(state: &HalfWorkflowState) -> Span<'static> {
    let color = match state {
        HalfWorkflowState::Done => Color::Green,
        HalfWorkflowState::Failed { .. } => Color::Red,
        HalfWorkflowState::Copying { .. } | HalfWorkflowState::AwaitingMount { .. } => {
            Color::Yellow
        }
        _ => Color::White,
    };
    Span::styled(state.name(), Style::default().fg(color))
}

fn hint(workflow: &HalfWorkflow) -> String {
    match workflow.state() {
        HalfWorkflowState::AwaitingDevice => match workflow.mount_override() {
            Some(mount_point) => format!("Press Enter to use {}", mount_point.display()),
            None if workflow.selection().candidates().is_empty() => {
                "Put this half in bootloader mode and plug it in".to_string()
            }
            None => "Select its bootloader volume and press Enter".to_string(),
        },
        HalfWorkflowState::AwaitingMount { device } => {
            format!("Mounting {}...", device.display_name())
        }
        HalfWorkflowState::ReadyToCopy { .. } => "Press Enter to flash".to_string(),
        HalfWorkflowState::Copying { .. } => "Flashing...".to_string(),
        HalfWorkflowState::Done if workflow.dry_run() => {
            "Dry run complete, nothing was written".to_string()
        }
        HalfWorkflowState::Done => "Flashed".to_string(),
        HalfWorkflowState::Failed { reason, .. } => {
            format!("Failed: {} (Enter to retry)", reason)
        }
    }
}

fn render_footer(frame: &mut Frame, coordinator: &Coordinator, area: Rect) {
    let mut help = String::from("  [Enter] Advance  [↑↓] Select");
    if coordinator.can_toggle_focus() {
        help.push_str("  [Tab/←→] Switch half");
    }
    help.push_str("  [q] Quit");

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    frame.render_widget(Paragraph::new(help).block(block), area);
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ratatui::{Terminal, backend::TestBackend};

    use super::*;
    use crate::core::{Action, AppEvent, BlockDevice, FlashPlan};

    fn coordinator(dry_run: bool) -> Coordinator {
        Coordinator::new(FlashPlan {
            central_source: PathBuf::from("/fw/left.uf2"),
            peripheral_source: PathBuf::from("/fw/right.uf2"),
            central_mount: Some(PathBuf::from("/mnt/left")),
            peripheral_mount: None,
            dry_run,
        })
    }

    fn draw(coordinator: &Coordinator) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| render(frame, coordinator)).unwrap();

        let buffer = terminal.backend().buffer();
        let width = buffer.area.width as usize;
        buffer
            .content()
            .chunks(width)
            .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_renders_both_halves_and_focus() {
        let screen = draw(&coordinator(false));

        assert!(screen.contains("ZMK Flasher"));
        assert!(screen.contains("> Central (left) <"));
        assert!(screen.contains("Peripheral (right)"));
        assert!(!screen.contains("> Peripheral (right) <"));
        assert!(screen.contains("/fw/left.uf2"));
        assert!(screen.contains("AwaitingDevice"));
        assert!(screen.contains("Switch half"));
        assert!(screen.contains("[q] Quit"));
        assert!(!screen.contains("DRY RUN"));
    }

    #[test]
    fn test_dry_run_banner() {
        assert!(draw(&coordinator(true)).contains("[DRY RUN]"));
    }

    #[test]
    fn test_toggle_hint_hidden_while_copying() {
        let mut coordinator = coordinator(false);
        coordinator.handle(AppEvent::Key(Action::Advance));
        coordinator.handle(AppEvent::Key(Action::Advance));

        let screen = draw(&coordinator);
        assert!(screen.contains("Copying"));
        assert!(screen.contains("/mnt/left"));
        assert!(!screen.contains("Switch half"));
    }

    #[test]
    fn test_candidates_listed_for_focused_half() {
        let mut coordinator = coordinator(false);
        coordinator.handle(AppEvent::DevicesChanged(vec![BlockDevice {
            uuid: "1234-ABCD".to_string(),
            name: "sdb".to_string(),
            label: "NICENANO".to_string(),
            path: PathBuf::from("/dev/sdb"),
            mount_points: Vec::new(),
        }]));
        coordinator.handle(AppEvent::Key(Action::ToggleFocus));

        let screen = draw(&coordinator);
        assert!(screen.contains("> NICENANO (sdb)"));
        assert!(screen.contains("1 device(s) detected"));
        // Central uses /mnt/left, which no detected device is mounted at.
        assert!(screen.contains("Device: not detected"));
    }
}
