//! Terminal view of the simulated hardware.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Row, Table};
use ratatui::Frame;

use crate::board::{ContactorStates, PrechargeStates, TimerState};
use crate::can::{CanFrame, Lane};
use crate::motor::{ControlMode, Telemetry};
use crate::panel::Pedals;
use crate::registers::{Bank, Register};

/// What one CAN lane currently holds.
#[derive(Debug, Clone, PartialEq)]
pub enum LaneContent {
    Empty,
    Frame(CanFrame),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaneView {
    pub lane: Lane,
    pub content: LaneContent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorView {
    pub mode: ControlMode,
    pub velocity: f64,
    pub rpm: f64,
    pub current_setpoint: f64,
    pub max_current: f64,
    pub next_telemetry: Telemetry,
}

/// Everything the dashboard shows, read in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub lanes: Vec<LaneView>,
    pub motor: MotorView,
    pub bank: Bank,
    pub registers: Vec<(Register, u8)>,
    pub pedals: Pedals,
    pub switches: Vec<(&'static str, bool)>,
    pub lights: Vec<(&'static str, bool)>,
    pub contactors: ContactorStates,
    pub precharge: PrechargeStates,
    pub display: Vec<(&'static str, String)>,
    pub timers: Vec<Option<TimerState>>,
}

const KEY_HELP: &str = " [q]uit  [↑↓] accelerator  [←→] brake  [0-9] switches ";

pub fn draw(f: &mut Frame, snapshot: &Snapshot) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(f.size());

    draw_motor(f, rows[0], &snapshot.motor);
    draw_lanes(f, rows[1], &snapshot.lanes);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(rows[2]);
    draw_registers(f, body[0], snapshot.bank, &snapshot.registers);
    draw_panel(f, body[1], snapshot);
    draw_board(f, body[2], snapshot);

    f.render_widget(
        Paragraph::new(KEY_HELP).style(Style::default().fg(Color::DarkGray)),
        rows[3],
    );
}

fn draw_motor(f: &mut Frame, area: Rect, motor: &MotorView) {
    let mode_style = match motor.mode {
        ControlMode::Velocity => Style::default().fg(Color::Green),
        ControlMode::Torque => Style::default().fg(Color::Yellow),
    };
    let line = Line::from(vec![
        Span::styled(format!(" {} mode ", motor.mode), mode_style),
        Span::raw(format!(
            "│ velocity {:.2}  rpm {:.1}  setpoint {:.2} A  limit {:.2} A  │ next {:?}",
            motor.velocity, motor.rpm, motor.current_setpoint, motor.max_current, motor.next_telemetry
        )),
    ]);
    f.render_widget(
        Paragraph::new(line).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Motor controller "),
        ),
        area,
    );
}

fn draw_lanes(f: &mut Frame, area: Rect, lanes: &[LaneView]) {
    let header = Row::new(["Lane", "ID", "Len", "Payload"]).style(
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD),
    );
    let rows: Vec<Row> = lanes
        .iter()
        .map(|view| match &view.content {
            LaneContent::Empty => Row::new([view.lane.to_string(), "-".into(), "-".into(), "empty".into()]),
            LaneContent::Frame(frame) => Row::new([
                view.lane.to_string(),
                format!("{:#05x}", frame.id()),
                frame.byte_len().to_string(),
                format!("{:#x}", frame.payload()),
            ]),
            LaneContent::Malformed(reason) => Row::new([
                view.lane.to_string(),
                "?".into(),
                "?".into(),
                reason.clone(),
            ])
            .style(Style::default().fg(Color::Red)),
        })
        .collect();
    let widths = [
        Constraint::Length(6),
        Constraint::Length(12),
        Constraint::Length(4),
        Constraint::Min(10),
    ];
    f.render_widget(
        Table::new(rows, widths)
            .header(header)
            .block(Block::default().borders(Borders::ALL).title(" CAN ")),
        area,
    );
}

fn draw_registers(f: &mut Frame, area: Rect, bank: Bank, registers: &[(Register, u8)]) {
    let rows: Vec<Row> = registers
        .iter()
        .map(|(reg, value)| {
            Row::new([
                reg.name().to_owned(),
                format!("{:#04x}", bank.address_of(*reg)),
                format!("{value:#04x}"),
                format!("{value:08b}"),
            ])
        })
        .collect();
    let widths = [
        Constraint::Length(9),
        Constraint::Length(5),
        Constraint::Length(5),
        Constraint::Min(8),
    ];
    f.render_widget(
        Table::new(rows, widths).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Expander ({bank}) ")),
        ),
        area,
    );
}

fn flag_lines(flags: &[(&'static str, bool)]) -> Vec<Line<'static>> {
    flags
        .iter()
        .enumerate()
        .map(|(i, (name, on))| {
            let style = if *on {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Line::from(Span::styled(format!("{i} {name}"), style))
        })
        .collect()
}

fn draw_panel(f: &mut Frame, area: Rect, snapshot: &Snapshot) {
    let (accel, brake) = snapshot.pedals.normalized();
    let mut lines = vec![
        Line::from(format!(
            "accel {:>4} ({:>3.0}%)  brake {:>4} ({:>3.0}%)",
            snapshot.pedals.accelerator,
            accel * 100.0,
            snapshot.pedals.brake,
            brake * 100.0
        )),
        Line::from(""),
    ];
    lines.extend(flag_lines(&snapshot.switches));
    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Pedals & switches "),
        ),
        area,
    );
}

fn on_off(state: Option<bool>) -> &'static str {
    match state {
        Some(true) => "on",
        Some(false) => "off",
        None => "-",
    }
}

fn draw_board(f: &mut Frame, area: Rect, snapshot: &Snapshot) {
    let mut lines = vec![
        Line::from(format!(
            "contactors  motor {}  array {}",
            on_off(snapshot.contactors.motor),
            on_off(snapshot.contactors.array)
        )),
        Line::from(format!(
            "precharge   motor {}  array {}",
            on_off(Some(snapshot.precharge.motor)),
            on_off(Some(snapshot.precharge.array))
        )),
    ];
    for (i, timer) in snapshot.timers.iter().enumerate() {
        let text = match timer {
            Some(t) => format!("timer {i}     {} / {}", t.current, t.reload),
            None => format!("timer {i}     -"),
        };
        lines.push(Line::from(text));
    }
    lines.extend(
        snapshot
            .display
            .iter()
            .map(|(name, value)| Line::from(format!("{name}: {value}"))),
    );
    lines.extend(flag_lines(&snapshot.lights));
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Board ")),
        area,
    );
}
