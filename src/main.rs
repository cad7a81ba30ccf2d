use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{info, warn};

use ev_sim::dashboard::{self, Snapshot};
use ev_sim::driver::{Consumer, Schedule};
use ev_sim::panel::SWITCH_NAMES;
use ev_sim::{logging, CanFrame, FileMedium, Lane, OpcodeFrame, SimConfig, SimError, Simulator};

type Sim = Simulator<FileMedium>;

// Pedal step per arrow key press.
const PEDAL_STEP: f64 = 0.05;

#[derive(Parser, Debug)]
#[command(name = "simulator_cli", version, about = "EV controls hardware simulator")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run the simulator loop, with the dashboard unless headless.
    Run {
        #[arg(long)]
        headless: bool,
        /// Stop after this many seconds.
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Interactive console accepting one action per line.
    Manual,
    #[command(flatten)]
    Action(Action),
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Put a frame on the vehicle lane (CAN1).
    Send {
        #[arg(value_parser = hex_u32)]
        id: u32,
        #[arg(value_parser = hex_u64)]
        payload: u64,
    },
    /// Put a frame on the motor lane (CAN2), as the firmware would.
    Drive {
        #[arg(value_parser = hex_u32)]
        id: u32,
        #[arg(value_parser = hex_u64)]
        payload: u64,
    },
    /// Show both CAN lanes.
    Read,
    /// Write a register of the port expander over SPI.
    SpiWrite {
        #[arg(value_parser = hex_u8)]
        addr: u8,
        #[arg(value_parser = hex_u8)]
        data: u8,
    },
    /// Read a register of the port expander over SPI.
    SpiRead {
        #[arg(value_parser = hex_u8)]
        addr: u8,
    },
    /// Set both pedal positions, each between 0 and 1.
    Pedals { accel: f64, brake: f64 },
    /// Flip a switch by name.
    Toggle { switch: String },
    /// Send the battery-protection motor verdict.
    Bps { state: BpsState },
    /// Write a line to a UART port.
    Uart {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=2))]
        port: u8,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Run one motor and one SPI tick.
    Tick,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BpsState {
    Safe,
    Unsafe,
}

// One console line, parsed without a program name.
#[derive(Parser, Debug)]
#[command(no_binary_name = true, name = "console")]
struct ConsoleLine {
    #[command(subcommand)]
    action: Action,
}

fn hex_u64(s: &str) -> Result<u64, String> {
    ev_sim::parse_hex(s).map_err(|e| e.to_string())
}

fn hex_u32(s: &str) -> Result<u32, String> {
    u32::try_from(hex_u64(s)?).map_err(|_| format!("{s} does not fit in 32 bits"))
}

fn hex_u8(s: &str) -> Result<u8, String> {
    u8::try_from(hex_u64(s)?).map_err(|_| format!("{s} does not fit in 8 bits"))
}

// The main entry point for the command-line simulator application.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {e}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = SimConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    let tui = matches!(cli.mode, Mode::Run { headless: false, .. });
    let log_file = tui.then(|| config.data_dir.join(logging::LOG_FILE));
    logging::init(&config.log_level, log_file.as_deref())?;

    let mut sim = Simulator::open(&config);
    match cli.mode {
        Mode::Run { headless, seconds } => {
            let stop_at = seconds.map(|s| Instant::now() + Duration::from_secs(s));
            if headless {
                run_headless(&mut sim, &config, stop_at);
                Ok(())
            } else {
                run_dashboard(&mut sim, &config, stop_at)
            }
        }
        Mode::Manual => run_manual_mode(&mut sim),
        Mode::Action(action) => Ok(execute(&mut sim, action)?),
    }
}

fn run_headless(sim: &mut Sim, config: &SimConfig, stop_at: Option<Instant>) {
    info!("simulator running headless");
    let mut schedule = Schedule::new(&config.ticks, Instant::now());
    loop {
        let now = Instant::now();
        if stop_at.is_some_and(|t| now >= t) {
            break;
        }
        for consumer in schedule.due(now) {
            sim.tick(consumer);
        }
        thread::sleep(schedule.idle_time(Instant::now()));
    }
    info!("simulator stopped");
}

fn run_dashboard(sim: &mut Sim, config: &SimConfig, stop_at: Option<Instant>) -> Result<(), Box<dyn Error>> {
    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;

    let result = dashboard_loop(&mut terminal, sim, config, stop_at);

    // Restore the terminal even when the loop failed.
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn dashboard_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    sim: &mut Sim,
    config: &SimConfig,
    stop_at: Option<Instant>,
) -> Result<(), Box<dyn Error>> {
    let mut schedule = Schedule::new(&config.ticks, Instant::now());
    let mut snapshot: Option<Snapshot> = None;

    loop {
        let now = Instant::now();
        if stop_at.is_some_and(|t| now >= t) {
            return Ok(());
        }

        let mut redraw = false;
        for consumer in schedule.due(now) {
            match consumer {
                Consumer::Status => redraw = true,
                other => sim.tick(other),
            }
        }

        let wait = schedule.idle_time(Instant::now());
        if event::poll(wait)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let handled = match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Up => sim.pedals().adjust(PEDAL_STEP, 0.0).map(drop),
                        KeyCode::Down => sim.pedals().adjust(-PEDAL_STEP, 0.0).map(drop),
                        KeyCode::Right => sim.pedals().adjust(0.0, PEDAL_STEP).map(drop),
                        KeyCode::Left => sim.pedals().adjust(0.0, -PEDAL_STEP).map(drop),
                        KeyCode::Char(c) => match c.to_digit(10) {
                            Some(i) => sim.switches().toggle(SWITCH_NAMES[i as usize]).map(drop),
                            None => Ok(()),
                        },
                        _ => Ok(()),
                    };
                    if let Err(e) = handled {
                        warn!(error = %e, "key input not applied");
                    }
                    redraw = true;
                }
            }
        }

        if redraw {
            match sim.snapshot() {
                Ok(fresh) => snapshot = Some(fresh),
                Err(e) => warn!(error = %e, "status refresh failed"),
            }
            if let Some(snapshot) = &snapshot {
                terminal.draw(|f| dashboard::draw(f, snapshot))?;
            }
        }
    }
}

// Handles the manual command input mode.
fn run_manual_mode(sim: &mut Sim) -> Result<(), Box<dyn Error>> {
    println!("==============================");
    println!("  EV Controls Simulator Console ");
    println!("==============================");
    println!("Enter actions (try 'help'), or type 'exit' to quit.");
    prompt()?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line?;
        let command = input.trim();

        if command == "exit" || command == "quit" {
            break;
        }
        if !command.is_empty() {
            match ConsoleLine::try_parse_from(command.split_whitespace()) {
                Ok(parsed) => {
                    if let Err(e) = execute(sim, parsed.action) {
                        eprintln!("[ERROR] {e}");
                    }
                }
                Err(e) => e.print()?,
            }
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("> ");
    io::stdout().flush()
}

fn show_lane(sim: &Sim, lane: Lane) {
    match sim.can().read(lane) {
        Ok(Some(frame)) => println!("< {lane}: {frame}"),
        Ok(None) => println!("< {lane}: empty"),
        Err(e) => eprintln!("[ERROR] {lane}: {e}"),
    }
}

// Common function to run an action and print its outcome.
fn execute(sim: &mut Sim, action: Action) -> Result<(), SimError> {
    match action {
        Action::Send { id, payload } => {
            sim.can().write(Lane::Vehicle, &CanFrame::new(id, payload))?;
            show_lane(sim, Lane::Vehicle);
        }
        Action::Drive { id, payload } => {
            sim.can().write(Lane::Motor, &CanFrame::new(id, payload))?;
            show_lane(sim, Lane::Motor);
        }
        Action::Read => {
            show_lane(sim, Lane::Vehicle);
            show_lane(sim, Lane::Motor);
        }
        Action::SpiWrite { addr, data } => {
            sim.spi_master().send(&OpcodeFrame::write(addr, data))?;
            match sim.spi_tick() {
                Some(outcome) => println!("< {outcome:?}"),
                None => eprintln!("[ERROR] SPI write rejected, see log"),
            }
        }
        Action::SpiRead { addr } => {
            let master = sim.spi_master();
            master.send(&OpcodeFrame::read(addr))?;
            sim.spi_tick();
            match master.response()? {
                Some(value) => println!("< {value:#04x} ({value:08b})"),
                None => eprintln!("[ERROR] no reply to SPI read, see log"),
            }
        }
        Action::Pedals { accel, brake } => {
            let pedals = sim.pedals().set(accel, brake)?;
            println!("< accelerator {} brake {}", pedals.accelerator, pedals.brake);
        }
        Action::Toggle { switch } => {
            let flags = sim.switches().toggle(&switch)?;
            for (i, name) in SWITCH_NAMES.iter().enumerate() {
                if flags.is_set(i) {
                    println!("< {name} on");
                }
            }
        }
        Action::Bps { state } => {
            sim.can().send_motor_disable(matches!(state, BpsState::Safe))?;
            show_lane(sim, Lane::Vehicle);
        }
        Action::Uart { port, text } => {
            sim.uart().send(port, &text.join(" "))?;
        }
        Action::Tick => {
            let report = sim.motor_tick();
            let spi = sim.spi_tick();
            println!(
                "< velocity {:.2} (desired {:.2}), SPI {:?}",
                report.actual, report.desired, spi
            );
            show_lane(sim, Lane::Motor);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_actions_at_top_level() {
        let cli = Cli::try_parse_from(["simulator_cli", "send", "0x10a", "1"]).unwrap();
        assert!(matches!(
            cli.mode,
            Mode::Action(Action::Send { id: 0x10A, payload: 1 })
        ));

        let cli = Cli::try_parse_from(["simulator_cli", "run", "--headless", "--seconds", "2"]).unwrap();
        assert!(matches!(
            cli.mode,
            Mode::Run { headless: true, seconds: Some(2) }
        ));
    }

    #[test]
    fn console_lines_parse_without_program_name() {
        let line = ConsoleLine::try_parse_from("spi-write 12 42".split_whitespace()).unwrap();
        assert!(matches!(line.action, Action::SpiWrite { addr: 0x12, data: 0x42 }));

        let line = ConsoleLine::try_parse_from("uart 1 35,1,30".split_whitespace()).unwrap();
        assert!(matches!(line.action, Action::Uart { port: 1, .. }));
        assert!(ConsoleLine::try_parse_from("uart 3 x".split_whitespace()).is_err());
        assert!(ConsoleLine::try_parse_from("spi-write 100 0".split_whitespace()).is_err());
    }

    #[test]
    fn hex_arguments_accept_optional_prefix() {
        assert_eq!(hex_u32("0x221"), Ok(0x221));
        assert_eq!(hex_u32("221"), Ok(0x221));
        assert_eq!(hex_u64("0x100000000"), Ok(0x1_0000_0000));
        assert!(hex_u32("0x100000000").is_err());
        assert!(hex_u32("0xZZ").is_err());
        assert!(hex_u8("1FF").is_err());
    }
}
