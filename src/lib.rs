//! # EV Controls Hardware Simulator Library
//!
//! This library stands in for the hardware around the vehicle controller:
//! the two CAN buses, the SPI port expander on the minion boards, the
//! motor controller, and the driver's pedals, switches and lights. Firmware
//! built for the simulator exchanges values with it through a set of shared
//! media, one text record per row, exactly as it would with real hardware.

pub mod board;
pub mod can;
pub mod config;
pub mod dashboard;
pub mod driver;
pub mod error;
pub mod logging;
pub mod medium;
pub mod motor;
pub mod panel;
mod record;
pub mod registers;
pub mod spi;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

pub use can::{CanBus, CanFrame, Lane};
pub use config::SimConfig;
pub use error::SimError;
pub use medium::{FileMedium, Medium, MemoryMedium, Slot};
pub use motor::{ControlMode, MotorController, MotorParams, VelocityReport};
pub use record::parse_hex;
pub use registers::{Bank, Register, RegisterFile};
pub use spi::{OpcodeFrame, SpiOutcome};

use board::{Contactors, Precharge, TimerBank, Uart};
use dashboard::{LaneContent, LaneView, MotorView, Snapshot};
use driver::Consumer;
use panel::{FlagPanel, PedalInput};
use spi::{GpioExpander, SpiMaster};

// File names inside the data directory, shared with the firmware build.
pub const CAN_FILE: &str = "CAN.csv";
pub const SPI_FILE: &str = "SPI.csv";
pub const PEDALS_FILE: &str = "Pedals.csv";
pub const SWITCHES_FILE: &str = "Switches.csv";
pub const LIGHTS_FILE: &str = "Lights.csv";
pub const CONTACTORS_FILE: &str = "Contactors.csv";
pub const GPIO_FILE: &str = "GPIO.csv";
pub const UART_FILE: &str = "UART.csv";
pub const TIMER_FILE: &str = "Timer.csv";

// One medium per simulated peripheral.
#[derive(Debug)]
pub struct Media<M> {
    pub can: Arc<M>,
    pub spi: Arc<M>,
    pub pedals: Arc<M>,
    pub switches: Arc<M>,
    pub lights: Arc<M>,
    pub contactors: Arc<M>,
    pub gpio: Arc<M>,
    pub uart: Arc<M>,
    pub timer: Arc<M>,
}

impl<M> Clone for Media<M> {
    fn clone(&self) -> Self {
        Self {
            can: Arc::clone(&self.can),
            spi: Arc::clone(&self.spi),
            pedals: Arc::clone(&self.pedals),
            switches: Arc::clone(&self.switches),
            lights: Arc::clone(&self.lights),
            contactors: Arc::clone(&self.contactors),
            gpio: Arc::clone(&self.gpio),
            uart: Arc::clone(&self.uart),
            timer: Arc::clone(&self.timer),
        }
    }
}

impl<M> Media<M> {
    fn build(mut make: impl FnMut(&str) -> M) -> Self {
        Self {
            can: Arc::new(make(CAN_FILE)),
            spi: Arc::new(make(SPI_FILE)),
            pedals: Arc::new(make(PEDALS_FILE)),
            switches: Arc::new(make(SWITCHES_FILE)),
            lights: Arc::new(make(LIGHTS_FILE)),
            contactors: Arc::new(make(CONTACTORS_FILE)),
            gpio: Arc::new(make(GPIO_FILE)),
            uart: Arc::new(make(UART_FILE)),
            timer: Arc::new(make(TIMER_FILE)),
        }
    }
}

impl Media<MemoryMedium> {
    pub fn in_memory() -> Self {
        Self::build(|_| MemoryMedium::new())
    }
}

impl Media<FileMedium> {
    /// File-backed media under `dir`. Files are created on first access.
    pub fn open(dir: &Path) -> Self {
        Self::build(|name| FileMedium::new(dir.join(name)))
    }
}

// The simulated hardware as a whole. Owns all simulator state.
#[derive(Debug)]
pub struct Simulator<M> {
    media: Media<M>,
    registers: RegisterFile,
    motor: MotorController,
    can: CanBus<M>,
    expander: GpioExpander<M>,
    pedals: PedalInput<M>,
    switches: FlagPanel<M>,
    lights: FlagPanel<M>,
    contactors: Contactors<M>,
    precharge: Precharge<M>,
    uart: Uart<M>,
    timers: TimerBank<M>,
}

impl Simulator<MemoryMedium> {
    /// Creates a simulator whose media live in this process only.
    pub fn in_memory(params: MotorParams) -> Self {
        Self::new(Media::in_memory(), params)
    }
}

impl Simulator<FileMedium> {
    /// Creates a simulator sharing the configured data directory with
    /// the firmware.
    pub fn open(config: &SimConfig) -> Self {
        info!(data_dir = %config.data_dir.display(), "opening simulator media");
        Self::new(Media::open(&config.data_dir), config.motor.clone())
    }
}

impl<M: Medium> Simulator<M> {
    pub fn new(media: Media<M>, params: MotorParams) -> Self {
        Self {
            registers: RegisterFile::new(),
            motor: MotorController::new(params),
            can: CanBus::new(Arc::clone(&media.can)),
            expander: GpioExpander::new(Arc::clone(&media.spi)),
            pedals: PedalInput::new(Arc::clone(&media.pedals)),
            switches: FlagPanel::switches(Arc::clone(&media.switches)),
            lights: FlagPanel::lights(Arc::clone(&media.lights)),
            contactors: Contactors::new(Arc::clone(&media.contactors)),
            precharge: Precharge::new(Arc::clone(&media.gpio)),
            uart: Uart::new(Arc::clone(&media.uart)),
            timers: TimerBank::new(Arc::clone(&media.timer)),
            media,
        }
    }

    pub fn media(&self) -> &Media<M> {
        &self.media
    }

    pub fn can(&self) -> &CanBus<M> {
        &self.can
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.registers
    }

    pub fn motor(&self) -> &MotorController {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut MotorController {
        &mut self.motor
    }

    pub fn pedals(&self) -> &PedalInput<M> {
        &self.pedals
    }

    pub fn switches(&self) -> &FlagPanel<M> {
        &self.switches
    }

    pub fn lights(&self) -> &FlagPanel<M> {
        &self.lights
    }

    pub fn uart(&self) -> &Uart<M> {
        &self.uart
    }

    pub fn timers(&self) -> &TimerBank<M> {
        &self.timers
    }

    /// Requester side of the SPI link, for scripts and the console.
    pub fn spi_master(&self) -> SpiMaster<M> {
        SpiMaster::new(Arc::clone(&self.media.spi))
    }

    /// Handles the motor lane and answers on it, then feeds the accelerator
    /// to torque control.
    pub fn motor_tick(&mut self) -> VelocityReport {
        let report = self.motor.drive_tick(&self.can);
        match self.pedals.read() {
            Ok(pedals) => {
                self.motor.torque_control(pedals.normalized().0);
            }
            Err(e) => warn!(error = %e, "pedal record unreadable"),
        }
        report
    }

    /// Serves one pending SPI command. Failures are logged and reported
    /// as `None`.
    pub fn spi_tick(&mut self) -> Option<SpiOutcome> {
        self.expander
            .poll(&mut self.registers)
            .map_err(|e| warn!(error = %e, "SPI command rejected"))
            .ok()
    }

    pub fn timer_tick(&self) {
        if let Err(e) = self.timers.tick() {
            warn!(error = %e, "timer record unreadable");
        }
    }

    /// Runs the tick belonging to `consumer`. The status refresh has no
    /// side effects on the media and is left to the caller.
    pub fn tick(&mut self, consumer: Consumer) {
        match consumer {
            Consumer::Motor => {
                self.motor_tick();
            }
            Consumer::Spi => {
                self.spi_tick();
            }
            Consumer::Timer => self.timer_tick(),
            Consumer::Status => {}
        }
    }

    fn lane_view(&self, lane: Lane) -> LaneView {
        let content = match self.can.read(lane) {
            Ok(Some(frame)) => LaneContent::Frame(frame),
            Ok(None) => LaneContent::Empty,
            Err(e) => LaneContent::Malformed(e.to_string()),
        };
        LaneView { lane, content }
    }

    /// Reads every lane, register and panel value for display.
    pub fn snapshot(&self) -> Result<Snapshot, SimError> {
        let state = self.motor.state();
        Ok(Snapshot {
            lanes: vec![self.lane_view(Lane::Vehicle), self.lane_view(Lane::Motor)],
            motor: MotorView {
                mode: state.mode,
                velocity: state.velocity,
                rpm: self.motor.rpm(),
                current_setpoint: state.current_setpoint,
                max_current: state.max_current,
                next_telemetry: self.motor.next_telemetry(),
            },
            bank: self.registers.bank(),
            registers: self.registers.iter().collect(),
            pedals: self.pedals.read()?,
            switches: self.switches.states()?,
            lights: self.lights.states()?,
            contactors: self.contactors.read()?,
            precharge: self.precharge.read()?,
            display: self.uart.display()?,
            timers: self.timers.read()?,
        })
    }
}
