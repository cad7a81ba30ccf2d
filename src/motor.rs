//! Simulated motor controller on the CAN2 lane.
//!
//! The controller consumes drive and power commands, ramps its velocity
//! toward the commanded target, and reports back with a rotating set of
//! telemetry frames.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::can::{CanBus, CanFrame, Lane};
use crate::error::SimError;
use crate::medium::Medium;

pub const DRIVE_ID: u32 = 0x221;
pub const POWER_ID: u32 = 0x222;
pub const BUS_ID: u32 = 0x242;
pub const VELOCITY_ID: u32 = 0x243;
pub const PHASE_CURRENT_ID: u32 = 0x244;
pub const VOLTAGE_VECTOR_ID: u32 = 0x245;
pub const CURRENT_VECTOR_ID: u32 = 0x246;
pub const BACK_EMF_ID: u32 = 0x247;
pub const TEMPERATURE_ID: u32 = 0x24B;

/// Telemetry frame kinds, one per CAN id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telemetry {
    Bus,
    Velocity,
    PhaseCurrent,
    VoltageVector,
    CurrentVector,
    BackEmf,
    Temperature,
}

impl Telemetry {
    /// Transmission order of the telemetry cursor.
    pub const SEQUENCE: [Telemetry; 7] = [
        Telemetry::Bus,
        Telemetry::Velocity,
        Telemetry::PhaseCurrent,
        Telemetry::VoltageVector,
        Telemetry::CurrentVector,
        Telemetry::BackEmf,
        Telemetry::Temperature,
    ];

    pub fn id(self) -> u32 {
        match self {
            Telemetry::Bus => BUS_ID,
            Telemetry::Velocity => VELOCITY_ID,
            Telemetry::PhaseCurrent => PHASE_CURRENT_ID,
            Telemetry::VoltageVector => VOLTAGE_VECTOR_ID,
            Telemetry::CurrentVector => CURRENT_VECTOR_ID,
            Telemetry::BackEmf => BACK_EMF_ID,
            Telemetry::Temperature => TEMPERATURE_ID,
        }
    }
}

/// Tunables of the simulated motor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorParams {
    /// Wheel radius used for the rpm figure.
    pub wheel_radius: f64,
    /// Physical bus current limit.
    pub absolute_current: f64,
    /// Available current before any power command arrives.
    pub max_current: f64,
    pub bus_voltage: f64,
    /// Acceleration per tick in velocity mode.
    pub velocity_ramp: f64,
    /// Deceleration per tick in either mode.
    pub coast_rate: f64,
    /// Desired velocities above this select torque mode.
    pub torque_threshold: u32,
}

impl Default for MotorParams {
    fn default() -> Self {
        Self {
            wheel_radius: 21.67,
            absolute_current: 5.0,
            max_current: 1.0,
            bus_voltage: 5.0,
            velocity_ramp: 0.5,
            coast_rate: 0.5,
            torque_threshold: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Velocity,
    Torque,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Velocity => f.write_str("velocity"),
            ControlMode::Torque => f.write_str("torque"),
        }
    }
}

/// Everything the controller measures or controls.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorState {
    pub velocity: f64,
    pub current_setpoint: f64,
    pub max_current: f64,
    pub mode: ControlMode,
    pub bus_voltage: f64,
    pub phase_c_current: f64,
    pub phase_b_current: f64,
    pub voltage_real: f64,
    pub voltage_imaginary: f64,
    pub current_real: f64,
    pub current_imaginary: f64,
    pub back_emf_real: f64,
    pub back_emf_neutral: f64,
    pub phase_c_temperature: f64,
    pub internal_temperature: f64,
    /// Index into [`Telemetry::SEQUENCE`] of the next frame to send.
    pub telemetry_cursor: usize,
}

impl MotorState {
    fn new(params: &MotorParams) -> Self {
        Self {
            velocity: 0.0,
            current_setpoint: 0.0,
            max_current: params.max_current,
            mode: ControlMode::Velocity,
            bus_voltage: params.bus_voltage,
            phase_c_current: 1.0,
            phase_b_current: 1.0,
            voltage_real: 0.0,
            voltage_imaginary: 0.0,
            current_real: 0.0,
            current_imaginary: 0.0,
            back_emf_real: 0.0,
            back_emf_neutral: 0.0,
            phase_c_temperature: 0.0,
            internal_temperature: 0.0,
            telemetry_cursor: 0,
        }
    }
}

/// Desired and actual velocity after a drive tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityReport {
    pub desired: f64,
    pub actual: f64,
}

impl VelocityReport {
    fn held(velocity: f64) -> Self {
        Self {
            desired: velocity,
            actual: velocity,
        }
    }
}

/// What a poll of the motor lane found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorEvent {
    NoCommand,
    Drive(VelocityReport),
    Power { max_current: f64 },
    /// A frame not addressed to the controller, usually its own telemetry.
    Unhandled(u32),
}

#[derive(Debug, Clone)]
pub struct MotorController {
    params: MotorParams,
    state: MotorState,
}

impl Default for MotorController {
    fn default() -> Self {
        Self::new(MotorParams::default())
    }
}

impl MotorController {
    pub fn new(params: MotorParams) -> Self {
        let state = MotorState::new(&params);
        Self { params, state }
    }

    pub fn params(&self) -> &MotorParams {
        &self.params
    }

    pub fn state(&self) -> &MotorState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut MotorState {
        &mut self.state
    }

    pub fn mode(&self) -> ControlMode {
        self.state.mode
    }

    pub fn velocity(&self) -> f64 {
        self.state.velocity
    }

    /// Applies a drive command (`0x221`): current percent in the upper
    /// half, desired velocity in the lower half. Any other id leaves the
    /// state alone and reports the held velocity.
    pub fn on_drive_command(&mut self, frame: &CanFrame) -> VelocityReport {
        if frame.id() != DRIVE_ID {
            return VelocityReport::held(self.state.velocity);
        }
        let (percent, desired) = frame.split();
        self.select_mode(desired);
        if self.state.mode == ControlMode::Velocity {
            self.state.current_setpoint = self.state.max_current * f64::from(percent) / 100.0;
        }
        self.advance_velocity(f64::from(desired));
        VelocityReport {
            desired: f64::from(desired),
            actual: self.state.velocity,
        }
    }

    /// Applies a power command (`0x222`): percent of the absolute current
    /// in the upper half. Returns the new current limit.
    pub fn on_power_command(&mut self, frame: &CanFrame) -> Option<f64> {
        if frame.id() != POWER_ID {
            return None;
        }
        let (percent, _) = frame.split();
        self.state.max_current = self.params.absolute_current * f64::from(percent) / 100.0;
        Some(self.state.max_current)
    }

    fn select_mode(&mut self, desired_velocity: u32) {
        let mode = if desired_velocity > self.params.torque_threshold {
            ControlMode::Torque
        } else {
            ControlMode::Velocity
        };
        if mode != self.state.mode {
            info!(%mode, "motor control mode changed");
            self.state.mode = mode;
        }
    }

    /// Sets the current setpoint from the accelerator position in [0, 1].
    /// Only takes effect in torque mode.
    pub fn torque_control(&mut self, pedal: f64) -> bool {
        if self.state.mode != ControlMode::Torque {
            return false;
        }
        self.state.current_setpoint = pedal.clamp(0.0, 1.0) * self.state.max_current;
        true
    }

    /// Acceleration per tick for the current mode.
    pub fn ramp_rate(&self) -> f64 {
        match self.state.mode {
            ControlMode::Velocity => self.params.velocity_ramp,
            ControlMode::Torque => self.state.current_setpoint,
        }
    }

    /// Moves the velocity one tick toward `target`, never past it.
    pub fn advance_velocity(&mut self, target: f64) {
        let velocity = self.state.velocity;
        if velocity < target {
            self.state.velocity = (velocity + self.ramp_rate()).min(target);
        } else if velocity > target {
            self.state.velocity = (velocity - self.params.coast_rate).max(target);
        }
    }

    /// Motor revolutions per minute at the current velocity.
    pub fn rpm(&self) -> f64 {
        60.0 * self.state.velocity / (2.0 * PI * self.params.wheel_radius)
    }

    pub fn next_telemetry(&self) -> Telemetry {
        Telemetry::SEQUENCE[self.state.telemetry_cursor % Telemetry::SEQUENCE.len()]
    }

    /// Frame reporting `kind` from the current state.
    pub fn telemetry_frame(&self, kind: Telemetry) -> CanFrame {
        let s = &self.state;
        let (upper, lower) = match kind {
            Telemetry::Bus => (self.params.absolute_current, s.bus_voltage),
            Telemetry::Velocity => (s.velocity, self.rpm()),
            Telemetry::PhaseCurrent => (s.phase_c_current, s.phase_b_current),
            Telemetry::VoltageVector => (s.voltage_real, s.voltage_imaginary),
            Telemetry::CurrentVector => (s.current_real, s.current_imaginary),
            Telemetry::BackEmf => (s.back_emf_real, s.back_emf_neutral),
            Telemetry::Temperature => (s.phase_c_temperature, s.internal_temperature),
        };
        CanFrame::from_halves(kind.id(), half(upper), half(lower))
    }

    pub fn velocity_frame(&self) -> CanFrame {
        self.telemetry_frame(Telemetry::Velocity)
    }

    fn apply(&mut self, command: Option<CanFrame>) -> MotorEvent {
        let Some(frame) = command else {
            return MotorEvent::NoCommand;
        };
        match frame.id() {
            DRIVE_ID => {
                let report = self.on_drive_command(&frame);
                debug!(desired = report.desired, actual = report.actual, "drive command");
                MotorEvent::Drive(report)
            }
            POWER_ID => {
                let max_current = self.on_power_command(&frame).unwrap_or(self.state.max_current);
                debug!(max_current, "power command");
                MotorEvent::Power { max_current }
            }
            id => MotorEvent::Unhandled(id),
        }
    }

    /// Frame under the telemetry cursor. Advances the cursor.
    pub fn emit_telemetry(&mut self) -> CanFrame {
        let frame = self.telemetry_frame(self.next_telemetry());
        self.state.telemetry_cursor = (self.state.telemetry_cursor + 1) % Telemetry::SEQUENCE.len();
        frame
    }

    /// Handles whatever frame currently sits on the motor lane and answers
    /// in its place, under one lock.
    ///
    /// A drive command is answered with a velocity frame. Anything else,
    /// an unreadable row included, is answered with the next telemetry
    /// frame. Either way the command is applied once.
    pub fn poll<M: Medium>(&mut self, bus: &CanBus<M>) -> Result<MotorEvent, SimError> {
        bus.exchange(Lane::Motor, |command| {
            let event = command.map(|frame| self.apply(frame));
            let reply = match event {
                Ok(MotorEvent::Drive(_)) => self.velocity_frame(),
                _ => self.emit_telemetry(),
            };
            (event, Some(reply))
        })?
    }

    /// One control tick. Errors are logged and the held velocity is
    /// reported instead.
    pub fn drive_tick<M: Medium>(&mut self, bus: &CanBus<M>) -> VelocityReport {
        match self.poll(bus) {
            Ok(MotorEvent::Drive(report)) => report,
            Ok(_) => VelocityReport::held(self.state.velocity),
            Err(e) => {
                warn!(error = %e, "motor lane unreadable, holding velocity");
                VelocityReport::held(self.state.velocity)
            }
        }
    }
}

/// Truncates toward zero and keeps the two's-complement 32-bit pattern.
fn half(value: f64) -> u32 {
    (value as i32) as u32
}
