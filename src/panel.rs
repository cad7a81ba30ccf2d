//! Driver-side inputs and outputs: pedals, switches and lights.

use std::sync::Arc;

use crate::error::SimError;
use crate::medium::{Medium, Slot};
use crate::record;

/// Largest 12-bit ADC reading.
pub const ADC_MAX: u16 = 4095;
const ADC_SCALE: f64 = 4096.0;

/// Converts a pedal position in [0, 1] to an ADC reading.
pub fn to_adc(position: f64) -> u16 {
    let counts = (position.clamp(0.0, 1.0) * ADC_SCALE).round() as u32;
    counts.min(u32::from(ADC_MAX)) as u16
}

/// Converts an ADC reading back to a pedal position in [0, 1).
pub fn from_adc(counts: u16) -> f64 {
    f64::from(counts.min(ADC_MAX)) / ADC_SCALE
}

/// Raw ADC readings of both pedals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pedals {
    pub accelerator: u16,
    pub brake: u16,
}

impl Pedals {
    pub fn from_positions(accelerator: f64, brake: f64) -> Self {
        Self {
            accelerator: to_adc(accelerator),
            brake: to_adc(brake),
        }
    }

    /// Pedal positions as `(accelerator, brake)` in [0, 1).
    pub fn normalized(&self) -> (f64, f64) {
        (from_adc(self.accelerator), from_adc(self.brake))
    }

    fn parse(row: &str) -> Result<Self, SimError> {
        let Some(fields) = record::parse(row)? else {
            return Ok(Self::default());
        };
        if fields.len() != 2 {
            return Err(SimError::malformed(format!(
                "pedal record needs 2 fields, found {}",
                fields.len()
            )));
        }
        Ok(Self {
            accelerator: record::parse_int::<u16>(&fields[0])?.min(ADC_MAX),
            brake: record::parse_int::<u16>(&fields[1])?.min(ADC_MAX),
        })
    }

    fn encode(&self) -> Result<String, SimError> {
        record::format([self.accelerator.to_string(), self.brake.to_string()])
    }
}

/// The pedal record, `accelerator,brake`.
#[derive(Debug)]
pub struct PedalInput<M> {
    slot: Slot<M>,
}

impl<M: Medium> PedalInput<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self {
            slot: Slot::new(medium, 0),
        }
    }

    /// Stores both pedal positions, each clamped to [0, 1].
    pub fn set(&self, accelerator: f64, brake: f64) -> Result<Pedals, SimError> {
        let pedals = Pedals::from_positions(accelerator, brake);
        self.slot.write(pedals.encode()?)?;
        Ok(pedals)
    }

    /// Current readings. A blank record means both pedals are released.
    pub fn read(&self) -> Result<Pedals, SimError> {
        match self.slot.read()? {
            Some(row) => Pedals::parse(&row),
            None => Ok(Pedals::default()),
        }
    }

    /// Moves both pedals by the given position deltas under one lock.
    pub fn adjust(&self, accelerator: f64, brake: f64) -> Result<Pedals, SimError> {
        self.slot.transact(|cell| -> Result<Pedals, SimError> {
            let current = match cell.as_deref() {
                Some(row) => Pedals::parse(row)?,
                None => Pedals::default(),
            };
            let (accel_pos, brake_pos) = current.normalized();
            let pedals = Pedals::from_positions(accel_pos + accelerator, brake_pos + brake);
            *cell = Some(pedals.encode()?);
            Ok(pedals)
        })?
    }
}

/// Switch names, in bit order.
pub const SWITCH_NAMES: [&str; 10] = [
    "LT", "RT", "HDLT", "FWD/REV", "HZD", "CRS_SET", "CRS_EN", "REGEN", "IGN_1", "IGN_2",
];

/// Light names, in bit order.
pub const LIGHT_NAMES: [&str; 10] = [
    "M_CNCTR",
    "RSVD_LED",
    "CTRL_FAULT",
    "RIGHT_BLINK",
    "HeadlightPWR",
    "A_CNCTR",
    "BPS_FAULT",
    "LEFT_BLINK",
    "BPS_PWR",
    "BrakeLight",
];

/// A bitmask over one of the name lists. Bit `i` belongs to name `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_set(self, index: usize) -> bool {
        index < 32 && self.0 & (1 << index) != 0
    }

    pub fn set(&mut self, index: usize, on: bool) {
        if index >= 32 {
            return;
        }
        if on {
            self.0 |= 1 << index;
        } else {
            self.0 &= !(1 << index);
        }
    }

    pub fn toggle(&mut self, index: usize) {
        let on = !self.is_set(index);
        self.set(index, on);
    }
}

/// A single-integer record of named on/off flags.
#[derive(Debug)]
pub struct FlagPanel<M> {
    slot: Slot<M>,
    names: &'static [&'static str],
}

impl<M: Medium> FlagPanel<M> {
    pub fn new(medium: Arc<M>, names: &'static [&'static str]) -> Self {
        Self {
            slot: Slot::new(medium, 0),
            names,
        }
    }

    pub fn switches(medium: Arc<M>) -> Self {
        Self::new(medium, &SWITCH_NAMES)
    }

    pub fn lights(medium: Arc<M>) -> Self {
        Self::new(medium, &LIGHT_NAMES)
    }

    pub fn names(&self) -> &'static [&'static str] {
        self.names
    }

    pub fn index_of(&self, name: &str) -> Result<usize, SimError> {
        self.names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .ok_or_else(|| SimError::UnknownFlag(name.to_owned()))
    }

    pub fn read(&self) -> Result<Flags, SimError> {
        Ok(Flags(record::leading_int(self.slot.read()?.as_deref())?))
    }

    pub fn write(&self, flags: Flags) -> Result<(), SimError> {
        self.slot.write(flags.bits().to_string())
    }

    /// Each name with its current state, in bit order.
    pub fn states(&self) -> Result<Vec<(&'static str, bool)>, SimError> {
        let flags = self.read()?;
        Ok(self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (*name, flags.is_set(i)))
            .collect())
    }

    /// Turns one flag on or off.
    pub fn set(&self, name: &str, on: bool) -> Result<Flags, SimError> {
        let index = self.index_of(name)?;
        self.update(|flags| flags.set(index, on))
    }

    /// Flips one flag. Turning `IGN_2` on also turns `IGN_1` on.
    pub fn toggle(&self, name: &str) -> Result<Flags, SimError> {
        let index = self.index_of(name)?;
        let names = self.names;
        self.update(|flags| {
            flags.toggle(index);
            if names[index] == "IGN_2" && flags.is_set(index) {
                if let Some(ign_1) = names.iter().position(|n| *n == "IGN_1") {
                    flags.set(ign_1, true);
                }
            }
        })
    }

    fn update(&self, f: impl FnOnce(&mut Flags)) -> Result<Flags, SimError> {
        self.slot.transact(|cell| -> Result<Flags, SimError> {
            let mut flags = Flags(record::leading_int(cell.as_deref())?);
            f(&mut flags);
            *cell = Some(flags.bits().to_string());
            Ok(flags)
        })?
    }
}
