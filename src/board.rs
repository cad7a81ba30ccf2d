//! Board-level status the firmware drives: contactors, precharge,
//! the UART display and the hardware timers.

use std::sync::Arc;

use crate::error::SimError;
use crate::medium::{self, Medium, Slot};
use crate::record;

/// Contactor states as last written by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContactorStates {
    /// `None` when the field is missing or not a number.
    pub motor: Option<bool>,
    pub array: Option<bool>,
}

/// The contactor record, `motor,array`.
#[derive(Debug)]
pub struct Contactors<M> {
    slot: Slot<M>,
}

impl<M: Medium> Contactors<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self {
            slot: Slot::new(medium, 0),
        }
    }

    pub fn read(&self) -> Result<ContactorStates, SimError> {
        let Some(row) = self.slot.read()? else {
            return Ok(ContactorStates::default());
        };
        let Some(fields) = record::parse(&row)? else {
            return Ok(ContactorStates::default());
        };
        let state = |i: usize| {
            fields
                .get(i)
                .and_then(|field| field.parse::<i64>().ok())
                .map(|value| value != 0)
        };
        Ok(ContactorStates {
            motor: state(0),
            array: state(1),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrechargeStates {
    pub array: bool,
    pub motor: bool,
}

/// Precharge status bits in field 0 of the GPIO record.
#[derive(Debug)]
pub struct Precharge<M> {
    slot: Slot<M>,
}

impl<M: Medium> Precharge<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self {
            slot: Slot::new(medium, 0),
        }
    }

    pub fn read(&self) -> Result<PrechargeStates, SimError> {
        let bits = record::leading_int(self.slot.read()?.as_deref())?;
        Ok(PrechargeStates {
            array: bits & 1 != 0,
            motor: (bits >> 1) & 1 != 0,
        })
    }
}

/// Display fields carried by UART 1, in record order.
pub const DISPLAY_FIELDS: [&str; 5] = [
    "speed",
    "cruise_control_en",
    "cruise_control_set",
    "regen_en",
    "CAN_err",
];

/// Number of UART ports in the UART medium.
pub const UART_PORTS: u8 = 2;

/// Both UART lines; port `n` is row `n - 1`.
#[derive(Debug)]
pub struct Uart<M> {
    medium: Arc<M>,
}

impl<M: Medium> Uart<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self { medium }
    }

    /// Replaces the line on `port` (1 or 2), keeping the other port's line.
    pub fn send(&self, port: u8, text: &str) -> Result<(), SimError> {
        if !(1..=UART_PORTS).contains(&port) {
            return Err(SimError::malformed(format!("no UART port {port}")));
        }
        let line = text.replace(['\r', '\n'], " ");
        self.medium.transact(|rows| {
            if rows.len() < usize::from(UART_PORTS) {
                rows.resize(usize::from(UART_PORTS), String::new());
            }
            medium::store(rows, usize::from(port - 1), line);
        })
    }

    /// Latest line on `port`.
    pub fn receive(&self, port: u8) -> Result<Option<String>, SimError> {
        if !(1..=UART_PORTS).contains(&port) {
            return Err(SimError::malformed(format!("no UART port {port}")));
        }
        Slot::new(Arc::clone(&self.medium), usize::from(port - 1)).read()
    }

    /// The display fields from UART 1. Missing fields read as `"0"`.
    pub fn display(&self) -> Result<Vec<(&'static str, String)>, SimError> {
        let fields = match self.receive(1)? {
            Some(row) => record::parse(&row)?,
            None => None,
        };
        Ok(DISPLAY_FIELDS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = fields
                    .as_ref()
                    .and_then(|f| f.get(i))
                    .unwrap_or("0")
                    .to_owned();
                (*name, value)
            })
            .collect())
    }
}

/// One hardware timer: the running count and its reload value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    pub current: u32,
    pub reload: u32,
}

impl TimerState {
    fn parse(row: &str) -> Result<Option<Self>, SimError> {
        let Some(fields) = record::parse(row)? else {
            return Ok(None);
        };
        if fields.len() != 2 {
            return Err(SimError::malformed(format!(
                "timer record needs 2 fields, found {}",
                fields.len()
            )));
        }
        Ok(Some(Self {
            current: record::parse_int(&fields[0])?,
            reload: record::parse_int(&fields[1])?,
        }))
    }

    fn encode(&self) -> Result<String, SimError> {
        record::format([self.current.to_string(), self.reload.to_string()])
    }

    /// Counts down by one, reloading once the count has reached zero.
    pub fn step(self) -> Self {
        let current = if self.current > 0 {
            self.current - 1
        } else {
            self.reload
        };
        Self { current, ..self }
    }
}

/// Number of simulated timers.
pub const TIMER_COUNT: usize = 2;

/// The simulated timers, one record per row.
#[derive(Debug)]
pub struct TimerBank<M> {
    medium: Arc<M>,
}

impl<M: Medium> TimerBank<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self { medium }
    }

    /// Loads timer `index` with a count and reload value.
    pub fn set(&self, index: usize, timer: TimerState) -> Result<(), SimError> {
        if index >= TIMER_COUNT {
            return Err(SimError::malformed(format!("no timer {index}")));
        }
        let row = timer.encode()?;
        self.medium.transact(|rows| medium::store(rows, index, row))
    }

    pub fn read(&self) -> Result<Vec<Option<TimerState>>, SimError> {
        let rows = self.medium.transact(|rows| rows.clone())?;
        (0..TIMER_COUNT)
            .map(|i| match rows.get(i) {
                Some(row) => TimerState::parse(row),
                None => Ok(None),
            })
            .collect()
    }

    /// Advances every loaded timer by one tick. A malformed record leaves
    /// all timers unchanged.
    pub fn tick(&self) -> Result<Vec<Option<TimerState>>, SimError> {
        self.medium
            .transact(|rows| -> Result<Vec<Option<TimerState>>, SimError> {
                let mut next = Vec::with_capacity(TIMER_COUNT);
                for i in 0..TIMER_COUNT {
                    let timer = match rows.get(i) {
                        Some(row) => TimerState::parse(row)?.map(TimerState::step),
                        None => None,
                    };
                    next.push(timer);
                }
                for (i, timer) in next.iter().enumerate() {
                    if let Some(timer) = timer {
                        medium::store(rows, i, timer.encode()?);
                    }
                }
                Ok(next)
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;

    fn rows(medium: &MemoryMedium) -> Vec<String> {
        medium.transact(|rows| rows.clone()).unwrap()
    }

    #[test]
    fn contactor_fields_are_optional() {
        let contactors = Contactors::new(Arc::new(MemoryMedium::with_rows(["1,0"])));
        assert_eq!(
            contactors.read().unwrap(),
            ContactorStates {
                motor: Some(true),
                array: Some(false)
            }
        );

        let blank = Contactors::new(Arc::new(MemoryMedium::new()));
        assert_eq!(blank.read().unwrap(), ContactorStates::default());

        let partial = Contactors::new(Arc::new(MemoryMedium::with_rows(["x,1"])));
        assert_eq!(
            partial.read().unwrap(),
            ContactorStates {
                motor: None,
                array: Some(true)
            }
        );
    }

    #[test]
    fn precharge_bits() {
        let read = |row: &str| Precharge::new(Arc::new(MemoryMedium::with_rows([row]))).read().unwrap();
        assert_eq!(read(""), PrechargeStates::default());
        assert_eq!(read("1"), PrechargeStates { array: true, motor: false });
        assert_eq!(read("2"), PrechargeStates { array: false, motor: true });
        assert_eq!(read("3"), PrechargeStates { array: true, motor: true });
    }

    #[test]
    fn uart_ports_are_separate_rows() {
        let medium = Arc::new(MemoryMedium::new());
        let uart = Uart::new(Arc::clone(&medium));
        uart.send(2, "hello").unwrap();
        assert_eq!(rows(&medium), vec!["", "hello"]);
        uart.send(1, "35,1,30").unwrap();
        assert_eq!(rows(&medium), vec!["35,1,30", "hello"]);
        assert_eq!(uart.receive(2).unwrap().as_deref(), Some("hello"));
        assert!(uart.send(3, "x").is_err());
    }

    #[test]
    fn display_fills_missing_fields_with_zero() {
        let uart = Uart::new(Arc::new(MemoryMedium::with_rows(["35,1,30"])));
        let display = uart.display().unwrap();
        let values: Vec<_> = display.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(values, ["35", "1", "30", "0", "0"]);
        assert_eq!(display[4].0, "CAN_err");
    }

    #[test]
    fn timers_count_down_then_reload() {
        let medium = Arc::new(MemoryMedium::with_rows(["2,5", "0,3"]));
        let timers = TimerBank::new(Arc::clone(&medium));
        timers.tick().unwrap();
        assert_eq!(rows(&medium), vec!["1,5", "3,3"]);
        timers.tick().unwrap();
        timers.tick().unwrap();
        assert_eq!(
            timers.read().unwrap(),
            vec![
                Some(TimerState { current: 5, reload: 5 }),
                Some(TimerState { current: 1, reload: 3 }),
            ]
        );
    }

    #[test]
    fn missing_timers_stay_unloaded() {
        let medium = Arc::new(MemoryMedium::new());
        let timers = TimerBank::new(Arc::clone(&medium));
        assert_eq!(timers.tick().unwrap(), vec![None, None]);
        timers.set(1, TimerState { current: 1, reload: 1 }).unwrap();
        assert_eq!(
            timers.tick().unwrap(),
            vec![None, Some(TimerState { current: 0, reload: 1 })]
        );
        assert_eq!(rows(&medium), vec!["", "0,1"]);
    }

    #[test]
    fn malformed_timer_leaves_rows_unchanged() {
        let medium = Arc::new(MemoryMedium::with_rows(["4,4", "soon"]));
        let timers = TimerBank::new(Arc::clone(&medium));
        assert!(matches!(timers.tick(), Err(SimError::MalformedFrame(_))));
        assert_eq!(rows(&medium), vec!["4,4", "soon"]);
    }
}
