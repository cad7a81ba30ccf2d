//! CAN frames, their comma-separated record form, and the two bus lanes.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::SimError;
use crate::medium::{self, Medium, Slot};
use crate::record;

/// Largest data length a classic CAN frame carries.
pub const MAX_DATA_LEN: u8 = 8;

/// Battery-protection "motor disable" command, sent on the vehicle lane.
pub const MOTOR_DISABLE_ID: u32 = 0x10A;

/// A CAN message: identifier, payload, and its length in bytes.
///
/// Frames are immutable once built. The length normally follows from the
/// payload, but frames read back from firmware may declare a longer DLC
/// whose leading bytes are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    payload: u64,
    byte_len: u8,
}

/// Minimal number of bytes needed to hold `payload` (0 for a zero payload).
pub fn minimal_len(payload: u64) -> u8 {
    let bits = u64::BITS - payload.leading_zeros();
    bits.div_ceil(8) as u8
}

impl CanFrame {
    pub fn new(id: u32, payload: u64) -> Self {
        Self {
            id,
            payload,
            byte_len: minimal_len(payload),
        }
    }

    /// Builds a frame with an explicit data length. Returns `None` if the
    /// length is over 8 or too short for the payload.
    pub fn with_len(id: u32, payload: u64, byte_len: u8) -> Option<Self> {
        if byte_len > MAX_DATA_LEN || byte_len < minimal_len(payload) {
            return None;
        }
        Some(Self {
            id,
            payload,
            byte_len,
        })
    }

    /// Builds a frame from big-endian data bytes (at most 8).
    pub fn from_data(id: u32, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN as usize {
            return None;
        }
        let payload = data
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
        Self::with_len(id, payload, data.len() as u8)
    }

    /// Packs two 32-bit halves into one 64-bit payload.
    pub fn from_halves(id: u32, upper: u32, lower: u32) -> Self {
        Self::new(id, (u64::from(upper) << 32) | u64::from(lower))
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn payload(&self) -> u64 {
        self.payload
    }

    pub fn byte_len(&self) -> u8 {
        self.byte_len
    }

    /// Upper and lower 32-bit halves of the payload.
    pub fn split(&self) -> (u32, u32) {
        ((self.payload >> 32) as u32, self.payload as u32)
    }

    /// Payload as big-endian data bytes, `byte_len` long.
    pub fn data(&self) -> Vec<u8> {
        let len = usize::from(self.byte_len);
        self.payload.to_be_bytes()[8 - len..].to_vec()
    }

    /// Id 0 with no data is reserved to mean "no frame".
    pub fn is_sentinel(&self) -> bool {
        self.id == 0 && self.byte_len == 0
    }

    /// Record form: `0x<id>,0x<payload>,<byte length>`.
    pub fn encode(&self) -> String {
        format!("{:#05x},{:#x},{}", self.id, self.payload, self.byte_len)
    }

    /// Parses a record. A blank row or the reserved sentinel decodes to
    /// `Ok(None)`; anything else that is not a valid frame is malformed.
    pub fn decode(row: &str) -> Result<Option<Self>, SimError> {
        let Some(fields) = record::parse(row)? else {
            return Ok(None);
        };
        if fields.len() != 3 {
            return Err(SimError::malformed(format!(
                "CAN record needs 3 fields, found {}",
                fields.len()
            )));
        }

        let id = u32::try_from(record::parse_hex(&fields[0])?)
            .map_err(|_| SimError::malformed(format!("CAN id {} exceeds 32 bits", &fields[0])))?;
        let byte_len: u8 = record::parse_int(&fields[2])?;
        let payload = if byte_len == 0 && record::hex_digits(&fields[1]).is_empty() {
            0
        } else {
            record::parse_hex(&fields[1])?
        };

        let frame = Self::with_len(id, payload, byte_len).ok_or_else(|| {
            SimError::malformed(format!(
                "length {byte_len} does not fit payload {payload:#x}"
            ))
        })?;
        Ok((!frame.is_sentinel()).then_some(frame))
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID {:#05x} [{}] {:#x}", self.id, self.byte_len, self.payload)
    }
}

/// The two independent CAN interfaces of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// CAN1: vehicle bus, battery protection and dashboard traffic.
    Vehicle,
    /// CAN2: motor controller bus.
    Motor,
}

impl Lane {
    /// Row of the CAN medium holding this lane's frame.
    pub const fn row(self) -> usize {
        match self {
            Lane::Vehicle => 0,
            Lane::Motor => 1,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lane::Vehicle => f.write_str("CAN1"),
            Lane::Motor => f.write_str("CAN2"),
        }
    }
}

/// Both lanes over one shared medium.
#[derive(Debug)]
pub struct CanBus<M> {
    medium: Arc<M>,
}

impl<M> Clone for CanBus<M> {
    fn clone(&self) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
        }
    }
}

impl<M: Medium> CanBus<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self { medium }
    }

    fn slot(&self, lane: Lane) -> Slot<M> {
        Slot::new(Arc::clone(&self.medium), lane.row())
    }

    /// Latest frame on `lane`, left in place for other readers.
    pub fn read(&self, lane: Lane) -> Result<Option<CanFrame>, SimError> {
        match self.slot(lane).read()? {
            Some(row) => CanFrame::decode(&row),
            None => Ok(None),
        }
    }

    /// Reads and consumes the frame on `lane`, as the firmware does. The
    /// row is blanked even when it does not decode.
    pub fn take(&self, lane: Lane) -> Result<Option<CanFrame>, SimError> {
        self.slot(lane)
            .transact(|cell| cell.take().map_or(Ok(None), |row| CanFrame::decode(&row)))?
    }

    /// Puts `frame` on `lane`, replacing the previous occupant.
    ///
    /// A motor-lane write rewrites the medium as exactly two records: the
    /// vehicle lane's current record followed by the new frame.
    pub fn write(&self, lane: Lane, frame: &CanFrame) -> Result<(), SimError> {
        debug!(%lane, %frame, "CAN write");
        self.medium.transact(|rows| put(rows, lane, frame))
    }

    /// Decodes the frame on `lane` and hands it to `f`, then writes the
    /// reply `f` returns, all under one lock. A row that does not decode
    /// is passed to `f` as the error so it can still answer.
    pub fn exchange<R>(
        &self,
        lane: Lane,
        f: impl FnOnce(Result<Option<CanFrame>, SimError>) -> (R, Option<CanFrame>),
    ) -> Result<R, SimError> {
        self.medium.transact(|rows| {
            let current = match rows.get(lane.row()) {
                Some(row) => CanFrame::decode(row),
                None => Ok(None),
            };
            let (out, reply) = f(current);
            if let Some(reply) = reply {
                debug!(%lane, frame = %reply, "CAN reply");
                put(rows, lane, &reply);
            }
            out
        })
    }

    /// Sends the battery-protection verdict on whether the motor may run.
    pub fn send_motor_disable(&self, safe: bool) -> Result<(), SimError> {
        self.write(
            Lane::Vehicle,
            &CanFrame::new(MOTOR_DISABLE_ID, u64::from(safe)),
        )
    }
}

fn put(rows: &mut Vec<String>, lane: Lane, frame: &CanFrame) {
    let encoded = frame.encode();
    match lane {
        Lane::Vehicle => {
            medium::store(rows, Lane::Vehicle.row(), encoded);
            if rows.len() < 2 {
                rows.resize(2, String::new());
            }
        }
        Lane::Motor => {
            let echo = rows.first().cloned().unwrap_or_default();
            *rows = vec![echo, encoded];
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::medium::{FileMedium, MemoryMedium};

    fn bus() -> (Arc<MemoryMedium>, CanBus<MemoryMedium>) {
        let medium = Arc::new(MemoryMedium::new());
        (Arc::clone(&medium), CanBus::new(medium))
    }

    fn rows(medium: &MemoryMedium) -> Vec<String> {
        medium.transact(|rows| rows.clone()).unwrap()
    }

    #[test]
    fn byte_length_is_minimal() {
        assert_eq!(minimal_len(0), 0);
        assert_eq!(minimal_len(0x1), 1);
        assert_eq!(minimal_len(0xFF), 1);
        assert_eq!(minimal_len(0x100), 2);
        assert_eq!(minimal_len(u64::MAX), 8);
        assert_eq!(CanFrame::new(0x221, (50 << 32) | 2000).byte_len(), 5);
    }

    #[test]
    fn encodes_hex_fields() {
        let frame = CanFrame::new(0x221, (50 << 32) | 2000);
        assert_eq!(frame.encode(), "0x221,0x32000007d0,5");
        assert_eq!(CanFrame::new(0x10A, 0).encode(), "0x10a,0x0,0");
    }

    #[test]
    fn decode_reproduces_encoded_frames() {
        for (id, payload) in [
            (0x221, (50u64 << 32) | 2000),
            (0x243, 0),
            (0x24B, u64::MAX),
            (0x1FFF_FFFF, 0x80),
        ] {
            let frame = CanFrame::new(id, payload);
            let decoded = CanFrame::decode(&frame.encode()).unwrap().unwrap();
            assert_eq!(decoded.id(), id);
            assert_eq!(decoded.payload(), payload);
            assert_eq!(decoded.byte_len(), minimal_len(payload));
        }
    }

    #[test]
    fn decodes_firmware_records_with_padded_data() {
        let frame = CanFrame::decode("0x221,0x0000003200000064,8")
            .unwrap()
            .unwrap();
        assert_eq!(frame.byte_len(), 8);
        assert_eq!(frame.split(), (0x32, 0x64));
        assert_eq!(frame.data(), vec![0, 0, 0, 0x32, 0, 0, 0, 0x64]);

        let empty_data = CanFrame::decode("0x10a,0x,0").unwrap().unwrap();
        assert_eq!(empty_data.payload(), 0);
    }

    #[test]
    fn blank_and_sentinel_rows_are_empty_not_errors() {
        assert_eq!(CanFrame::decode("").unwrap(), None);
        assert_eq!(CanFrame::decode("0x0,0x0,0").unwrap(), None);
        assert!(CanFrame::decode("0x221,0x0,0").unwrap().is_some());
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        assert!(matches!(
            CanFrame::decode("0x221,0x5"),
            Err(SimError::MalformedFrame(_))
        ));
        assert!(matches!(
            CanFrame::decode("0x221,0x5,1,9"),
            Err(SimError::MalformedFrame(_))
        ));
    }

    #[test]
    fn bad_field_types_are_malformed() {
        for row in ["Empty,Empty,0", "0x221,0xGG,1", "0x221,0x5,one", "0x221,0x100,1", "0x221,0x5,9"] {
            assert!(
                matches!(CanFrame::decode(row), Err(SimError::MalformedFrame(_))),
                "{row}"
            );
        }
    }

    #[test]
    fn data_bytes_are_big_endian() {
        let frame = CanFrame::from_data(0x243, &[0x00, 0x12, 0x34]).unwrap();
        assert_eq!(frame.payload(), 0x1234);
        assert_eq!(frame.byte_len(), 3);
        assert!(CanFrame::from_data(0x243, &[0; 9]).is_none());
    }

    #[test]
    fn empty_lanes_read_none() {
        let (_, bus) = bus();
        assert_eq!(bus.read(Lane::Vehicle).unwrap(), None);
        assert_eq!(bus.read(Lane::Motor).unwrap(), None);
    }

    #[test]
    fn lanes_are_independent_single_slots() {
        let (_, bus) = bus();
        bus.write(Lane::Vehicle, &CanFrame::new(0x10A, 1)).unwrap();
        bus.write(Lane::Vehicle, &CanFrame::new(0x10A, 0)).unwrap();
        bus.write(Lane::Motor, &CanFrame::new(0x243, 7)).unwrap();

        assert_eq!(bus.read(Lane::Vehicle).unwrap(), Some(CanFrame::new(0x10A, 0)));
        assert_eq!(bus.read(Lane::Motor).unwrap(), Some(CanFrame::new(0x243, 7)));
    }

    #[test]
    fn motor_write_echoes_vehicle_record() {
        let (medium, bus) = bus();
        bus.write(Lane::Vehicle, &CanFrame::new(0x10A, 1)).unwrap();
        bus.write(Lane::Motor, &CanFrame::new(0x243, 0x5)).unwrap();
        assert_eq!(rows(&medium), vec!["0x10a,0x1,1", "0x243,0x5,1"]);
    }

    #[test]
    fn vehicle_write_keeps_motor_record() {
        let medium = Arc::new(MemoryMedium::with_rows(["", "0x243,0x5,1"]));
        let bus = CanBus::new(Arc::clone(&medium));
        bus.send_motor_disable(true).unwrap();
        assert_eq!(rows(&medium), vec!["0x10a,0x1,1", "0x243,0x5,1"]);
    }

    #[test]
    fn take_consumes_even_malformed_rows() {
        let medium = Arc::new(MemoryMedium::with_rows(["garbage", "0x243,0x5,1"]));
        let bus = CanBus::new(Arc::clone(&medium));
        assert!(bus.take(Lane::Vehicle).is_err());
        assert_eq!(bus.read(Lane::Vehicle).unwrap(), None);
        assert_eq!(bus.take(Lane::Motor).unwrap(), Some(CanFrame::new(0x243, 5)));
        assert_eq!(bus.read(Lane::Motor).unwrap(), None);
    }

    #[test]
    fn exchange_replies_under_the_same_lock() {
        let (medium, bus) = bus();
        bus.write(Lane::Vehicle, &CanFrame::new(0x10A, 1)).unwrap();
        bus.write(Lane::Motor, &CanFrame::new(0x221, 0x5)).unwrap();

        let seen = bus
            .exchange(Lane::Motor, |frame| (frame.unwrap(), Some(CanFrame::new(0x243, 0x9))))
            .unwrap();
        assert_eq!(seen, Some(CanFrame::new(0x221, 0x5)));
        assert_eq!(rows(&medium), vec!["0x10a,0x1,1", "0x243,0x9,1"]);

        // No reply leaves the lane alone.
        bus.exchange(Lane::Motor, |_| ((), None)).unwrap();
        assert_eq!(rows(&medium), vec!["0x10a,0x1,1", "0x243,0x9,1"]);
    }

    #[test]
    fn exchange_passes_malformed_rows_to_the_handler() {
        let medium = Arc::new(MemoryMedium::with_rows(["", "junk"]));
        let bus = CanBus::new(Arc::clone(&medium));
        let failed = bus
            .exchange(Lane::Motor, |frame| (frame.is_err(), Some(CanFrame::new(0x242, 1))))
            .unwrap();
        assert!(failed);
        assert_eq!(bus.read(Lane::Motor).unwrap(), Some(CanFrame::new(0x242, 1)));
    }

    #[test]
    fn concurrent_lane_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CAN.csv");
        let vehicle = CanBus::new(Arc::new(FileMedium::new(&path)));
        let motor = CanBus::new(Arc::new(FileMedium::new(&path)));

        let writer = thread::spawn(move || {
            for n in 1..=100 {
                vehicle.write(Lane::Vehicle, &CanFrame::new(0x10A, n)).unwrap();
            }
        });
        for n in 1..=100 {
            motor.write(Lane::Motor, &CanFrame::new(0x243, n)).unwrap();
        }
        writer.join().unwrap();

        // Each motor write echoes the vehicle row it saw under the lock, so
        // the last vehicle write survives whichever thread finished first.
        assert_eq!(motor.read(Lane::Vehicle).unwrap(), Some(CanFrame::new(0x10A, 100)));
        assert_eq!(motor.read(Lane::Motor).unwrap(), Some(CanFrame::new(0x243, 100)));
    }
}
