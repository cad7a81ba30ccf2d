//! Register-access protocol spoken over SPI to the port expander.
//!
//! A command is one 24-bit frame: a 7-bit opcode, a read/write bit, an
//! 8-bit register address and 8 bits of data. The frame travels as hex
//! text in row 0 of the SPI medium; a read is answered in the same row
//! with the register value as a decimal number.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::SimError;
use crate::medium::{Medium, Slot};
use crate::record;
use crate::registers::{Register, RegisterFile};

/// Device opcode of the expander (hardware address pins tied low).
pub const OPCODE: u8 = 0b010_0000;

const FRAME_BITS: u32 = 24;
const FRAME_MASK: u64 = (1 << FRAME_BITS) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Write,
    Read,
}

/// One decoded command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeFrame {
    pub opcode: u8,
    pub access: Access,
    pub address: u8,
    pub data: u8,
}

impl OpcodeFrame {
    pub fn write(address: u8, data: u8) -> Self {
        Self {
            opcode: OPCODE,
            access: Access::Write,
            address,
            data,
        }
    }

    pub fn read(address: u8) -> Self {
        Self {
            opcode: OPCODE,
            access: Access::Read,
            address,
            data: 0,
        }
    }

    /// Slices a raw frame. Leading zero bits may have been dropped by the
    /// sender, so the value is treated as zero-extended to 24 bits.
    pub fn from_raw(raw: u64) -> Result<Self, SimError> {
        if raw & !FRAME_MASK != 0 {
            return Err(SimError::malformed(format!(
                "opcode frame {raw:#x} is wider than {FRAME_BITS} bits"
            )));
        }
        let access = if (raw >> 16) & 1 == 0 {
            Access::Write
        } else {
            Access::Read
        };
        Ok(Self {
            opcode: (raw >> 17) as u8,
            access,
            address: (raw >> 8) as u8,
            data: raw as u8,
        })
    }

    pub fn to_raw(&self) -> u32 {
        let rw = match self.access {
            Access::Write => 0,
            Access::Read => 1,
        };
        (u32::from(self.opcode & 0x7F) << 17)
            | (rw << 16)
            | (u32::from(self.address) << 8)
            | u32::from(self.data)
    }

    /// Parses the hex text form, with or without a `0x` prefix.
    pub fn parse(text: &str) -> Result<Self, SimError> {
        Self::from_raw(record::parse_hex(text.trim())?)
    }

    pub fn encode(&self) -> String {
        format!("{:06x}", self.to_raw())
    }

    pub fn is_valid(&self) -> bool {
        self.opcode == OPCODE
    }

    /// Passes frames addressed to the expander, rejects the rest with
    /// `InvalidOpcode`.
    pub fn validate(self) -> Result<Self, SimError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(SimError::InvalidOpcode(self.opcode))
        }
    }
}

impl fmt::Display for OpcodeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.access {
            Access::Write => write!(f, "write {:#04x} <- {:#04x}", self.address, self.data),
            Access::Read => write!(f, "read {:#04x}", self.address),
        }
    }
}

/// Result of one expander poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiOutcome {
    /// Nothing pending.
    Idle,
    /// A write was applied and the command consumed.
    Wrote { register: Register, value: u8 },
    /// A read was answered in place of the command.
    Replied { register: Register, value: u8 },
    /// The frame did not carry the expander opcode and was ignored.
    Dropped { opcode: u8 },
}

/// Slave side of the SPI link: answers commands found on the medium.
#[derive(Debug)]
pub struct GpioExpander<M> {
    slot: Slot<M>,
}

impl<M> Clone for GpioExpander<M> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<M: Medium> GpioExpander<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self {
            slot: Slot::new(medium, 0),
        }
    }

    /// Handles the pending command, if any, against `regs`.
    ///
    /// A frame with a foreign opcode is left untouched, like a slave that
    /// does not NACK. A frame that addresses no register is consumed and
    /// reported. A frame that does not parse is reported and left in place.
    pub fn poll(&self, regs: &mut RegisterFile) -> Result<SpiOutcome, SimError> {
        self.slot.transact(|cell| -> Result<SpiOutcome, SimError> {
            let Some(text) = cell.as_deref() else {
                return Ok(SpiOutcome::Idle);
            };
            let field = match record::parse(text)? {
                Some(fields) => fields.get(0).unwrap_or_default().to_owned(),
                None => return Ok(SpiOutcome::Idle),
            };
            let frame = match OpcodeFrame::parse(&field)?.validate() {
                Ok(frame) => frame,
                Err(SimError::InvalidOpcode(opcode)) => {
                    debug!(opcode, "ignoring frame for another device");
                    return Ok(SpiOutcome::Dropped { opcode });
                }
                Err(e) => return Err(e),
            };

            match frame.access {
                Access::Write => {
                    *cell = None;
                    let register = regs.write(frame.address, frame.data)?;
                    let value = regs.get(register);
                    debug!(%register, value, "SPI write");
                    Ok(SpiOutcome::Wrote { register, value })
                }
                Access::Read => {
                    let register = match regs.resolve(frame.address) {
                        Ok(register) => register,
                        Err(e) => {
                            *cell = None;
                            return Err(e);
                        }
                    };
                    let value = regs.get(register);
                    *cell = Some(value.to_string());
                    debug!(%register, value, "SPI read");
                    Ok(SpiOutcome::Replied { register, value })
                }
            }
        })?
    }
}

/// Master side of the SPI link, as driven by firmware or a test script.
#[derive(Debug)]
pub struct SpiMaster<M> {
    slot: Slot<M>,
}

impl<M: Medium> SpiMaster<M> {
    pub fn new(medium: Arc<M>) -> Self {
        Self {
            slot: Slot::new(medium, 0),
        }
    }

    /// Places a command on the link, replacing anything pending.
    pub fn send(&self, frame: &OpcodeFrame) -> Result<(), SimError> {
        self.slot.write(frame.encode())
    }

    /// The reply to a read, once the expander has answered.
    ///
    /// Returns `None` while the slot is empty or still holds the command.
    pub fn response(&self) -> Result<Option<u8>, SimError> {
        Ok(self
            .slot
            .read()?
            .and_then(|text| text.trim().parse::<u8>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;

    fn link() -> (SpiMaster<MemoryMedium>, GpioExpander<MemoryMedium>, RegisterFile) {
        let medium = Arc::new(MemoryMedium::new());
        (
            SpiMaster::new(Arc::clone(&medium)),
            GpioExpander::new(medium),
            RegisterFile::new(),
        )
    }

    #[test]
    fn slices_fields_from_zero_extended_frame() {
        // 0100000 0 00000000 00110010: write IODIRA = 0x32
        let frame = OpcodeFrame::from_raw(0b0100000_0_00000000_00110010).unwrap();
        assert_eq!(frame, OpcodeFrame::write(0x00, 0x32));
        assert_eq!(OpcodeFrame::parse("0x400032").unwrap(), frame);

        // Missing leading zero bits are still the same fields.
        let short = OpcodeFrame::parse("1234").unwrap();
        assert_eq!(short.opcode, 0);
        assert_eq!(short.address, 0x12);
        assert_eq!(short.data, 0x34);
    }

    #[test]
    fn frames_encode_as_six_hex_digits() {
        assert_eq!(OpcodeFrame::write(0x12, 0x42).encode(), "401242");
        assert_eq!(OpcodeFrame::read(0x12).encode(), "411200");
        assert_eq!(OpcodeFrame::read(0x0A).to_raw(), 0x410A00);
    }

    #[test]
    fn only_the_expander_opcode_validates() {
        assert_eq!(
            OpcodeFrame::write(0x12, 1).validate().unwrap(),
            OpcodeFrame::write(0x12, 1)
        );
        let foreign = OpcodeFrame::from_raw(0x7E_0000).unwrap();
        assert!(matches!(
            foreign.validate(),
            Err(SimError::InvalidOpcode(0b011_1111))
        ));
    }

    #[test]
    fn wide_frames_are_malformed() {
        assert!(matches!(
            OpcodeFrame::from_raw(0x1_000000),
            Err(SimError::MalformedFrame(_))
        ));
    }

    #[test]
    fn empty_link_is_idle() {
        let (_, expander, mut regs) = link();
        assert_eq!(expander.poll(&mut regs).unwrap(), SpiOutcome::Idle);
    }

    #[test]
    fn write_then_read_back() {
        let (master, expander, mut regs) = link();
        master.send(&OpcodeFrame::write(0x02, 0x5A)).unwrap();
        assert_eq!(
            expander.poll(&mut regs).unwrap(),
            SpiOutcome::Wrote {
                register: Register::IpolA,
                value: 0x5A
            }
        );
        // Consumed: a second poll does not re-apply it.
        assert_eq!(expander.poll(&mut regs).unwrap(), SpiOutcome::Idle);

        master.send(&OpcodeFrame::read(0x02)).unwrap();
        assert_eq!(master.response().unwrap(), None);
        expander.poll(&mut regs).unwrap();
        assert_eq!(master.response().unwrap(), Some(0x5A));
    }

    #[test]
    fn gpio_write_is_masked_by_iodir() {
        let (master, expander, mut regs) = link();
        master.send(&OpcodeFrame::parse("400032").unwrap()).unwrap();
        expander.poll(&mut regs).unwrap();
        master.send(&OpcodeFrame::write(0x12, 0x42)).unwrap();
        expander.poll(&mut regs).unwrap();

        master.send(&OpcodeFrame::read(0x12)).unwrap();
        assert_eq!(
            expander.poll(&mut regs).unwrap(),
            SpiOutcome::Replied {
                register: Register::GpioA,
                value: 0x40
            }
        );
        assert_eq!(master.response().unwrap(), Some(0x40));
    }

    #[test]
    fn reply_left_on_link_is_not_mistaken_for_a_command() {
        let (master, expander, mut regs) = link();
        master.send(&OpcodeFrame::read(0x00)).unwrap();
        expander.poll(&mut regs).unwrap();
        assert!(matches!(
            expander.poll(&mut regs).unwrap(),
            SpiOutcome::Dropped { .. }
        ));
        assert_eq!(master.response().unwrap(), Some(0xFF));
    }

    #[test]
    fn foreign_opcode_is_dropped_without_side_effects() {
        let (master, expander, mut regs) = link();
        let mut frame = OpcodeFrame::write(0x00, 0x00);
        frame.opcode = 0b010_0111;
        master.send(&frame).unwrap();

        assert_eq!(
            expander.poll(&mut regs).unwrap(),
            SpiOutcome::Dropped {
                opcode: 0b010_0111
            }
        );
        assert_eq!(regs, RegisterFile::new());
    }

    #[test]
    fn unknown_register_is_reported_once() {
        let (master, expander, mut regs) = link();
        master.send(&OpcodeFrame::write(0x30, 0x01)).unwrap();
        assert!(matches!(
            expander.poll(&mut regs),
            Err(SimError::UnknownRegister { address: 0x30, .. })
        ));
        assert_eq!(expander.poll(&mut regs).unwrap(), SpiOutcome::Idle);

        master.send(&OpcodeFrame::read(0x30)).unwrap();
        assert!(expander.poll(&mut regs).is_err());
        assert_eq!(expander.poll(&mut regs).unwrap(), SpiOutcome::Idle);
    }

    #[test]
    fn garbage_is_reported_and_left_in_place() {
        let medium = Arc::new(MemoryMedium::with_rows(["not-hex"]));
        let expander = GpioExpander::new(Arc::clone(&medium));
        let mut regs = RegisterFile::new();
        assert!(matches!(
            expander.poll(&mut regs),
            Err(SimError::MalformedFrame(_))
        ));
        assert_eq!(
            Slot::new(medium, 0).read().unwrap().as_deref(),
            Some("not-hex")
        );
    }

    #[test]
    fn bank_switch_applies_to_next_command() {
        let (master, expander, mut regs) = link();
        master.send(&OpcodeFrame::write(0x0A, 0x80)).unwrap();
        expander.poll(&mut regs).unwrap();
        master.send(&OpcodeFrame::write(0x10, 0x0F)).unwrap();
        assert_eq!(
            expander.poll(&mut regs).unwrap(),
            SpiOutcome::Wrote {
                register: Register::IodirB,
                value: 0x0F
            }
        );
    }
}
