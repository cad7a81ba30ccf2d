//! Register bank of the GPIO/SPI port expander on the minion boards.
//!
//! 21 eight-bit registers are reachable through one of two address maps,
//! selected at runtime by bit 7 of `IOCON`.

use std::fmt;

use crate::error::SimError;

/// The expander's registers, in power-on order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    IodirA,
    IodirB,
    IpolA,
    IpolB,
    GpintenA,
    GpintenB,
    DefvalA,
    DefvalB,
    IntconA,
    IntconB,
    Iocon,
    GppuA,
    GppuB,
    IntfA,
    IntfB,
    IntcapA,
    IntcapB,
    GpioA,
    GpioB,
    OlatA,
    OlatB,
}

impl Register {
    pub const COUNT: usize = 21;

    pub const ALL: [Register; Register::COUNT] = [
        Register::IodirA,
        Register::IodirB,
        Register::IpolA,
        Register::IpolB,
        Register::GpintenA,
        Register::GpintenB,
        Register::DefvalA,
        Register::DefvalB,
        Register::IntconA,
        Register::IntconB,
        Register::Iocon,
        Register::GppuA,
        Register::GppuB,
        Register::IntfA,
        Register::IntfB,
        Register::IntcapA,
        Register::IntcapB,
        Register::GpioA,
        Register::GpioB,
        Register::OlatA,
        Register::OlatB,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::IodirA => "IODIRA",
            Register::IodirB => "IODIRB",
            Register::IpolA => "IPOLA",
            Register::IpolB => "IPOLB",
            Register::GpintenA => "GPINTENA",
            Register::GpintenB => "GPINTENB",
            Register::DefvalA => "DEFVALA",
            Register::DefvalB => "DEFVALB",
            Register::IntconA => "INTCONA",
            Register::IntconB => "INTCONB",
            Register::Iocon => "IOCON",
            Register::GppuA => "GPPUA",
            Register::GppuB => "GPPUB",
            Register::IntfA => "INTFA",
            Register::IntfB => "INTFB",
            Register::IntcapA => "INTCAPA",
            Register::IntcapB => "INTCAPB",
            Register::GpioA => "GPIOA",
            Register::GpioB => "GPIOB",
            Register::OlatA => "OLATA",
            Register::OlatB => "OLATB",
        }
    }

    /// Looks a register up by its datasheet name, ignoring case.
    pub fn from_name(name: &str) -> Option<Register> {
        Register::ALL
            .into_iter()
            .find(|reg| reg.name().eq_ignore_ascii_case(name))
    }

    /// Direction register that masks writes to a GPIO register.
    pub fn direction(self) -> Option<Register> {
        match self {
            Register::GpioA => Some(Register::IodirA),
            Register::GpioB => Some(Register::IodirB),
            _ => None,
        }
    }

    fn power_on_value(self) -> u8 {
        match self {
            Register::IodirA | Register::IodirB => 0xFF,
            _ => 0x00,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// IOCON.BANK = 0: A/B registers interleaved.
const BANK0: [Register; 22] = [
    Register::IodirA,
    Register::IodirB,
    Register::IpolA,
    Register::IpolB,
    Register::GpintenA,
    Register::GpintenB,
    Register::DefvalA,
    Register::DefvalB,
    Register::IntconA,
    Register::IntconB,
    Register::Iocon,
    Register::Iocon,
    Register::GppuA,
    Register::GppuB,
    Register::IntfA,
    Register::IntfB,
    Register::IntcapA,
    Register::IntcapB,
    Register::GpioA,
    Register::GpioB,
    Register::OlatA,
    Register::OlatB,
];

// IOCON.BANK = 1: port A at 0x00, port B at 0x10.
const BANK1_PORT_A: [Register; 11] = [
    Register::IodirA,
    Register::IpolA,
    Register::GpintenA,
    Register::DefvalA,
    Register::IntconA,
    Register::Iocon,
    Register::GppuA,
    Register::IntfA,
    Register::IntcapA,
    Register::GpioA,
    Register::OlatA,
];

const BANK1_PORT_B: [Register; 11] = [
    Register::IodirB,
    Register::IpolB,
    Register::GpintenB,
    Register::DefvalB,
    Register::IntconB,
    Register::Iocon,
    Register::GppuB,
    Register::IntfB,
    Register::IntcapB,
    Register::GpioB,
    Register::OlatB,
];

const BANK1_PORT_B_BASE: u8 = 0x10;

/// Address map selected by `IOCON` bit 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Bank0,
    Bank1,
}

impl Bank {
    pub const IOCON_BANK_BIT: u8 = 0x80;

    pub fn from_iocon(iocon: u8) -> Bank {
        if iocon & Self::IOCON_BANK_BIT == 0 {
            Bank::Bank0
        } else {
            Bank::Bank1
        }
    }

    /// Register at `address` in this map, if any.
    pub fn resolve(self, address: u8) -> Option<Register> {
        match self {
            Bank::Bank0 => BANK0.get(usize::from(address)).copied(),
            Bank::Bank1 if address >= BANK1_PORT_B_BASE => BANK1_PORT_B
                .get(usize::from(address - BANK1_PORT_B_BASE))
                .copied(),
            Bank::Bank1 => BANK1_PORT_A.get(usize::from(address)).copied(),
        }
    }

    /// Lowest address at which `register` appears in this map.
    pub fn address_of(self, register: Register) -> u8 {
        let index = match self {
            Bank::Bank0 => BANK0.iter().position(|r| *r == register),
            Bank::Bank1 => BANK1_PORT_A
                .iter()
                .position(|r| *r == register)
                .or_else(|| {
                    BANK1_PORT_B
                        .iter()
                        .position(|r| *r == register)
                        .map(|i| i + usize::from(BANK1_PORT_B_BASE))
                }),
        };
        // Every register appears in both maps.
        index.map_or(0, |i| i as u8)
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bank::Bank0 => f.write_str("bank 0"),
            Bank::Bank1 => f.write_str("bank 1"),
        }
    }
}

/// Register values of one expander.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    values: [u8; Register::COUNT],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    /// Creates a bank in its power-on-reset state.
    pub fn new() -> Self {
        let mut values = [0; Register::COUNT];
        for reg in Register::ALL {
            values[reg as usize] = reg.power_on_value();
        }
        Self { values }
    }

    pub fn get(&self, register: Register) -> u8 {
        self.values[register as usize]
    }

    /// Stores a value directly, bypassing direction masking.
    pub fn set(&mut self, register: Register, value: u8) {
        self.values[register as usize] = value;
    }

    /// Active address map. Derived from `IOCON` on every call.
    pub fn bank(&self) -> Bank {
        Bank::from_iocon(self.get(Register::Iocon))
    }

    pub fn resolve(&self, address: u8) -> Result<Register, SimError> {
        let bank = self.bank();
        bank.resolve(address)
            .ok_or(SimError::UnknownRegister { address, bank })
    }

    /// Writes `data` to the register at `address`.
    ///
    /// GPIO registers only take the bits whose direction bit is 0; bits
    /// with a direction bit of 1 keep their previous value. Every other
    /// register is overwritten.
    pub fn write(&mut self, address: u8, data: u8) -> Result<Register, SimError> {
        let register = self.resolve(address)?;
        let value = match register.direction() {
            Some(direction) => {
                let writable = !self.get(direction);
                (data & writable) | (self.get(register) & !writable)
            }
            None => data,
        };
        self.set(register, value);
        Ok(register)
    }

    pub fn read(&self, address: u8) -> Result<u8, SimError> {
        Ok(self.get(self.resolve(address)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Register, u8)> + '_ {
        Register::ALL.into_iter().map(|reg| (reg, self.get(reg)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_on_defaults() {
        let regs = RegisterFile::new();
        assert_eq!(regs.get(Register::IodirA), 0xFF);
        assert_eq!(regs.get(Register::IodirB), 0xFF);
        assert!(regs
            .iter()
            .filter(|(reg, _)| !matches!(reg, Register::IodirA | Register::IodirB))
            .all(|(_, value)| value == 0));
        assert_eq!(regs.bank(), Bank::Bank0);
    }

    #[test]
    fn bank0_interleaves_ports() {
        assert_eq!(Bank::Bank0.resolve(0x00), Some(Register::IodirA));
        assert_eq!(Bank::Bank0.resolve(0x01), Some(Register::IodirB));
        assert_eq!(Bank::Bank0.resolve(0x0A), Some(Register::Iocon));
        assert_eq!(Bank::Bank0.resolve(0x0B), Some(Register::Iocon));
        assert_eq!(Bank::Bank0.resolve(0x12), Some(Register::GpioA));
        assert_eq!(Bank::Bank0.resolve(0x15), Some(Register::OlatB));
        assert_eq!(Bank::Bank0.resolve(0x16), None);
    }

    #[test]
    fn bank1_splits_ports() {
        assert_eq!(Bank::Bank1.resolve(0x00), Some(Register::IodirA));
        assert_eq!(Bank::Bank1.resolve(0x09), Some(Register::GpioA));
        assert_eq!(Bank::Bank1.resolve(0x05), Some(Register::Iocon));
        assert_eq!(Bank::Bank1.resolve(0x15), Some(Register::Iocon));
        assert_eq!(Bank::Bank1.resolve(0x19), Some(Register::GpioB));
        assert_eq!(Bank::Bank1.resolve(0x1A), Some(Register::OlatB));
        assert_eq!(Bank::Bank1.resolve(0x0B), None);
        assert_eq!(Bank::Bank1.resolve(0x1B), None);
    }

    #[test]
    fn every_register_has_an_address_in_both_banks() {
        for bank in [Bank::Bank0, Bank::Bank1] {
            for reg in Register::ALL {
                assert_eq!(bank.resolve(bank.address_of(reg)), Some(reg), "{reg} in {bank}");
            }
        }
    }

    #[test]
    fn plain_registers_are_overwritten() {
        let mut regs = RegisterFile::new();
        assert_eq!(regs.write(0x00, 0x32).unwrap(), Register::IodirA);
        assert_eq!(regs.read(0x00).unwrap(), 0x32);
    }

    #[test]
    fn gpio_writes_are_masked_by_direction() {
        let mut regs = RegisterFile::new();
        regs.write(0x00, 0x32).unwrap();
        regs.write(0x12, 0x42).unwrap();
        // Only bits clear in IODIRA (0xCD) take the new data.
        assert_eq!(regs.read(0x12).unwrap(), 0x40);
    }

    #[test]
    fn masked_gpio_bits_keep_their_old_value() {
        let mut regs = RegisterFile::new();
        regs.set(Register::GpioB, 0b1010_0000);
        regs.write(0x01, 0xF0).unwrap();
        regs.write(0x13, 0b0101_0101).unwrap();
        assert_eq!(regs.get(Register::GpioB), 0b1010_0101);
    }

    #[test]
    fn gpio_is_read_only_at_power_on() {
        let mut regs = RegisterFile::new();
        regs.write(0x12, 0xFF).unwrap();
        assert_eq!(regs.get(Register::GpioA), 0x00);
    }

    #[test]
    fn iocon_switches_address_map_immediately() {
        let mut regs = RegisterFile::new();
        regs.write(0x0A, 0x80).unwrap();
        assert_eq!(regs.bank(), Bank::Bank1);
        // 0x09 was INTCONB in bank 0, it is GPIOA now.
        regs.write(0x00, 0x00).unwrap();
        regs.write(0x09, 0x5A).unwrap();
        assert_eq!(regs.get(Register::GpioA), 0x5A);
        assert_eq!(regs.get(Register::IntconB), 0x00);

        // IOCON sits at 0x05 in bank 1; clearing bit 7 switches back.
        regs.write(0x05, 0x00).unwrap();
        assert_eq!(regs.bank(), Bank::Bank0);
        assert_eq!(regs.resolve(0x09).unwrap(), Register::IntconB);
    }

    #[test]
    fn unknown_address_is_an_error() {
        let mut regs = RegisterFile::new();
        assert!(matches!(
            regs.write(0x16, 1),
            Err(SimError::UnknownRegister { address: 0x16, bank: Bank::Bank0 })
        ));
        assert!(matches!(regs.read(0xFF), Err(SimError::UnknownRegister { .. })));
        assert_eq!(regs, RegisterFile::new());
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(Register::from_name("gpioa"), Some(Register::GpioA));
        assert_eq!(Register::from_name("IOCON"), Some(Register::Iocon));
        assert_eq!(Register::from_name("PORTA"), None);
    }
}
