//! Function code catalog
//!
//! Classifies each supported function code along the four axes the rest of
//! the engine cares about (bit vs register addressed, single vs multi
//! element, reads vs writes server data) and derives per-frame element
//! limits from an ADU size budget.

use crate::constants::{
    MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS,
};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::Pdu;

/// Supported Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (FC01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (FC02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (FC03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (FC04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (FC05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (FC06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (FC15)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (FC16)
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    /// Parse a function code byte. Unsupported codes map to `None`.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Wire representation.
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Split a reply function code byte into its exception flag (0x80) and
    /// the underlying code.
    #[inline]
    pub fn separate_error(byte: u8) -> (bool, u8) {
        (byte & 0x80 != 0, byte & 0x7F)
    }

    /// Register-addressed (16-bit elements) rather than bit-addressed.
    pub fn is_register(self) -> bool {
        matches!(
            self,
            Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
                | Self::WriteSingleRegister
                | Self::WriteMultipleRegisters
        )
    }

    /// Single-element write (FC05/FC06), carrying a data value in place of
    /// the quantity field.
    pub fn is_single(self) -> bool {
        matches!(self, Self::WriteSingleCoil | Self::WriteSingleRegister)
    }

    /// Reads data held by the server (FC01-04); the reply carries payload.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    /// Writes data to the server (FC05/06/15/16); the request carries payload.
    #[inline]
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// Human-readable name for logging.
    pub fn description(self) -> &'static str {
        match self {
            Self::ReadCoils => "Read Coils",
            Self::ReadDiscreteInputs => "Read Discrete Inputs",
            Self::ReadHoldingRegisters => "Read Holding Registers",
            Self::ReadInputRegisters => "Read Input Registers",
            Self::WriteSingleCoil => "Write Single Coil",
            Self::WriteSingleRegister => "Write Single Register",
            Self::WriteMultipleCoils => "Write Multiple Coils",
            Self::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }

    /// Maximum elements per request under standard 256-byte framing.
    pub fn max_per_packet(self) -> u16 {
        self.max_per_packet_sized(MAX_PDU_SIZE)
    }

    /// Maximum elements per request given `pdu_space` bytes of PDU budget.
    ///
    /// Both directions of the exchange must fit: for reads the reply payload
    /// is the binding constraint, for multi-writes the request payload. The
    /// standard per-function ceilings apply whenever the budget is within
    /// standard framing; larger budgets (oversize mode) bound the quantity
    /// by the frame alone.
    pub fn max_per_packet_sized(self, pdu_space: usize) -> u16 {
        let capped = |elements: usize, standard: u16| -> u16 {
            let elements = elements.min(usize::from(u16::MAX)) as u16;
            if pdu_space <= MAX_PDU_SIZE {
                elements.min(standard)
            } else {
                elements
            }
        };
        match self {
            Self::ReadCoils | Self::ReadDiscreteInputs => {
                // reply: fc, byte count, ceil(n / 8) data bytes
                capped(pdu_space.saturating_sub(2) * 8, MAX_READ_BITS)
            }
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => {
                capped(pdu_space.saturating_sub(2) / 2, MAX_READ_REGISTERS)
            }
            Self::WriteSingleCoil | Self::WriteSingleRegister => {
                if pdu_space >= 5 {
                    1
                } else {
                    0
                }
            }
            Self::WriteMultipleCoils => {
                // request: fc, address, quantity, byte count, data
                capped(pdu_space.saturating_sub(6) * 8, MAX_WRITE_BITS)
            }
            Self::WriteMultipleRegisters => {
                capped(pdu_space.saturating_sub(6) / 2, MAX_WRITE_REGISTERS)
            }
        }
    }

    /// Build the 5-byte request header `[fc | address | quantity]` describing
    /// a logical operation before transmission.
    ///
    /// Single-element writes require `quantity == 1`; the value itself is
    /// filled in when the request is materialized.
    pub fn make_request_header(self, address: u16, quantity: u16) -> ModbusResult<Pdu> {
        if quantity == 0 || quantity > self.max_per_packet() {
            return Err(ModbusError::invalid_data(format!(
                "quantity {} out of range for {}",
                quantity,
                self.description()
            )));
        }
        if u32::from(address) + u32::from(quantity) > 0x1_0000 {
            return Err(ModbusError::invalid_data(format!(
                "address {} + quantity {} overflows the register space",
                address, quantity
            )));
        }
        let mut data = Vec::with_capacity(5);
        data.push(self.to_u8());
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&quantity.to_be_bytes());
        Ok(Pdu::from_vec_unchecked(data))
    }
}
