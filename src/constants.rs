//! Modbus RTU protocol constants based on the official specification
//!
//! These constants are derived from the serial-line Modbus specification:
//! - Maximum ADU size: 256 bytes on RS485
//! - Maximum PDU size: 253 bytes (256 minus address and CRC)
//! - Register/coil limits are calculated to fit within the PDU constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Smallest possible RTU ADU.
/// Format: Slave Address(1) + Function Code(1) + CRC(2) = 4 bytes
pub const SMALLEST_RTU_SIZE: usize = 4;

/// Maximum RTU ADU size per Modbus specification (RS485 limit).
pub const MAX_RTU_SIZE: usize = 256;

/// Bytes of RTU framing around the PDU: Slave Address(1) + CRC(2).
pub const RTU_OVERHEAD: usize = 3;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// = 256 (RS485 ADU) - 1 (Slave Address) - 2 (CRC) = 253 bytes
pub const MAX_PDU_SIZE: usize = MAX_RTU_SIZE - RTU_OVERHEAD;

// ============================================================================
// Addressing
// ============================================================================

/// Broadcast address; requests to it are never answered.
pub const BROADCAST_ID: u8 = 0;

/// Highest addressable slave id.
pub const MAX_SLAVE_ID: u8 = 247;

// ============================================================================
// Operation Limits
// ============================================================================

/// Maximum number of bits for FC01/FC02 (Read Coils/Discrete Inputs)
///
/// Response PDU: 1 (fc) + 1 (byte count) + ceil(N / 8) ≤ 253, so
/// N ≤ 2008; the specification rounds this to 2000.
pub const MAX_READ_BITS: u16 = 2000;

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: 1 (fc) + 1 (byte count) + N × 2 ≤ 253, so N ≤ 125.
pub const MAX_READ_REGISTERS: u16 = 125;

/// Maximum number of bits for FC15 (Write Multiple Coils)
///
/// Request PDU: 1 (fc) + 2 (address) + 2 (quantity) + 1 (byte count)
/// + ceil(N / 8) ≤ 253, so N ≤ 1976; the specification uses 1968 (0x7B0).
pub const MAX_WRITE_BITS: u16 = 1968;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: 1 (fc) + 2 (address) + 2 (quantity) + 1 (byte count)
/// + N × 2 ≤ 253, so N ≤ 123.
pub const MAX_WRITE_REGISTERS: u16 = 123;
