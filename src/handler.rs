//! Application handler contract
//!
//! The engine never owns register or coil arrays; it drives a
//! [`ProtocolHandler`] supplied by the application. A server reads and
//! writes its data model through the handler; a client uses the same
//! contract as the local mirror of the remote data (reads deliver reply
//! values to `on_write`, writes fetch payload from `on_read`), which is what
//! keeps redundant peers in lockstep.

use crate::data::{bools_to_bytes, bytes_to_bools, bytes_to_registers, registers_to_bytes};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::pdu::Pdu;

/// Capability record connecting the protocol engine to application data.
pub trait ProtocolHandler: Send + Sync {
    /// Produce the payload bytes for a read-class operation (FC01-04), or
    /// the value bytes of a write request a client is about to send.
    fn on_read(&self, request: &Pdu) -> ModbusResult<Vec<u8>>;

    /// Apply the value bytes of a write-class operation (FC05/06/15/16), or
    /// the payload of a read reply a client just received.
    fn on_write(&self, request: &Pdu, values: &[u8]) -> ModbusResult<()>;

    /// Informational callback when a client receives an exception reply.
    fn on_error(&self, request: &Pdu, exception: &Pdu) {
        let _ = (request, exception);
    }
}

/// Callback reading a range of bits: `(address, quantity) -> values`.
pub type ReadBitsFn = Box<dyn Fn(u16, u16) -> ModbusResult<Vec<bool>> + Send + Sync>;
/// Callback writing a range of bits: `(address, values)`.
pub type WriteBitsFn = Box<dyn Fn(u16, Vec<bool>) -> ModbusResult<()> + Send + Sync>;
/// Callback reading a range of registers: `(address, quantity) -> values`.
pub type ReadRegistersFn = Box<dyn Fn(u16, u16) -> ModbusResult<Vec<u16>> + Send + Sync>;
/// Callback writing a range of registers: `(address, values)`.
pub type WriteRegistersFn = Box<dyn Fn(u16, Vec<u16>) -> ModbusResult<()> + Send + Sync>;
/// Callback observing exception replies: `(request, exception_reply)`.
pub type OnErrorFn = Box<dyn Fn(&Pdu, &Pdu) + Send + Sync>;

/// [`ProtocolHandler`] assembled from optional callbacks per register class.
///
/// Function codes whose callback is unset answer illegal-function. Packing
/// and unpacking between wire bytes and typed values, including the
/// 0xFF00/0x0000 single-coil convention, happens here.
#[derive(Default)]
pub struct SimpleHandler {
    /// Serves FC01 reads and sources FC05/FC15 write payloads.
    pub read_coils: Option<ReadBitsFn>,
    /// Applies FC05/FC15 writes (and FC01 reply values on a client).
    pub write_coils: Option<WriteBitsFn>,
    /// Serves FC02 reads.
    pub read_discrete_inputs: Option<ReadBitsFn>,
    /// Applies FC02 reply values on a client.
    pub write_discrete_inputs: Option<WriteBitsFn>,
    /// Serves FC03 reads and sources FC06/FC16 write payloads.
    pub read_holding_registers: Option<ReadRegistersFn>,
    /// Applies FC06/FC16 writes (and FC03 reply values on a client).
    pub write_holding_registers: Option<WriteRegistersFn>,
    /// Serves FC04 reads.
    pub read_input_registers: Option<ReadRegistersFn>,
    /// Applies FC04 reply values on a client.
    pub write_input_registers: Option<WriteRegistersFn>,
    /// Exception reply observer.
    pub on_error: Option<OnErrorFn>,
}

fn unsupported() -> ModbusError {
    ModbusError::Exception(ExceptionCode::IllegalFunction)
}

fn single_coil_value(values: &[u8]) -> ModbusResult<bool> {
    match values {
        [0xFF, 0x00] => Ok(true),
        [0x00, 0x00] => Ok(false),
        _ => Err(ModbusError::invalid_data(format!(
            "single coil value {values:02X?} is neither 0xFF00 nor 0x0000"
        ))),
    }
}

impl ProtocolHandler for SimpleHandler {
    fn on_read(&self, request: &Pdu) -> ModbusResult<Vec<u8>> {
        let fc = request.function()?;
        let address = request.address()?;
        let quantity = request.quantity()?;
        match fc {
            FunctionCode::ReadCoils
            | FunctionCode::WriteSingleCoil
            | FunctionCode::WriteMultipleCoils => {
                let read = self.read_coils.as_ref().ok_or_else(unsupported)?;
                let bits = read(address, quantity)?;
                if bits.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "coil callback returned {} values for quantity {}",
                        bits.len(),
                        quantity
                    )));
                }
                if fc == FunctionCode::WriteSingleCoil {
                    Ok(if bits[0] {
                        vec![0xFF, 0x00]
                    } else {
                        vec![0x00, 0x00]
                    })
                } else {
                    Ok(bools_to_bytes(&bits))
                }
            }
            FunctionCode::ReadDiscreteInputs => {
                let read = self.read_discrete_inputs.as_ref().ok_or_else(unsupported)?;
                let bits = read(address, quantity)?;
                if bits.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "discrete input callback returned {} values for quantity {}",
                        bits.len(),
                        quantity
                    )));
                }
                Ok(bools_to_bytes(&bits))
            }
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleRegisters => {
                let read = self
                    .read_holding_registers
                    .as_ref()
                    .ok_or_else(unsupported)?;
                let registers = read(address, quantity)?;
                if registers.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "register callback returned {} values for quantity {}",
                        registers.len(),
                        quantity
                    )));
                }
                Ok(registers_to_bytes(&registers))
            }
            FunctionCode::ReadInputRegisters => {
                let read = self.read_input_registers.as_ref().ok_or_else(unsupported)?;
                let registers = read(address, quantity)?;
                if registers.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "input register callback returned {} values for quantity {}",
                        registers.len(),
                        quantity
                    )));
                }
                Ok(registers_to_bytes(&registers))
            }
        }
    }

    fn on_write(&self, request: &Pdu, values: &[u8]) -> ModbusResult<()> {
        let fc = request.function()?;
        let address = request.address()?;
        let quantity = request.quantity()?;
        match fc {
            FunctionCode::ReadCoils
            | FunctionCode::WriteSingleCoil
            | FunctionCode::WriteMultipleCoils => {
                let write = self.write_coils.as_ref().ok_or_else(unsupported)?;
                let bits = if fc == FunctionCode::WriteSingleCoil {
                    vec![single_coil_value(values)?]
                } else {
                    bytes_to_bools(values, quantity)?
                };
                write(address, bits)
            }
            FunctionCode::ReadDiscreteInputs => {
                let write = self
                    .write_discrete_inputs
                    .as_ref()
                    .ok_or_else(unsupported)?;
                write(address, bytes_to_bools(values, quantity)?)
            }
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::WriteSingleRegister
            | FunctionCode::WriteMultipleRegisters => {
                let write = self
                    .write_holding_registers
                    .as_ref()
                    .ok_or_else(unsupported)?;
                let registers = bytes_to_registers(values)?;
                if registers.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "{} registers do not match quantity {}",
                        registers.len(),
                        quantity
                    )));
                }
                write(address, registers)
            }
            FunctionCode::ReadInputRegisters => {
                let write = self
                    .write_input_registers
                    .as_ref()
                    .ok_or_else(unsupported)?;
                let registers = bytes_to_registers(values)?;
                if registers.len() != usize::from(quantity) {
                    return Err(ModbusError::invalid_data(format!(
                        "{} registers do not match quantity {}",
                        registers.len(),
                        quantity
                    )));
                }
                write(address, registers)
            }
        }
    }

    fn on_error(&self, request: &Pdu, exception: &Pdu) {
        if let Some(callback) = &self.on_error {
            callback(request, exception);
        }
    }
}
