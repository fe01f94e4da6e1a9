//! Modbus PDU operations
//!
//! A [`Pdu`] is the opaque payload `[function_code | body...]` of one frame.
//! This module owns request validation, address/quantity/value extraction,
//! reply construction, and the request splitter that breaks an oversized
//! logical operation into per-frame request headers.

use tracing::debug;

use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::limits::SizeLimits;

/// Minimum PDU length: function code plus at least one body byte.
pub const MIN_PDU_SIZE: usize = 2;

/// One protocol data unit.
#[derive(Clone, PartialEq, Eq)]
pub struct Pdu {
    data: Vec<u8>,
}

impl std::fmt::Debug for Pdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Pdu(")?;
        for byte in &self.data {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// Payload bytes a quantity of elements occupies on the wire.
pub(crate) fn payload_len(fc: FunctionCode, quantity: u16) -> usize {
    if fc.is_register() {
        usize::from(quantity) * 2
    } else {
        usize::from(quantity).div_ceil(8)
    }
}

impl Pdu {
    /// Create a PDU from received bytes, checking the size window.
    pub fn from_slice(data: &[u8], limits: &SizeLimits) -> ModbusResult<Self> {
        if data.len() < MIN_PDU_SIZE {
            return Err(ModbusError::protocol(format!(
                "PDU too short: {} bytes",
                data.len()
            )));
        }
        if data.len() > limits.max_pdu_size() {
            return Err(ModbusError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                limits.max_pdu_size()
            )));
        }
        Ok(Self {
            data: data.to_vec(),
        })
    }

    /// Wrap already-constructed PDU bytes without checks.
    pub(crate) fn from_vec_unchecked(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Get the raw bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw function code byte, exception bit included.
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// The parsed function code. Fails on exception replies and on codes the
    /// engine does not support.
    pub fn function(&self) -> ModbusResult<FunctionCode> {
        let byte = self
            .function_code()
            .ok_or_else(|| ModbusError::protocol("empty PDU"))?;
        let (exception, code) = FunctionCode::separate_error(byte);
        if exception {
            return Err(ModbusError::invalid_function(byte));
        }
        FunctionCode::from_u8(code).ok_or(ModbusError::InvalidFunction { code })
    }

    /// Check if this is an exception reply.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().map(|fc| fc & 0x80 != 0).unwrap_or(false)
    }

    /// Exception code of an exception reply.
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        if self.is_exception() && self.data.len() > 1 {
            ExceptionCode::from_u8(self.data[1])
        } else {
            None
        }
    }

    /// Starting address of a request (bytes 1-2, big-endian).
    pub fn address(&self) -> ModbusResult<u16> {
        if self.data.len() < 3 {
            return Err(ModbusError::protocol("PDU has no address field"));
        }
        Ok(u16::from_be_bytes([self.data[1], self.data[2]]))
    }

    /// Element quantity of a request. Single-element writes report 1.
    pub fn quantity(&self) -> ModbusResult<u16> {
        if self.function()?.is_single() {
            return Ok(1);
        }
        if self.data.len() < 5 {
            return Err(ModbusError::protocol("PDU has no quantity field"));
        }
        Ok(u16::from_be_bytes([self.data[3], self.data[4]]))
    }

    /// Validate this PDU as a request: length per function, quantity within
    /// the limit derived from the configured frame ceiling, byte-count
    /// consistency, and the 0xFF00/0x0000 convention for single-coil writes.
    ///
    /// The error carries the exception code a server should answer with.
    pub fn validate_request(&self, limits: &SizeLimits) -> ModbusResult<()> {
        if self.data.len() < MIN_PDU_SIZE || self.data.len() > limits.max_pdu_size() {
            return Err(ModbusError::invalid_data(format!(
                "request length {} outside the accepted window",
                self.data.len()
            )));
        }
        let fc = self.function()?;
        if fc.is_single() {
            if self.data.len() != 5 {
                return Err(ModbusError::invalid_data(format!(
                    "single write request must be 5 bytes, got {}",
                    self.data.len()
                )));
            }
            if fc == FunctionCode::WriteSingleCoil {
                let value = u16::from_be_bytes([self.data[3], self.data[4]]);
                if value != 0xFF00 && value != 0x0000 {
                    return Err(ModbusError::invalid_data(format!(
                        "single coil value 0x{value:04X} is neither 0xFF00 nor 0x0000"
                    )));
                }
            }
            return Ok(());
        }

        if self.data.len() < 5 {
            return Err(ModbusError::invalid_data("request header truncated"));
        }
        let quantity = u16::from_be_bytes([self.data[3], self.data[4]]);
        let max_quantity = fc.max_per_packet_sized(limits.max_pdu_size());
        if quantity == 0 || quantity > max_quantity {
            return Err(ModbusError::invalid_data(format!(
                "quantity {} out of range 1..={} for {}",
                quantity,
                max_quantity,
                fc.description()
            )));
        }

        if fc.is_read() {
            if self.data.len() != 5 {
                return Err(ModbusError::invalid_data(format!(
                    "read request must be 5 bytes, got {}",
                    self.data.len()
                )));
            }
            return Ok(());
        }

        // multi-element write: byte count + payload
        let expected = payload_len(fc, quantity);
        if self.data.len() != 6 + expected {
            return Err(ModbusError::invalid_data(format!(
                "write request length {} does not match quantity {}",
                self.data.len(),
                quantity
            )));
        }
        // in oversize mode the 8-bit count wraps past 255 and is not
        // authoritative; the length check against the quantity already holds
        if !limits.oversize_support {
            let byte_count = self.data[5];
            if expected > 255 || byte_count != expected as u8 {
                return Err(ModbusError::invalid_data(format!(
                    "byte count {byte_count} inconsistent with quantity {quantity}"
                )));
            }
        }
        Ok(())
    }

    /// Validate this PDU as a 5-byte request header describing a logical
    /// operation (the shape produced by
    /// [`FunctionCode::make_request_header`]), before any write payload is
    /// attached.
    pub fn validate_request_header(&self, limits: &SizeLimits) -> ModbusResult<()> {
        let fc = self.function()?;
        if self.data.len() != 5 {
            return Err(ModbusError::invalid_data(format!(
                "request header must be 5 bytes, got {}",
                self.data.len()
            )));
        }
        let quantity = u16::from_be_bytes([self.data[3], self.data[4]]);
        let max_quantity = fc.max_per_packet_sized(limits.max_pdu_size());
        if quantity == 0 || quantity > max_quantity {
            return Err(ModbusError::invalid_data(format!(
                "quantity {} out of range 1..={} for {}",
                quantity,
                max_quantity,
                fc.description()
            )));
        }
        Ok(())
    }

    /// Extract the value bytes of a write request.
    ///
    /// For single writes this is the 2-byte data field; for multi writes the
    /// payload after the byte count. Call [`Pdu::validate_request`] first for
    /// range checks; this only guards structure.
    pub fn request_values(&self) -> ModbusResult<Vec<u8>> {
        let fc = self.function()?;
        if !fc.is_write() {
            return Err(ModbusError::protocol(format!(
                "{} carries no request values",
                fc.description()
            )));
        }
        if fc.is_single() {
            if self.data.len() != 5 {
                return Err(ModbusError::protocol("single write request truncated"));
            }
            return Ok(self.data[3..5].to_vec());
        }
        if self.data.len() < 7 {
            return Err(ModbusError::protocol("multi write request truncated"));
        }
        Ok(self.data[6..].to_vec())
    }

    /// Extract the payload of a read reply (after the byte count).
    ///
    /// The byte count is checked modulo 256 so oversize replies pass.
    pub fn reply_values(&self) -> ModbusResult<Vec<u8>> {
        if self.data.len() < 2 {
            return Err(ModbusError::protocol("reply PDU truncated"));
        }
        let payload = &self.data[2..];
        if (payload.len() & 0xFF) as u8 != self.data[1] {
            return Err(ModbusError::protocol(format!(
                "reply byte count {} does not match payload length {}",
                self.data[1],
                payload.len()
            )));
        }
        Ok(payload.to_vec())
    }

    /// Materialize a full write request from this request header and the
    /// value bytes supplied by the application.
    pub fn with_request_values(&self, values: &[u8]) -> ModbusResult<Pdu> {
        let fc = self.function()?;
        if !fc.is_write() {
            return Err(ModbusError::protocol(format!(
                "{} requests carry no values",
                fc.description()
            )));
        }
        let quantity = self.quantity()?;
        if fc.is_single() {
            if values.len() != 2 {
                return Err(ModbusError::invalid_data(format!(
                    "single write takes a 2-byte value, got {}",
                    values.len()
                )));
            }
            let mut data = self.data[..3].to_vec();
            data.extend_from_slice(values);
            return Ok(Pdu::from_vec_unchecked(data));
        }
        let expected = payload_len(fc, quantity);
        if values.len() != expected {
            return Err(ModbusError::invalid_data(format!(
                "write payload of {} bytes does not match quantity {}",
                values.len(),
                quantity
            )));
        }
        let mut data = Vec::with_capacity(6 + values.len());
        data.extend_from_slice(&self.data[..5]);
        data.push((values.len() & 0xFF) as u8);
        data.extend_from_slice(values);
        Ok(Pdu::from_vec_unchecked(data))
    }

    /// Build the reply to a read request from the handler's payload bytes.
    pub fn make_read_reply(&self, values: &[u8], limits: &SizeLimits) -> ModbusResult<Pdu> {
        let fc = self.function()?;
        if !fc.is_read() {
            return Err(ModbusError::protocol(format!(
                "{} replies carry no payload",
                fc.description()
            )));
        }
        let expected = payload_len(fc, self.quantity()?);
        if values.len() != expected {
            return Err(ModbusError::invalid_data(format!(
                "handler returned {} bytes, request wants {}",
                values.len(),
                expected
            )));
        }
        if 2 + values.len() > limits.max_pdu_size() {
            return Err(ModbusError::protocol("reply exceeds the frame ceiling"));
        }
        let mut data = Vec::with_capacity(2 + values.len());
        data.push(fc.to_u8());
        data.push((values.len() & 0xFF) as u8);
        data.extend_from_slice(values);
        debug!(
            "read reply built: FC={:02X} ({}), payload={}",
            fc.to_u8(),
            fc.description(),
            values.len()
        );
        Ok(Pdu::from_vec_unchecked(data))
    }

    /// Build the reply to a write request: echo of `fc | address | quantity`.
    pub fn make_write_reply(&self) -> ModbusResult<Pdu> {
        if self.data.len() < 5 {
            return Err(ModbusError::protocol("write request too short to echo"));
        }
        Ok(Pdu::from_vec_unchecked(self.data[..5].to_vec()))
    }

    /// Build an exception reply to this request.
    pub fn exception_reply(&self, code: ExceptionCode) -> Pdu {
        let fc = self.function_code().unwrap_or(0) | 0x80;
        Pdu::from_vec_unchecked(vec![fc, code.to_u8()])
    }
}

/// Split a logical operation into request headers using the standard
/// per-function element limit.
pub fn make_pdu_request_headers(
    fc: FunctionCode,
    address: u16,
    quantity: u16,
) -> ModbusResult<Vec<Pdu>> {
    make_pdu_request_headers_sized(fc, address, quantity, fc.max_per_packet())
}

/// Split a logical operation `(fc, address, quantity)` into an ordered list
/// of request headers, each covering at most `limit` elements.
///
/// The produced ranges tile `[address, address + quantity)` exactly. When a
/// bit-addressed operation has to be split, chunk sizes are rounded down to
/// a multiple of 8 so every follow-up request starts on a byte boundary.
pub fn make_pdu_request_headers_sized(
    fc: FunctionCode,
    address: u16,
    quantity: u16,
    limit: u16,
) -> ModbusResult<Vec<Pdu>> {
    if quantity == 0 {
        return Err(ModbusError::invalid_data("quantity must be positive"));
    }
    if limit == 0 {
        return Err(ModbusError::invalid_data("per-request limit must be positive"));
    }
    if u32::from(address) + u32::from(quantity) > 0x1_0000 {
        return Err(ModbusError::invalid_data(format!(
            "address {address} + quantity {quantity} overflows the register space"
        )));
    }
    let mut chunk = limit.min(fc.max_per_packet());
    if !fc.is_register() && quantity > chunk && chunk >= 8 {
        chunk -= chunk % 8;
    }
    let mut headers = Vec::with_capacity(usize::from(quantity.div_ceil(chunk)));
    let mut addr = address;
    let mut remaining = quantity;
    while remaining > 0 {
        let take = remaining.min(chunk);
        headers.push(fc.make_request_header(addr, take)?);
        addr = addr.wrapping_add(take);
        remaining -= take;
    }
    debug!(
        "split {} x{} @ {} into {} requests",
        fc.description(),
        quantity,
        address,
        headers.len()
    );
    Ok(headers)
}
