//! RTU frame (ADU) construction, parsing, and size prediction
//!
//! An ADU is `[slave_id | PDU | crc_lo | crc_hi]`. RTU framing has no length
//! field, so the packet reader predicts the expected frame length from the
//! first few header bytes using the function-code catalog; the predictors
//! here implement that for the server side, the client side, and the
//! bidirectional (bus-observer) case.

use crate::constants::{RTU_OVERHEAD, SMALLEST_RTU_SIZE};
use crate::crc;
use crate::error::{ModbusError, ModbusResult};
use crate::function::FunctionCode;
use crate::limits::SizeLimits;
use crate::pdu::{payload_len, Pdu};

/// Build the on-wire ADU for a PDU, appending address and CRC.
pub fn make_rtu(slave_id: u8, pdu: &Pdu) -> Vec<u8> {
    let mut buf = Vec::with_capacity(pdu.len() + RTU_OVERHEAD);
    buf.push(slave_id);
    buf.extend_from_slice(pdu.as_slice());
    crc::append(&mut buf);
    buf
}

/// Borrowed view of one received ADU.
#[derive(Debug, Clone, Copy)]
pub struct RtuFrame<'a> {
    data: &'a [u8],
}

impl<'a> RtuFrame<'a> {
    /// Wrap raw received bytes. Nothing is validated until [`RtuFrame::pdu`].
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// The raw frame bytes.
    #[inline]
    pub fn as_slice(&self) -> &'a [u8] {
        self.data
    }

    /// The address byte. Zero for frames too short to carry one.
    #[inline]
    pub fn slave_id(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    /// Extract the CRC-validated PDU.
    ///
    /// Frames outside the size window fail with a protocol error; CRC
    /// mismatches fail with [`ModbusError::Crc`] so callers can count them
    /// separately.
    pub fn pdu(&self, limits: &SizeLimits) -> ModbusResult<Pdu> {
        if self.data.len() < SMALLEST_RTU_SIZE {
            return Err(ModbusError::protocol(format!(
                "frame too short: {} bytes",
                self.data.len()
            )));
        }
        if self.data.len() > limits.max_rtu_size() {
            return Err(ModbusError::protocol(format!(
                "frame of {} bytes exceeds the {} byte ceiling",
                self.data.len(),
                limits.max_rtu_size()
            )));
        }
        if !crc::validate(self.data) {
            return Err(ModbusError::Crc);
        }
        Pdu::from_slice(&self.data[1..self.data.len() - 2], limits)
    }
}

/// Expected size of a PDU given its first bytes.
///
/// Returns the shortest possibility when the header does not pin the length
/// down yet. `is_client` selects the reading direction: a client reads
/// replies, a server reads requests.
pub fn pdu_size_from_header(header: &[u8], is_client: bool, limits: &SizeLimits) -> usize {
    if header.len() < 2 {
        return 2;
    }
    let (exception, code) = FunctionCode::separate_error(header[0]);
    let fc = match FunctionCode::from_u8(code) {
        Some(fc) if !exception => fc,
        // exception replies and unknown codes: fc + one byte
        _ => return 2,
    };
    if is_client == fc.is_write() {
        // no data payload: read requests and write reply echoes
        return 5;
    }
    if is_client {
        // data reply: fc, byte count, data
        return 2 + usize::from(header[1]);
    }
    if fc.is_single() {
        // fc, address, one value
        return 5;
    }
    // multi-element write request: fc, address, quantity, byte count, data
    if header.len() < 6 {
        return 6;
    }
    if limits.oversize_support {
        // derive from the 16-bit quantity; the 8-bit count wraps past 255
        let quantity = u16::from_be_bytes([header[3], header[4]]);
        return 6 + payload_len(fc, quantity);
    }
    6 + usize::from(header[5])
}

/// Expected size of an RTU frame given its first bytes.
pub fn rtu_size_from_header(header: &[u8], is_client: bool, limits: &SizeLimits) -> usize {
    if header.len() < 3 {
        return 3;
    }
    pdu_size_from_header(&header[1..], is_client, limits) + RTU_OVERHEAD
}

/// Expected RTU frame size when frames from either direction may arrive.
///
/// Computes both directional predictions; when they disagree, the shorter
/// one wins only if its CRC validates, otherwise the longer (CRC-checked
/// when enough bytes are present).
pub fn rtu_bidirectional_size(header: &[u8], limits: &SizeLimits) -> usize {
    let server_view = rtu_size_from_header(header, false, limits);
    let client_view = rtu_size_from_header(header, true, limits);
    if server_view == client_view {
        return server_view;
    }
    let (short, long) = if server_view > client_view {
        (client_view, server_view)
    } else {
        (server_view, client_view)
    };
    if short > header.len() {
        return short;
    }
    if long <= header.len() && crc::validate(&header[..long]) {
        return long;
    }
    if crc::validate(&header[..short]) {
        return short;
    }
    long
}

#[cfg(test)]
mod tests {
    use super::*;

    // request/reply ADU pairs from simplymodbus.ca, slave 0x11
    const EXCHANGES: &[(&[u8], &[u8])] = &[
        (
            &[0x11, 0x01, 0x00, 0x13, 0x00, 0x25, 0x0E, 0x84],
            &[0x11, 0x01, 0x05, 0xCD, 0x6B, 0xB2, 0x0E, 0x1B, 0x45, 0xE6],
        ),
        (
            &[0x11, 0x02, 0x00, 0xC4, 0x00, 0x16, 0xBA, 0xA9],
            &[0x11, 0x02, 0x03, 0xAC, 0xDB, 0x35, 0x20, 0x18],
        ),
        (
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87],
            &[0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD],
        ),
        (
            &[0x11, 0x04, 0x00, 0x08, 0x00, 0x01, 0xB2, 0x98],
            &[0x11, 0x04, 0x02, 0x00, 0x0A, 0xF8, 0xF4],
        ),
        (
            &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00, 0x4E, 0x8B],
            &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00, 0x4E, 0x8B],
        ),
        (
            &[0x11, 0x06, 0x00, 0x01, 0x00, 0x03, 0x9A, 0x9B],
            &[0x11, 0x06, 0x00, 0x01, 0x00, 0x03, 0x9A, 0x9B],
        ),
        (
            &[
                0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01, 0xBF, 0x0B,
            ],
            &[0x11, 0x0F, 0x00, 0x13, 0x00, 0x0A, 0x26, 0x99],
        ),
        (
            &[
                0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02, 0xC6, 0xF0,
            ],
            &[0x11, 0x10, 0x00, 0x01, 0x00, 0x02, 0x12, 0x98],
        ),
    ];

    #[test]
    fn test_make_rtu_reproduces_reference_frames() {
        let limits = SizeLimits::new();
        for (request, _) in EXCHANGES {
            let pdu = Pdu::from_slice(&request[1..request.len() - 2], &limits).unwrap();
            assert_eq!(&make_rtu(0x11, &pdu)[..], *request);
        }
    }

    #[test]
    fn test_frame_pdu_roundtrip() {
        let limits = SizeLimits::new();
        let frame = RtuFrame::new(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]);
        assert_eq!(frame.slave_id(), 0x11);
        let pdu = frame.pdu(&limits).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_frame_pdu_detects_crc_error() {
        let limits = SizeLimits::new();
        let frame = RtuFrame::new(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x88]);
        assert!(matches!(frame.pdu(&limits), Err(ModbusError::Crc)));
    }

    #[test]
    fn test_frame_pdu_rejects_short_and_oversized() {
        let limits = SizeLimits::new();
        assert!(RtuFrame::new(&[0x11, 0x03]).pdu(&limits).is_err());
        let oversized = vec![0u8; 257];
        assert!(RtuFrame::new(&oversized).pdu(&limits).is_err());
    }

    #[test]
    fn test_directional_size_prediction_matches_references() {
        let limits = SizeLimits::new();
        for (request, reply) in EXCHANGES {
            assert_eq!(
                rtu_size_from_header(request, false, &limits),
                request.len(),
                "server-side prediction for {request:02X?}"
            );
            assert_eq!(
                rtu_size_from_header(reply, true, &limits),
                reply.len(),
                "client-side prediction for {reply:02X?}"
            );
        }
    }

    #[test]
    fn test_bidirectional_size_resolves_with_crc() {
        let limits = SizeLimits::new();
        for (request, reply) in EXCHANGES {
            assert_eq!(rtu_bidirectional_size(request, &limits), request.len());
            assert_eq!(rtu_bidirectional_size(reply, &limits), reply.len());
        }
    }

    #[test]
    fn test_prediction_grows_with_partial_header() {
        let limits = SizeLimits::new();
        // not enough bytes to see the function code
        assert_eq!(rtu_size_from_header(&[0x11], false, &limits), 3);
        // multi-write request needs the byte count at offset 6
        assert_eq!(
            rtu_size_from_header(&[0x11, 0x10, 0x00, 0x01, 0x00], false, &limits),
            9
        );
    }

    #[test]
    fn test_exception_reply_prediction() {
        let limits = SizeLimits::new();
        // exception reply: fc | 0x80, code, CRC
        assert_eq!(
            rtu_size_from_header(&[0x11, 0x83, 0x02, 0xC1, 0x31], true, &limits),
            5
        );
    }

    #[test]
    fn test_oversize_prediction_uses_quantity() {
        let limits = SizeLimits::new().with_oversize(512);
        // 200 registers: quantity field says 400 payload bytes
        let header = [0x11, 0x10, 0x00, 0x00, 0x00, 0xC8, 0x90];
        assert_eq!(rtu_size_from_header(&header, false, &limits), 3 + 6 + 400);

        // standard mode falls back to the wrapped byte count
        let standard = SizeLimits::new();
        assert_eq!(rtu_size_from_header(&header, false, &standard), 3 + 6 + 0x90);
    }
}
