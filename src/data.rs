//! Encoding and decoding of Modbus payload data
//!
//! Wire conventions: registers are big-endian 16-bit words; coil and
//! discrete-input vectors are packed LSB-first into bytes, with unused bits
//! in the final byte left at zero.

use crate::error::{ModbusError, ModbusResult};

/// Pack a bit vector into LSB-first bytes.
pub fn bools_to_bytes(values: &[bool]) -> Vec<u8> {
    let mut data = vec![0u8; values.len().div_ceil(8)];
    for (i, &value) in values.iter().enumerate() {
        if value {
            data[i / 8] |= 1 << (i % 8);
        }
    }
    data
}

/// Unpack `quantity` bits from LSB-first packed bytes.
pub fn bytes_to_bools(data: &[u8], quantity: u16) -> ModbusResult<Vec<bool>> {
    let quantity = quantity as usize;
    if data.len() != quantity.div_ceil(8) {
        return Err(ModbusError::invalid_data(format!(
            "{} data bytes cannot hold exactly {} bits",
            data.len(),
            quantity
        )));
    }
    Ok((0..quantity)
        .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

/// Encode registers as big-endian byte pairs.
pub fn registers_to_bytes(values: &[u16]) -> Vec<u8> {
    let mut data = Vec::with_capacity(values.len() * 2);
    for &value in values {
        data.extend_from_slice(&value.to_be_bytes());
    }
    data
}

/// Decode big-endian byte pairs into registers.
pub fn bytes_to_registers(data: &[u8]) -> ModbusResult<Vec<u16>> {
    if data.len() % 2 != 0 {
        return Err(ModbusError::invalid_data(format!(
            "odd register payload length {}",
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 37-coil vector from the simplymodbus.ca FC01 sample
    fn sample_coils() -> Vec<bool> {
        [
            true, false, true, true, false, false, true, true, // 0xCD
            true, true, false, true, false, true, true, false, // 0x6B
            false, true, false, false, true, true, false, true, // 0xB2
            false, true, true, true, false, false, false, false, // 0x0E
            true, true, false, true, true, // 0x1B
        ]
        .to_vec()
    }

    #[test]
    fn test_bools_to_bytes_reference() {
        assert_eq!(
            bools_to_bytes(&sample_coils()),
            vec![0xCD, 0x6B, 0xB2, 0x0E, 0x1B]
        );
    }

    #[test]
    fn test_bytes_to_bools_reference() {
        let bits = bytes_to_bools(&[0xCD, 0x6B, 0xB2, 0x0E, 0x1B], 37).unwrap();
        assert_eq!(bits, sample_coils());
    }

    #[test]
    fn test_bytes_to_bools_length_check() {
        assert!(bytes_to_bools(&[0xCD], 9).is_err());
        assert!(bytes_to_bools(&[0xCD, 0x01], 8).is_err());
    }

    #[test]
    fn test_register_roundtrip() {
        let values = [0xAE41, 0x5652, 0x4340];
        let data = registers_to_bytes(&values);
        assert_eq!(data, vec![0xAE, 0x41, 0x56, 0x52, 0x43, 0x40]);
        assert_eq!(bytes_to_registers(&data).unwrap(), values);
    }

    #[test]
    fn test_bytes_to_registers_rejects_odd_length() {
        assert!(bytes_to_registers(&[0x01, 0x02, 0x03]).is_err());
    }
}
