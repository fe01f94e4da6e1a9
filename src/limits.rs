//! # Frame Sizing Configuration
//!
//! Standard Modbus RTU caps the ADU at 256 bytes, which limits a single
//! write to 123 registers. Some deployed devices stretch the framing to move
//! larger blocks in one exchange; [`SizeLimits`] opts a server, client, or
//! packet reader into that mode with an explicit ceiling.
//!
//! In oversize mode the payload length of a multi-write request is derived
//! from the 16-bit quantity field rather than the 8-bit byte count (which
//! wraps past 255 and is only checked modulo 256). The configured ceiling
//! bounds read buffers and frame acceptance.
//!
//! These used to be process-wide toggles in older stacks; here they are plain
//! values handed to constructors so concurrent engines can disagree.

use crate::constants::{MAX_RTU_SIZE, RTU_OVERHEAD};

/// Frame sizing configuration for one engine instance.
///
/// # Example
///
/// ```rust
/// use relay_modbus::SizeLimits;
///
/// let limits = SizeLimits::new().with_oversize(512);
/// assert!(limits.oversize_support);
/// assert_eq!(limits.max_rtu_size(), 512);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    /// Accept and produce frames longer than the standard 256 bytes.
    pub oversize_support: bool,
    /// Ceiling on the ADU length when oversize is enabled.
    pub oversize_max_rtu: usize,
}

impl SizeLimits {
    /// Standard Modbus sizing (256-byte ADU, no oversize frames).
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable oversize frames up to `max_rtu` bytes per ADU.
    ///
    /// Ceilings below the standard 256 bytes are raised to 256.
    pub fn with_oversize(mut self, max_rtu: usize) -> Self {
        self.oversize_support = true;
        self.oversize_max_rtu = max_rtu.max(MAX_RTU_SIZE);
        self
    }

    /// Largest acceptable ADU under this configuration.
    #[inline]
    pub fn max_rtu_size(&self) -> usize {
        if self.oversize_support {
            self.oversize_max_rtu
        } else {
            MAX_RTU_SIZE
        }
    }

    /// Largest acceptable PDU under this configuration.
    #[inline]
    pub fn max_pdu_size(&self) -> usize {
        self.max_rtu_size() - RTU_OVERHEAD
    }
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            oversize_support: false,
            oversize_max_rtu: MAX_RTU_SIZE,
        }
    }
}
