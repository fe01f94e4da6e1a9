//! # Relay Modbus - RTU Protocol Engine with Hot-Standby Failover
//!
//! A Modbus RTU implementation in pure Rust for industrial automation links:
//! framing, CRC, and packet reassembly over timing-delimited serial byte
//! streams, client and server state machines for the shared half-duplex
//! medium, and a failover supervisor that lets two identical peers run in
//! hot-standby over one bus and transparently take over for each other.
//!
//! ## Features
//!
//! - **Async throughout**: serve loops and timing delays run on Tokio
//! - **One handler contract**: the same capability record backs servers,
//!   clients, and hot-standby mirrors
//! - **Timing-aware framing**: length prediction plus inter-frame gap
//!   cutoff survives transports that hide exact silence timing
//! - **Hot-standby failover**: per-peer activation state machine gates the
//!   bus; no coordination channel beyond the bus itself
//! - **Built-in monitoring**: eight monotonic per-transport counters
//!
//! ## Supported Function Codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x02 | Read Discrete Inputs |
//! | 0x03 | Read Holding Registers |
//! | 0x04 | Read Input Registers |
//! | 0x05 | Write Single Coil |
//! | 0x06 | Write Single Register |
//! | 0x0F | Write Multiple Coils |
//! | 0x10 | Write Multiple Registers |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relay_modbus::{FunctionCode, ModbusResult, RtuClient, Serial, SimpleHandler};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     // the host opens the port; the engine only needs the byte stream
//!     let port = Arc::new(Serial::open("/dev/ttyUSB0", 19200)?);
//!     let client = Arc::new(RtuClient::new(port, 0x11));
//!
//!     let handler = SimpleHandler {
//!         write_holding_registers: Some(Box::new(|address, values| {
//!             println!("registers @{address}: {values:?}");
//!             Ok(())
//!         })),
//!         ..Default::default()
//!     };
//!
//!     let serve = {
//!         let client = client.clone();
//!         tokio::spawn(async move { client.serve(&handler).await })
//!     };
//!
//!     // read 10 holding registers starting at 0
//!     let header = FunctionCode::ReadHoldingRegisters.make_request_header(0, 10)?;
//!     client.do_transaction(header).await?;
//!
//!     client.close().await?;
//!     let _ = serve.await;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on the official specification
pub mod constants;

/// Modbus CRC-16 codec
pub mod crc;

/// Frame sizing configuration (oversize support)
pub mod limits;

/// Function code catalog and per-frame element limits
pub mod function;

/// Encoding and decoding of Modbus payload data
pub mod data;

/// PDU validation, reply construction, and the request splitter
pub mod pdu;

/// RTU frame construction, parsing, and size prediction
pub mod frame;

/// Serial transport abstraction, timing oracle, and statistics
pub mod serial;

/// RTU packet reassembly from timing-delimited byte streams
pub mod reader;

/// Application handler contract
pub mod handler;

/// RTU server (slave) state machine
pub mod server;

/// RTU client (master) state machine
pub mod client;

/// Hot-standby failover connection
pub mod failover;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use relay_modbus::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ExceptionCode, ModbusError, ModbusResult};

// === Core types ===
pub use function::FunctionCode;
pub use limits::SizeLimits;
pub use pdu::{make_pdu_request_headers, make_pdu_request_headers_sized, Pdu};

// === Framing ===
pub use frame::{
    make_rtu, pdu_size_from_header, rtu_bidirectional_size, rtu_size_from_header, RtuFrame,
};

// === Transport ===
pub use reader::{PacketReader, RtuPacketReader};
pub use serial::{bytes_delay, min_delay, packet_cutoff_duration, Serial, SerialContext, Stats};

// === Engines ===
pub use client::{do_transactions, RtuClient, DEFAULT_SERVER_PROCESSING_TIME};
pub use handler::{ProtocolHandler, SimpleHandler};
pub use server::{slave_id_from, RtuServer};

// === Failover ===
pub use failover::{FailoverConn, Role, Side};

// === Payload codecs ===
pub use data::{bools_to_bytes, bytes_to_bools, bytes_to_registers, registers_to_bytes};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_RTU_SIZE, MAX_WRITE_BITS,
    MAX_WRITE_REGISTERS,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
