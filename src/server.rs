//! RTU server (slave) state machine
//!
//! A half-duplex responder: read one request, drive the handler, transmit
//! the reply after the mandatory inter-frame silence, repeat. Framing
//! problems are counted and dropped; protocol and handler failures answer
//! with exception replies; I/O errors terminate the loop.

use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::constants::{BROADCAST_ID, MAX_SLAVE_ID};
use crate::error::{ModbusError, ModbusResult};
use crate::failover::FailoverConn;
use crate::frame::{make_rtu, RtuFrame};
use crate::handler::ProtocolHandler;
use crate::limits::SizeLimits;
use crate::pdu::Pdu;
use crate::reader::{PacketReader, RtuPacketReader};
use crate::serial::{SerialContext, Stats};

/// Validate a configuration value as a slave id (0 is broadcast-only and
/// not assignable to a server).
pub fn slave_id_from(n: u64) -> ModbusResult<u8> {
    if n == 0 || n > u64::from(MAX_SLAVE_ID) {
        return Err(ModbusError::configuration(format!(
            "slave id {n} outside 1..=247"
        )));
    }
    Ok(n as u8)
}

/// Server-side RTU state machine over a [`SerialContext`].
pub struct RtuServer<C, R> {
    com: C,
    reader: R,
    slave_id: u8,
    limits: SizeLimits,
}

impl<C: SerialContext + Clone> RtuServer<C, RtuPacketReader<C>> {
    /// Create a server listening on `slave_id` with standard frame sizing.
    pub fn new(com: C, slave_id: u8) -> Self {
        Self::new_with_limits(com, slave_id, SizeLimits::new())
    }

    /// Create a server with explicit frame sizing.
    pub fn new_with_limits(com: C, slave_id: u8, limits: SizeLimits) -> Self {
        Self {
            reader: RtuPacketReader::server(com.clone(), limits),
            com,
            slave_id,
            limits,
        }
    }
}

impl<S: SerialContext> RtuServer<Arc<FailoverConn<S>>, Arc<FailoverConn<S>>> {
    /// Create a server over a failover connection; the connection doubles as
    /// the packet source so it can observe and gate the exchange.
    pub fn with_conn(conn: Arc<FailoverConn<S>>, slave_id: u8) -> Self {
        let limits = conn.limits();
        Self {
            com: conn.clone(),
            reader: conn,
            slave_id,
            limits,
        }
    }
}

impl<C: SerialContext, R: PacketReader> RtuServer<C, R> {
    /// The slave id this server answers to.
    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Statistics of the underlying transport.
    pub fn stats(&self) -> &Stats {
        self.com.stats()
    }

    /// Close the underlying transport, ending a running serve loop.
    pub async fn close(&self) -> io::Result<()> {
        self.com.close().await
    }

    /// Run the responder until the transport fails or closes.
    ///
    /// Each accepted frame is validated, dispatched to `handler`, and
    /// answered; broadcasts (slave 0) are processed silently. The returned
    /// error is the terminating I/O condition.
    pub async fn serve<H: ProtocolHandler>(&self, handler: &H) -> ModbusResult<()> {
        let delay = self.com.min_delay();
        let mut buf = vec![0u8; self.limits.max_rtu_size()];

        loop {
            let n = self.reader.read_packet(&mut buf).await?;
            let frame = RtuFrame::new(&buf[..n]);
            let pdu = match frame.pdu(&self.limits) {
                Ok(pdu) => pdu,
                Err(ModbusError::Crc) => {
                    Stats::bump(&self.com.stats().crc_errors);
                    debug!("server dropped frame with bad CRC");
                    continue;
                }
                Err(e) => {
                    Stats::bump(&self.com.stats().other_errors);
                    debug!("server dropped unusable frame: {e}");
                    continue;
                }
            };

            let slave = frame.slave_id();
            if slave > MAX_SLAVE_ID {
                Stats::bump(&self.com.stats().other_errors);
                debug!("server dropped frame with out-of-range id {slave}");
                continue;
            }
            if slave != BROADCAST_ID && slave != self.slave_id {
                Stats::bump(&self.com.stats().id_drops);
                debug!("server dropped frame for id {slave}");
                continue;
            }

            if let Err(e) = pdu.validate_request(&self.limits) {
                Stats::bump(&self.com.stats().other_errors);
                debug!("server rejecting invalid request: {e}");
                self.write_reply(&pdu.exception_reply(e.to_exception_code()), slave, delay)
                    .await?;
                continue;
            }

            // validate_request guarantees a supported function code
            let fc = pdu.function()?;
            if fc.is_read() {
                match handler.on_read(&pdu) {
                    Ok(values) => match pdu.make_read_reply(&values, &self.limits) {
                        Ok(reply) => self.write_reply(&reply, slave, delay).await?,
                        Err(e) => {
                            Stats::bump(&self.com.stats().other_errors);
                            debug!("server read reply construction failed: {e}");
                            self.write_reply(
                                &pdu.exception_reply(e.to_exception_code()),
                                slave,
                                delay,
                            )
                            .await?;
                        }
                    },
                    Err(e) => {
                        Stats::bump(&self.com.stats().other_errors);
                        debug!("server read handler failed: {e}");
                        self.write_reply(&pdu.exception_reply(e.to_exception_code()), slave, delay)
                            .await?;
                    }
                }
            } else {
                let values = match pdu.request_values() {
                    Ok(values) => values,
                    Err(e) => {
                        Stats::bump(&self.com.stats().other_errors);
                        debug!("server value extraction failed: {e}");
                        self.write_reply(&pdu.exception_reply(e.to_exception_code()), slave, delay)
                            .await?;
                        continue;
                    }
                };
                match handler.on_write(&pdu, &values) {
                    Ok(()) => {
                        let reply = pdu.make_write_reply()?;
                        self.write_reply(&reply, slave, delay).await?;
                    }
                    Err(e) => {
                        Stats::bump(&self.com.stats().other_errors);
                        debug!("server write handler failed: {e}");
                        self.write_reply(&pdu.exception_reply(e.to_exception_code()), slave, delay)
                            .await?;
                    }
                }
            }
        }
    }

    async fn write_reply(
        &self,
        pdu: &Pdu,
        slave: u8,
        delay: std::time::Duration,
    ) -> ModbusResult<()> {
        if slave == BROADCAST_ID {
            return Ok(());
        }
        tokio::time::sleep(delay).await;
        self.com.write(&make_rtu(slave, pdu)).await?;
        Ok(())
    }
}
