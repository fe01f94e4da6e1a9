//! RTU client (master) state machine
//!
//! The client is strictly half-duplex: transactions queue through
//! [`RtuClient::do_transaction`] and the serve loop executes them one at a
//! time, matching each against inbound frames until a reply arrives or the
//! timeout fires. Frames the client did not originate are mirrored into the
//! handler so a redundant peer observing the same bus stays in lockstep.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::constants::BROADCAST_ID;
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::failover::FailoverConn;
use crate::frame::{make_rtu, RtuFrame};
use crate::function::FunctionCode;
use crate::handler::ProtocolHandler;
use crate::limits::SizeLimits;
use crate::pdu::{payload_len, Pdu};
use crate::reader::{PacketReader, RtuPacketReader};
use crate::serial::{SerialContext, Stats};

/// Default inbound timeout budget for the remote side.
pub const DEFAULT_SERVER_PROCESSING_TIME: Duration = Duration::from_secs(1);

struct Action {
    header: Pdu,
    done: oneshot::Sender<ModbusResult<()>>,
}

enum FrameVerdict {
    /// The pending transaction finished with this outcome.
    Completed(ModbusResult<()>),
    /// Not ours; keep waiting.
    Ignored,
}

/// Client-side RTU state machine over a [`SerialContext`].
pub struct RtuClient<C, R> {
    com: C,
    reader: std::sync::Mutex<Option<R>>,
    slave_id: u8,
    limits: SizeLimits,
    server_processing_time: AtomicU64,
    actions_tx: mpsc::Sender<Action>,
    actions_rx: tokio::sync::Mutex<mpsc::Receiver<Action>>,
}

impl<C: SerialContext + Clone> RtuClient<C, RtuPacketReader<C>> {
    /// Create a client talking to `slave_id` with standard frame sizing.
    pub fn new(com: C, slave_id: u8) -> Self {
        Self::new_with_limits(com, slave_id, SizeLimits::new())
    }

    /// Create a client with explicit frame sizing.
    pub fn new_with_limits(com: C, slave_id: u8, limits: SizeLimits) -> Self {
        let reader = RtuPacketReader::client(com.clone(), limits);
        Self::assemble(com, reader, slave_id, limits)
    }
}

impl<S: SerialContext> RtuClient<Arc<FailoverConn<S>>, Arc<FailoverConn<S>>> {
    /// Create a client over a failover connection; the connection doubles as
    /// the packet source so it can observe and gate the exchange.
    pub fn with_conn(conn: Arc<FailoverConn<S>>, slave_id: u8) -> Self {
        let limits = conn.limits();
        Self::assemble(conn.clone(), conn, slave_id, limits)
    }
}

impl<C: SerialContext, R: PacketReader> RtuClient<C, R> {
    fn assemble(com: C, reader: R, slave_id: u8, limits: SizeLimits) -> Self {
        let (actions_tx, actions_rx) = mpsc::channel(32);
        Self {
            com,
            reader: std::sync::Mutex::new(Some(reader)),
            slave_id,
            limits,
            server_processing_time: AtomicU64::new(DEFAULT_SERVER_PROCESSING_TIME.as_nanos()
                as u64),
            actions_tx,
            actions_rx: tokio::sync::Mutex::new(actions_rx),
        }
    }

    /// The slave id this client addresses.
    pub fn slave_id(&self) -> u8 {
        self.slave_id
    }

    /// Statistics of the underlying transport.
    pub fn stats(&self) -> &Stats {
        self.com.stats()
    }

    /// Budget granted to the remote side per transaction; the inbound
    /// timeout is the request wire time plus this value.
    pub fn set_server_processing_time(&self, value: Duration) {
        self.server_processing_time
            .store(value.as_nanos() as u64, Ordering::Relaxed);
    }

    fn processing_time(&self) -> Duration {
        Duration::from_nanos(self.server_processing_time.load(Ordering::Relaxed))
    }

    /// Close the underlying transport, ending a running serve loop.
    pub async fn close(&self) -> io::Result<()> {
        self.com.close().await
    }

    /// Execute one logical operation described by a request header.
    ///
    /// Queues the transaction for the serve loop and waits for its outcome;
    /// a second call blocks behind the first (half-duplex contract).
    pub async fn do_transaction(&self, header: Pdu) -> ModbusResult<()> {
        let (done, outcome) = oneshot::channel();
        self.actions_tx
            .send(Action { header, done })
            .await
            .map_err(|_| ModbusError::protocol("client serve loop is gone"))?;
        outcome
            .await
            .map_err(|_| ModbusError::protocol("client serve loop terminated"))?
    }

    /// Run the client until the transport fails or closes.
    ///
    /// Must be running for [`RtuClient::do_transaction`] to make progress.
    /// Unsolicited frames (a redundant peer driving the same bus) are
    /// mirrored into `handler`.
    pub async fn serve<H: ProtocolHandler>(&self, handler: &H) -> ModbusResult<()>
    where
        R: Send + 'static,
    {
        let reader = self
            .reader
            .lock()
            .expect("reader mutex poisoned")
            .take()
            .ok_or_else(|| ModbusError::protocol("client serve loop already ran"))?;

        // Dedicated reader task: packet reads cannot be interleaved with the
        // action queue without losing partially accumulated frames.
        let (frames_tx, mut frames_rx) = mpsc::channel::<io::Result<Vec<u8>>>(32);
        let max_rtu = self.limits.max_rtu_size();
        let read_task = tokio::spawn(async move {
            let mut buf = vec![0u8; max_rtu];
            loop {
                match reader.read_packet(&mut buf).await {
                    Ok(n) => {
                        if frames_tx.send(Ok(buf[..n].to_vec())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = frames_tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        });

        let mut actions = self.actions_rx.lock().await;
        let mut mirror_request: Option<Pdu> = None;
        let result = loop {
            tokio::select! {
                frame = frames_rx.recv() => {
                    match frame {
                        Some(Ok(bytes)) => self.observe_idle_frame(&bytes, handler, &mut mirror_request),
                        Some(Err(e)) => break Err(ModbusError::Io(e)),
                        None => break Err(ModbusError::protocol("reader task ended")),
                    }
                }
                action = actions.recv() => {
                    let Some(action) = action else { break Ok(()) };
                    if let Err(e) = self.run_transaction(action, handler, &mut frames_rx).await {
                        break Err(e);
                    }
                }
            }
        };
        read_task.abort();
        result
    }

    /// Drive one queued transaction to completion.
    async fn run_transaction<H: ProtocolHandler>(
        &self,
        action: Action,
        handler: &H,
        frames_rx: &mut mpsc::Receiver<io::Result<Vec<u8>>>,
    ) -> ModbusResult<()> {
        let Action { header, done } = action;
        let request = match self.build_request(&header, handler) {
            Ok(request) => request,
            Err(e) => {
                let _ = done.send(Err(e));
                return Ok(());
            }
        };
        // fc is valid or build_request would have failed
        let fc = request.function()?;

        tokio::time::sleep(self.com.min_delay()).await;
        let adu = make_rtu(self.slave_id, &request);
        if let Err(e) = self.com.write(&adu).await {
            let _ = done.send(Err(ModbusError::protocol(format!(
                "request transmission failed: {e}"
            ))));
            return Err(ModbusError::Io(e));
        }
        debug!(
            "client sent {} ({} bytes) to {}",
            fc.description(),
            adu.len(),
            self.slave_id
        );

        if self.slave_id == BROADCAST_ID {
            // broadcasts are never answered; hold the line until it clears
            tokio::time::sleep(self.com.bytes_delay(adu.len()) + self.com.min_delay()).await;
            let _ = done.send(Ok(()));
            return Ok(());
        }

        let timeout = self.com.bytes_delay(adu.len()) + self.processing_time();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                frame = frames_rx.recv() => {
                    let bytes = match frame {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            let _ = done.send(Err(ModbusError::protocol("transport closed mid-transaction")));
                            return Err(ModbusError::Io(e));
                        }
                        None => {
                            let _ = done.send(Err(ModbusError::protocol("reader task ended")));
                            return Err(ModbusError::protocol("reader task ended"));
                        }
                    };
                    match self.match_reply(&request, fc, &bytes, handler) {
                        FrameVerdict::Completed(outcome) => {
                            let _ = done.send(outcome);
                            return Ok(());
                        }
                        FrameVerdict::Ignored => {}
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!("client transaction timed out after {timeout:?}");
                    let _ = done.send(Err(ModbusError::Timeout(timeout)));
                    return Ok(());
                }
            }
        }
    }

    /// Materialize the wire request for a header, pulling write payloads
    /// from the handler.
    fn build_request<H: ProtocolHandler>(&self, header: &Pdu, handler: &H) -> ModbusResult<Pdu> {
        header.validate_request_header(&self.limits)?;
        let fc = header.function()?;
        if fc.is_write() {
            let values = handler.on_read(header)?;
            header.with_request_values(&values)
        } else {
            Ok(header.clone())
        }
    }

    /// Judge one inbound frame against the pending transaction.
    fn match_reply<H: ProtocolHandler>(
        &self,
        request: &Pdu,
        fc: FunctionCode,
        bytes: &[u8],
        handler: &H,
    ) -> FrameVerdict {
        let frame = RtuFrame::new(bytes);
        let pdu = match frame.pdu(&self.limits) {
            Ok(pdu) => pdu,
            Err(ModbusError::Crc) => {
                Stats::bump(&self.com.stats().crc_errors);
                return FrameVerdict::Ignored;
            }
            Err(e) => {
                Stats::bump(&self.com.stats().other_errors);
                debug!("client dropped unusable frame: {e}");
                return FrameVerdict::Ignored;
            }
        };
        if frame.slave_id() != self.slave_id {
            Stats::bump(&self.com.stats().id_drops);
            return FrameVerdict::Ignored;
        }
        let byte = pdu.function_code().unwrap_or(0);
        let (is_exception, code) = FunctionCode::separate_error(byte);
        if code != fc.to_u8() {
            Stats::bump(&self.com.stats().other_drops);
            return FrameVerdict::Ignored;
        }
        if is_exception {
            Stats::bump(&self.com.stats().remote_errors);
            handler.on_error(request, &pdu);
            let code = pdu
                .exception_code()
                .unwrap_or(ExceptionCode::ServerDeviceFailure);
            return FrameVerdict::Completed(Err(ModbusError::RemoteException {
                function: fc.to_u8(),
                code,
            }));
        }

        if fc.is_read() {
            if pdu.as_slice() == request.as_slice() {
                // a redundant peer transmitted the same request; the reply
                // is still coming
                return FrameVerdict::Ignored;
            }
            let values = match pdu.reply_values() {
                Ok(values) => values,
                Err(e) => {
                    Stats::bump(&self.com.stats().other_drops);
                    debug!("client ignoring malformed reply: {e}");
                    return FrameVerdict::Ignored;
                }
            };
            let quantity = match request.quantity() {
                Ok(quantity) => quantity,
                Err(e) => return FrameVerdict::Completed(Err(e)),
            };
            if values.len() != payload_len(fc, quantity) {
                Stats::bump(&self.com.stats().other_drops);
                return FrameVerdict::Ignored;
            }
            match handler.on_write(request, &values) {
                Ok(()) => FrameVerdict::Completed(Ok(())),
                Err(e) => {
                    Stats::bump(&self.com.stats().other_errors);
                    FrameVerdict::Completed(Err(e))
                }
            }
        } else {
            // write reply: echo of the 5-byte request header
            if pdu.len() == 5 && pdu.as_slice() == &request.as_slice()[..5] {
                return FrameVerdict::Completed(Ok(()));
            }
            if pdu.as_slice() == request.as_slice() {
                // mirrored full request from a redundant peer
                return FrameVerdict::Ignored;
            }
            Stats::bump(&self.com.stats().other_drops);
            FrameVerdict::Ignored
        }
    }

    /// Mirror traffic observed while no transaction is pending, pairing
    /// requests with their completions so the handler sees each exchange
    /// exactly once.
    fn observe_idle_frame<H: ProtocolHandler>(
        &self,
        bytes: &[u8],
        handler: &H,
        mirror_request: &mut Option<Pdu>,
    ) {
        let frame = RtuFrame::new(bytes);
        let pdu = match frame.pdu(&self.limits) {
            Ok(pdu) => pdu,
            Err(ModbusError::Crc) => {
                Stats::bump(&self.com.stats().crc_errors);
                return;
            }
            Err(e) => {
                Stats::bump(&self.com.stats().other_errors);
                debug!("client dropped unusable idle frame: {e}");
                return;
            }
        };
        if frame.slave_id() != self.slave_id {
            Stats::bump(&self.com.stats().id_drops);
            return;
        }
        if pdu.is_exception() {
            // the peer's transaction failed; nothing to mirror
            *mirror_request = None;
            return;
        }

        if let Some(req) = mirror_request.as_ref() {
            let completed = match req.function() {
                Ok(fc) if fc.is_read() => {
                    pdu.function_code() == req.function_code()
                        && pdu.as_slice() != req.as_slice()
                }
                Ok(_) => pdu.len() == 5 && pdu.as_slice() == &req.as_slice()[..5],
                Err(_) => false,
            };
            if completed {
                let req = mirror_request.take().expect("mirror request present");
                let Ok(fc) = req.function() else { return };
                if fc.is_read() {
                    match pdu.reply_values() {
                        Ok(values) => {
                            if let Err(e) = handler.on_write(&req, &values) {
                                Stats::bump(&self.com.stats().other_errors);
                                debug!("mirror write failed: {e}");
                            }
                        }
                        Err(_) => Stats::bump(&self.com.stats().other_drops),
                    }
                } else {
                    // same call the originating peer made; the payload is
                    // already on the wire, so the result is discarded
                    if let Err(e) = handler.on_read(&req) {
                        Stats::bump(&self.com.stats().other_errors);
                        debug!("mirror read failed: {e}");
                    }
                }
                return;
            }
        }

        if pdu.validate_request(&self.limits).is_ok() {
            *mirror_request = Some(pdu);
        } else {
            Stats::bump(&self.com.stats().other_drops);
        }
    }
}

/// Drive an ordered list of request headers through a client, stopping at
/// the first failure.
///
/// Returns the number of completed transactions alongside the outcome.
pub async fn do_transactions<C: SerialContext, R: PacketReader>(
    client: &RtuClient<C, R>,
    headers: &[Pdu],
) -> (usize, ModbusResult<()>) {
    for (index, header) in headers.iter().enumerate() {
        if let Err(e) = client.do_transaction(header.clone()).await {
            debug!("transaction {}/{} failed: {e}", index + 1, headers.len());
            return (index, Err(e));
        }
    }
    (headers.len(), Ok(()))
}
