//! Hot-standby failover connection
//!
//! Two identical peers (two clients or two servers) share one bus; exactly
//! one is *active* and allowed to transmit at a time. [`FailoverConn`] wraps
//! the shared [`SerialContext`] as a bus tap: every frame is observed
//! through a bidirectional packet reader, writes are gated by the activation
//! state machine, and the engine above it stays oblivious.
//!
//! Activation starts false. A client peer activates when a server reply
//! answers a request it actually transmitted; a passive client that keeps
//! missing expected bus traffic promotes itself after `misses_max` silent
//! slots. A primary server promotes after `server_misses_max` client
//! requests go unanswered; a secondary server takes over when the primary's
//! replies stop. Demotion mirrors promotion: an active peer whose traffic
//! goes missing steps down, and a secondary server yields as soon as it
//! hears the primary again.

use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, info};

use crate::frame::{rtu_size_from_header, RtuFrame};
use crate::limits::SizeLimits;
use crate::reader::{PacketReader, RtuPacketReader};
use crate::serial::{SerialContext, Stats};

/// Which peer of the redundant pair this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Preferred peer; contends for the bus without extra delay.
    Primary,
    /// Standby peer; defers to the primary by `secondary_delay`.
    Secondary,
}

/// Which role of the protocol the wrapped engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The engine above is an [`RtuClient`](crate::client::RtuClient).
    Client,
    /// The engine above is an [`RtuServer`](crate::server::RtuServer).
    Server,
}

/// Default demotion/promotion miss budget.
pub const DEFAULT_MISSES_MAX: u32 = 3;
/// Default unanswered-request budget before a primary server activates.
pub const DEFAULT_SERVER_MISSES_MAX: u32 = 3;
/// Default extra wait a secondary inserts before transmitting.
pub const DEFAULT_SECONDARY_DELAY: Duration = Duration::from_millis(100);
/// Default wait for peer traffic before counting a miss.
pub const DEFAULT_MISS_DELAY: Duration = Duration::from_millis(200);

struct OwnRequest {
    function: u8,
    sent_at: Instant,
}

struct SeenRequest {
    bytes: Vec<u8>,
    at: Instant,
    answered: bool,
}

#[derive(Default)]
struct FailoverState {
    active: bool,
    misses: u32,
    /// Total requests seen with no reply from anybody (server side).
    unanswered_total: u32,
    /// The peer has been heard at least once.
    peer_seen: bool,
    last_observed: Option<Instant>,
    last_written: Option<Vec<u8>>,
    /// Client side: when we last stayed quiet for a slot we would have served.
    dropped_slot: Option<Instant>,
    /// Client side: our outstanding transmitted request.
    own_request: Option<OwnRequest>,
    /// Server side: the most recent request on the bus.
    last_request: Option<SeenRequest>,
}

/// Traffic-observing supervisor gating one peer of a redundant pair.
pub struct FailoverConn<S> {
    com: S,
    reader: RtuPacketReader<S>,
    role: Role,
    side: Side,
    limits: SizeLimits,
    /// Consecutive misses that flip the activation state.
    pub misses_max: u32,
    /// Unanswered requests before a cold primary server activates.
    pub server_misses_max: u32,
    /// Head start granted to the primary before a secondary transmits.
    pub secondary_delay: Duration,
    /// How long to wait for peer traffic before counting a miss.
    pub miss_delay: Duration,
    state: Mutex<FailoverState>,
}

impl<S: SerialContext + Clone> FailoverConn<S> {
    /// Wrap a shared serial context with standard frame sizing.
    pub fn new(com: S, role: Role, side: Side) -> Self {
        Self::new_with_limits(com, role, side, SizeLimits::new())
    }

    /// Wrap a shared serial context with explicit frame sizing.
    pub fn new_with_limits(com: S, role: Role, side: Side, limits: SizeLimits) -> Self {
        Self {
            reader: RtuPacketReader::bidirectional(com.clone(), limits),
            com,
            role,
            side,
            limits,
            misses_max: DEFAULT_MISSES_MAX,
            server_misses_max: DEFAULT_SERVER_MISSES_MAX,
            secondary_delay: DEFAULT_SECONDARY_DELAY,
            miss_delay: DEFAULT_MISS_DELAY,
            state: Mutex::new(FailoverState::default()),
        }
    }
}

impl<S: SerialContext> FailoverConn<S> {
    /// Whether this peer is currently authorized to transmit.
    pub fn is_active(&self) -> bool {
        self.state.lock().expect("failover state poisoned").active
    }

    /// The configured role of this peer.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The protocol side this connection serves.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Frame sizing shared with the engine above.
    pub fn limits(&self) -> SizeLimits {
        self.limits
    }

    fn set_active(&self, state: &mut FailoverState, active: bool) {
        if state.active != active {
            info!(
                "failover {:?} {:?} -> {}",
                self.side,
                self.role,
                if active { "active" } else { "standby" }
            );
            state.active = active;
            state.misses = 0;
        }
    }

    /// Digest one observed frame. Returns whether to pass it up.
    fn observe(&self, bytes: &[u8]) -> bool {
        let now = Instant::now();
        let frame = RtuFrame::new(bytes);
        let parses = frame.pdu(&self.limits).is_ok();
        let mut state = self.state.lock().expect("failover state poisoned");
        state.last_observed = Some(now);
        if !parses {
            // garbled, but the engine still counts it
            return true;
        }
        match self.side {
            Side::Client => {
                self.observe_as_client(&mut state, bytes);
                true
            }
            Side::Server => self.observe_as_server(&mut state, bytes, now),
        }
    }

    fn observe_as_client(&self, state: &mut FailoverState, bytes: &[u8]) {
        if state.last_written.as_deref() == Some(bytes) {
            // our own transmission echoed back by the tap
            return;
        }
        if let Some(own) = &state.own_request {
            let function = bytes.get(1).copied().unwrap_or(0) & 0x7F;
            if function == own.function {
                // the exchange we transmitted completed; we own the bus
                state.own_request = None;
                state.misses = 0;
                self.set_active(state, true);
            }
        }
    }

    /// Server-side observation. Requests pass up so both servers process
    /// them in lockstep; replies belong to the supervisor and are swallowed.
    fn observe_as_server(&self, state: &mut FailoverState, bytes: &[u8], now: Instant) -> bool {
        if state.last_written.as_deref() == Some(bytes) {
            if let Some(last) = &mut state.last_request {
                last.answered = true;
            }
            return false;
        }

        if self.classifies_as_request(state, bytes) {
            if let Some(last) = &state.last_request {
                if !last.answered && now.duration_since(last.at) > self.miss_delay {
                    state.misses += 1;
                    state.unanswered_total += 1;
                    debug!(
                        "failover server observed unanswered request ({} misses)",
                        state.misses
                    );
                    self.maybe_promote_server(state);
                }
            }
            state.last_request = Some(SeenRequest {
                bytes: bytes.to_vec(),
                at: now,
                answered: false,
            });
            return true;
        }

        // a reply: the peer is alive and serving
        if let Some(last) = &mut state.last_request {
            last.answered = true;
        }
        state.misses = 0;
        state.peer_seen = true;
        if state.active && self.role == Role::Secondary {
            // the primary is answering again; yield
            self.set_active(state, false);
        }
        false
    }

    /// Request/reply disambiguation from the server's point of view: the
    /// frame must match the server-side size prediction and validate as a
    /// request; a byte-identical repeat of an unanswered request is the
    /// echo reply of a single-element write.
    fn classifies_as_request(&self, state: &FailoverState, bytes: &[u8]) -> bool {
        if rtu_size_from_header(bytes, false, &self.limits) != bytes.len() {
            return false;
        }
        // single-element writes echo the request verbatim; a byte-identical
        // repeat of an unanswered FC05/FC06 request is its reply
        let single_write = matches!(bytes.get(1).map(|b| b & 0x7F), Some(0x05) | Some(0x06));
        if single_write {
            if let Some(last) = &state.last_request {
                if !last.answered && last.bytes == bytes {
                    return false;
                }
            }
        }
        RtuFrame::new(bytes)
            .pdu(&self.limits)
            .map(|pdu| pdu.validate_request(&self.limits).is_ok())
            .unwrap_or(false)
    }

    fn maybe_promote_server(&self, state: &mut FailoverState) {
        if state.active {
            return;
        }
        let promote = match self.role {
            Role::Primary => state.misses >= self.server_misses_max,
            Role::Secondary => {
                if state.peer_seen {
                    state.misses >= self.misses_max
                } else {
                    // never heard the primary at all; take the bus late
                    state.unanswered_total >= self.server_misses_max * 2
                }
            }
        };
        if promote {
            self.set_active(state, true);
        }
    }

    async fn write_as_client(&self, data: &[u8]) -> io::Result<usize> {
        let active_transmit = {
            let mut state = self.state.lock().expect("failover state poisoned");
            if state.active {
                // active peer demotes itself when its own exchanges keep
                // going unanswered
                if let Some(own) = &state.own_request {
                    if own.sent_at.elapsed() > self.miss_delay {
                        state.misses += 1;
                        debug!("failover client unanswered ({} misses)", state.misses);
                        if state.misses >= self.misses_max {
                            self.set_active(&mut state, false);
                        }
                    }
                }
                if state.active {
                    state.own_request = Some(OwnRequest {
                        function: data.get(1).copied().unwrap_or(0) & 0x7F,
                        sent_at: Instant::now(),
                    });
                    state.last_written = Some(data.to_vec());
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };
        if active_transmit {
            return self.com.write(data).await;
        }

        if self.role == Role::Secondary {
            sleep(self.secondary_delay).await;
        }

        let transmit = {
            let mut state = self.state.lock().expect("failover state poisoned");
            let now = Instant::now();
            // judge the previous slot we stayed quiet for
            if let Some(slot) = state.dropped_slot {
                let served = state.last_observed.map_or(false, |at| at > slot);
                if served {
                    state.misses = 0;
                } else if now.duration_since(slot) > self.miss_delay {
                    state.misses += 1;
                    debug!(
                        "failover client miss ({} of {})",
                        state.misses, self.misses_max
                    );
                    if state.misses >= self.misses_max {
                        self.set_active(&mut state, true);
                    }
                }
            }
            let quiet = state
                .last_observed
                .map_or(true, |at| now.duration_since(at) > self.miss_delay);
            if state.active || quiet {
                // promoted, or nobody is driving the bus: contend for it
                state.own_request = Some(OwnRequest {
                    function: data.get(1).copied().unwrap_or(0) & 0x7F,
                    sent_at: now,
                });
                state.last_written = Some(data.to_vec());
                state.dropped_slot = None;
                true
            } else {
                state.dropped_slot = Some(now);
                false
            }
        };
        if transmit {
            return self.com.write(data).await;
        }
        debug!("failover client write discarded (standby)");
        Ok(data.len())
    }

    async fn write_as_server(&self, data: &[u8]) -> io::Result<usize> {
        let transmit = {
            let mut state = self.state.lock().expect("failover state poisoned");
            if state.active {
                state.last_written = Some(data.to_vec());
                if let Some(last) = &mut state.last_request {
                    last.answered = true;
                }
                true
            } else {
                false
            }
        };
        if transmit {
            return self.com.write(data).await;
        }
        sleep(self.secondary_delay).await;
        debug!("failover server reply discarded (standby)");
        Ok(data.len())
    }
}

impl<S: SerialContext> PacketReader for FailoverConn<S> {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.reader.read_packet(buf).await?;
            if self.observe(&buf[..n]) {
                return Ok(n);
            }
            debug!("failover swallowed a {n} byte frame");
        }
    }
}

impl<S: SerialContext> SerialContext for FailoverConn<S> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.com.read(buf).await
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        match self.side {
            Side::Client => self.write_as_client(data).await,
            Side::Server => self.write_as_server(data).await,
        }
    }

    async fn close(&self) -> io::Result<()> {
        self.com.close().await
    }

    fn min_delay(&self) -> Duration {
        self.com.min_delay()
    }

    fn bytes_delay(&self, n: usize) -> Duration {
        self.com.bytes_delay(n)
    }

    fn stats(&self) -> &Stats {
        self.com.stats()
    }
}
