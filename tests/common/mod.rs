//! Shared test fixtures: an in-memory fan-out bus standing in for a shared
//! RS-485 line, and counting handlers over a register array.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use relay_modbus::error::{ExceptionCode, ModbusError};
use relay_modbus::{SerialContext, SimpleHandler, Stats};

struct ReadState {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
}

/// One endpoint of a shared bus: everything written here is delivered to
/// every other endpoint, mirroring a multi-drop serial line.
pub struct MockSerial {
    name: String,
    read_state: tokio::sync::Mutex<ReadState>,
    peers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    closed: watch::Sender<bool>,
    last_written: Mutex<Vec<u8>>,
    stats: Stats,
}

impl MockSerial {
    fn new(name: &str, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            name: name.to_string(),
            read_state: tokio::sync::Mutex::new(ReadState {
                rx,
                buffer: Vec::new(),
            }),
            peers: Mutex::new(Vec::new()),
            closed,
            last_written: Mutex::new(Vec::new()),
            stats: Stats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bytes of the most recent write on this endpoint.
    pub fn last_written(&self) -> Vec<u8> {
        self.last_written.lock().unwrap().clone()
    }

    pub fn clear_last_written(&self) {
        self.last_written.lock().unwrap().clear();
    }

    fn closed_error(&self) -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, format!("{} closed", self.name))
    }
}

impl SerialContext for MockSerial {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.read_state.lock().await;
        while state.buffer.is_empty() {
            let mut closed = self.closed.subscribe();
            if *closed.borrow() {
                return Err(self.closed_error());
            }
            tokio::select! {
                message = state.rx.recv() => match message {
                    Some(bytes) => state.buffer.extend_from_slice(&bytes),
                    None => return Err(self.closed_error()),
                },
                _ = closed.changed() => return Err(self.closed_error()),
            }
        }
        let n = buf.len().min(state.buffer.len());
        buf[..n].copy_from_slice(&state.buffer[..n]);
        state.buffer.drain(..n);
        Ok(n)
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        if *self.closed.borrow() {
            return Err(self.closed_error());
        }
        *self.last_written.lock().unwrap() = data.to_vec();
        for peer in self.peers.lock().unwrap().iter() {
            let _ = peer.send(data.to_vec());
        }
        Ok(data.len())
    }

    async fn close(&self) -> io::Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }

    fn min_delay(&self) -> Duration {
        Duration::from_micros(1)
    }

    fn bytes_delay(&self, _n: usize) -> Duration {
        Duration::ZERO
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Build a bus where every endpoint hears every other endpoint (but not
/// itself), like piped multi-writers over a shared line.
pub fn bus(names: &[&str]) -> Vec<Arc<MockSerial>> {
    let mut endpoints = Vec::with_capacity(names.len());
    let mut senders = Vec::with_capacity(names.len());
    for name in names {
        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.push(Arc::new(MockSerial::new(name, rx)));
        senders.push(tx);
    }
    for (i, endpoint) in endpoints.iter().enumerate() {
        let mut peers = endpoint.peers.lock().unwrap();
        for (j, sender) in senders.iter().enumerate() {
            if i != j {
                peers.push(sender.clone());
            }
        }
    }
    endpoints
}

/// Read/write tallies of one handler, for lockstep comparisons.
#[derive(Debug, Default)]
pub struct Counts {
    pub reads: AtomicI64,
    pub writes: AtomicI64,
}

impl Counts {
    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
    }

    pub fn same(&self, other: &Counts) -> bool {
        self.reads.load(Ordering::Relaxed) == other.reads.load(Ordering::Relaxed)
            && self.writes.load(Ordering::Relaxed) == other.writes.load(Ordering::Relaxed)
    }

    pub fn same_inverted(&self, other: &Counts) -> bool {
        self.reads.load(Ordering::Relaxed) == other.writes.load(Ordering::Relaxed)
            && self.writes.load(Ordering::Relaxed) == other.reads.load(Ordering::Relaxed)
    }

    pub fn set_expected(&self, reads: i64, writes: i64) {
        self.reads.store(reads, Ordering::Relaxed);
        self.writes.store(writes, Ordering::Relaxed);
    }
}

impl std::fmt::Display for Counts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads:{} writes:{}",
            self.reads.load(Ordering::Relaxed),
            self.writes.load(Ordering::Relaxed)
        )
    }
}

/// Holding-register handler over a 100-slot array, counting every element
/// read and written.
pub fn counting_handler() -> (Arc<Mutex<Vec<u16>>>, SimpleHandler, Arc<Counts>) {
    let registers = Arc::new(Mutex::new(vec![0u16; 100]));
    let counts = Arc::new(Counts::default());

    let read_registers = registers.clone();
    let read_counts = counts.clone();
    let write_registers = registers.clone();
    let write_counts = counts.clone();

    let handler = SimpleHandler {
        read_holding_registers: Some(Box::new(move |address, quantity| {
            let store = read_registers.lock().unwrap();
            let start = address as usize;
            let end = start + quantity as usize;
            if end > store.len() {
                return Err(ModbusError::Exception(ExceptionCode::IllegalDataAddress));
            }
            read_counts
                .reads
                .fetch_add(i64::from(quantity), Ordering::Relaxed);
            Ok(store[start..end].to_vec())
        })),
        write_holding_registers: Some(Box::new(move |address, values| {
            let mut store = write_registers.lock().unwrap();
            let start = address as usize;
            if start + values.len() > store.len() {
                return Err(ModbusError::Exception(ExceptionCode::IllegalDataAddress));
            }
            write_counts
                .writes
                .fetch_add(values.len() as i64, Ordering::Relaxed);
            for (i, value) in values.into_iter().enumerate() {
                store[start + i] = value;
            }
            Ok(())
        })),
        ..Default::default()
    };

    (registers, handler, counts)
}
