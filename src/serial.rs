//! Serial transport abstraction and timing oracle
//!
//! [`SerialContext`] is the byte transport the engine drives: read, write,
//! close, plus the RTU timing questions (inter-frame silence, wire time for
//! n bytes) and a shared [`Stats`] block. It is implemented by [`Serial`]
//! over any async byte stream, by the failover connection wrapper, and by
//! test doubles.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::trace;

/// Monotonic per-transport counters.
///
/// Counters only move forward except through [`Stats::reset`]. Increments use
/// relaxed atomics; ordering between two distinct counters is not guaranteed.
#[derive(Debug, Default)]
pub struct Stats {
    /// Packet reads attempted.
    pub read_packets: AtomicU64,
    /// Frames dropped for CRC mismatch.
    pub crc_errors: AtomicU64,
    /// Exception replies received from the remote peer.
    pub remote_errors: AtomicU64,
    /// Validation and handler failures.
    pub other_errors: AtomicU64,
    /// Reads that delivered a valid frame plus trailing bytes.
    pub long_read_warnings: AtomicU64,
    /// Overlong reads that only validated as a whole.
    pub format_warnings: AtomicU64,
    /// Frames addressed to somebody else.
    pub id_drops: AtomicU64,
    /// Frames abandoned on inter-frame timing violations and other drops.
    pub other_drops: AtomicU64,
}

impl Stats {
    /// Reset every counter to zero.
    pub fn reset(&self) {
        self.read_packets.store(0, Ordering::Relaxed);
        self.crc_errors.store(0, Ordering::Relaxed);
        self.remote_errors.store(0, Ordering::Relaxed);
        self.other_errors.store(0, Ordering::Relaxed);
        self.long_read_warnings.store(0, Ordering::Relaxed);
        self.format_warnings.store(0, Ordering::Relaxed);
        self.id_drops.store(0, Ordering::Relaxed);
        self.other_drops.store(0, Ordering::Relaxed);
    }

    /// Total packets dropped or flagged for any reason.
    pub fn total_drops(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
            + self.remote_errors.load(Ordering::Relaxed)
            + self.other_errors.load(Ordering::Relaxed)
            + self.long_read_warnings.load(Ordering::Relaxed)
            + self.format_warnings.load(Ordering::Relaxed)
            + self.id_drops.load(Ordering::Relaxed)
            + self.other_drops.load(Ordering::Relaxed)
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "crc:{} remote:{} other:{} long:{} format:{} id:{} drops:{}",
            self.crc_errors.load(Ordering::Relaxed),
            self.remote_errors.load(Ordering::Relaxed),
            self.other_errors.load(Ordering::Relaxed),
            self.long_read_warnings.load(Ordering::Relaxed),
            self.format_warnings.load(Ordering::Relaxed),
            self.id_drops.load(Ordering::Relaxed),
            self.other_drops.load(Ordering::Relaxed),
        )
    }
}

/// Byte transport plus timing oracle, shared between reader, writer, and any
/// failover supervisor.
pub trait SerialContext: Send + Sync {
    /// Read available bytes into `buf`.
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Write all of `data`, returning the byte count.
    fn write(&self, data: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Close the transport; pending and future operations fail afterwards.
    fn close(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Required inter-frame silence for framing.
    fn min_delay(&self) -> Duration;

    /// Wire time needed to move `n` bytes.
    fn bytes_delay(&self, n: usize) -> Duration;

    /// The shared statistics block.
    fn stats(&self) -> &Stats;
}

impl<S: SerialContext> SerialContext for Arc<S> {
    fn read(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).read(buf)
    }

    fn write(&self, data: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).write(data)
    }

    fn close(&self) -> impl Future<Output = io::Result<()>> + Send {
        (**self).close()
    }

    fn min_delay(&self) -> Duration {
        (**self).min_delay()
    }

    fn bytes_delay(&self, n: usize) -> Duration {
        (**self).bytes_delay(n)
    }

    fn stats(&self) -> &Stats {
        (**self).stats()
    }
}

/// Minimum inter-frame silence: 3.5 character times (11 bits per character
/// on the wire) up to 19200 baud, a fixed 1750 µs above that.
pub fn min_delay(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > 19200 {
        return Duration::from_micros(1750);
    }
    let br = u64::from(baud_rate);
    Duration::from_nanos((11 * 7 * 1_000_000_000 + 2 * br - 1) / (2 * br))
}

/// Wire time for `n` bytes at `baud_rate` (11 bits per byte, rounded up).
pub fn bytes_delay(baud_rate: u32, n: usize) -> Duration {
    if baud_rate == 0 {
        return Duration::ZERO;
    }
    let br = u64::from(baud_rate);
    Duration::from_nanos((11 * n as u64 * 1_000_000_000 + br - 1) / br)
}

/// How long a mid-frame pause may last after a read of `n` bytes before the
/// accumulation is treated as a completed frame.
pub fn packet_cutoff_duration<S: SerialContext + ?Sized>(com: &S, n: usize) -> Duration {
    com.min_delay() + com.bytes_delay(n) * 3 / 2
}

/// [`SerialContext`] over any async byte stream.
///
/// The stream is split into independently locked halves so a blocked read
/// never starves a writer. The baud rate only feeds the timing oracle; the
/// host application configures the physical port itself.
pub struct Serial<T> {
    reader: Mutex<ReadHalf<T>>,
    writer: Mutex<WriteHalf<T>>,
    baud_rate: u32,
    stats: Stats,
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Serial<T> {
    /// Wrap an open byte stream, with `baud_rate` driving the timing oracle.
    pub fn new(stream: T, baud_rate: u32) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            baud_rate,
            stats: Stats::default(),
        }
    }

    /// The configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

#[cfg(feature = "serial")]
impl Serial<tokio_serial::SerialStream> {
    /// Open a physical serial port with 8 data bits, no parity, one stop bit.
    pub fn open(path: &str, baud_rate: u32) -> crate::error::ModbusResult<Self> {
        use crate::error::ModbusError;
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(path, baud_rate)
            .open_native_async()
            .map_err(|e| ModbusError::configuration(format!("open {path}: {e}")))?;
        Ok(Self::new(stream, baud_rate))
    }
}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialContext for Serial<T> {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.lock().await.read(buf).await?;
        trace!("serial read {} bytes", n);
        Ok(n)
    }

    async fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        trace!("serial write {:02x?}", data);
        Ok(data.len())
    }

    async fn close(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }

    fn min_delay(&self) -> Duration {
        min_delay(self.baud_rate)
    }

    fn bytes_delay(&self, n: usize) -> Duration {
        bytes_delay(self.baud_rate, n)
    }

    fn stats(&self) -> &Stats {
        &self.stats
    }
}
