//! RTU packet reassembly
//!
//! RTU delimits frames with ≥3.5 character times of silence, which most
//! transports will not report faithfully. [`RtuPacketReader`] combines
//! length prediction from the function-code catalog with a wall-clock
//! cutoff between successive reads, so one call returns exactly one ADU.
//!
//! Overread bytes are stashed for the next call; the stash is bounded by
//! the configured maximum frame size and owned by the single reader.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::debug;

use crate::constants::SMALLEST_RTU_SIZE;
use crate::crc;
use crate::frame::{rtu_bidirectional_size, rtu_size_from_header};
use crate::limits::SizeLimits;
use crate::serial::{packet_cutoff_duration, SerialContext, Stats};

/// A reader that returns one full ADU per call.
pub trait PacketReader: Send + Sync {
    /// Read exactly one ADU into `buf`, returning its length.
    fn read_packet(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl<R: PacketReader> PacketReader for Arc<R> {
    fn read_packet(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send {
        (**self).read_packet(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Reads requests (a server).
    Server,
    /// Reads replies (a client).
    Client,
    /// Reads either direction (a bus observer).
    Bidirectional,
}

#[derive(Default)]
struct ReaderState {
    stash: Vec<u8>,
    last_read_at: Option<Instant>,
}

/// Packet reassembler over a [`SerialContext`].
pub struct RtuPacketReader<S> {
    com: S,
    mode: Mode,
    limits: SizeLimits,
    state: Mutex<ReaderState>,
}

impl<S: SerialContext> RtuPacketReader<S> {
    /// Reader for the server side: incoming frames are requests.
    pub fn server(com: S, limits: SizeLimits) -> Self {
        Self::with_mode(com, Mode::Server, limits)
    }

    /// Reader for the client side: incoming frames are replies.
    pub fn client(com: S, limits: SizeLimits) -> Self {
        Self::with_mode(com, Mode::Client, limits)
    }

    /// Reader for a bus observer: frames from either peer may arrive.
    pub fn bidirectional(com: S, limits: SizeLimits) -> Self {
        Self::with_mode(com, Mode::Bidirectional, limits)
    }

    fn with_mode(com: S, mode: Mode, limits: SizeLimits) -> Self {
        Self {
            com,
            mode,
            limits,
            state: Mutex::new(ReaderState::default()),
        }
    }

    /// The underlying serial context.
    pub fn com(&self) -> &S {
        &self.com
    }

    fn expected_size(&self, header: &[u8]) -> usize {
        match self.mode {
            Mode::Server => rtu_size_from_header(header, false, &self.limits),
            Mode::Client => rtu_size_from_header(header, true, &self.limits),
            Mode::Bidirectional => rtu_bidirectional_size(header, &self.limits),
        }
    }
}

impl<S: SerialContext> PacketReader for RtuPacketReader<S> {
    async fn read_packet(&self, buf: &mut [u8]) -> io::Result<usize> {
        Stats::bump(&self.com.stats().read_packets);
        let mut state = self.state.lock().await;
        let mut expected = SMALLEST_RTU_SIZE;
        let mut read = 0;

        while read < expected {
            if read == 0 && !state.stash.is_empty() {
                let n = state.stash.len().min(buf.len());
                buf[..n].copy_from_slice(&state.stash[..n]);
                state.stash.clear();
                read = n;
            } else {
                let n = self.com.read(&mut buf[read..]).await?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed",
                    ));
                }
                let now = Instant::now();
                if read != 0 {
                    let cutoff = packet_cutoff_duration(&self.com, n);
                    let gap = state
                        .last_read_at
                        .map(|last| now.duration_since(last))
                        .unwrap_or_default();
                    if gap > cutoff {
                        // silence delimited the frame; the new bytes belong
                        // to the next one
                        debug!("read gap {gap:?} > {cutoff:?}, packet reset at {read} bytes");
                        state.stash.clear();
                        state.stash.extend_from_slice(&buf[read..read + n]);
                        state.last_read_at = Some(now);
                        Stats::bump(&self.com.stats().other_drops);
                        return Ok(read);
                    }
                }
                state.last_read_at = Some(now);
                read += n;
                if read == buf.len() {
                    return Ok(read);
                }
            }
            if read < expected {
                continue;
            }
            expected = self.expected_size(&buf[..read]);
            if expected > read {
                // let the wire deliver the remainder
                tokio::time::sleep(self.com.bytes_delay(expected - read)).await;
            }
        }

        if read > expected {
            if crc::validate(&buf[..expected]) {
                Stats::bump(&self.com.stats().long_read_warnings);
                state.stash.clear();
                state.stash.extend_from_slice(&buf[expected..read]);
                debug!("long read: {expected} of {read} bytes consumed");
                return Ok(expected);
            }
            if crc::validate(&buf[..read]) {
                Stats::bump(&self.com.stats().format_warnings);
            }
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::Serial;

    const REQUEST: &[u8] = &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87];
    const REPLY: &[u8] = &[
        0x11, 0x03, 0x06, 0xAE, 0x41, 0x56, 0x52, 0x43, 0x40, 0x49, 0xAD,
    ];

    #[tokio::test]
    async fn test_single_frame() {
        let (remote, local) = tokio::io::duplex(512);
        let remote = Serial::new(remote, 0);
        let reader = RtuPacketReader::server(Serial::new(local, 0), SizeLimits::new());

        remote.write(REQUEST).await.unwrap();
        let mut buf = [0u8; 256];
        let n = reader.read_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], REQUEST);
    }

    #[tokio::test]
    async fn test_concatenated_frames_split_via_stash() {
        let (remote, local) = tokio::io::duplex(512);
        let remote = Serial::new(remote, 0);
        let local = Serial::new(local, 0);

        let mut wire = REQUEST.to_vec();
        wire.extend_from_slice(REQUEST);
        remote.write(&wire).await.unwrap();

        let reader = RtuPacketReader::server(local, SizeLimits::new());
        let mut buf = [0u8; 256];

        let n = reader.read_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], REQUEST);
        assert_eq!(
            reader
                .com()
                .stats()
                .long_read_warnings
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );

        let n = reader.read_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], REQUEST);
    }

    #[tokio::test]
    async fn test_fragmented_frame_reassembles() {
        let (remote, local) = tokio::io::duplex(512);
        let remote = Serial::new(remote, 0);
        let reader = RtuPacketReader::client(Serial::new(local, 0), SizeLimits::new());

        let handle = tokio::spawn(async move {
            remote.write(&REPLY[..3]).await.unwrap();
            remote.write(&REPLY[3..]).await.unwrap();
        });

        let mut buf = [0u8; 256];
        let n = reader.read_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], REPLY);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_transport_errors() {
        let (remote, local) = tokio::io::duplex(512);
        let reader = RtuPacketReader::server(Serial::new(local, 0), SizeLimits::new());
        drop(remote);

        let mut buf = [0u8; 256];
        let err = reader.read_packet(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
