// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Channel abstraction and the per-channel session.
//
// A channel carries one message at a time between the host and one remote
// processor. The physical channel is out of scope; this module ships an
// in-process loopback and a length-prefixed TCP stream emulating it.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::connection::{ConnectionId, TeardownReport};
use crate::engine::ResourceManager;

/// Size of the stream frame length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Transport-level failure. Never reported to the remote side.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("channel closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Channel trait
// ---------------------------------------------------------------------------

/// Byte-oriented, message-at-a-time transport.
pub trait Channel: Send {
    /// Next inbound message, or `None` once the peer has gone away.
    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Channel session
// ---------------------------------------------------------------------------

/// State of one channel: at most one bound connection.
///
/// Dropping the session tears the bound connection down, so losing the
/// channel releases everything the remote side held.
#[derive(Debug)]
pub struct ChannelSession {
    manager: Arc<ResourceManager>,
    bound: Option<ConnectionId>,
}

impl ChannelSession {
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        Self {
            manager,
            bound: None,
        }
    }

    pub fn bound(&self) -> Option<ConnectionId> {
        self.bound
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Process one message and return the encoded acknowledgment.
    pub fn handle(&mut self, bytes: &[u8]) -> Vec<u8> {
        self.manager.handle_message(&mut self.bound, bytes)
    }

    /// Tear down the bound connection, if any.
    pub fn close(&mut self) -> Option<TeardownReport> {
        let id = self.bound.take()?;
        match self.manager.close_connection(id) {
            Ok(report) => Some(report),
            Err(e) => {
                // Already gone, e.g. closed by a manager shutdown.
                debug!("Channel teardown of connection {}: {}", id, e);
                None
            }
        }
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Serve one channel until it closes: receive, handle, reply.
///
/// The bound connection is torn down on every exit path.
pub fn serve_channel<C: Channel>(
    manager: Arc<ResourceManager>,
    channel: &mut C,
) -> Result<(), TransportError> {
    let mut session = ChannelSession::new(manager);
    loop {
        let msg = match channel.recv() {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(e) => {
                error!("Channel receive failed: {}", e);
                session.close();
                return Err(e);
            }
        };
        let reply = session.handle(&msg);
        if let Err(e) = channel.send(&reply) {
            error!("Channel send failed: {}", e);
            session.close();
            return Err(e);
        }
    }
    if let Some(report) = session.close() {
        info!(
            "Channel closed, connection {} torn down ({} releases)",
            report.connection,
            report.attempts()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Loopback channel
// ---------------------------------------------------------------------------

/// In-process channel end backed by a crossbeam channel pair.
#[derive(Debug)]
pub struct LoopbackChannel {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl LoopbackChannel {
    /// Two connected ends: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = channel::unbounded();
        let (b_tx, a_rx) = channel::unbounded();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl Channel for LoopbackChannel {
    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.rx.recv().ok())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| TransportError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Stream framing
// ---------------------------------------------------------------------------

/// Prefix `payload` with its u32 little-endian length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TransportError::Framing(format!("{}-byte frame", payload.len())))?;
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Validate a received length prefix.
pub fn check_frame_len(len: u32, max: usize) -> Result<usize, TransportError> {
    let len = len as usize;
    if len == 0 || len > max {
        return Err(TransportError::Framing(format!(
            "frame length {} outside 1..={}",
            len, max
        )));
    }
    Ok(len)
}

/// Read one frame. `None` on a clean end of stream before a header.
pub fn read_frame<R: Read>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, TransportError> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = check_frame_len(u32::from_le_bytes(header), max)?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), TransportError> {
    writer.write_all(&encode_frame(payload)?)?;
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// TCP channel
// ---------------------------------------------------------------------------

/// Blocking TCP stream carrying length-prefixed messages.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    max_message_size: usize,
}

impl TcpChannel {
    pub fn connect<A: ToSocketAddrs>(addr: A, max_message_size: usize) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self::from_stream(stream, max_message_size))
    }

    pub fn from_stream(stream: TcpStream, max_message_size: usize) -> Self {
        // Request/ack traffic is tiny; don't let Nagle delay it.
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            max_message_size,
        }
    }
}

impl Channel for TcpChannel {
    fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        read_frame(&mut self.stream, self.max_message_size)
    }

    fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        write_frame(&mut self.stream, data)
    }
}
