// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Async length-prefixed framing over a TCP stream.
//!
//! Each accepted stream emulates one remote processor channel. Frames are
//! a u32 little-endian length followed by that many bytes.

use std::net::SocketAddr;

use rprm::transport::{check_frame_len, encode_frame, FRAME_HEADER_SIZE};
use rprm::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One accepted stream.
pub struct StreamChannel {
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_message_size: usize,
}

impl StreamChannel {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, max_message_size: usize) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            stream,
            peer_addr,
            max_message_size,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one message.
    ///
    /// Returns `Ok(None)` if the peer closed the stream between frames.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut len_buf = [0u8; FRAME_HEADER_SIZE];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = check_frame_len(u32::from_le_bytes(len_buf), self.max_message_size)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(Some(payload))
    }

    /// Send one message.
    pub async fn send_message(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(&encode_frame(payload)?).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair(max: usize) -> (StreamChannel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (StreamChannel::new(server, peer, max), client)
    }

    #[tokio::test]
    async fn test_read_and_reply() {
        let (mut channel, mut client) = pair(512).await;
        client.write_all(&encode_frame(b"ping").unwrap()).await.unwrap();

        assert_eq!(channel.read_message().await.unwrap().unwrap(), b"ping");
        channel.send_message(b"pong").await.unwrap();

        let mut reply = [0u8; 8];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &4u32.to_le_bytes());
        assert_eq!(&reply[4..], b"pong");

        drop(client);
        assert!(channel.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let (mut channel, mut client) = pair(16).await;
        client.write_all(&17u32.to_le_bytes()).await.unwrap();
        assert!(matches!(
            channel.read_message().await,
            Err(TransportError::Framing(_))
        ));
    }
}
