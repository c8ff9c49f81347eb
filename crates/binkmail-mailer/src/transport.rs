//! Frame transport over an async byte stream.
//!
//! A thin layer that just reads and writes frames — protocol logic stays
//! in the Sans-IO [`binkmail_core::SessionMachine`]. The reader keeps its
//! partial-frame state in an internal buffer, so wrapping a read in
//! `tokio::time::timeout` can never lose bytes: cancellation between
//! polls leaves everything already read sitting in the buffer for the
//! next call.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use binkmail_proto::{Frame, ProtocolError};

/// Buffered frame reader over the read half of a connection.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a read half.
    pub fn new(inner: R) -> Self {
        Self { inner, buf: BytesMut::with_capacity(Frame::MAX_PAYLOAD + Frame::HEADER_LEN) }
    }

    /// Read the next complete frame.
    ///
    /// Cancel-safe: partially received frames stay in the internal
    /// buffer. A clean EOF (or one in the middle of a frame) surfaces as
    /// `UnexpectedEof`.
    pub async fn read_frame(&mut self) -> std::io::Result<Frame> {
        loop {
            match Frame::decode(&self.buf) {
                Ok((frame, consumed)) => {
                    let _ = self.buf.split_to(consumed);
                    return Ok(frame);
                },
                Err(ProtocolError::Truncated { .. }) => {},
                Err(err) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, err));
                },
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection",
                ));
            }
        }
    }
}

/// Frame writer over the write half of a connection.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wrap a write half.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize and fully write one frame.
    pub async fn write_frame(&mut self, frame: &Frame) -> std::io::Result<()> {
        let bytes = frame.to_bytes();
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await
    }

    /// Flush and shut the write side down.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use binkmail_proto::Command;

    use super::*;

    #[tokio::test]
    async fn frames_round_trip_over_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_write);
        let mut reader = FrameReader::new(server_read);

        let eob = Command::Eob.to_frame().unwrap();
        let data = Frame::data(&b"payload bytes"[..]).unwrap();
        writer.write_frame(&eob).await.unwrap();
        writer.write_frame(&data).await.unwrap();

        let first = reader.read_frame().await.unwrap();
        assert_eq!(first, eob);
        let second = reader.read_frame().await.unwrap();
        assert_eq!(second, data);
    }

    #[tokio::test]
    async fn timeout_does_not_lose_partial_frames() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, _sw) = tokio::io::split(server);
        let (_cr, mut client_write) = tokio::io::split(client);
        let mut reader = FrameReader::new(server_read);

        // Send only the header; the payload is still in flight.
        client_write.write_all(&[0x80, 0x03]).await.unwrap();
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(20), reader.read_frame()).await;
        assert!(timed_out.is_err());

        // The rest arrives; the read resumes from the buffered header.
        client_write.write_all(&[0x04, b'o', b'k']).await.unwrap();
        let frame =
            tokio::time::timeout(std::time::Duration::from_secs(1), reader.read_frame())
                .await
                .unwrap()
                .unwrap();
        assert!(frame.is_command);
        assert_eq!(&frame.payload[..], b"\x04ok");
    }

    #[tokio::test]
    async fn eof_surfaces_as_unexpected_eof() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, _sw) = tokio::io::split(server);
        drop(client);

        let mut reader = FrameReader::new(server_read);
        let err = reader.read_frame().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }
}
