//! Framed message transport over an async byte stream.
//!
//! The read and write halves of a connection are driven by separate tasks,
//! so each half gets its own type.

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

use crate::protocol::{self, Message, ProtocolResult, FRAME_HEADER_LEN};

/// Reads framed messages.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps the read half of a connection.
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_size,
        }
    }

    /// Reads the next message.
    ///
    /// Returns `None` if the peer closed the stream between two frames.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails, the stream ends inside a frame, or
    /// the frame cannot be decoded.
    pub async fn read_message(&mut self) -> ProtocolResult<Option<Message>> {
        if self.reader.fill_buf().await?.is_empty() {
            // EOF - peer closed
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        self.reader.read_exact(&mut header).await?;
        let length = u32::from_be_bytes(header) as usize;
        protocol::check_frame_length(length, self.max_frame_size)?;

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await?;
        protocol::decode(&body).map(Some)
    }

    /// Resolves once the peer closes the stream or reading fails.
    ///
    /// Stays pending while unread bytes are buffered, leaving them for
    /// [`read_message`](Self::read_message). No bytes are consumed, so the
    /// future can be dropped at any point.
    pub async fn closed(&mut self) {
        match self.reader.fill_buf().await {
            Ok(buffered) if !buffered.is_empty() => std::future::pending::<()>().await,
            _ => {}
        }
    }
}

/// Writes framed messages.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps the write half of a connection.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Buffers one message without flushing.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub async fn write_message(&mut self, message: &Message) -> ProtocolResult<()> {
        let frame = protocol::frame(message)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    /// Flushes buffered messages to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn flush(&mut self) -> ProtocolResult<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the write side.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::protocol::ProtocolError;

    #[tokio::test]
    async fn messages_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        let message = Message::GetRequest {
            id: 4,
            key: "k".to_string(),
        };
        writer.write_message(&message).await.unwrap();
        writer.write_message(&Message::PutResponse { request_id: 4 }).await.unwrap();
        writer.shutdown().await.unwrap();

        assert_eq!(reader.read_message().await.unwrap(), Some(message));
        assert_eq!(
            reader.read_message().await.unwrap(),
            Some(Message::PutResponse { request_id: 4 })
        );
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 2]).await.unwrap();
        drop(client);

        let mut reader = FrameReader::new(server, 1024);
        let err = reader.read_message().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn closed_resolves_when_the_peer_leaves() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server, 1024);
        drop(client);

        tokio::time::timeout(Duration::from_secs(5), reader.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn closed_keeps_buffered_frames() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024);

        let message = Message::PutResponse { request_id: 9 };
        writer.write_message(&message).await.unwrap();
        writer.flush().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(50), reader.closed()).await;
        assert!(waited.is_err());
        assert_eq!(reader.read_message().await.unwrap(), Some(message));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(&[0, 1, 0, 0]).await.unwrap();

        let mut reader = FrameReader::new(server, 1024);
        assert!(matches!(
            reader.read_message().await,
            Err(ProtocolError::FrameTooLarge { length: 65536, limit: 1024 })
        ));
    }
}
