//! Framed message transport over any async byte stream
//!
//! A [`MessageReader`] reads exactly one header and then exactly the
//! announced payload before decoding, so short reads from the socket are
//! never mistaken for message boundaries.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{decode_header, decode_payload, encode_header, encode_message, HEADER_SIZE};
use crate::error::{NetworkError, Result};
use crate::protocol::Message;

/// Reads whole messages from a stream
pub struct MessageReader<R> {
    inner: R,
    messages_read: u64,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            messages_read: 0,
            bytes_read: 0,
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the peer closed the stream between frames.
    /// A stream that ends inside a frame is an
    /// [`NetworkError::IncompleteFrame`].
    pub async fn read_message(&mut self) -> Result<Option<Message>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = self.fill(&mut header).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(NetworkError::IncompleteFrame {
                expected: HEADER_SIZE,
                received: got,
            }
            .into());
        }

        let frame = decode_header(&header)?;

        let mut payload = BytesMut::zeroed(frame.len);
        let got = self.fill(&mut payload).await?;
        if got < frame.len {
            return Err(NetworkError::IncompleteFrame {
                expected: frame.len,
                received: got,
            }
            .into());
        }

        let message = decode_payload(frame.kind, payload.freeze())?;
        self.messages_read += 1;
        self.bytes_read += (HEADER_SIZE + frame.len) as u64;
        Ok(Some(message))
    }

    pub fn messages_read(&self) -> u64 {
        self.messages_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read until `buf` is full or the stream ends; returns bytes read
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .inner
                .read(&mut buf[filled..])
                .await
                .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Writes whole messages to a stream
pub struct MessageWriter<W> {
    inner: W,
    scratch: BytesMut,
    messages_sent: u64,
    bytes_sent: u64,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            scratch: BytesMut::with_capacity(1024),
            messages_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Send one message and flush it.
    ///
    /// Sample chunks are written straight from their `Bytes` without being
    /// copied into a frame buffer.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let written = match message {
            Message::SongData(chunk) => self.send_chunk(chunk).await?,
            other => {
                self.scratch.clear();
                encode_message(other, &mut self.scratch)?;
                self.inner
                    .write_all(&self.scratch)
                    .await
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
                self.scratch.len()
            }
        };

        self.inner
            .flush()
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        self.messages_sent += 1;
        self.bytes_sent += written as u64;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &Bytes) -> Result<usize> {
        let header = encode_header(crate::protocol::MessageType::SongData, chunk.len())?;
        self.inner
            .write_all(&header)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        self.inner
            .write_all(chunk)
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(HEADER_SIZE + chunk.len())
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Shut down the write half
    pub async fn close(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CodecError, Error};
    use crate::protocol::{ControlMessage, MessageType};

    #[tokio::test]
    async fn test_messages_survive_small_reads() {
        // A tiny duplex buffer forces many partial reads per frame
        let (client, server) = tokio::io::duplex(7);
        let mut writer = MessageWriter::new(client);
        let mut reader = MessageReader::new(server);

        let sent = vec![
            Message::ListResponse(vec!["one.wav".into(), "two.wav".into()]),
            Message::SongData(Bytes::from((0..=255u8).cycle().take(10_000).collect::<Vec<_>>())),
            Message::PlayControl(ControlMessage::seek(3.5)),
            Message::SongDataEnd,
        ];

        let expected = sent.clone();
        let write_task = tokio::spawn(async move {
            for message in &sent {
                writer.send(message).await.unwrap();
            }
            (writer.messages_sent(), writer.bytes_sent())
        });

        for message in expected {
            assert_eq!(reader.read_message().await.unwrap(), Some(message));
        }
        let (messages_sent, bytes_sent) = write_task.await.unwrap();
        assert_eq!(messages_sent, 4);
        assert_eq!(reader.messages_read(), 4);
        assert_eq!(reader.bytes_read(), bytes_sent);
    }

    #[tokio::test]
    async fn test_clean_close_between_frames() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = MessageWriter::new(client);
        writer.send(&Message::ListRequest).await.unwrap();
        drop(writer);

        let mut reader = MessageReader::new(server);
        assert_eq!(reader.read_message().await.unwrap(), Some(Message::ListRequest));
        assert_eq!(reader.read_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_inside_frame_is_incomplete() {
        let (mut client, server) = tokio::io::duplex(64);
        let header = encode_header(MessageType::SongRequest, 10).unwrap();
        client.write_all(&header).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let mut reader = MessageReader::new(server);
        let result = reader.read_message().await;
        assert!(matches!(
            result,
            Err(Error::Network(NetworkError::IncompleteFrame {
                expected: 10,
                received: 3
            }))
        ));
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut header = [MessageType::SongData as u8, 0, 0, 0, 0];
        header[1..].copy_from_slice(&u32::MAX.to_le_bytes());
        client.write_all(&header).await.unwrap();

        let mut reader = MessageReader::new(server);
        assert!(matches!(
            reader.read_message().await,
            Err(Error::Codec(CodecError::PayloadTooLarge { .. }))
        ));
    }
}
