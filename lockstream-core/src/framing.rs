//! Length-prefix framing: `[length: u32 big-endian][payload]`.
//!
//! The length counts the payload only. Zero-length and oversize frames are
//! protocol violations that terminate the connection.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_SCRATCH_BUFFER;
use crate::error::{Error, Result};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Read one frame, blocking until it is complete.
///
/// Returns `Ok(None)` when the peer closed the stream at a frame boundary.
/// EOF in the middle of a frame is a protocol error, as is a length of zero
/// or one above `max_len`.
pub(crate) async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Option<BytesMut>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::network_with_source("frame header read failed", e)),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len == 0 || len > max_len {
        return Err(Error::protocol(format!(
            "frame length {} outside 1..={}",
            len, max_len
        )));
    }

    let mut payload = BytesMut::zeroed(len);
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::protocol(format!("stream ended inside a {}-byte frame body", len))
        } else {
            Error::network_with_source("frame body read failed", e)
        }
    })?;
    Ok(Some(payload))
}

/// Send-side batch encoder.
///
/// Messages are framed into a scratch buffer and written out one batch per
/// write call. A batch never exceeds `max_batch` unless a single framed
/// message does, in which case that message becomes its own batch in a
/// transient allocation. The retained scratch capacity stays at or below
/// [`MAX_SCRATCH_BUFFER`].
pub(crate) struct Batcher {
    scratch: BytesMut,
    max_batch: usize,
}

impl Batcher {
    pub fn new(max_batch: usize) -> Self {
        Self {
            scratch: BytesMut::with_capacity(max_batch.min(MAX_SCRATCH_BUFFER)),
            max_batch,
        }
    }

    /// Frame and write `messages` in order, then flush.
    pub async fn write_all<W>(&mut self, writer: &mut W, messages: &[Bytes]) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        for message in messages {
            let framed_len = HEADER_LEN + message.len();

            if !self.scratch.is_empty() && self.scratch.len() + framed_len > self.max_batch {
                self.flush_scratch(writer).await?;
            }

            if framed_len > self.max_batch {
                // oversize message: its own batch, allocation not retained
                let mut batch = BytesMut::with_capacity(framed_len);
                batch.put_u32(message.len() as u32);
                batch.extend_from_slice(message);
                writer
                    .write_all(&batch)
                    .await
                    .map_err(|e| Error::network_with_source("batch write failed", e))?;
            } else {
                self.scratch.put_u32(message.len() as u32);
                self.scratch.extend_from_slice(message);
            }
        }

        if !self.scratch.is_empty() {
            self.flush_scratch(writer).await?;
        }
        writer
            .flush()
            .await
            .map_err(|e| Error::network_with_source("stream flush failed", e))?;
        Ok(())
    }

    async fn flush_scratch<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer
            .write_all(&self.scratch)
            .await
            .map_err(|e| Error::network_with_source("batch write failed", e))?;
        self.scratch.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use crate::config::{MAX_MESSAGE_SIZE, MAX_SEND_BUFFER};

    /// Records each write call as a separate chunk.
    #[derive(Default)]
    struct ChunkWriter {
        chunks: Vec<Vec<u8>>,
    }

    impl AsyncWrite for ChunkWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.chunks.push(buf.to_vec());
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn message(len: usize, fill: u8) -> Bytes {
        Bytes::from(vec![fill; len])
    }

    async fn parse_stream(mut data: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(frame) = read_frame(&mut data, MAX_MESSAGE_SIZE).await.unwrap() {
            out.push(frame.freeze());
        }
        out
    }

    #[tokio::test]
    async fn test_small_messages_coalesce() {
        let mut writer = ChunkWriter::default();
        let mut batcher = Batcher::new(MAX_SEND_BUFFER);
        let messages = vec![message(100, 1), message(200, 2), message(300, 3)];

        batcher.write_all(&mut writer, &messages).await.unwrap();

        // one write for all three frames
        assert_eq!(writer.chunks.len(), 1);
        assert_eq!(writer.chunks[0].len(), 3 * HEADER_LEN + 100 + 200 + 300);

        let parsed = parse_stream(&writer.chunks[0]).await;
        assert_eq!(parsed, messages);
    }

    #[tokio::test]
    async fn test_batch_split_at_limit() {
        // 100 and 200 share a batch; 63000 forces a second one
        let mut writer = ChunkWriter::default();
        let mut batcher = Batcher::new(MAX_SEND_BUFFER);
        let messages = vec![message(100, 1), message(200, 2), message(63_000, 3)];

        batcher.write_all(&mut writer, &messages).await.unwrap();

        assert_eq!(writer.chunks.len(), 2);
        assert_eq!(writer.chunks[0].len(), 2 * HEADER_LEN + 100 + 200);
        assert_eq!(writer.chunks[1].len(), HEADER_LEN + 63_000);

        let stream: Vec<u8> = writer.chunks.concat();
        let parsed = parse_stream(&stream).await;
        assert_eq!(parsed, messages);
    }

    #[tokio::test]
    async fn test_oversize_message_gets_own_batch() {
        let mut writer = ChunkWriter::default();
        let mut batcher = Batcher::new(MAX_SEND_BUFFER);
        let big = MAX_SEND_BUFFER + 1;
        let messages = vec![message(10, 1), message(big, 2), message(10, 3)];

        batcher.write_all(&mut writer, &messages).await.unwrap();

        assert_eq!(writer.chunks.len(), 3);
        assert_eq!(writer.chunks[1].len(), HEADER_LEN + big);
        // the retained scratch never grew past its cap
        assert!(batcher.scratch.capacity() <= MAX_SCRATCH_BUFFER);
    }

    #[tokio::test]
    async fn test_read_frame_clean_close() {
        let data: &[u8] = &[];
        let mut reader = data;
        assert!(read_frame(&mut reader, MAX_MESSAGE_SIZE)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_zero_length() {
        let data: &[u8] = &[0, 0, 0, 0];
        let mut reader = data;
        assert!(matches!(
            read_frame(&mut reader, MAX_MESSAGE_SIZE).await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversize_length() {
        let len = (MAX_MESSAGE_SIZE + 1) as u32;
        let data = len.to_be_bytes().to_vec();
        let mut reader = data.as_slice();
        assert!(matches!(
            read_frame(&mut reader, MAX_MESSAGE_SIZE).await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_truncated_body() {
        let mut data = 10u32.to_be_bytes().to_vec();
        data.extend_from_slice(&[1, 2, 3]); // 3 of 10 body bytes
        let mut reader = data.as_slice();
        assert!(matches!(
            read_frame(&mut reader, MAX_MESSAGE_SIZE).await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_frame_roundtrip() {
        let mut writer = ChunkWriter::default();
        let mut batcher = Batcher::new(MAX_SEND_BUFFER);
        let messages = vec![message(1, 9), message(MAX_MESSAGE_SIZE, 8)];
        batcher.write_all(&mut writer, &messages).await.unwrap();

        let stream: Vec<u8> = writer.chunks.concat();
        assert_eq!(parse_stream(&stream).await, messages);
    }
}
