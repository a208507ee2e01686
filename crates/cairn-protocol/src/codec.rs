use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{RemoteMessage, MAX_MESSAGE_SIZE};

/// Codec for encoding/decoding remote execution messages.
pub struct RemoteCodec;

impl RemoteCodec {
    /// Encode a message with framing: [4 bytes len][1 byte tag][payload]
    pub fn encode(msg: &RemoteMessage) -> ProtocolResult<Vec<u8>> {
        let payload =
            bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let len = (payload.len() + 1) as u32;
        let mut buf = Vec::with_capacity(4 + 1 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.push(msg.type_tag());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a framed message. Returns (message, bytes_consumed).
    pub fn decode(data: &[u8]) -> ProtocolResult<(RemoteMessage, usize)> {
        if data.len() < 5 {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        Self::check_frame_len(len)?;
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let msg = Self::decode_body(data[4], &data[5..total])?;
        Ok((msg, total))
    }

    /// Read one framed message from a stream.
    ///
    /// A clean end of stream before the first byte is [`ProtocolError::ChannelClosed`].
    pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<RemoteMessage> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ChannelClosed)
            }
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        Self::check_frame_len(len)?;

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;
        Self::decode_body(body[0], &body[1..])
    }

    /// Write one framed message to a stream and flush it.
    pub async fn write_frame<W: AsyncWrite + Unpin>(
        writer: &mut W,
        msg: &RemoteMessage,
    ) -> ProtocolResult<()> {
        let frame = Self::encode(msg)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn check_frame_len(len: usize) -> ProtocolResult<()> {
        if len < 1 {
            return Err(ProtocolError::FramingError("zero-length frame".into()));
        }
        if len - 1 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: len - 1,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }

    fn decode_body(tag: u8, payload: &[u8]) -> ProtocolResult<RemoteMessage> {
        let msg: RemoteMessage = bincode::deserialize(payload)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        if msg.type_tag() != tag {
            return Err(ProtocolError::InvalidMessageType(tag));
        }
        Ok(msg)
    }
}
