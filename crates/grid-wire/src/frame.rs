//! Stream framing — splitting a connection's byte stream into frames.
//!
//! CBOR items are self-delimiting, so frames are written back to back with
//! no length prefix. Every frame has the same fixed shape,
//! `tag(GRID_TAG) [field, field]`, so the reader checks the tag and array
//! heads as soon as they arrive and only needs the two field heads to know
//! where the frame ends. The complete slice then goes to [`decode`].

use crate::error::WireError;
use crate::message::{decode, encode, Message, FIELD_COUNT, FIELD_NAMES, GRID_TAG};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Bytes reserved in the read buffer before each read.
const READ_CHUNK: usize = 8 * 1024;

const MAJOR_BYTES: u8 = 2;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_TAG: u8 = 6;

/// CBOR `null`, accepted in place of an empty field.
const NULL: u8 = 0xf6;

/// Length of the grid frame at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` holds only a prefix of a frame. Input that
/// cannot be the start of a grid frame fails as soon as the offending head
/// is buffered, and fields that declare more than [`MAX_FRAME_SIZE`] bytes
/// fail before any of their content arrives. Indefinite-length arrays and
/// byte strings are rejected; encoders of this format never produce them.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, WireError> {
    let Some(&initial) = buf.first() else {
        return Ok(None);
    };
    if initial >> 5 != MAJOR_TAG {
        return Err(WireError::NotTagged);
    }
    let Some(tag) = read_head(buf, 0)? else {
        return Ok(None);
    };
    match tag.arg {
        Some(GRID_TAG) => {}
        Some(found) => {
            return Err(WireError::TagMismatch {
                expected: GRID_TAG,
                found,
            })
        }
        None => return Err(WireError::Malformed("indefinite tag head".to_string())),
    }

    let Some(&content) = buf.get(tag.next) else {
        return Ok(None);
    };
    if content >> 5 != MAJOR_ARRAY {
        return Err(WireError::NotAnArray);
    }
    let Some(array) = read_head(buf, tag.next)? else {
        return Ok(None);
    };
    match array.arg {
        Some(count) if count == FIELD_COUNT as u64 => {}
        Some(count) => {
            return Err(WireError::Arity {
                expected: FIELD_COUNT,
                found: usize::try_from(count).unwrap_or(usize::MAX),
            })
        }
        None => {
            return Err(WireError::Malformed(
                "indefinite-length array".to_string(),
            ))
        }
    }

    let mut cursor = array.next;
    for field in FIELD_NAMES {
        match field_end(buf, cursor, field)? {
            Some(end) => cursor = end,
            None => return Ok(None),
        }
    }
    Ok(Some(cursor))
}

/// A decoded item head: argument (`None` = indefinite length) and the
/// offset just past the head.
struct Head {
    arg: Option<u64>,
    next: usize,
}

fn read_head(buf: &[u8], pos: usize) -> Result<Option<Head>, WireError> {
    let Some(&initial) = buf.get(pos) else {
        return Ok(None);
    };
    let info = initial & 0x1f;
    let width = match info {
        0..=23 => 0,
        24 => 1,
        25 => 2,
        26 => 4,
        27 => 8,
        31 => {
            return Ok(Some(Head {
                arg: None,
                next: pos + 1,
            }))
        }
        _ => {
            return Err(WireError::Malformed(format!(
                "reserved additional information {info} at offset {pos}"
            )))
        }
    };
    let start = pos + 1;
    let end = start + width;
    if buf.len() < end {
        return Ok(None);
    }
    let arg = if width == 0 {
        u64::from(info)
    } else {
        buf[start..end]
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
    };
    Ok(Some(Head {
        arg: Some(arg),
        next: end,
    }))
}

fn check_size(end: u64) -> Result<usize, WireError> {
    if end > MAX_FRAME_SIZE as u64 {
        return Err(WireError::FrameTooLarge {
            size: end,
            max: MAX_FRAME_SIZE as u64,
        });
    }
    Ok(end as usize)
}

/// End offset of the byte-string (or null) field starting at `pos`.
fn field_end(buf: &[u8], pos: usize, field: &'static str) -> Result<Option<usize>, WireError> {
    let Some(&initial) = buf.get(pos) else {
        return Ok(None);
    };
    if initial == NULL {
        return Ok(Some(pos + 1));
    }
    if initial >> 5 != MAJOR_BYTES {
        return Err(WireError::FieldType { field });
    }
    let Some(head) = read_head(buf, pos)? else {
        return Ok(None);
    };
    let Some(len) = head.arg else {
        return Err(WireError::Malformed(format!(
            "indefinite-length {field} field"
        )));
    };
    let end = check_size((head.next as u64).saturating_add(len))?;
    Ok((end <= buf.len()).then_some(end))
}

/// Reads consecutive frames from one connection.
///
/// Bytes that arrive past the end of a frame are kept for the next call,
/// so several frames per read, or one frame over many reads, both work.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames and
    /// [`WireError::Truncated`] when it ends inside one. Cancel safe: bytes
    /// already read stay buffered if the future is dropped.
    pub async fn next_message(&mut self) -> Result<Option<Message>, WireError> {
        loop {
            if !self.buf.is_empty() {
                if let Some(len) = frame_len(&self.buf)? {
                    let frame = self.buf.split_to(len);
                    trace!(len, "Frame complete");
                    return decode(&frame).map(Some);
                }
                if self.buf.len() >= MAX_FRAME_SIZE {
                    return Err(WireError::FrameTooLarge {
                        size: self.buf.len() as u64,
                        max: MAX_FRAME_SIZE as u64,
                    });
                }
            }

            self.buf.reserve(READ_CHUNK);
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(WireError::Truncated);
            }
        }
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Encode and write one frame, then flush.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(msgs: &[Message]) -> Vec<u8> {
        msgs.iter().flat_map(|m| encode(m).unwrap()).collect()
    }

    #[test]
    fn test_frame_len_complete_and_partial() {
        let bytes = encode(&Message::new(b"p".to_vec(), b"payload".to_vec())).unwrap();
        assert_eq!(frame_len(&bytes).unwrap(), Some(bytes.len()));
        for end in 0..bytes.len() {
            assert_eq!(frame_len(&bytes[..end]).unwrap(), None, "prefix {end}");
        }

        let mut two = bytes.clone();
        two.extend_from_slice(&bytes);
        assert_eq!(frame_len(&two).unwrap(), Some(bytes.len()));
    }

    /// `tag(GRID_TAG)` followed by `rest`.
    fn tagged(rest: &[u8]) -> Vec<u8> {
        let mut data = vec![0xDA, 0x67, 0x72, 0x69, 0x64];
        data.extend_from_slice(rest);
        data
    }

    #[test]
    fn test_frame_len_null_fields() {
        let data = tagged(&[0x82, 0xF6, 0x41, 0x01, 0x00]);
        assert_eq!(frame_len(&data).unwrap(), Some(data.len() - 1));
    }

    #[test]
    fn test_frame_len_rejects_wrong_shape_from_heads() {
        // Large untagged array: rejected on the first byte.
        assert!(matches!(
            frame_len(&[0x9A, 0x00, 0x40, 0x00, 0x00]),
            Err(WireError::NotTagged)
        ));
        assert!(matches!(frame_len(&[0x00]), Err(WireError::NotTagged)));
        // Wrong tag number, content not yet received.
        assert!(matches!(
            frame_len(&[0xC1]),
            Err(WireError::TagMismatch { found: 1, .. })
        ));
        assert!(matches!(frame_len(&tagged(&[0xA0])), Err(WireError::NotAnArray)));
        assert!(matches!(
            frame_len(&tagged(&[0x9A, 0x00, 0x40, 0x00, 0x00])),
            Err(WireError::Arity {
                expected: 2,
                found: 0x40_0000
            })
        ));
        assert!(matches!(
            frame_len(&tagged(&[0x82, 0x61])),
            Err(WireError::FieldType { field: "protocol" })
        ));
        assert!(matches!(
            frame_len(&tagged(&[0x82, 0x40, 0x01])),
            Err(WireError::FieldType { field: "payload" })
        ));
    }

    #[test]
    fn test_frame_len_rejects_indefinite_lengths() {
        assert!(matches!(
            frame_len(&tagged(&[0x9F, 0x40, 0x40, 0xFF])),
            Err(WireError::Malformed(_))
        ));
        assert!(matches!(
            frame_len(&tagged(&[0x82, 0x5F, 0x41, 0x01, 0xFF, 0x40])),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn test_frame_len_rejects_oversized_declaration() {
        // bytes(2^32) declared with only the head present
        let data = tagged(&[0x82, 0x5B, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            frame_len(&data),
            Err(WireError::FrameTooLarge { .. })
        ));
        let huge = tagged(&[0x82, 0x40, 0x5B, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            frame_len(&huge),
            Err(WireError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_len_rejects_reserved_info() {
        assert!(matches!(frame_len(&[0xDC]), Err(WireError::Malformed(_))));
        assert!(matches!(
            frame_len(&tagged(&[0x9C])),
            Err(WireError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_junk_rejected_before_stream_ends() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client
            .write_all(&[0x9A, 0x00, 0x40, 0x00, 0x00])
            .await
            .unwrap();
        client.write_all(&[0u8; 4096]).await.unwrap();

        // The writer stays open, so only the first heads can decide.
        let mut reader = FrameReader::new(server);
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), reader.next_message())
            .await
            .expect("junk was not rejected while the stream was open");
        assert!(matches!(result, Err(WireError::NotTagged)));
        drop(client);
    }

    #[tokio::test]
    async fn test_reads_frames_in_order() {
        let msgs = vec![
            Message::new(b"a".to_vec(), b"1".to_vec()),
            Message::new(b"b".to_vec(), Vec::new()),
            Message::new(b"a".to_vec(), b"3".to_vec()),
        ];
        let data = frames(&msgs);
        let mut reader = FrameReader::new(&data[..]);
        for expected in &msgs {
            assert_eq!(reader.next_message().await.unwrap().as_ref(), Some(expected));
        }
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let msg = Message::new(b"split".to_vec(), vec![7u8; 40]);
        let data = encode(&msg).unwrap();
        let mock = tokio_test::io::Builder::new()
            .read(&data[..1])
            .read(&data[1..6])
            .read(&data[6..20])
            .read(&data[20..])
            .build();
        let mut reader = FrameReader::new(mock);
        assert_eq!(reader.next_message().await.unwrap(), Some(msg));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_truncated() {
        let data = encode(&Message::new(b"p".to_vec(), b"cut short".to_vec())).unwrap();
        let mut reader = FrameReader::new(&data[..data.len() - 3]);
        assert!(matches!(
            reader.next_message().await,
            Err(WireError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_bad_frame_after_good_one() {
        let mut data = encode(&Message::new(b"ok".to_vec(), Vec::new())).unwrap();
        data.extend_from_slice(&[0xDA, 0x00, 0x00, 0x00, 0x01, 0x82, 0x40, 0x40]);
        let mut reader = FrameReader::new(&data[..]);
        assert!(reader.next_message().await.unwrap().is_some());
        assert!(matches!(
            reader.next_message().await,
            Err(WireError::TagMismatch { found: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (mut client, server) = tokio::io::duplex(64);
        let msg = Message::new(b"duplex".to_vec(), vec![1u8; 200]);
        let sent = msg.clone();
        let writer = tokio::spawn(async move {
            write_message(&mut client, &sent).await.unwrap();
        });
        let mut reader = FrameReader::new(server);
        assert_eq!(reader.next_message().await.unwrap(), Some(msg));
        writer.await.unwrap();
        assert!(reader.next_message().await.unwrap().is_none());
        assert_eq!(reader.buffered(), 0);
    }
}
