//! Framed codec for the TCP relay link.
//!
//! ```text
//! 0      4          8         12
//! ┌──────┬──────────┬─────────┬──────────────────────┐
//! │ SHT0 │ checksum │ length  │ bincode(RelayFrame)  │
//! └──────┴──────────┴─────────┴──────────────────────┘
//! ```
//!
//! All integers little-endian. `checksum` is the first four bytes of the
//! blake3 hash of the payload.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::SheetError;
use crate::relay::RelayFrame;

pub const MAGIC: [u8; 4] = *b"SHT0";
pub const HEADER_LENGTH: usize = 12;
/// Largest accepted payload.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// ── LinkHeader ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub checksum: u32,
    pub payload_length: u32,
}

impl LinkHeader {
    pub fn for_payload(payload: &[u8]) -> Self {
        Self {
            checksum: checksum(payload),
            payload_length: payload.len() as u32,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut out = [0u8; HEADER_LENGTH];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_length.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LENGTH]) -> Result<Self, SheetError> {
        if bytes[0..4] != MAGIC {
            return Err(SheetError::InvalidMagic);
        }
        Ok(Self {
            checksum: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            payload_length: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

pub fn checksum(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

// ── RelayCodec ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RelayCodec;

impl Decoder for RelayCodec {
    type Item = RelayFrame;
    type Error = SheetError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LENGTH {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_LENGTH];
        raw.copy_from_slice(&src[..HEADER_LENGTH]);
        let header = LinkHeader::from_bytes(&raw)?;

        let length = header.payload_length as usize;
        if length > MAX_PAYLOAD_SIZE {
            return Err(SheetError::FrameTooLarge {
                size: length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if src.len() < HEADER_LENGTH + length {
            src.reserve(HEADER_LENGTH + length - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LENGTH);
        let payload = src.split_to(length);
        if checksum(&payload) != header.checksum {
            return Err(SheetError::ChecksumMismatch);
        }
        Ok(Some(bincode::deserialize(&payload)?))
    }
}

impl Encoder<RelayFrame> for RelayCodec {
    type Error = SheetError;

    fn encode(&mut self, item: RelayFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&item)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(SheetError::FrameTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = LinkHeader::for_payload(&payload);
        dst.reserve(HEADER_LENGTH + payload.len());
        dst.put_slice(&header.to_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::types::ScreenSize;

    fn encoded(frame: RelayFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        RelayCodec.encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let full = encoded(RelayFrame::ScreenSize(ScreenSize::new(1920, 1080)));
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(RelayCodec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(
            RelayCodec.decode(&mut partial).unwrap(),
            Some(RelayFrame::ScreenSize(ScreenSize::new(1920, 1080)))
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut buf = encoded(RelayFrame::Control(b"{}".to_vec()));
        buf.extend_from_slice(&encoded(RelayFrame::Control(b"[]".to_vec())));
        assert_eq!(
            RelayCodec.decode(&mut buf).unwrap(),
            Some(RelayFrame::Control(b"{}".to_vec()))
        );
        assert_eq!(
            RelayCodec.decode(&mut buf).unwrap(),
            Some(RelayFrame::Control(b"[]".to_vec()))
        );
        assert!(RelayCodec.decode(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        use futures::StreamExt;
        use tokio_util::codec::FramedRead;

        let full = encoded(RelayFrame::Control(b"{\"x\":1}".to_vec()));
        let (head, tail) = full.split_at(HEADER_LENGTH + 2);
        let io = tokio_test::io::Builder::new().read(head).read(tail).build();

        let mut reader = FramedRead::new(io, RelayCodec);
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            RelayFrame::Control(b"{\"x\":1}".to_vec())
        );
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = encoded(RelayFrame::Control(vec![1]));
        buf[0] = b'X';
        assert!(matches!(
            RelayCodec.decode(&mut buf),
            Err(SheetError::InvalidMagic)
        ));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut buf = encoded(RelayFrame::Control(vec![1, 2, 3]));
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            RelayCodec.decode(&mut buf),
            Err(SheetError::ChecksumMismatch)
        ));
    }

    #[test]
    fn oversize_length_is_rejected_before_buffering() {
        let header = LinkHeader {
            checksum: 0,
            payload_length: (MAX_PAYLOAD_SIZE + 1) as u32,
        };
        let mut buf = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(
            RelayCodec.decode(&mut buf),
            Err(SheetError::FrameTooLarge { .. })
        ));
    }
}
