//! # Cascade Wire Format
//!
//! Fixed 45-byte handshake, then reserved-bit dispatch to one of three
//! exchanges. All integers are big-endian.
//!
//! ## Handshake (both directions)
//!
//! ```text
//! offset  size  field
//!      0     1  pstrlen   = 0x0E
//!      1    14  pstr      = "Network Coding"
//!     15     8  reserved
//!     23    20  infohash  (a generation's SHA-1)
//!     43     2  port      (sender's listening port)
//! ```
//!
//! Reserved byte meanings (value 0x01 at the given index):
//!
//! - byte 0 — alive ping: the peer answers with a handshake echoing the
//!   bit and closes.
//! - byte 1 — neighbour list: after the handshake the server sends tag
//!   `0x01`, a u32 length, and that many bytes of comma-separated
//!   `host:port` addresses.
//! - byte 2 — coded-piece stream: after the handshake the server loops
//!   `0x02` ‖ u64 |v| ‖ v ‖ u64 |p| ‖ p until it stops writing.
//!
//! The responder echoes the infohash iff it knows the generation,
//! otherwise it answers with 20 zero bytes and the caller closes.

use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use cascade_coder::piece::CodedPiece;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Protocol identifier carried in every handshake.
pub const PSTR: &[u8; 14] = b"Network Coding";

/// Length prefix of [`PSTR`].
pub const PSTRLEN: u8 = 0x0E;

/// Total handshake size on the wire.
pub const HANDSHAKE_LEN: usize = 45;

/// Reserved field width.
pub const RESERVED_LEN: usize = 8;

/// Generation identifier width (SHA-1).
pub const INFO_HASH_LEN: usize = 20;

/// Reserved byte index: alive ping.
pub const RESERVED_ALIVE: usize = 0;

/// Reserved byte index: neighbour-list request.
pub const RESERVED_NEIGHBOURS: usize = 1;

/// Reserved byte index: coded-piece stream request.
pub const RESERVED_PIECES: usize = 2;

/// Frame tag preceding a neighbour list.
pub const TAG_NEIGHBOURS: u8 = 0x01;

/// Frame tag preceding each coded piece.
pub const TAG_CODED_PIECE: u8 = 0x02;

/// Upper bound on any length-prefixed segment. A coding vector or
/// payload can never legitimately exceed one generation.
pub const MAX_SEGMENT_LEN: u64 = 1 << 27;

/// Wire-layer failures. These close the offending connection and are
/// never propagated into generation state.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad pstrlen {0:#04x}")]
    BadPstrLen(u8),

    #[error("bad protocol name")]
    BadProtocol,

    #[error("peer does not know the generation")]
    UnknownInfoHash,

    #[error("unexpected frame tag {0:#04x}")]
    UnexpectedTag(u8),

    #[error("segment of {0} bytes exceeds the frame limit")]
    SegmentTooLarge(u64),
}

// ─── Handshake ──────────────────────────────────────────────────────────────

/// The fixed-size opening message of every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub reserved: [u8; RESERVED_LEN],
    pub info_hash: [u8; INFO_HASH_LEN],
    /// The sender's *listening* port; the responder registers
    /// `(remote_ip, port)` as a peer.
    pub port: u16,
}

impl Handshake {
    fn with_flag(flag: usize, info_hash: [u8; INFO_HASH_LEN], port: u16) -> Self {
        let mut reserved = [0u8; RESERVED_LEN];
        reserved[flag] = 0x01;
        Handshake {
            reserved,
            info_hash,
            port,
        }
    }

    /// An alive ping; the infohash is irrelevant and left zeroed.
    pub fn alive(port: u16) -> Self {
        Handshake::with_flag(RESERVED_ALIVE, [0u8; INFO_HASH_LEN], port)
    }

    /// A neighbour-list request for one generation.
    pub fn neighbours(info_hash: [u8; INFO_HASH_LEN], port: u16) -> Self {
        Handshake::with_flag(RESERVED_NEIGHBOURS, info_hash, port)
    }

    /// A coded-piece stream request for one generation.
    pub fn pieces(info_hash: [u8; INFO_HASH_LEN], port: u16) -> Self {
        Handshake::with_flag(RESERVED_PIECES, info_hash, port)
    }

    /// The server's reply: reserved bytes echoed, infohash echoed iff
    /// the generation is `known` (zeroed otherwise), own listening port.
    pub fn response(&self, known: bool, port: u16) -> Self {
        Handshake {
            reserved: self.reserved,
            info_hash: if known {
                self.info_hash
            } else {
                [0u8; INFO_HASH_LEN]
            },
            port,
        }
    }

    pub fn is_alive_ping(&self) -> bool {
        self.reserved[RESERVED_ALIVE] == 0x01
    }

    pub fn wants_neighbours(&self) -> bool {
        self.reserved[RESERVED_NEIGHBOURS] == 0x01
    }

    pub fn wants_pieces(&self) -> bool {
        self.reserved[RESERVED_PIECES] == 0x01
    }

    /// A zeroed infohash echo means the responder does not carry the
    /// generation.
    pub fn knows_generation(&self) -> bool {
        self.info_hash != [0u8; INFO_HASH_LEN]
    }

    /// Serialize to the fixed wire layout.
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTRLEN;
        buf[1..15].copy_from_slice(PSTR);
        buf[15..23].copy_from_slice(&self.reserved);
        buf[23..43].copy_from_slice(&self.info_hash);
        buf[43..45].copy_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Parse the fixed wire layout.
    pub fn decode(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self, WireError> {
        if buf[0] != PSTRLEN {
            return Err(WireError::BadPstrLen(buf[0]));
        }
        if &buf[1..15] != PSTR {
            return Err(WireError::BadProtocol);
        }
        let mut reserved = [0u8; RESERVED_LEN];
        reserved.copy_from_slice(&buf[15..23]);
        let mut info_hash = [0u8; INFO_HASH_LEN];
        info_hash.copy_from_slice(&buf[23..43]);
        let port = u16::from_be_bytes([buf[43], buf[44]]);
        Ok(Handshake {
            reserved,
            info_hash,
            port,
        })
    }

    /// Read and validate a handshake from the stream.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, WireError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        reader.read_exact(&mut buf).await?;
        Handshake::decode(&buf)
    }

    /// Write the handshake to the stream.
    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), WireError> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }
}

// ─── Coded-piece frames ─────────────────────────────────────────────────────

/// Write one `0x02` coded-piece frame.
pub async fn write_coded_piece<W: AsyncWrite + Unpin>(
    writer: &mut W,
    coded_piece: &CodedPiece,
) -> Result<(), WireError> {
    let mut frame = BytesMut::with_capacity(1 + 16 + coded_piece.len());
    frame.put_u8(TAG_CODED_PIECE);
    frame.put_u64(coded_piece.vector.len() as u64);
    frame.put_slice(&coded_piece.vector);
    frame.put_u64(coded_piece.piece.len() as u64);
    frame.put_slice(&coded_piece.piece);
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read one `0x02` coded-piece frame.
pub async fn read_coded_piece<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<CodedPiece, WireError> {
    let tag = reader.read_u8().await?;
    if tag != TAG_CODED_PIECE {
        return Err(WireError::UnexpectedTag(tag));
    }
    let vector = read_segment(reader).await?;
    let piece = read_segment(reader).await?;
    Ok(CodedPiece { vector, piece })
}

async fn read_segment<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, WireError> {
    let len = reader.read_u64().await?;
    if len > MAX_SEGMENT_LEN {
        return Err(WireError::SegmentTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

// ─── Neighbour frames ───────────────────────────────────────────────────────

/// Write the `0x01` neighbour-list frame: addresses joined by commas.
pub async fn write_neighbours<W: AsyncWrite + Unpin>(
    writer: &mut W,
    addrs: &[String],
) -> Result<(), WireError> {
    let joined = addrs.join(",");
    let mut frame = BytesMut::with_capacity(5 + joined.len());
    frame.put_u8(TAG_NEIGHBOURS);
    frame.put_u32(joined.len() as u32);
    frame.put_slice(joined.as_bytes());
    writer.write_all(&frame).await?;
    Ok(())
}

/// Read the `0x01` neighbour-list frame. Empty entries are dropped.
pub async fn read_neighbours<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Vec<String>, WireError> {
    let tag = reader.read_u8().await?;
    if tag != TAG_NEIGHBOURS {
        return Err(WireError::UnexpectedTag(tag));
    }
    let len = reader.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let joined = String::from_utf8_lossy(&buf);
    Ok(joined
        .split(',')
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_layout_is_bit_exact() {
        let hs = Handshake::pieces([0xAB; 20], 0x1F90);
        let buf = hs.encode();
        assert_eq!(buf.len(), HANDSHAKE_LEN);
        assert_eq!(buf[0], 0x0E);
        assert_eq!(&buf[1..15], b"Network Coding");
        assert_eq!(buf[15], 0x00);
        assert_eq!(buf[17], 0x01);
        assert_eq!(&buf[23..43], &[0xAB; 20]);
        assert_eq!(&buf[43..45], &[0x1F, 0x90]);
    }

    #[test]
    fn handshake_round_trip() {
        for hs in [
            Handshake::alive(8080),
            Handshake::neighbours([7; 20], 9000),
            Handshake::pieces([1; 20], 65535),
        ] {
            assert_eq!(Handshake::decode(&hs.encode()).unwrap(), hs);
        }
    }

    #[test]
    fn handshake_rejects_bad_prefixes() {
        let mut buf = Handshake::alive(8080).encode();
        buf[0] = 13;
        assert!(matches!(
            Handshake::decode(&buf),
            Err(WireError::BadPstrLen(13))
        ));

        let mut buf = Handshake::alive(8080).encode();
        buf[1] = b'X';
        assert!(matches!(Handshake::decode(&buf), Err(WireError::BadProtocol)));
    }

    #[test]
    fn response_policy() {
        let request = Handshake::pieces([9; 20], 4000);
        let known = request.response(true, 8080);
        assert_eq!(known.info_hash, [9; 20]);
        assert_eq!(known.reserved, request.reserved);
        assert_eq!(known.port, 8080);
        assert!(known.knows_generation());

        let unknown = request.response(false, 8080);
        assert_eq!(unknown.info_hash, [0; 20]);
        assert!(!unknown.knows_generation());
    }

    #[tokio::test]
    async fn coded_piece_frame_round_trip() {
        let cp = CodedPiece {
            vector: vec![1, 2, 3, 4],
            piece: vec![9; 64],
        };
        let mut out = std::io::Cursor::new(Vec::new());
        write_coded_piece(&mut out, &cp).await.unwrap();
        let buf = out.into_inner();
        assert_eq!(buf[0], TAG_CODED_PIECE);
        assert_eq!(&buf[1..9], &4u64.to_be_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let parsed = read_coded_piece(&mut cursor).await.unwrap();
        assert_eq!(parsed, cp);
    }

    #[tokio::test]
    async fn coded_piece_frame_rejects_wrong_tag() {
        let mut cursor = std::io::Cursor::new(vec![0x07u8]);
        assert!(matches!(
            read_coded_piece(&mut cursor).await,
            Err(WireError::UnexpectedTag(0x07))
        ));
    }

    #[tokio::test]
    async fn coded_piece_frame_caps_segment_length() {
        let mut buf = vec![TAG_CODED_PIECE];
        buf.extend_from_slice(&(MAX_SEGMENT_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_coded_piece(&mut cursor).await,
            Err(WireError::SegmentTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn neighbour_frame_round_trip() {
        let addrs = vec!["10.0.0.1:8080".to_string(), "10.0.0.2:9000".to_string()];
        let mut out = std::io::Cursor::new(Vec::new());
        write_neighbours(&mut out, &addrs).await.unwrap();
        let buf = out.into_inner();
        assert_eq!(buf[0], TAG_NEIGHBOURS);

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_neighbours(&mut cursor).await.unwrap(), addrs);
    }

    #[tokio::test]
    async fn neighbour_frame_drops_empty_entries() {
        let mut out = std::io::Cursor::new(Vec::new());
        write_neighbours(&mut out, &[String::new()]).await.unwrap();
        let mut cursor = std::io::Cursor::new(out.into_inner());
        assert!(read_neighbours(&mut cursor).await.unwrap().is_empty());
    }
}
