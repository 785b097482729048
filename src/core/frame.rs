// Frame header layout, checksums, and length-prefixed body codec shared by
// record files and the intent journal.
use crc32fast::Hasher;

use crate::core::error::{Error, ErrorKind};

pub const FRAME_MAGIC: [u8; 4] = *b"RSF1";
pub const FRAME_HEADER_LEN: usize = 40;
pub const MAX_BODY_ABS: usize = 256 * 1024 * 1024;

const CRC_OFFSET: usize = 28;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameKind {
    Record = 1,
    Intent = 2,
    Commit = 3,
    Abort = 4,
}

impl FrameKind {
    fn from_u32(value: u32) -> Result<Self, Error> {
        match value {
            1 => Ok(FrameKind::Record),
            2 => Ok(FrameKind::Intent),
            3 => Ok(FrameKind::Commit),
            4 => Ok(FrameKind::Abort),
            _ => Err(Error::new(ErrorKind::Corrupt).with_message("invalid frame kind")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: u32,
    pub body_len: u32,
    pub seq: u64,
    pub body_len_xor: u32,
    pub crc32: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, flags: u32, seq: u64, body_len: u32) -> Self {
        Self {
            kind,
            flags,
            body_len,
            seq,
            body_len_xor: body_len ^ 0xFFFF_FFFF,
            crc32: 0,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut buf = [0u8; FRAME_HEADER_LEN];
        buf[0..4].copy_from_slice(&FRAME_MAGIC);
        write_u32(&mut buf, 4, self.kind as u32);
        write_u32(&mut buf, 8, self.flags);
        write_u32(&mut buf, 12, self.body_len);
        write_u64(&mut buf, 16, self.seq);
        write_u32(&mut buf, 24, self.body_len_xor);
        write_u32(&mut buf, CRC_OFFSET, self.crc32);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("frame header too small"));
        }
        if buf[0..4] != FRAME_MAGIC {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bad frame magic"));
        }
        if buf[CRC_OFFSET + 4..FRAME_HEADER_LEN].iter().any(|byte| *byte != 0) {
            return Err(Error::new(ErrorKind::Corrupt).with_message("nonzero reserved header bytes"));
        }
        let kind = FrameKind::from_u32(read_u32(buf, 4))?;
        Ok(Self {
            kind,
            flags: read_u32(buf, 8),
            body_len: read_u32(buf, 12),
            seq: read_u64(buf, 16),
            body_len_xor: read_u32(buf, 24),
            crc32: read_u32(buf, CRC_OFFSET),
        })
    }

    /// Structural checks that do not need the body. A header that passes can be
    /// trusted for its length, which lets a scanner skip a damaged body.
    pub fn validate(&self) -> Result<(), Error> {
        if self.body_len ^ self.body_len_xor != 0xFFFF_FFFF {
            return Err(Error::new(ErrorKind::Corrupt).with_message("body length xor mismatch"));
        }
        if self.body_len as usize > MAX_BODY_ABS {
            return Err(Error::new(ErrorKind::Corrupt).with_message("body length exceeds max"));
        }
        Ok(())
    }

    pub fn total_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body_len as usize
    }
}

pub fn checksum(header: &FrameHeader, body: &[u8]) -> u32 {
    let mut unsigned = *header;
    unsigned.crc32 = 0;
    let mut hasher = Hasher::new();
    hasher.update(&unsigned.encode());
    hasher.update(body);
    hasher.finalize()
}

pub fn verify_checksum(header: &FrameHeader, body: &[u8]) -> Result<(), Error> {
    if body.len() != header.body_len as usize {
        return Err(Error::new(ErrorKind::Corrupt).with_message("truncated frame body"));
    }
    if checksum(header, body) != header.crc32 {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("frame checksum mismatch")
            .with_seq(header.seq));
    }
    Ok(())
}

pub fn encode_frame(kind: FrameKind, flags: u32, seq: u64, body: &[u8]) -> Result<Vec<u8>, Error> {
    if body.len() > MAX_BODY_ABS {
        return Err(Error::new(ErrorKind::InvalidPayload).with_message("frame body too large"));
    }
    let mut header = FrameHeader::new(kind, flags, seq, body.len() as u32);
    header.crc32 = checksum(&header, body);
    let mut out = Vec::with_capacity(header.total_len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    Ok(out)
}

/// Decodes one complete frame from `buf`, which must hold exactly the frame bytes.
pub fn decode_frame(buf: &[u8]) -> Result<(FrameHeader, &[u8]), Error> {
    let header = FrameHeader::decode(buf)?;
    header.validate()?;
    let body = &buf[FRAME_HEADER_LEN..];
    verify_checksum(&header, body)?;
    Ok((header, body))
}

#[derive(Default)]
pub struct BodyWriter {
    buf: Vec<u8>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub struct BodyReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::new(ErrorKind::Corrupt).with_message("frame body truncated"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u64(&mut self) -> Result<u64, Error> {
        Ok(read_u64(self.take(8)?, 0))
    }

    pub fn take_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = read_u32(self.take(4)?, 0) as usize;
        self.take(len)
    }

    pub fn take_str(&mut self) -> Result<&'a str, Error> {
        let bytes = self.take_bytes()?;
        std::str::from_utf8(bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("frame string is not utf-8")
                .with_source(err)
        })
    }

    pub fn finish(self) -> Result<(), Error> {
        if self.pos != self.buf.len() {
            return Err(Error::new(ErrorKind::Corrupt).with_message("trailing bytes in frame body"));
        }
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_4(buf, offset))
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_8(buf, offset))
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
