//! Purpose: Durable intent journal backing the integrity guard.
//! Exports: `Journal`, `JournalScan`, `Entry`, `Intent`, `Prior`, `Op`, `RecoveryWarning`, `scan`.
//! Role: Append-only log of intents and their commit/abort markers; checkpointed to empty.
//! Invariants: Every append is fsynced before it returns; a failed append is truncated away.
//! Invariants: Scanning never fails on damaged frames; damage becomes `RecoveryWarning`s.
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::files::{io_error, write_atomic};
use crate::core::format::{self, STORE_FORMAT_VERSION};
use crate::core::frame::{self, BodyReader, BodyWriter, FRAME_HEADER_LEN, FrameHeader, FrameKind};
use crate::core::record::RecordId;

pub const JOURNAL_MAGIC: [u8; 4] = *b"RSJ1";
pub const JOURNAL_HEADER_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JournalHeader {
    pub version: u32,
    pub base_seq: u64,
}

impl JournalHeader {
    fn encode(&self) -> [u8; JOURNAL_HEADER_LEN] {
        let mut buf = [0u8; JOURNAL_HEADER_LEN];
        buf[0..4].copy_from_slice(&JOURNAL_MAGIC);
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.base_seq.to_le_bytes());
        let crc = header_crc(&buf[0..16]);
        buf[16..20].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < JOURNAL_HEADER_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("journal header too small"));
        }
        if buf[0..4] != JOURNAL_MAGIC {
            return Err(Error::new(ErrorKind::Corrupt).with_message("bad journal magic"));
        }
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&buf[16..20]);
        if u32::from_le_bytes(crc) != header_crc(&buf[0..16]) {
            return Err(Error::new(ErrorKind::Corrupt).with_message("journal header checksum mismatch"));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&buf[4..8]);
        let mut base_seq = [0u8; 8];
        base_seq.copy_from_slice(&buf[8..16]);
        Ok(Self {
            version: u32::from_le_bytes(version),
            base_seq: u64::from_le_bytes(base_seq),
        })
    }
}

fn header_crc(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Put = 1,
    Delete = 2,
}

impl Op {
    fn from_u8(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Op::Put),
            2 => Ok(Op::Delete),
            _ => Err(Error::new(ErrorKind::Corrupt).with_message("invalid intent op")),
        }
    }
}

/// The value a record held before an intent; `None` on the intent means it did not exist.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Prior {
    pub version: u64,
    pub seq: u64,
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Intent {
    pub seq: u64,
    pub op: Op,
    pub id: RecordId,
    /// Version after a put; the removed version for a delete.
    pub version: u64,
    /// Encoded payload for a put; empty for a delete.
    pub payload: Vec<u8>,
    pub prior: Option<Prior>,
}

impl Intent {
    fn encode_body(&self) -> Vec<u8> {
        let mut body = BodyWriter::new();
        body.put_u8(self.op as u8)
            .put_str(self.id.as_str())
            .put_u64(self.version)
            .put_bytes(&self.payload);
        match &self.prior {
            Some(prior) => {
                body.put_u8(1)
                    .put_u64(prior.version)
                    .put_u64(prior.seq)
                    .put_bytes(&prior.payload);
            }
            None => {
                body.put_u8(0);
            }
        }
        body.finish()
    }

    fn decode_body(seq: u64, body: &[u8]) -> Result<Self, Error> {
        let mut reader = BodyReader::new(body);
        let op = Op::from_u8(reader.take_u8()?)?;
        let id = RecordId::parse(reader.take_str()?).map_err(|err| err.into_kind(ErrorKind::Corrupt))?;
        let version = reader.take_u64()?;
        let payload = reader.take_bytes()?.to_vec();
        let prior = match reader.take_u8()? {
            0 => None,
            1 => Some(Prior {
                version: reader.take_u64()?,
                seq: reader.take_u64()?,
                payload: reader.take_bytes()?.to_vec(),
            }),
            _ => {
                return Err(Error::new(ErrorKind::Corrupt).with_message("invalid prior flag"));
            }
        };
        reader.finish()?;
        Ok(Self {
            seq,
            op,
            id,
            version,
            payload,
            prior,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entry {
    Intent(Intent),
    Commit(u64),
    Abort(u64),
}

impl Entry {
    pub fn seq(&self) -> u64 {
        match self {
            Entry::Intent(intent) => intent.seq,
            Entry::Commit(seq) | Entry::Abort(seq) => *seq,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, Error> {
        match self {
            Entry::Intent(intent) => {
                frame::encode_frame(FrameKind::Intent, 0, intent.seq, &intent.encode_body())
            }
            Entry::Commit(seq) => frame::encode_frame(FrameKind::Commit, 0, *seq, &[]),
            Entry::Abort(seq) => frame::encode_frame(FrameKind::Abort, 0, *seq, &[]),
        }
    }

    fn decode(header: &FrameHeader, body: &[u8]) -> Result<Self, Error> {
        match header.kind {
            FrameKind::Intent => Intent::decode_body(header.seq, body).map(Entry::Intent),
            FrameKind::Commit => Ok(Entry::Commit(header.seq)),
            FrameKind::Abort => Ok(Entry::Abort(header.seq)),
            FrameKind::Record => {
                Err(Error::new(ErrorKind::Corrupt).with_message("record frame inside journal"))
            }
        }
    }
}

/// Damage found while scanning the journal. Reported once at open; never fatal.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RecoveryWarning {
    pub offset: Option<u64>,
    pub seq: Option<u64>,
    pub message: String,
}

impl RecoveryWarning {
    fn at(offset: usize, seq: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            offset: Some(offset as u64),
            seq,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct JournalScan {
    pub base_seq: u64,
    pub entries: Vec<Entry>,
    pub warnings: Vec<RecoveryWarning>,
    /// Highest seq carried by the header or any intact frame.
    pub max_seq: u64,
}

impl JournalScan {
    /// Intents with neither a commit nor an abort, in journal order.
    pub fn pending(&self) -> Vec<&Intent> {
        let resolved = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Commit(seq) | Entry::Abort(seq) => Some(*seq),
                Entry::Intent(_) => None,
            })
            .collect::<std::collections::HashSet<_>>();
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Intent(intent) if !resolved.contains(&intent.seq) => Some(intent),
                _ => None,
            })
            .collect()
    }
}

pub fn scan(path: &Path) -> Result<JournalScan, Error> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut bytes)
                .map_err(|err| io_error(err, path, "failed to read journal"))?;
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("journal not found")
                .with_path(path));
        }
        Err(err) => return Err(io_error(err, path, "failed to open journal")),
    }
    scan_bytes(&bytes)
}

pub(crate) fn scan_bytes(bytes: &[u8]) -> Result<JournalScan, Error> {
    let mut scan = JournalScan::default();
    let header = match JournalHeader::decode(bytes) {
        Ok(header) => header,
        Err(err) => {
            scan.warnings.push(RecoveryWarning::at(
                0,
                None,
                format!(
                    "{}; discarding {} journal bytes",
                    err.message().unwrap_or("unreadable journal header"),
                    bytes.len()
                ),
            ));
            return Ok(scan);
        }
    };
    if !format::is_supported(header.version) {
        return Err(format::store_version_error(header.version));
    }
    scan.base_seq = header.base_seq;
    scan.max_seq = header.base_seq;

    let mut offset = JOURNAL_HEADER_LEN;
    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < FRAME_HEADER_LEN {
            scan.warnings.push(RecoveryWarning::at(
                offset,
                None,
                format!("torn frame header at journal tail ({remaining} bytes discarded)"),
            ));
            break;
        }
        let header = match FrameHeader::decode(&bytes[offset..]).and_then(|header| {
            header.validate()?;
            Ok(header)
        }) {
            Ok(header) => header,
            Err(err) => {
                scan.warnings.push(RecoveryWarning::at(
                    offset,
                    None,
                    format!(
                        "{}; discarding remaining {remaining} journal bytes",
                        err.message().unwrap_or("unreadable frame header")
                    ),
                ));
                break;
            }
        };
        let total = header.total_len();
        if total > remaining {
            scan.warnings.push(RecoveryWarning::at(
                offset,
                Some(header.seq),
                format!("torn frame at journal tail ({remaining} of {total} bytes present)"),
            ));
            break;
        }
        let body = &bytes[offset + FRAME_HEADER_LEN..offset + total];
        let decoded = frame::verify_checksum(&header, body).and_then(|()| Entry::decode(&header, body));
        match decoded {
            Ok(entry) => {
                scan.max_seq = scan.max_seq.max(entry.seq());
                scan.entries.push(entry);
            }
            Err(err) => {
                scan.warnings.push(RecoveryWarning::at(
                    offset,
                    Some(header.seq),
                    format!(
                        "{}; {:?} frame discarded",
                        err.message().unwrap_or("undecodable frame"),
                        header.kind
                    ),
                ));
            }
        }
        offset += total;
    }
    Ok(scan)
}

pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    damaged: bool,
}

impl Journal {
    /// Replaces whatever is at `path` with an empty journal starting after `base_seq`.
    pub fn create(path: impl AsRef<Path>, base_seq: u64) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let header = JournalHeader {
            version: STORE_FORMAT_VERSION,
            base_seq,
        };
        write_atomic(&path, &header.encode())?;
        Self::open_for_append(path)
    }

    fn open_for_append(path: PathBuf) -> Result<Self, Error> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|err| io_error(err, &path, "failed to open journal"))?;
        let len = file
            .seek(SeekFrom::End(0))
            .map_err(|err| io_error(err, &path, "failed to seek journal"))?;
        Ok(Self {
            path,
            file,
            len,
            damaged: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= JOURNAL_HEADER_LEN as u64
    }

    /// True once an append failed and the torn bytes could not be truncated away.
    pub fn is_damaged(&self) -> bool {
        self.damaged
    }

    pub fn append(&mut self, entry: &Entry) -> Result<(), Error> {
        if self.damaged {
            return Err(Error::new(ErrorKind::WriteFailed)
                .with_message("journal has an unrepaired torn append")
                .with_path(&self.path));
        }
        let bytes = entry.encode()?;
        let result = self.write_synced(&bytes);
        if let Err(err) = result {
            if self.truncate_to(self.len).is_err() {
                self.damaged = true;
            }
            return Err(err.with_seq(entry.seq()));
        }
        self.len += bytes.len() as u64;
        Ok(())
    }

    fn write_synced(&mut self, bytes: &[u8]) -> Result<(), Error> {
        #[cfg(test)]
        if fail_points::take_journal_failure() {
            let half = bytes.len() / 2;
            let _ = self
                .file
                .seek(SeekFrom::Start(self.len))
                .and_then(|_| self.file.write_all(&bytes[..half]));
            return Err(io_error(
                io::Error::other("injected journal failure"),
                &self.path,
                "failed to append to journal",
            ));
        }
        self.file
            .seek(SeekFrom::Start(self.len))
            .and_then(|_| self.file.write_all(bytes))
            .and_then(|()| self.file.sync_data())
            .map_err(|err| io_error(err, &self.path, "failed to append to journal"))
    }

    fn truncate_to(&mut self, len: u64) -> Result<(), Error> {
        self.file
            .set_len(len)
            .and_then(|()| self.file.sync_data())
            .and_then(|()| self.file.seek(SeekFrom::Start(len)).map(|_| ()))
            .map_err(|err| io_error(err, &self.path, "failed to truncate journal"))
    }

    /// Swaps in an empty journal whose header records `base_seq`.
    pub fn checkpoint(&mut self, base_seq: u64) -> Result<(), Error> {
        let fresh = Self::create(&self.path, base_seq)?;
        *self = fresh;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::{Entry, Intent, JOURNAL_HEADER_LEN, Journal, Op, Prior, fail_points, scan};
    use crate::core::error::ErrorKind;
    use crate::core::record::RecordId;
    use std::fs::{self, OpenOptions};
    use std::io::Write;

    fn put_intent(seq: u64, id: &str, version: u64) -> Entry {
        Entry::Intent(Intent {
            seq,
            op: Op::Put,
            id: RecordId::parse(id).unwrap(),
            version,
            payload: br#"{"v":1}"#.to_vec(),
            prior: (version > 1).then(|| Prior {
                version: version - 1,
                seq: seq - 1,
                payload: br#"{"v":0}"#.to_vec(),
            }),
        })
    }

    #[test]
    fn appended_entries_scan_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut journal = Journal::create(&path, 4).expect("create");
        journal.append(&put_intent(5, "a", 2)).expect("intent");
        journal.append(&Entry::Commit(5)).expect("commit");
        journal.append(&put_intent(6, "b", 1)).expect("intent");

        let scan = scan(&path).expect("scan");
        assert_eq!(scan.base_seq, 4);
        assert_eq!(scan.max_seq, 6);
        assert!(scan.warnings.is_empty());
        assert_eq!(scan.entries.len(), 3);
        let pending = scan.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id.as_str(), "b");
        assert_eq!(scan.entries[0], put_intent(5, "a", 2));
    }

    #[test]
    fn torn_tail_is_reported_and_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut journal = Journal::create(&path, 0).expect("create");
        journal.append(&put_intent(1, "a", 1)).expect("intent");
        let intact = journal.len();
        journal.append(&put_intent(2, "b", 1)).expect("intent");
        drop(journal);

        let file = OpenOptions::new().write(true).open(&path).expect("open");
        file.set_len(intact + 10).expect("truncate");

        let scan = scan(&path).expect("scan");
        assert_eq!(scan.entries.len(), 1);
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].offset, Some(intact));
    }

    #[test]
    fn checksum_damage_discards_only_that_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut journal = Journal::create(&path, 0).expect("create");
        journal.append(&put_intent(1, "a", 1)).expect("intent");
        let second = journal.len() as usize;
        journal.append(&Entry::Commit(1)).expect("commit");
        journal.append(&put_intent(2, "b", 1)).expect("intent");
        drop(journal);

        let mut bytes = fs::read(&path).expect("read");
        let first_body = JOURNAL_HEADER_LEN + super::FRAME_HEADER_LEN + 2;
        assert!(first_body < second);
        bytes[first_body] ^= 0x55;
        fs::write(&path, &bytes).expect("write");

        let scan = scan(&path).expect("scan");
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].seq, Some(1));
        assert_eq!(scan.entries, vec![Entry::Commit(1), put_intent(2, "b", 1)]);
    }

    #[test]
    fn garbage_header_yields_empty_scan_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(b"NOPE not a journal").expect("write");

        let scan = scan(&path).expect("scan");
        assert!(scan.entries.is_empty());
        assert_eq!(scan.warnings.len(), 1);
    }

    #[test]
    fn missing_journal_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = scan(&dir.path().join("journal.rsj")).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn failed_append_leaves_no_bytes_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut journal = Journal::create(&path, 0).expect("create");
        let before = journal.len();
        fail_points::fail_next_journal_appends(1);
        let err = journal.append(&put_intent(1, "a", 1)).expect_err("injected");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(journal.len(), before);
        assert!(!journal.is_damaged());
        journal.append(&put_intent(1, "a", 1)).expect("retry");
        assert_eq!(scan(&path).expect("scan").entries.len(), 1);
    }

    #[test]
    fn checkpoint_empties_journal_and_keeps_seq() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("journal.rsj");
        let mut journal = Journal::create(&path, 0).expect("create");
        journal.append(&put_intent(1, "a", 1)).expect("intent");
        journal.append(&Entry::Commit(1)).expect("commit");
        journal.checkpoint(1).expect("checkpoint");
        assert!(journal.is_empty());

        let scan = scan(&path).expect("scan");
        assert_eq!(scan.base_seq, 1);
        assert!(scan.entries.is_empty());
    }
}
