// Record files: one framed file per record, replaced by rename and removed by unlink.
// Every durable change ends with an fsync of the containing directory.
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{self, FrameKind};
use crate::core::record::{self, Record, RecordId};

pub const RECORD_EXT: &str = "rec";
pub const TEMP_EXT: &str = "tmp";

pub(crate) fn io_error(err: io::Error, path: &Path, message: &str) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(message)
        .with_path(path)
        .with_source(err)
}

/// File name for a record. Hashing keeps arbitrary ids out of the filesystem namespace.
pub fn record_file_name(id: &RecordId) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2 + 4);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.push('.');
    hex.push_str(RECORD_EXT);
    hex
}

pub(crate) fn sync_dir(dir: &Path) -> Result<(), Error> {
    #[cfg(unix)]
    {
        File::open(dir)
            .and_then(|handle| handle.sync_all())
            .map_err(|err| io_error(err, dir, "failed to sync directory"))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Writes `bytes` to `path` through a synced temp sibling and a rename, so readers
/// and recovery only ever see the old or the new contents.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let tmp = path.with_extension(TEMP_EXT);
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .map_err(|err| io_error(err, &tmp, "failed to create temp file"))?;
    file.write_all(bytes)
        .map_err(|err| io_error(err, &tmp, "failed to write temp file"))?;
    file.sync_all()
        .map_err(|err| io_error(err, &tmp, "failed to sync temp file"))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|err| io_error(err, path, "failed to rename temp file"))?;
    // A bare file name has an empty parent, which names the current directory.
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    sync_dir(parent)?;
    Ok(())
}

#[derive(Clone, Debug)]
pub struct RecordFiles {
    dir: PathBuf,
}

impl RecordFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &RecordId) -> PathBuf {
        self.dir.join(record_file_name(id))
    }

    pub fn write(&self, id: &RecordId, version: u64, seq: u64, payload: &[u8]) -> Result<(), Error> {
        let body = record::encode_record_body(id, version, payload);
        let bytes = frame::encode_frame(FrameKind::Record, 0, seq, &body)?;
        write_atomic(&self.path_for(id), &bytes)
    }

    /// Returns whether a file was removed.
    pub fn remove(&self, id: &RecordId) -> Result<bool, Error> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                sync_dir(&self.dir)?;
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(err, &path, "failed to remove record file")),
        }
    }

    pub fn read(&self, id: &RecordId) -> Result<Option<Record>, Error> {
        let path = self.path_for(id);
        match fs::metadata(&path) {
            Ok(_) => read_record_file(&path).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err, &path, "failed to stat record file")),
        }
    }

    /// Deletes temp files left behind by an interrupted replace.
    pub fn clean_temp(&self) -> Result<usize, Error> {
        let mut removed = 0;
        for path in self.list(TEMP_EXT)? {
            fs::remove_file(&path).map_err(|err| io_error(err, &path, "failed to remove temp file"))?;
            removed += 1;
        }
        if removed > 0 {
            sync_dir(&self.dir)?;
        }
        Ok(removed)
    }

    pub fn record_paths(&self) -> Result<Vec<PathBuf>, Error> {
        self.list(RECORD_EXT)
    }

    pub fn temp_paths(&self) -> Result<Vec<PathBuf>, Error> {
        self.list(TEMP_EXT)
    }

    pub fn load_all(&self) -> Result<Vec<Record>, Error> {
        let mut records = Vec::new();
        for path in self.record_paths()? {
            records.push(load_record_file(&path)?);
        }
        Ok(records)
    }

    fn list(&self, ext: &str) -> Result<Vec<PathBuf>, Error> {
        let entries =
            fs::read_dir(&self.dir).map_err(|err| io_error(err, &self.dir, "failed to list records"))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| io_error(err, &self.dir, "failed to list records"))?;
            let path = entry.path();
            if path.extension().and_then(|value| value.to_str()) == Some(ext) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// Reads a record file and checks that its name matches the id it holds.
pub(crate) fn load_record_file(path: &Path) -> Result<Record, Error> {
    let record = read_record_file(path)?;
    let expected = record_file_name(record.id());
    if path.file_name().and_then(|name| name.to_str()) != Some(expected.as_str()) {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("record file name does not match its id")
            .with_path(path)
            .with_id(record.id().as_str()));
    }
    Ok(record)
}

pub(crate) fn read_record_file(path: &Path) -> Result<Record, Error> {
    let mut bytes = Vec::new();
    File::open(path)
        .and_then(|mut file| file.read_to_end(&mut bytes))
        .map_err(|err| io_error(err, path, "failed to read record file"))?;
    let (header, body) = frame::decode_frame(&bytes).map_err(|err| err.with_path(path))?;
    if header.kind != FrameKind::Record {
        return Err(Error::new(ErrorKind::Corrupt)
            .with_message("record file holds a non-record frame")
            .with_path(path));
    }
    record::decode_record_body(body, header.seq).map_err(|err| err.with_path(path))
}
