//! Purpose: Record identity, payload validation, and the record-file body codec.
//! Exports: `RecordId`, `Record`, `validate_payload`, `MAX_ID_BYTES`, `DEFAULT_MAX_PAYLOAD_BYTES`.
//! Role: Everything that decides whether a put is acceptable lives here, ahead of any I/O.
//! Invariants: Payloads are JSON objects; serde_json's sorted maps make encoding deterministic.
use std::borrow::Borrow;
use std::fmt;

use serde_json::{Map, Value, json};

use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{BodyReader, BodyWriter};

pub const MAX_ID_BYTES: usize = 256;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
pub const MAX_PAYLOAD_ABS: usize = 64 * 1024 * 1024;

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(String);

impl RecordId {
    pub fn parse(value: impl Into<String>) -> Result<Self, Error> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("record id is empty"));
        }
        if value.len() > MAX_ID_BYTES {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("record id exceeds {MAX_ID_BYTES} bytes")));
        }
        if value.chars().any(char::is_control) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("record id contains control characters"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A committed record as seen by readers. Values are never mutated after
/// publication; a new version is a new `Record`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    id: RecordId,
    version: u64,
    seq: u64,
    data: Map<String, Value>,
}

impl Record {
    pub(crate) fn new(id: RecordId, version: u64, seq: u64, data: Map<String, Value>) -> Self {
        Self {
            id,
            version,
            seq,
            data,
        }
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Store-wide sequence of the mutation that produced this version.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.as_str(),
            "version": self.version,
            "data": Value::Object(self.data.clone()),
        })
    }

    pub(crate) fn encoded_payload(&self) -> Result<Vec<u8>, Error> {
        encode_payload(&self.data)
    }
}

/// Checks a payload against the store contract and returns it with its encoded form.
pub fn validate_payload(
    payload: &Value,
    max_payload_bytes: usize,
) -> Result<(Map<String, Value>, Vec<u8>), Error> {
    let Value::Object(map) = payload else {
        return Err(Error::new(ErrorKind::InvalidPayload)
            .with_message("payload must be a JSON object")
            .with_hint("Wrap scalar values in an object, e.g. {\"value\": 1}."));
    };
    let encoded = encode_payload(map)?;
    let limit = max_payload_bytes.min(MAX_PAYLOAD_ABS);
    if encoded.len() > limit {
        return Err(Error::new(ErrorKind::InvalidPayload)
            .with_message(format!("payload is {} bytes (max {limit})", encoded.len())));
    }
    Ok((map.clone(), encoded))
}

pub(crate) fn encode_payload(map: &Map<String, Value>) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(map).map_err(|err| {
        Error::new(ErrorKind::InvalidPayload)
            .with_message("payload cannot be encoded")
            .with_source(err)
    })
}

pub(crate) fn decode_payload(bytes: &[u8]) -> Result<Map<String, Value>, Error> {
    serde_json::from_slice(bytes).map_err(|err| {
        Error::new(ErrorKind::Corrupt)
            .with_message("stored payload is not a JSON object")
            .with_source(err)
    })
}

pub(crate) fn encode_record_body(id: &RecordId, version: u64, payload: &[u8]) -> Vec<u8> {
    let mut body = BodyWriter::new();
    body.put_u64(version).put_str(id.as_str()).put_bytes(payload);
    body.finish()
}

pub(crate) fn decode_record_body(body: &[u8], seq: u64) -> Result<Record, Error> {
    let mut reader = BodyReader::new(body);
    let version = reader.take_u64()?;
    let id = reader.take_str()?;
    let payload = reader.take_bytes()?;
    reader.finish()?;
    if version == 0 {
        return Err(Error::new(ErrorKind::Corrupt).with_message("record version is zero"));
    }
    let id = RecordId::parse(id).map_err(|err| err.into_kind(ErrorKind::Corrupt))?;
    let data = decode_payload(payload)?;
    Ok(Record::new(id, version, seq, data))
}
