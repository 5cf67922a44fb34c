//! Decoder for the Python marshal (version 0) stream `p4 -G` writes to
//! stdout: a flat sequence of dictionaries whose keys are byte strings and
//! whose values are byte strings or 32-bit integers. Nothing else appears
//! in p4's tagged output, so nothing else is supported.

use std::collections::HashMap;
use std::io::Read;

use crate::error::P4Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(i32),
}

impl Value {
    /// The value as UTF-8 text; p4 field values are ASCII except file
    /// contents, which are never read through this accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            Value::Int(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            Value::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bytes(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        }
    }
}

/// One tagged output record (one marshal dictionary).
#[derive(Debug, Default)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn bytes_field(&self, key: &str) -> Option<&[u8]> {
        self.fields.get(key).and_then(Value::as_bytes)
    }

    /// The record's `code` field ("stat", "text", "binary", "error", ...).
    pub fn code(&self) -> &str {
        self.str_field("code").unwrap_or("")
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Record {
        let mut fields = HashMap::new();
        for (key, value) in pairs {
            fields.insert(key.to_string(), Value::Bytes(value.as_bytes().to_vec()));
        }
        Record { fields }
    }
}

/// Read the next dictionary off the stream; `Ok(None)` at clean EOF.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<Record>, P4Error> {
    let mut tag = [0u8; 1];
    match reader.read(&mut tag)? {
        0 => return Ok(None),
        _ => {}
    }
    if tag[0] != b'{' {
        return Err(P4Error::Protocol(format!(
            "expected a dictionary, got tag {:?}",
            tag[0] as char
        )));
    }

    let mut fields = HashMap::new();
    loop {
        let tag = read_byte(reader)?;
        if tag == b'0' {
            break;
        }
        let key = match read_value(reader, tag)? {
            Value::Bytes(bytes) => String::from_utf8(bytes)
                .map_err(|_| P4Error::Protocol("non-utf8 dictionary key".to_string()))?,
            Value::Int(v) => {
                return Err(P4Error::Protocol(format!("integer dictionary key {v}")));
            }
        };
        let tag = read_byte(reader)?;
        let value = read_value(reader, tag)?;
        fields.insert(key, value);
    }
    Ok(Some(Record { fields }))
}

/// Drain a whole stream into records.
pub fn read_all<R: Read>(reader: &mut R) -> Result<Vec<Record>, P4Error> {
    let mut records = Vec::new();
    while let Some(record) = read_record(reader)? {
        records.push(record);
    }
    Ok(records)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8, P4Error> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_value<R: Read>(reader: &mut R, tag: u8) -> Result<Value, P4Error> {
    match tag {
        b's' => {
            let mut len_buf = [0u8; 4];
            reader.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut data = vec![0u8; len];
            reader.read_exact(&mut data)?;
            Ok(Value::Bytes(data))
        }
        b'i' => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(Value::Int(i32::from_le_bytes(buf)))
        }
        other => Err(P4Error::Protocol(format!(
            "unsupported marshal tag {:?}",
            other as char
        ))),
    }
}

#[cfg(test)]
pub mod encode {
    //! Tiny encoder used by the decoder tests and the scripted test depots.

    pub fn string(out: &mut Vec<u8>, s: &[u8]) {
        out.push(b's');
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s);
    }

    pub fn int(out: &mut Vec<u8>, v: i32) {
        out.push(b'i');
        out.extend_from_slice(&v.to_le_bytes());
    }

    pub fn dict(pairs: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = vec![b'{'];
        for (key, value) in pairs {
            string(&mut out, key.as_bytes());
            string(&mut out, value);
        }
        out.push(b'0');
        out
    }
}
