//! On-disk label cache, so repeated conversions only re-fetch labels whose
//! `Update` stamp moved.
//!
//! Layout: `i32 version (= 1)`, `u64 count`, then per label the four
//! length-prefixed strings `label, revision, description, update`, then
//! `u64 views_count` and the views. Little-endian throughout. A missing
//! file or a version mismatch is treated as a cold cache.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::depot::LabelSpec;

const CACHE_VERSION: i32 = 1;

pub fn read_label_cache(path: &Path) -> BTreeMap<String, LabelSpec> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no label cache");
            return BTreeMap::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not open label cache");
            return BTreeMap::new();
        }
    };
    match read_entries(&mut BufReader::new(file)) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable label cache");
            BTreeMap::new()
        }
    }
}

pub fn write_label_cache(
    path: &Path,
    labels: &BTreeMap<String, LabelSpec>,
) -> Result<(), io::Error> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&CACHE_VERSION.to_le_bytes())?;
    out.write_all(&(labels.len() as u64).to_le_bytes())?;
    for label in labels.values() {
        write_string(&mut out, &label.label)?;
        write_string(&mut out, &label.revision)?;
        write_string(&mut out, &label.description)?;
        write_string(&mut out, &label.update)?;
        out.write_all(&(label.views.len() as u64).to_le_bytes())?;
        for view in &label.views {
            write_string(&mut out, view)?;
        }
    }
    out.flush()
}

fn read_entries<R: Read>(reader: &mut R) -> Result<BTreeMap<String, LabelSpec>, io::Error> {
    let version = read_i32(reader)?;
    if version != CACHE_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("label cache version {version}, expected {CACHE_VERSION}"),
        ));
    }
    let count = read_u64(reader)?;
    let mut entries = BTreeMap::new();
    for _ in 0..count {
        let label = read_string(reader)?;
        let revision = read_string(reader)?;
        let description = read_string(reader)?;
        let update = read_string(reader)?;
        let views_count = read_u64(reader)?;
        let mut views = Vec::with_capacity(views_count.min(1024) as usize);
        for _ in 0..views_count {
            views.push(read_string(reader)?);
        }
        entries.insert(
            label.clone(),
            LabelSpec {
                label,
                revision,
                description,
                update,
                views,
            },
        );
    }
    Ok(entries)
}

fn write_string<W: Write>(out: &mut W, s: &str) -> Result<(), io::Error> {
    out.write_all(&(s.len() as u64).to_le_bytes())?;
    out.write_all(s.as_bytes())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, io::Error> {
    let len = read_u64(reader)?;
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidData, "non-utf8 string in label cache")
    })
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32, io::Error> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, io::Error> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BTreeMap<String, LabelSpec> {
        let mut labels = BTreeMap::new();
        labels.insert(
            "release-1".to_string(),
            LabelSpec {
                label: "release-1".to_string(),
                revision: "@1042".to_string(),
                description: "first release".to_string(),
                update: "2023/01/02 03:04:05".to_string(),
                views: vec!["//depot/main/...".to_string()],
            },
        );
        labels.insert(
            "nightly".to_string(),
            LabelSpec {
                label: "nightly".to_string(),
                revision: "@1100".to_string(),
                description: String::new(),
                update: "2023/02/02 03:04:05".to_string(),
                views: vec![],
            },
        );
        labels
    }

    #[test]
    fn cache_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("labels.cache");
        let labels = sample();
        write_label_cache(&path, &labels).unwrap();
        assert_eq!(read_label_cache(&path), labels);
    }

    #[test]
    fn missing_cache_is_cold() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_label_cache(&tmp.path().join("nope")).is_empty());
    }

    #[test]
    fn version_mismatch_is_cold() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("labels.cache");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2i32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(read_label_cache(&path).is_empty());
    }
}
