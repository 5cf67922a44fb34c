//! Typed views over tagged output records.
//!
//! Depot paths are kept exactly as the server sent them (`%`-encoded):
//! revision specs echo them back on the wire, and the classifier decodes
//! only when deriving in-tree paths.

use std::collections::HashMap;

use p4fusion_core::{Changelist, FileEntry};
use tracing::warn;

use crate::depot::{ClientSpec, LabelSpec, LabelSummary, ServerInfo, User};
use crate::error::P4Error;
use crate::marshal::Record;

fn missing(command: &str, field: &str) -> P4Error {
    P4Error::MissingField {
        command: command.to_string(),
        field: field.to_string(),
    }
}

fn parse_number(command: &str, field: &str, value: &str) -> Result<u64, P4Error> {
    value.parse().map_err(|_| P4Error::MalformedField {
        command: command.to_string(),
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// `changes -l -s submitted -r`: one stat record per changelist, already in
/// chronological order.
pub fn changes(records: &[Record]) -> Result<Vec<Changelist>, P4Error> {
    let mut changes = Vec::with_capacity(records.len());
    for record in records.iter().filter(|r| r.code() == "stat") {
        let number = record.str_field("change").ok_or_else(|| missing("changes", "change"))?;
        let time = record.str_field("time").ok_or_else(|| missing("changes", "time"))?;
        changes.push(Changelist {
            number: parse_number("changes", "change", number)?,
            user: record.str_field("user").unwrap_or_default().to_string(),
            description: record.str_field("desc").unwrap_or_default().to_string(),
            timestamp: parse_number("changes", "time", time)? as i64,
        });
    }
    Ok(changes)
}

/// `describe -s <cl>`: a single stat record with indexed file fields.
pub fn describe(records: &[Record]) -> Result<Vec<FileEntry>, P4Error> {
    let mut files = Vec::new();
    for record in records.iter().filter(|r| r.code() == "stat") {
        for index in 0.. {
            let Some(depot_file) = record.str_field(&format!("depotFile{index}")) else {
                break;
            };
            let action = record
                .str_field(&format!("action{index}"))
                .ok_or_else(|| missing("describe", "action"))?;
            let revision = record
                .str_field(&format!("rev{index}"))
                .ok_or_else(|| missing("describe", "rev"))?;
            let file_type = record.str_field(&format!("type{index}")).unwrap_or("text");
            files.push(FileEntry::new(
                depot_file.to_string(),
                parse_number("describe", "rev", revision)?,
                action,
                file_type,
            ));
        }
    }
    Ok(files)
}

/// `filelog -c <cl> -m1 //...`: one stat record per file, with `how`/`file`
/// pairs describing integration origins.
pub fn filelog(records: &[Record]) -> Result<Vec<FileEntry>, P4Error> {
    let mut files = Vec::new();
    for record in records.iter().filter(|r| r.code() == "stat") {
        let Some(depot_file) = record.str_field("depotFile") else {
            continue;
        };
        let action = record
            .str_field("action0")
            .ok_or_else(|| missing("filelog", "action0"))?;
        let revision = record
            .str_field("rev0")
            .ok_or_else(|| missing("filelog", "rev0"))?;
        let file_type = record.str_field("type0").unwrap_or("text");
        let mut entry = FileEntry::new(
            depot_file.to_string(),
            parse_number("filelog", "rev0", revision)?,
            action,
            file_type,
        );

        // Integration origins for revision 0. A "delete from" means some
        // other branch's change deleted this path; that is a deletion here,
        // not a merge source.
        for index in 0.. {
            let Some(how) = record.str_field(&format!("how0,{index}")) else {
                break;
            };
            if how.starts_with("delete from") {
                entry.mark_merge_delete();
            } else if how.ends_with(" from") {
                let from_file = record
                    .str_field(&format!("file0,{index}"))
                    .ok_or_else(|| missing("filelog", "file0"))?;
                let from_rev = record
                    .str_field(&format!("erev0,{index}"))
                    .map(|rev| rev.trim_start_matches('#'))
                    .unwrap_or("0");
                entry.set_from(
                    from_file.to_string(),
                    parse_number("filelog", "erev0", from_rev)?,
                );
            }
        }
        files.push(entry);
    }
    Ok(files)
}

/// `users -a`: user id to author identity.
pub fn users(records: &[Record]) -> HashMap<String, User> {
    let mut map = HashMap::new();
    for record in records.iter().filter(|r| r.code() == "stat") {
        let Some(id) = record.str_field("User") else {
            continue;
        };
        map.insert(
            id.to_string(),
            User {
                full_name: record.str_field("FullName").unwrap_or(id).to_string(),
                email: record.str_field("Email").unwrap_or_default().to_string(),
            },
        );
    }
    map
}

/// `info`: extract the server timezone from `serverDate`, e.g.
/// `"2023/05/01 09:10:11 -0700 PDT"` -> -420 minutes.
pub fn info(records: &[Record]) -> Result<ServerInfo, P4Error> {
    let record = records
        .iter()
        .find(|r| r.code() == "stat")
        .ok_or_else(|| missing("info", "serverDate"))?;
    let server_date = record
        .str_field("serverDate")
        .ok_or_else(|| missing("info", "serverDate"))?;
    let offset = server_date
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| malformed_date("info", server_date))?;
    let (sign, digits) = match offset.split_at(1) {
        ("-", rest) => (-1i32, rest),
        ("+", rest) => (1, rest),
        _ => (1, offset),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed_date("info", server_date));
    }
    let hours: i32 = digits[..2]
        .parse()
        .map_err(|_| malformed_date("info", server_date))?;
    let minutes: i32 = digits[2..]
        .parse()
        .map_err(|_| malformed_date("info", server_date))?;
    Ok(ServerInfo {
        timezone_minutes: sign * (hours * 60 + minutes),
    })
}

fn malformed_date(command: &str, value: &str) -> P4Error {
    P4Error::MalformedField {
        command: command.to_string(),
        field: "serverDate".to_string(),
        value: value.to_string(),
    }
}

/// `client -o`: the workspace name and its view lines.
pub fn client(records: &[Record]) -> Result<ClientSpec, P4Error> {
    let record = records
        .iter()
        .find(|r| r.code() == "stat")
        .ok_or_else(|| missing("client", "Client"))?;
    let client = record
        .str_field("Client")
        .ok_or_else(|| missing("client", "Client"))?
        .to_string();
    let mut view = Vec::new();
    for index in 0.. {
        let Some(line) = record.str_field(&format!("View{index}")) else {
            break;
        };
        view.push(line.to_string());
    }
    if view.is_empty() {
        warn!(%client, "client spec has no view mappings");
    }
    Ok(ClientSpec { client, view })
}

/// `labels`: name plus last-update stamp, enough to drive the cache.
pub fn labels(records: &[Record]) -> Vec<LabelSummary> {
    records
        .iter()
        .filter(|r| r.code() == "stat")
        .filter_map(|record| {
            let name = record.str_field("label").or_else(|| record.str_field("Label"))?;
            Some(LabelSummary {
                name: name.to_string(),
                update: record.str_field("Update").unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// `label -o <name>`: the full label spec.
pub fn label(records: &[Record]) -> Result<LabelSpec, P4Error> {
    let record = records
        .iter()
        .find(|r| r.code() == "stat")
        .ok_or_else(|| missing("label", "Label"))?;
    let name = record
        .str_field("Label")
        .or_else(|| record.str_field("label"))
        .ok_or_else(|| missing("label", "Label"))?;
    let mut views = Vec::new();
    for index in 0.. {
        let Some(line) = record.str_field(&format!("View{index}")) else {
            break;
        };
        views.push(line.to_string());
    }
    Ok(LabelSpec {
        label: name.to_string(),
        revision: record.str_field("Revision").unwrap_or_default().to_string(),
        description: record.str_field("Description").unwrap_or_default().to_string(),
        update: record.str_field("Update").unwrap_or_default().to_string(),
        views,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use p4fusion_core::FileAction;

    #[test]
    fn parses_changes() {
        let records = vec![
            Record::from_pairs(&[
                ("code", "stat"),
                ("change", "101"),
                ("user", "alice"),
                ("desc", "first\n"),
                ("time", "1600000000"),
            ]),
            Record::from_pairs(&[
                ("code", "stat"),
                ("change", "102"),
                ("user", "bob"),
                ("desc", "second\n"),
                ("time", "1600000100"),
            ]),
        ];
        let changes = changes(&records).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].number, 101);
        assert_eq!(changes[1].user, "bob");
        assert_eq!(changes[1].timestamp, 1_600_000_100);
    }

    #[test]
    fn parses_describe_indexed_fields() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("change", "101"),
            ("depotFile0", "//d/a%40.txt"),
            ("action0", "add"),
            ("rev0", "1"),
            ("type0", "text"),
            ("depotFile1", "//d/b.bin"),
            ("action1", "edit"),
            ("rev1", "3"),
            ("type1", "binary+x"),
        ])];
        let files = describe(&records).unwrap();
        assert_eq!(files.len(), 2);
        // Encoded paths stay encoded; `print` specs echo them verbatim.
        assert_eq!(files[0].depot_file, "//d/a%40.txt");
        assert_eq!(files[0].action, FileAction::Add);
        assert!(files[1].is_binary);
        assert!(files[1].is_executable);
        assert_eq!(files[1].revision, 3);
    }

    #[test]
    fn parses_filelog_integration_source() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("depotFile", "//d/feature/a.txt"),
            ("rev0", "1"),
            ("action0", "branch"),
            ("type0", "text"),
            ("how0,0", "branch from"),
            ("file0,0", "//d/main/a.txt"),
            ("erev0,0", "#2"),
        ])];
        let files = filelog(&records).unwrap();
        assert_eq!(files[0].from_depot_file.as_deref(), Some("//d/main/a.txt"));
        assert_eq!(files[0].from_revision, Some(2));
        assert!(files[0].is_integrated());
    }

    #[test]
    fn filelog_delete_from_becomes_merge_delete() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("depotFile", "//d/feature/a.txt"),
            ("rev0", "4"),
            ("action0", "delete"),
            ("type0", "text"),
            ("how0,0", "delete from"),
            ("file0,0", "//d/main/a.txt"),
            ("erev0,0", "#3"),
        ])];
        let files = filelog(&records).unwrap();
        assert_eq!(files[0].action, FileAction::IntegrateDelete);
        assert!(files[0].is_deleted());
        assert!(!files[0].is_integrated());
        assert!(files[0].from_depot_file.is_none());
    }

    #[test]
    fn parses_info_timezone() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("serverDate", "2023/05/01 09:10:11 -0700 PDT"),
        ])];
        assert_eq!(info(&records).unwrap().timezone_minutes, -420);

        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("serverDate", "2023/05/01 09:10:11 +0530 IST"),
        ])];
        assert_eq!(info(&records).unwrap().timezone_minutes, 330);
    }

    #[test]
    fn parses_client_view() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("Client", "conv"),
            ("View0", "//depot/... //conv/..."),
            ("View1", "-//depot/x/... //conv/x/..."),
        ])];
        let spec = client(&records).unwrap();
        assert_eq!(spec.client, "conv");
        assert_eq!(spec.view.len(), 2);
    }

    #[test]
    fn parses_users_with_fallbacks() {
        let records = vec![Record::from_pairs(&[
            ("code", "stat"),
            ("User", "alice"),
            ("Email", "alice@example.com"),
            ("FullName", "Alice Aronnax"),
        ])];
        let map = users(&records);
        assert_eq!(map["alice"].full_name, "Alice Aronnax");
        assert_eq!(map["alice"].email, "alice@example.com");
    }
}
