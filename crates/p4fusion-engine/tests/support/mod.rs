//! A scripted in-memory depot for end-to-end engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use p4fusion_core::{Changelist, FileEntry};
use p4fusion_p4::{
    ClientSpec, Depot, LabelSpec, LabelSummary, P4Error, PrintSink, ServerInfo, User,
};

#[derive(Debug, Clone)]
pub struct FileSpec {
    pub depot_file: String,
    pub revision: u64,
    pub action: String,
    pub file_type: String,
    pub from: Option<(String, u64)>,
}

impl FileSpec {
    pub fn new(depot_file: &str, revision: u64, action: &str) -> Self {
        Self {
            depot_file: depot_file.to_string(),
            revision,
            action: action.to_string(),
            file_type: "text".to_string(),
            from: None,
        }
    }

    pub fn from_file(mut self, depot_file: &str, revision: u64) -> Self {
        self.from = Some((depot_file.to_string(), revision));
        self
    }

    pub fn file_type(mut self, file_type: &str) -> Self {
        self.file_type = file_type.to_string();
        self
    }
}

#[derive(Default)]
pub struct DepotScript {
    pub changes: Vec<Changelist>,
    pub files: HashMap<u64, Vec<FileSpec>>,
    /// Contents keyed by `depotFile#rev` spec.
    pub contents: HashMap<String, Vec<u8>>,
    pub users: HashMap<String, User>,
    pub print_calls: AtomicUsize,
}

impl DepotScript {
    pub fn new() -> Self {
        let mut script = Self::default();
        script.users.insert(
            "alice".to_string(),
            User {
                full_name: "Alice Aronnax".to_string(),
                email: "alice@example.com".to_string(),
            },
        );
        script
    }

    pub fn change(&mut self, number: u64, user: &str, description: &str) -> &mut Self {
        self.changes.push(Changelist {
            number,
            user: user.to_string(),
            description: description.to_string(),
            timestamp: 1_600_000_000 + number as i64,
        });
        self
    }

    pub fn file(&mut self, cl: u64, spec: FileSpec, contents: Option<&str>) -> &mut Self {
        if let Some(contents) = contents {
            self.contents.insert(
                format!("{}#{}", spec.depot_file, spec.revision),
                contents.as_bytes().to_vec(),
            );
        }
        self.files.entry(cl).or_default().push(spec);
        self
    }
}

/// One scripted depot connection; clones share the script, so per-worker
/// connections all see the same depot.
pub struct FakeDepot {
    script: Arc<DepotScript>,
}

impl FakeDepot {
    pub fn new(script: Arc<DepotScript>) -> Self {
        Self { script }
    }

    fn entries(&self, cl: u64, with_sources: bool) -> Vec<FileEntry> {
        let Some(specs) = self.script.files.get(&cl) else {
            return Vec::new();
        };
        specs
            .iter()
            .map(|spec| {
                let mut entry = FileEntry::new(
                    spec.depot_file.clone(),
                    spec.revision,
                    &spec.action,
                    &spec.file_type,
                );
                if with_sources {
                    if let Some((from_file, from_rev)) = &spec.from {
                        entry.set_from(from_file.clone(), *from_rev);
                    }
                }
                entry
            })
            .collect()
    }
}

impl Depot for FakeDepot {
    fn changes(
        &mut self,
        _path: &str,
        from_cl: Option<u64>,
        max: Option<usize>,
    ) -> Result<Vec<Changelist>, P4Error> {
        let mut changes: Vec<Changelist> = self
            .script
            .changes
            .iter()
            .filter(|c| from_cl.map(|from| c.number > from).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(max) = max {
            changes.truncate(max);
        }
        Ok(changes)
    }

    fn describe(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error> {
        Ok(self.entries(cl, false))
    }

    fn filelog(&mut self, cl: u64) -> Result<Vec<FileEntry>, P4Error> {
        Ok(self.entries(cl, true))
    }

    fn print(&mut self, specs: &[String], sink: &mut dyn PrintSink) -> Result<(), P4Error> {
        if specs.is_empty() {
            return Ok(());
        }
        self.script.print_calls.fetch_add(1, Ordering::SeqCst);
        for spec in specs {
            let contents = self.script.contents.get(spec).ok_or_else(|| {
                P4Error::Command {
                    command: "print".to_string(),
                    message: format!("{spec} - no such file(s)."),
                }
            })?;
            sink.on_stat().map_err(P4Error::Sink)?;
            // Small chunks, to exercise the streaming path.
            for chunk in contents.chunks(4) {
                sink.on_output(chunk).map_err(P4Error::Sink)?;
            }
        }
        Ok(())
    }

    fn users(&mut self) -> Result<HashMap<String, User>, P4Error> {
        Ok(self.script.users.clone())
    }

    fn info(&mut self) -> Result<ServerInfo, P4Error> {
        Ok(ServerInfo {
            timezone_minutes: 0,
        })
    }

    fn client_view(&mut self) -> Result<ClientSpec, P4Error> {
        Ok(ClientSpec {
            client: "scripted".to_string(),
            view: vec!["//depot/... //scripted/...".to_string()],
        })
    }

    fn labels(&mut self) -> Result<Vec<LabelSummary>, P4Error> {
        Ok(Vec::new())
    }

    fn label(&mut self, name: &str) -> Result<LabelSpec, P4Error> {
        Err(P4Error::Command {
            command: "label".to_string(),
            message: format!("label {name} not scripted"),
        })
    }
}
